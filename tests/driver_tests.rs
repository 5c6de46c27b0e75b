#[cfg(test)]
mod driver_tests {
    use blob_image_optimizer::compression::{CompressionConfig, Compressor, ImageEncoder, ImageFormat};
    use blob_image_optimizer::control::RunLock;
    use blob_image_optimizer::driver::{Identity, JobSettings, OptimizationDriver, ProgressSink, RunOutcome};
    use blob_image_optimizer::errors::OptimizerError;
    use blob_image_optimizer::probe::{AlwaysReachable, Reachability, ReachabilityProbe, UnreachableReason};
    use blob_image_optimizer::stats::RunStatistics;
    use blob_image_optimizer::store::{ContentRef, MemoryStore};
    use blob_image_optimizer::StopSignal;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;

    /// Maps input length to output length; unknown lengths come back unchanged.
    /// Inputs starting with `BAD` fail to decode.
    struct SizeTable {
        sizes: HashMap<usize, usize>,
        calls: Arc<AtomicUsize>,
    }

    impl SizeTable {
        fn new(pairs: &[(usize, usize)]) -> Self {
            Self {
                sizes: pairs.iter().copied().collect(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ImageEncoder for SizeTable {
        fn encode(&self, data: &[u8], _format: ImageFormat, _quality: u8) -> Result<Vec<u8>, OptimizerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if data.starts_with(b"BAD") {
                let err = image::load_from_memory_with_format(data, image::ImageFormat::Png).unwrap_err();
                return Err(OptimizerError::from(err));
            }
            let len = self.sizes.get(&data.len()).copied().unwrap_or(data.len());
            Ok(vec![0xAB; len])
        }
    }

    struct UnreachableUrls(HashSet<String>);

    impl ReachabilityProbe for UnreachableUrls {
        fn probe(&self, url: &str) -> Reachability {
            if self.0.contains(url) {
                Reachability::Unreachable(UnreachableReason::Status(404))
            } else {
                Reachability::Reachable
            }
        }
    }

    #[derive(Default)]
    struct RecordingProgress(Mutex<Vec<String>>);

    impl RecordingProgress {
        fn messages(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressSink for RecordingProgress {
        fn status_changed(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn build_driver(
        store: &Arc<MemoryStore>,
        encoder: SizeTable,
        probe: Arc<dyn ReachabilityProbe>,
        settings: JobSettings,
        identity: Identity,
    ) -> (OptimizationDriver, Arc<RunStatistics>) {
        let stats = Arc::new(RunStatistics::new());
        let compressor = Compressor::with_encoder(CompressionConfig::default(), Box::new(encoder), Arc::clone(&stats));
        let driver = OptimizationDriver::new(settings, identity, store.clone(), store.clone(), probe, compressor);
        (driver, stats)
    }

    fn simple_driver(store: &Arc<MemoryStore>, encoder: SizeTable) -> (OptimizationDriver, Arc<RunStatistics>) {
        build_driver(
            store,
            encoder,
            Arc::new(AlwaysReachable),
            JobSettings::default(),
            Identity::new("test-runner"),
        )
    }

    #[test]
    fn test_end_to_end_size_gate() {
        let store = Arc::new(MemoryStore::new());
        let big = store.insert_image("big.png", "image/png", vec![1; 1_000_000]);
        let medium = store.insert_image("medium.png", "image/png", vec![2; 500_000]);
        let tiny = store.insert_image("tiny.png", "image/png", vec![3; 100]);

        let encoder = SizeTable::new(&[(1_000_000, 800_000), (500_000, 600_000), (100, 100)]);
        let (driver, stats) = simple_driver(&store, encoder);

        let outcome = driver.run();

        assert_eq!(store.content(&big).unwrap().len(), 800_000);
        assert_eq!(store.content(&medium).unwrap(), vec![2; 500_000]);
        assert_eq!(store.content(&tiny).unwrap(), vec![3; 100]);
        assert_eq!(store.save_count(), 1);

        assert_eq!(stats.optimized(), 1);
        assert_eq!(stats.skipped(), 2);
        assert!((stats.saved_megabytes() - 0.19).abs() < 0.01);

        let report = outcome.report().copied().unwrap();
        assert_eq!(report.visited, 3);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            outcome.to_string(),
            "Success: Optimized 1 images (Saved: 0.19 mb).\nSkipped 2 images."
        );
    }

    #[test]
    fn test_statistics_accumulate_across_runs() {
        let store = Arc::new(MemoryStore::new());
        store.insert_image("big.png", "image/png", vec![1; 1_000_000]);
        let (driver, stats) = simple_driver(&store, SizeTable::new(&[(1_000_000, 800_000)]));

        driver.run();
        let second = driver.run();

        // The replaced asset is already at 800,000 bytes and no longer shrinks
        assert_eq!(stats.optimized(), 1);
        assert_eq!(stats.skipped(), 1);
        assert!(second.to_string().contains("Skipped 1 images."));
    }

    #[test]
    fn test_anonymous_identity_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_image("a.png", "image/png", vec![1; 100]);
        let (driver, stats) = build_driver(
            &store,
            SizeTable::new(&[(100, 10)]),
            Arc::new(AlwaysReachable),
            JobSettings::default(),
            Identity::anonymous(),
        );

        let outcome = driver.run();

        assert_eq!(outcome, RunOutcome::AnonymousExecution);
        assert_eq!(store.enumeration_count(), 0);
        assert_eq!(store.load_count(), 0);
        assert_eq!(store.read_count(), 0);
        assert_eq!(store.save_count(), 0);
        assert_eq!(stats.optimized(), 0);
        assert!(!driver.is_running());
    }

    #[test]
    fn test_unsupported_mime_is_not_counted() {
        let store = Arc::new(MemoryStore::new());
        let gif = store.insert_image("anim.gif", "image/gif", vec![1; 100]);
        let (driver, stats) = simple_driver(&store, SizeTable::new(&[(100, 10)]));

        let outcome = driver.run();

        assert_eq!(stats.optimized(), 0);
        assert_eq!(stats.skipped(), 0);
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.content(&gif).unwrap(), vec![1; 100]);
        assert_eq!(outcome.report().unwrap().unsupported, 1);
    }

    #[test]
    fn test_unreachable_asset_is_never_read() {
        let store = Arc::new(MemoryStore::new());
        store.insert_image("offline.jpg", "image/jpeg", vec![1; 100]);
        store.insert_image("online.jpg", "image/jpeg", vec![2; 200]);

        let encoder = SizeTable::new(&[(100, 10), (200, 20)]);
        let calls = Arc::clone(&encoder.calls);
        let probe = UnreachableUrls(["memory://offline.jpg".to_string()].into_iter().collect());
        let (driver, stats) = build_driver(
            &store,
            encoder,
            Arc::new(probe),
            JobSettings::default(),
            Identity::new("test-runner"),
        );

        let outcome = driver.run();

        assert_eq!(store.read_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.save_count(), 1);
        assert_eq!(stats.optimized(), 1);
        assert_eq!(stats.skipped(), 0);
        assert_eq!(outcome.report().unwrap().unreachable, 1);
    }

    #[test]
    fn test_non_images_are_excluded() {
        let store = Arc::new(MemoryStore::new());
        store.insert_other("folder");
        store.insert_other("manual.pdf");
        store.insert_image("a.png", "image/png", vec![1; 100]);
        let (driver, stats) = simple_driver(&store, SizeTable::new(&[(100, 50)]));

        let report = driver.run().report().copied().unwrap();

        assert_eq!(report.visited, 3);
        assert_eq!(report.not_images, 2);
        assert_eq!(report.replaced, 1);
        assert_eq!(store.read_count(), 1);
        assert_eq!(stats.optimized() + stats.skipped(), 1);
    }

    #[test]
    fn test_concurrent_run_is_rejected() {
        struct GateProbe {
            entered: Mutex<mpsc::Sender<()>>,
            release: Mutex<mpsc::Receiver<()>>,
        }

        impl ReachabilityProbe for GateProbe {
            fn probe(&self, _url: &str) -> Reachability {
                let _ = self.entered.lock().unwrap().send(());
                let _ = self.release.lock().unwrap().recv();
                Reachability::Reachable
            }
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let probe = GateProbe {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };

        let store = Arc::new(MemoryStore::new());
        store.insert_image("a.png", "image/png", vec![1; 100]);
        let (driver, stats) = build_driver(
            &store,
            SizeTable::new(&[(100, 50)]),
            Arc::new(probe),
            JobSettings::default(),
            Identity::new("test-runner"),
        );
        let driver = Arc::new(driver);

        let first = {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver.run())
        };

        entered_rx.recv().unwrap();
        assert!(driver.is_running());

        let second = driver.run();
        assert_eq!(second, RunOutcome::AlreadyRunning);
        assert_eq!(second.to_string(), "Job is already running.");
        assert_eq!(store.enumeration_count(), 1);

        release_tx.send(()).unwrap();
        let first = first.join().unwrap();

        assert_eq!(first.kind(), "completed");
        assert_eq!(stats.optimized(), 1);
        assert!(!driver.is_running());
    }

    #[test]
    fn test_shared_run_lock_spans_drivers() {
        let lock = Arc::new(RunLock::new());
        let store = Arc::new(MemoryStore::new());
        let (driver, _stats) = simple_driver(&store, SizeTable::new(&[]));
        let driver = driver.with_run_lock(Arc::clone(&lock));

        let guard = lock.try_acquire().unwrap();
        assert_eq!(driver.run(), RunOutcome::AlreadyRunning);
        drop(guard);

        assert_eq!(driver.run().kind(), "completed");
    }

    #[test]
    fn test_progress_fires_every_fifty_replacements() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..120 {
            store.insert_image(&format!("shrinks-{}.png", i), "image/png", vec![1; 100]);
        }
        for i in 0..60 {
            store.insert_image(&format!("stays-{}.png", i), "image/png", vec![1; 10]);
        }

        let progress = Arc::new(RecordingProgress::default());
        let (driver, stats) = simple_driver(&store, SizeTable::new(&[(100, 50)]));
        let driver = driver.with_progress_sink(progress.clone());

        driver.run();

        assert_eq!(stats.optimized(), 120);
        assert_eq!(stats.skipped(), 60);
        assert_eq!(progress.messages(), vec!["Updated 50...", "Updated 100..."]);
    }

    #[test]
    fn test_stop_ends_run_early() {
        struct StopOnFirstProbe(StopSignal);

        impl ReachabilityProbe for StopOnFirstProbe {
            fn probe(&self, _url: &str) -> Reachability {
                self.0.signal();
                Reachability::Reachable
            }
        }

        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store.insert_image(&format!("{}.png", i), "image/png", vec![1; 100]);
        }

        let signal = StopSignal::new();
        let (driver, stats) = build_driver(
            &store,
            SizeTable::new(&[(100, 50)]),
            Arc::new(StopOnFirstProbe(signal.clone())),
            JobSettings::default(),
            Identity::new("test-runner"),
        );
        let driver = driver.with_stop_signal(signal);

        let outcome = driver.run();

        assert_eq!(outcome.kind(), "stopped");
        assert_eq!(outcome.to_string(), "Stop of job was called");
        assert_eq!(outcome.report().unwrap().visited, 1);
        assert_eq!(stats.optimized(), 1);
    }

    #[test]
    fn test_decode_failure_aborts_run_by_default() {
        let store = Arc::new(MemoryStore::new());
        let first = store.insert_image("first.png", "image/png", vec![1; 100]);
        store.insert_image("broken.png", "image/png", b"BAD-IMAGE".to_vec());
        let last = store.insert_image("last.png", "image/png", vec![3; 100]);

        let (driver, stats) = simple_driver(&store, SizeTable::new(&[(100, 40)]));
        let outcome = driver.run();

        assert_eq!(outcome.kind(), "failed");
        assert!(outcome.to_string().starts_with("Job failed: Image decoding error"));
        assert_eq!(store.content(&first).unwrap().len(), 40);
        assert_eq!(store.content(&last).unwrap().len(), 100);
        assert_eq!(store.read_count(), 2);
        assert_eq!(stats.optimized(), 1);
        assert!(!driver.is_running());
    }

    #[test]
    fn test_decode_failure_is_isolated_when_configured() {
        let store = Arc::new(MemoryStore::new());
        store.insert_image("first.png", "image/png", vec![1; 100]);
        store.insert_image("broken.png", "image/png", b"BAD-IMAGE".to_vec());
        let last = store.insert_image("last.png", "image/png", vec![3; 100]);

        let settings = JobSettings {
            abort_on_error: false,
            ..JobSettings::default()
        };
        let (driver, stats) = build_driver(
            &store,
            SizeTable::new(&[(100, 40)]),
            Arc::new(AlwaysReachable),
            settings,
            Identity::new("test-runner"),
        );

        let outcome = driver.run();
        let report = outcome.report().copied().unwrap();

        assert_eq!(outcome.kind(), "completed");
        assert_eq!(report.failed, 1);
        assert_eq!(report.replaced, 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.optimized(), 2);
        assert_eq!(store.content(&last).unwrap().len(), 40);
    }

    #[test]
    fn test_persistence_failure_aborts_run() {
        let store = Arc::new(MemoryStore::new());
        store.insert_image("a.png", "image/png", vec![1; 100]);
        store.insert_image("b.png", "image/png", vec![1; 100]);
        store.set_fail_saves(true);

        let (driver, stats) = simple_driver(&store, SizeTable::new(&[(100, 40)]));
        let outcome = driver.run();

        assert_eq!(outcome.kind(), "failed");
        assert!(outcome.to_string().contains("save rejected for a.png"));
        assert_eq!(store.read_count(), 1);
        assert_eq!(stats.optimized(), 0);
        assert_eq!(stats.saved_bytes(), 0);
    }

    #[test]
    fn test_persistence_failure_is_isolated_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let id = store.insert_image("a.png", "image/png", vec![1; 1000]);
        store.set_fail_saves(true);

        let settings = JobSettings {
            abort_on_error: false,
            ..JobSettings::default()
        };
        let (driver, stats) = build_driver(
            &store,
            SizeTable::new(&[(1000, 500)]),
            Arc::new(AlwaysReachable),
            settings,
            Identity::new("test-runner"),
        );

        let outcome = driver.run();
        let report = outcome.report().copied().unwrap();

        assert_eq!(report.replaced, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(stats.optimized(), 0);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.saved_bytes(), 0);
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.blob_count(), 1);
        assert_eq!(store.content(&id).unwrap().len(), 1000);
        assert_eq!(
            outcome.to_string(),
            "Success: Optimized 0 images (Saved: 0.00 mb).\nSkipped 0 images."
        );
    }

    #[test]
    fn test_non_writable_clone_skips_write() {
        let store = Arc::new(MemoryStore::new());
        let locked = store.insert_read_only_image("locked.jpg", "image/jpeg", vec![1; 100]);
        let (driver, stats) = simple_driver(&store, SizeTable::new(&[(100, 40)]));

        let report = driver.run().report().copied().unwrap();

        assert_eq!(store.save_count(), 0);
        assert_eq!(store.content(&locked).unwrap(), vec![1; 100]);
        assert_eq!(stats.optimized(), 1);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.unwritable, 1);
    }

    #[test]
    fn test_enumeration_is_scoped_to_root() {
        let store = Arc::new(MemoryStore::new());
        store.insert_image("global/a.png", "image/png", vec![1; 100]);
        store.insert_image("site/b.png", "image/png", vec![1; 100]);

        let settings = JobSettings {
            root: ContentRef::new("global/"),
            ..JobSettings::default()
        };
        let (driver, stats) = build_driver(
            &store,
            SizeTable::new(&[(100, 40)]),
            Arc::new(AlwaysReachable),
            settings,
            Identity::new("test-runner"),
        );

        driver.run();
        assert_eq!(stats.optimized(), 1);
        assert_eq!(store.read_count(), 1);
    }
}
