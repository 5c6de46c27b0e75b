use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::compression::{CompressionOutcome, Compressor, ImageFormat, MediaType};
use crate::control::{RunLock, StopSignal};
use crate::errors::OptimizerError;
use crate::probe::ReachabilityProbe;
use crate::stats::{RunStatistics, StatsSnapshot};
use crate::store::{AccessLevel, BlobHandle, BlobSink, ContentRef, ContentStore, ImageAsset, SaveAction};

pub const DEFAULT_PROGRESS_EVERY: u64 = 50;

/// Principal the job runs as. A blank name is treated as anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn anonymous() -> Self {
        Self::new("")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// Receiver of human-readable progress updates.
pub trait ProgressSink: Send + Sync {
    fn status_changed(&self, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn status_changed(&self, message: &str) {
        info!("{}", message);
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub root: ContentRef,
    pub progress_every: u64,
    /// Abort the whole run on the first decode or persistence failure.
    pub abort_on_error: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            root: ContentRef::new(""),
            progress_every: DEFAULT_PROGRESS_EVERY,
            abort_on_error: true,
        }
    }
}

/// Tallies for a single run. `visited` equals the sum of every other field
/// except `unwritable`, which is a subset of `replaced`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub visited: u64,
    pub not_images: u64,
    pub unreachable: u64,
    pub unsupported: u64,
    pub replaced: u64,
    pub skipped: u64,
    pub failed: u64,
    pub unwritable: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    AlreadyRunning,
    AnonymousExecution,
    Completed { report: RunReport, totals: StatsSnapshot },
    Stopped { report: RunReport, totals: StatsSnapshot },
    Failed { message: String },
}

impl RunOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RunOutcome::AlreadyRunning => "already_running",
            RunOutcome::AnonymousExecution => "anonymous_execution",
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Stopped { .. } => "stopped",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed { report, .. } | RunOutcome::Stopped { report, .. } => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::AlreadyRunning => write!(f, "Job is already running."),
            RunOutcome::AnonymousExecution => {
                write!(f, "Anonymous execution: the job requires an authenticated identity.")
            }
            RunOutcome::Completed { totals, .. } => f.write_str(&format_summary(totals)),
            RunOutcome::Stopped { .. } => write!(f, "Stop of job was called"),
            RunOutcome::Failed { message } => write!(f, "Job failed: {}", message),
        }
    }
}

pub fn format_summary(totals: &StatsSnapshot) -> String {
    format!(
        "Success: Optimized {} images (Saved: {:.2} mb).\nSkipped {} images.",
        totals.optimized, totals.saved_megabytes, totals.skipped
    )
}

enum AssetStep {
    Replaced { written: bool },
    Skipped,
    Unsupported,
}

/// Walks every asset under the configured root, re-encodes JPEG and PNG
/// images and writes back the ones that got smaller.
pub struct OptimizationDriver {
    settings: JobSettings,
    identity: Identity,
    store: Arc<dyn ContentStore>,
    blobs: Arc<dyn BlobSink>,
    probe: Arc<dyn ReachabilityProbe>,
    compressor: Compressor,
    progress: Arc<dyn ProgressSink>,
    run_lock: Arc<RunLock>,
    stop: StopSignal,
}

impl OptimizationDriver {
    pub fn new(
        settings: JobSettings,
        identity: Identity,
        store: Arc<dyn ContentStore>,
        blobs: Arc<dyn BlobSink>,
        probe: Arc<dyn ReachabilityProbe>,
        compressor: Compressor,
    ) -> Self {
        Self {
            settings,
            identity,
            store,
            blobs,
            probe,
            compressor,
            progress: Arc::new(LogProgress),
            run_lock: Arc::new(RunLock::new()),
            stop: StopSignal::new(),
        }
    }

    pub fn with_progress_sink(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Shares `lock` with other drivers so that at most one of them runs.
    pub fn with_run_lock(mut self, lock: Arc<RunLock>) -> Self {
        self.run_lock = lock;
        self
    }

    /// Lets an external controller share the driver's cancellation flag.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn statistics(&self) -> &Arc<RunStatistics> {
        self.compressor.statistics()
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.is_held()
    }

    pub fn stop(&self) {
        info!("Stop requested for image optimization job");
        self.stop.signal();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_signaled()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Runs one pass and returns the report string.
    pub fn execute(&self) -> String {
        self.run().to_string()
    }

    pub fn run(&self) -> RunOutcome {
        let Some(_guard) = self.run_lock.try_acquire() else {
            info!("Image optimization job is already running, skipping this trigger");
            return RunOutcome::AlreadyRunning;
        };
        self.stop.clear();

        if self.identity.is_anonymous() {
            error!("Image optimization job refused: anonymous execution");
            return RunOutcome::AnonymousExecution;
        }

        info!(
            "Starting image optimization as '{}' under '{}' (quality {})",
            self.identity.name(),
            self.settings.root,
            self.compressor.config().quality
        );

        let report = match self.process_all() {
            Ok(report) => report,
            Err(e) => {
                error!("Image optimization run aborted: {}", e);
                error!("{:?}", e);
                return RunOutcome::Failed { message: e.to_string() };
            }
        };

        let totals = self.statistics().snapshot();
        info!("{}", format_summary(&totals));
        debug!("Run report: {:?}", report);

        if self.stop.is_signaled() {
            RunOutcome::Stopped { report, totals }
        } else {
            RunOutcome::Completed { report, totals }
        }
    }

    fn process_all(&self) -> Result<RunReport, OptimizerError> {
        let references = self.store.descendants(&self.settings.root)?;
        debug!("Found {} items under '{}'", references.len(), self.settings.root);

        let mut report = RunReport::default();
        for reference in references {
            if self.stop.is_signaled() {
                info!("Stop requested, ending run after {} items", report.visited);
                break;
            }
            report.visited += 1;

            let Some(asset) = self.store.try_load_image(&reference)? else {
                report.not_images += 1;
                continue;
            };

            if !self.probe.probe(&asset.public_url).is_reachable() {
                report.unreachable += 1;
                continue;
            }

            match self.optimize_asset(&asset) {
                Ok(AssetStep::Replaced { written }) => {
                    report.replaced += 1;
                    if !written {
                        report.unwritable += 1;
                    }
                }
                Ok(AssetStep::Skipped) => report.skipped += 1,
                Ok(AssetStep::Unsupported) => report.unsupported += 1,
                Err(e) if !self.settings.abort_on_error => {
                    error!("Failed to optimize {}: {}", asset.id, e);
                    self.statistics().record_failed();
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    fn optimize_asset(&self, asset: &ImageAsset) -> Result<AssetStep, OptimizerError> {
        let content = self.store.read_content(asset)?;

        let format = match asset.media_type() {
            MediaType::Jpeg => ImageFormat::Jpeg,
            MediaType::Png => ImageFormat::Png,
            MediaType::Unsupported(mime) => {
                error!("Unknown image type '{}' for {}", mime, asset.id);
                return Ok(AssetStep::Unsupported);
            }
        };

        match self.compressor.compress(&content, format)? {
            CompressionOutcome::Replaced { bytes, sequence } => {
                self.report_progress(sequence);
                match self.persist(asset, &bytes) {
                    Ok(written) => Ok(AssetStep::Replaced { written }),
                    Err(e) => {
                        let saved = content.len().saturating_sub(bytes.len()) as u64;
                        self.statistics().retract_optimized(saved);
                        Err(e)
                    }
                }
            }
            CompressionOutcome::Skipped => Ok(AssetStep::Skipped),
        }
    }

    fn report_progress(&self, sequence: u64) {
        let every = self.settings.progress_every;
        if every > 0 && sequence > 0 && sequence % every == 0 {
            self.progress.status_changed(&format!("Updated {}...", sequence));
        }
    }

    fn persist(&self, asset: &ImageAsset, bytes: &[u8]) -> Result<bool, OptimizerError> {
        let Some(mut writable) = self.store.writable_clone(asset) else {
            debug!("{} has no writable image clone, leaving it untouched", asset.id);
            return Ok(false);
        };

        let blob = self.blobs.create_blob(writable.container(), &asset.extension())?;
        if let Err(e) = self.write_blob(&blob, bytes) {
            self.discard_blob(&blob);
            return Err(e);
        }

        writable.set_binary_data(blob.clone());
        if let Err(e) = self.store.save(writable, SaveAction::Publish, AccessLevel::NoAccess) {
            self.discard_blob(&blob);
            return Err(e.into());
        }
        debug!("Replaced {} with {} bytes", asset.id, bytes.len());
        Ok(true)
    }

    fn write_blob(&self, blob: &BlobHandle, bytes: &[u8]) -> Result<(), OptimizerError> {
        let mut sink = self.blobs.open_write(blob)?;
        sink.write_all(bytes)?;
        sink.flush()?;
        Ok(())
    }

    fn discard_blob(&self, blob: &BlobHandle) {
        if let Err(e) = self.blobs.discard(blob) {
            warn!("Could not discard unused blob {}: {}", blob.0, e);
        }
    }
}
