use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Cumulative counters shared by every compressor and driver that holds a
/// clone of the same `Arc<RunStatistics>`.
///
/// Counters are never reset between runs; call [`RunStatistics::reset`]
/// explicitly when a fresh tally is wanted.
#[derive(Debug, Default)]
pub struct RunStatistics {
    optimized: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    saved_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub optimized: u64,
    pub skipped: u64,
    pub failed: u64,
    pub saved_bytes: u64,
    pub saved_megabytes: f64,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an accepted re-encode and returns the optimized count
    /// including this one.
    pub fn record_optimized(&self, saved_bytes: u64) -> u64 {
        self.saved_bytes.fetch_add(saved_bytes, Ordering::Relaxed);
        self.optimized.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Takes back an accepted re-encode whose bytes never reached the store.
    pub fn retract_optimized(&self, saved_bytes: u64) {
        self.saved_bytes.fetch_sub(saved_bytes, Ordering::Relaxed);
        self.optimized.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) -> u64 {
        self.skipped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn optimized(&self) -> u64 {
        self.optimized.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn saved_bytes(&self) -> u64 {
        self.saved_bytes.load(Ordering::Relaxed)
    }

    pub fn saved_megabytes(&self) -> f64 {
        bytes_to_megabytes(self.saved_bytes())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let saved_bytes = self.saved_bytes();
        StatsSnapshot {
            optimized: self.optimized(),
            skipped: self.skipped(),
            failed: self.failed(),
            saved_bytes,
            saved_megabytes: bytes_to_megabytes(saved_bytes),
        }
    }

    pub fn reset(&self) {
        self.optimized.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.saved_bytes.store(0, Ordering::Relaxed);
    }
}

pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEGABYTE
}
