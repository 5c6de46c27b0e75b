use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Non-blocking, non-reentrant mutual exclusion for whole optimization runs.
#[derive(Debug, Default)]
pub struct RunLock {
    held: AtomicBool,
}

/// Releases the [`RunLock`] when dropped, including during unwinding.
#[derive(Debug)]
pub struct RunGuard<'a> {
    lock: &'a RunLock,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` immediately if another run holds the lock.
    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RunGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

/// Cooperative cancellation flag shared between the job and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
