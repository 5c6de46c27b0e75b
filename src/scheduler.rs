use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::driver::OptimizationDriver;

/// Fires `driver` every `period` on the blocking pool. The first firing is one
/// full period after start unless `run_immediately` is set. Overlapping
/// firings are left to the driver's run lock.
pub fn spawn_scheduler(driver: Arc<OptimizationDriver>, period: Duration, run_immediately: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = if run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Image optimization scheduled every {}s", period.as_secs());

        loop {
            ticker.tick().await;
            let driver = Arc::clone(&driver);
            match tokio::task::spawn_blocking(move || driver.execute()).await {
                Ok(message) => info!("Scheduled image optimization finished: {}", message),
                Err(e) => error!("Scheduled image optimization task failed: {}", e),
            }
        }
    })
}
