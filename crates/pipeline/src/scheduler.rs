//! Periodic tasks driving the refresh pipeline and the region refresher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::refresh::{CycleOutcome, RefreshPipeline};
use crate::regions::RegionRefresher;

/// Run a refresh cycle every `every`, starting immediately.
///
/// Outcomes are forwarded to `outcomes`; a closed receiver does not stop
/// the schedule. Ticks missed while a slow cycle runs are skipped.
pub fn spawn_refresh_scheduler(
    pipeline: Arc<RefreshPipeline>,
    every: Duration,
    outcomes: mpsc::Sender<CycleOutcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let outcome = pipeline.run_cycle().await;
            if outcomes.send(outcome).await.is_err() {
                debug!("Cycle outcome receiver closed");
            }
        }
    })
}

/// Reload the region table every `every`. The first reload happens one
/// interval after start, since the table was loaded at startup.
pub fn spawn_region_refresher(refresher: RegionRefresher, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;
            match refresher.refresh().await {
                Ok(count) => debug!("Scheduled region refresh loaded {} districts", count),
                // Already logged by the refresher; the old table stays.
                Err(e) => debug!("Scheduled region refresh failed: {}", e),
            }
        }
    })
}
