//! Refresh pipeline: fetch → normalize → compute → publish.
//!
//! One cycle runs at a time. A trigger arriving while a cycle is in flight
//! is dropped rather than queued. Any failure leaves the served snapshot
//! set untouched.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use common::Error;
use rki_client::CaseSource;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::incidence::{as_of_date, compute_snapshot_set};
use crate::normalize::{NormalizeReport, Normalizer};
use crate::presenter::SnapshotStore;
use crate::regions::RegionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Fetching,
    Normalizing,
    Computing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Normalize,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub as_of: NaiveDate,
    /// When the upstream dataset was received.
    pub fetched_at: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
    pub regions: usize,
    pub available: usize,
    pub report: NormalizeReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Ready(CycleSummary),
    Failed { stage: Stage, error: String },
    /// Another cycle was already running.
    Skipped,
}

/// Bookkeeping exposed for heartbeats and the journal.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            state: PipelineState::Idle,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
        }
    }
}

pub struct RefreshPipeline {
    source: Arc<dyn CaseSource>,
    regions: Arc<RegionHandle>,
    store: Arc<SnapshotStore>,
    normalizer: Normalizer,
    as_of_lag_days: u32,
    cycle_lock: Mutex<()>,
    status: RwLock<PipelineStatus>,
}

impl RefreshPipeline {
    pub fn new(
        source: Arc<dyn CaseSource>,
        regions: Arc<RegionHandle>,
        store: Arc<SnapshotStore>,
        normalizer: Normalizer,
        as_of_lag_days: u32,
    ) -> Self {
        Self {
            source,
            regions,
            store,
            normalizer,
            as_of_lag_days,
            cycle_lock: Mutex::new(()),
            status: RwLock::new(PipelineStatus::default()),
        }
    }

    pub async fn state(&self) -> PipelineState {
        self.status.read().await.state
    }

    pub async fn status(&self) -> PipelineStatus {
        self.status.read().await.clone()
    }

    async fn set_state(&self, state: PipelineState) {
        let mut status = self.status.write().await;
        debug!("Pipeline {:?} -> {:?}", status.state, state);
        status.state = state;
    }

    /// Run one cycle, or return `Skipped` if one is already in progress.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Refresh trigger dropped: cycle already in progress");
            return CycleOutcome::Skipped;
        };

        let outcome = match self.execute().await {
            Ok(summary) => {
                info!(
                    "Refresh ready: as_of={} districts={} available={} rows={} duplicates={} unknown={} invalid={} zero_filled={}",
                    summary.as_of,
                    summary.regions,
                    summary.available,
                    summary.report.rows_seen,
                    summary.report.duplicates_replaced,
                    summary.report.unknown_rows,
                    summary.report.invalid_entries,
                    summary.report.zero_filled,
                );
                let mut status = self.status.write().await;
                status.last_success = Some(summary.computed_at);
                status.consecutive_failures = 0;
                CycleOutcome::Ready(summary)
            }
            Err((stage, e)) => {
                self.set_state(PipelineState::Failed).await;
                let mut status = self.status.write().await;
                status.last_failure = Some(Utc::now());
                status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                warn!(
                    "Refresh failed during {:?} ({} in a row), keeping previous snapshot: {}",
                    stage, status.consecutive_failures, e
                );
                CycleOutcome::Failed {
                    stage,
                    error: e.to_string(),
                }
            }
        };

        self.set_state(PipelineState::Idle).await;
        outcome
    }

    async fn execute(&self) -> Result<CycleSummary, (Stage, Error)> {
        self.set_state(PipelineState::Fetching).await;
        let raw = self
            .source
            .fetch_cases()
            .await
            .map_err(|e| (Stage::Fetch, e))?;

        self.set_state(PipelineState::Normalizing).await;
        let regions = self.regions.current().await;
        let (records, report) = self
            .normalizer
            .normalize(&raw, &regions)
            .map_err(|e| (Stage::Normalize, e))?;

        self.set_state(PipelineState::Computing).await;
        let as_of = as_of_date(&records, self.as_of_lag_days).ok_or_else(|| {
            (
                Stage::Compute,
                Error::Compute("no as-of date derivable from records".into()),
            )
        })?;
        let set = compute_snapshot_set(&records, regions, as_of)
            .map_err(|e| (Stage::Compute, e))?;

        let summary = CycleSummary {
            as_of,
            fetched_at: raw.fetched_at,
            computed_at: set.computed_at,
            regions: set.entries.len(),
            available: set.available(),
            report,
        };

        self.store.publish(set).await;
        self.set_state(PipelineState::Ready).await;
        Ok(summary)
    }
}
