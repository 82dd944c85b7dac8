//! Incidence pipeline crate.
//!
//! Normalizes raw RKI rows, computes 7-day incidence per district and
//! serves the latest complete snapshot set to readers.

pub mod incidence;
pub mod normalize;
pub mod presenter;
pub mod refresh;
pub mod regions;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use incidence::{as_of_date, compute_snapshot, compute_snapshot_set};
pub use normalize::{resolve_region, CaseRecords, NormalizeReport, Normalizer};
pub use presenter::{
    format_incidence, Direction, HeatPoint, Presenter, PresenterView, RegionIncidence,
    RegionView, SnapshotStore, SortKey, TableRow,
};
pub use refresh::{CycleOutcome, CycleSummary, PipelineState, PipelineStatus, RefreshPipeline, Stage};
pub use regions::{load_region_table, RegionHandle, RegionRefresher};
pub use scheduler::{spawn_refresh_scheduler, spawn_region_refresher};
