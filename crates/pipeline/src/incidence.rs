//! Trailing 7-day incidence per 100,000 inhabitants.
//!
//! A district gets a value only when every day of the window is covered;
//! a gap yields `None`, never a value computed from partial data.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use common::{
    Error, IncidenceSnapshot, Region, RegionTable, SnapshotSet, PER_INHABITANTS, WINDOW_DAYS,
};
use tracing::debug;

use crate::normalize::CaseRecords;

/// As-of date for a record set: the newest reported day, shifted back by `lag_days`.
pub fn as_of_date(records: &CaseRecords, lag_days: u32) -> Option<NaiveDate> {
    records
        .latest_date()?
        .checked_sub_days(Days::new(u64::from(lag_days)))
}

/// Compute one district's snapshot, or `None` if the window is not fully covered.
pub fn compute_snapshot(
    records: &CaseRecords,
    region: &Region,
    as_of: NaiveDate,
) -> Option<IncidenceSnapshot> {
    let mut cases_7d: u64 = 0;
    for offset in 0..WINDOW_DAYS {
        let date = as_of.checked_sub_days(Days::new(offset))?;
        cases_7d += records.get(&region.id, date)?;
    }

    Some(IncidenceSnapshot {
        region: region.id.clone(),
        as_of,
        cases_7d,
        incidence: cases_7d as f64 / region.population as f64 * PER_INHABITANTS,
    })
}

/// Compute the full snapshot set for every district of `regions`.
///
/// Fails if not a single district could be computed: an all-gap set would
/// replace good data with nothing.
pub fn compute_snapshot_set(
    records: &CaseRecords,
    regions: Arc<RegionTable>,
    as_of: NaiveDate,
) -> Result<SnapshotSet, Error> {
    let entries: BTreeMap<_, _> = regions
        .iter()
        .map(|region| (region.id.clone(), compute_snapshot(records, region, as_of)))
        .collect();

    let available = entries.values().filter(|e| e.is_some()).count();
    debug!(
        "Computed {} / {} districts as of {}",
        available,
        entries.len(),
        as_of
    );

    if available == 0 {
        return Err(Error::Compute(format!(
            "no district has {} covered days ending {}",
            WINDOW_DAYS, as_of
        )));
    }

    Ok(SnapshotSet {
        as_of,
        computed_at: Utc::now(),
        regions,
        entries,
    })
}
