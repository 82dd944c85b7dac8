//! Raw provider rows → canonical per-district daily case counts.
//!
//! Policies:
//! - unmapped districts are skipped and logged once per key, unless the
//!   normalizer is strict, in which case the first one aborts;
//! - rows with a negative count or an unrepresentable date are invalid and
//!   handled the same way;
//! - duplicate (district, date) rows resolve to the last one seen;
//! - with `fill_missing_days`, days a district did not report inside the
//!   dataset's date range count as zero new cases.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate};
use common::{canonical_region_key, DailyCaseRecord, Error, RegionId, RegionTable};
use rki_client::{RawCaseDataset, RawCaseEntry};
use tracing::{debug, warn};

/// Daily case counts keyed uniquely by (district, date).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseRecords {
    counts: BTreeMap<(RegionId, NaiveDate), u64>,
}

impl CaseRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a count, returning the value it replaced.
    pub fn insert(&mut self, region: RegionId, date: NaiveDate, cases: u64) -> Option<u64> {
        self.counts.insert((region, date), cases)
    }

    pub fn get(&self, region: &str, date: NaiveDate) -> Option<u64> {
        self.counts.get(&(region.to_string(), date)).copied()
    }

    /// Newest reporting date present in the set.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.counts.keys().map(|(_, date)| *date).max()
    }

    pub fn earliest_date(&self) -> Option<NaiveDate> {
        self.counts.keys().map(|(_, date)| *date).min()
    }

    /// Insert zero counts for every day between the earliest and latest date
    /// of the set, for each district present at least once. Returns how many
    /// days were filled.
    ///
    /// Grouped upstream queries emit no row for a day without new cases, so
    /// an absent day inside the reported range means zero, not unknown.
    /// Districts that never appear stay absent.
    pub fn fill_missing_days(&mut self) -> usize {
        let (Some(first), Some(last)) = (self.earliest_date(), self.latest_date()) else {
            return 0;
        };
        let regions: BTreeSet<RegionId> = self.counts.keys().map(|(r, _)| r.clone()).collect();

        let mut filled = 0;
        for region in regions {
            for date in first.iter_days().take_while(|d| *d <= last) {
                if let Entry::Vacant(slot) = self.counts.entry((region.clone(), date)) {
                    slot.insert(0);
                    filled += 1;
                }
            }
        }
        filled
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl FromIterator<DailyCaseRecord> for CaseRecords {
    fn from_iter<I: IntoIterator<Item = DailyCaseRecord>>(iter: I) -> Self {
        let mut records = Self::new();
        for r in iter {
            records.insert(r.region, r.date, r.cases);
        }
        records
    }
}

/// What happened to the rows of one raw dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub rows_seen: usize,
    /// Rows written into the record set, replaced duplicates included.
    pub accepted: usize,
    pub duplicates_replaced: usize,
    /// Rows dropped because their district is unknown.
    pub unknown_rows: usize,
    /// Distinct unmapped provider keys.
    pub unknown_regions: BTreeSet<String>,
    pub invalid_entries: usize,
    /// Unreported days inserted as zero.
    pub zero_filled: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    strict: bool,
    fill_missing_days: bool,
}

impl Normalizer {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            fill_missing_days: false,
        }
    }

    pub fn with_fill_missing_days(mut self, fill: bool) -> Self {
        self.fill_missing_days = fill;
        self
    }

    pub fn normalize(
        &self,
        raw: &RawCaseDataset,
        regions: &RegionTable,
    ) -> Result<(CaseRecords, NormalizeReport), Error> {
        let mut records = CaseRecords::new();
        let mut report = NormalizeReport {
            rows_seen: raw.entries.len(),
            ..NormalizeReport::default()
        };

        for entry in &raw.entries {
            let region = match resolve_region(entry, regions) {
                Ok(id) => id,
                Err(e @ Error::UnknownRegion { .. }) if self.strict => return Err(e),
                Err(Error::UnknownRegion { key }) => {
                    report.unknown_rows += 1;
                    if report.unknown_regions.insert(key.clone()) {
                        warn!("Skipping rows for unknown district {:?}", key);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let parsed = entry_date(entry).and_then(|date| entry_cases(entry).map(|c| (date, c)));
            let (date, cases) = match parsed {
                Ok(v) => v,
                Err(e) if self.strict => return Err(e),
                Err(e) => {
                    report.invalid_entries += 1;
                    warn!("Skipping invalid row for {}: {}", region, e);
                    continue;
                }
            };

            if let Some(previous) = records.insert(region.clone(), date, cases) {
                report.duplicates_replaced += 1;
                debug!(
                    "Duplicate row for {} on {}: {} replaced by {}",
                    region, date, previous, cases
                );
            }
            report.accepted += 1;
        }

        if records.is_empty() {
            return Err(Error::Parse("dataset contained no usable records".into()));
        }

        if self.fill_missing_days {
            report.zero_filled = records.fill_missing_days();
            debug!("Zero-filled {} unreported district days", report.zero_filled);
        }

        Ok((records, report))
    }
}

/// Map a provider row to its canonical district key.
///
/// Numeric keys are zero-padded and looked up directly; anything else goes
/// through the table's name index, trying the key before the district label.
pub fn resolve_region(entry: &RawCaseEntry, regions: &RegionTable) -> Result<RegionId, Error> {
    if let Some(id) = canonical_region_key(&entry.district_key) {
        if regions.contains(&id) {
            return Ok(id);
        }
    }

    let by_name = regions.resolve_alias(&entry.district_key).or_else(|| {
        entry
            .district_name
            .as_deref()
            .and_then(|name| regions.resolve_alias(name))
    });

    match by_name {
        Some(id) => Ok(id.clone()),
        None => Err(Error::UnknownRegion {
            key: if entry.district_key.trim().is_empty() {
                entry.district_name.clone().unwrap_or_default()
            } else {
                entry.district_key.trim().to_string()
            },
        }),
    }
}

fn entry_date(entry: &RawCaseEntry) -> Result<NaiveDate, Error> {
    DateTime::from_timestamp_millis(entry.reported_at_ms)
        .map(|ts| ts.date_naive())
        .ok_or_else(|| {
            Error::Parse(format!(
                "reporting timestamp {} is out of range",
                entry.reported_at_ms
            ))
        })
}

fn entry_cases(entry: &RawCaseEntry) -> Result<u64, Error> {
    u64::try_from(entry.cases)
        .map_err(|_| Error::Parse(format!("negative case count {}", entry.cases)))
}
