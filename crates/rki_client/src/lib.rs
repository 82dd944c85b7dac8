//! RKI ArcGIS client.
//!
//! Fetches per-district daily case counts and the district reference table
//! from the RKI FeatureServer and hands them to the pipeline as raw,
//! unvalidated datasets.

pub mod arcgis;
pub mod client;
pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Error, Region};

pub use client::RkiClient;
pub use file::FileRegionSource;

/// One provider row: new cases for a district on a reporting day.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCaseEntry {
    /// Provider district key, possibly without the leading zero.
    pub district_key: String,
    /// Provider label such as "SK München".
    pub district_name: Option<String>,
    /// Reporting date as epoch milliseconds.
    pub reported_at_ms: i64,
    /// Reported count; not yet validated.
    pub cases: i64,
}

/// A complete raw case dataset as returned by the upstream.
#[derive(Debug, Clone)]
pub struct RawCaseDataset {
    pub entries: Vec<RawCaseEntry>,
    pub fetched_at: DateTime<Utc>,
}

/// Source of raw case data.
#[async_trait]
pub trait CaseSource: Send + Sync {
    async fn fetch_cases(&self) -> Result<RawCaseDataset, Error>;
}

/// Source of the district reference table.
#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn fetch_regions(&self) -> Result<Vec<Region>, Error>;
}
