//! Tracker configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::RegionId;

/// Top-level tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Query endpoint of the RKI_COVID19 layer. Query parameters are added
    /// by the client.
    #[serde(default = "default_cases_url")]
    pub cases_url: String,

    /// Query endpoint of the RKI_Landkreisdaten layer.
    #[serde(default = "default_regions_url")]
    pub regions_url: String,

    /// Local JSON region table; takes precedence over `regions_url`.
    #[serde(default)]
    pub regions_path: Option<PathBuf>,

    /// Days to step back from the newest reported date.
    #[serde(default)]
    pub as_of_lag_days: u32,

    /// Address handed to the rendering layer.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Directory for the JSON-lines cycle journal.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub normalize: NormalizeConfig,
}

/// Timing configuration (all values in seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Case data refresh interval.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Region reference refresh interval; 0 disables refreshing.
    #[serde(default = "default_regions_refresh_interval")]
    pub regions_refresh_interval_secs: u64,

    /// Upper bound for a single HTTP request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// ArcGIS paging parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Extra days requested before the incidence window and the as-of lag.
    #[serde(default = "default_lookback_margin_days")]
    pub lookback_margin_days: u32,
}

/// Normalizer policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Abort the cycle on the first unmapped region instead of skipping it.
    #[serde(default)]
    pub strict_regions: bool,

    /// Count unreported days inside the fetched range as zero cases. The
    /// grouped RKI query emits no row for a day without new cases.
    #[serde(default = "default_fill_missing_days")]
    pub fill_missing_days: bool,

    /// Extra provider spellings mapped to district keys.
    #[serde(default)]
    pub aliases: BTreeMap<String, RegionId>,
}

// ── Defaults ──────────────────────────────────────────────────────────

pub const RKI_CASES_URL: &str = "https://services7.arcgis.com/mOBPykOjAyBO2ZKk/arcgis/rest/services/\
RKI_COVID19/FeatureServer/0/query";

pub const RKI_REGIONS_URL: &str = "https://services7.arcgis.com/mOBPykOjAyBO2ZKk/arcgis/rest/services/\
RKI_Landkreisdaten/FeatureServer/0/query";

fn default_cases_url() -> String {
    RKI_CASES_URL.into()
}
fn default_regions_url() -> String {
    RKI_REGIONS_URL.into()
}
fn default_listen_addr() -> String {
    "127.0.0.1:5000".into()
}
fn default_journal_dir() -> PathBuf {
    PathBuf::from("journal").join("incidence-tracker")
}

fn default_refresh_interval() -> u64 {
    3600
}
fn default_regions_refresh_interval() -> u64 {
    86_400
}
fn default_request_timeout() -> u64 {
    30
}

fn default_page_size() -> u32 {
    2000
}
fn default_max_pages() -> u32 {
    200
}
fn default_user_agent() -> String {
    "incidence-tracker/0.1 (covid-tracker-germany)".into()
}
fn default_lookback_margin_days() -> u32 {
    7
}

fn default_fill_missing_days() -> bool {
    true
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            regions_refresh_interval_secs: default_regions_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            user_agent: default_user_agent(),
            lookback_margin_days: default_lookback_margin_days(),
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            strict_regions: false,
            fill_missing_days: default_fill_missing_days(),
            aliases: BTreeMap::new(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cases_url: default_cases_url(),
            regions_url: default_regions_url(),
            regions_path: None,
            as_of_lag_days: 0,
            listen_addr: default_listen_addr(),
            journal_dir: default_journal_dir(),
            timing: TimingConfig::default(),
            fetch: FetchConfig::default(),
            normalize: NormalizeConfig::default(),
        }
    }
}
