//! HTTP client for the RKI FeatureServer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use common::{Error, Region, TrackerConfig, WINDOW_DAYS};
use tracing::{debug, info};

use crate::arcgis::{parse_case_page, parse_region_page, Page};
use crate::{CaseSource, RawCaseDataset, RegionSource};

type QueryParams = Vec<(&'static str, String)>;

const CASE_STATISTICS: &str = r#"[{"statisticType":"sum","onStatisticField":"AnzahlFall","outStatisticFieldName":"AnzahlFall"}]"#;

/// Grouped per-district daily counts since `since`, in a stable order so
/// offset paging neither skips nor repeats rows.
pub fn case_query(since: NaiveDate) -> QueryParams {
    vec![
        (
            "where",
            format!(
                "NeuerFall IN(0,1) AND Meldedatum >= timestamp '{} 00:00:00'",
                since.format("%Y-%m-%d")
            ),
        ),
        ("outStatistics", CASE_STATISTICS.to_string()),
        (
            "groupByFieldsForStatistics",
            "IdLandkreis,Landkreis,Meldedatum".to_string(),
        ),
        ("orderByFields", "IdLandkreis,Meldedatum".to_string()),
        ("f", "json".to_string()),
    ]
}

/// District reference rows with WGS84 centroids.
pub fn region_query() -> QueryParams {
    vec![
        ("where", "1=1".to_string()),
        ("outFields", "RS,GEN,BEZ,BL,EWZ,NUTS".to_string()),
        ("returnGeometry", "false".to_string()),
        ("returnCentroid", "true".to_string()),
        ("outSR", "4326".to_string()),
        ("orderByFields", "RS".to_string()),
        ("f", "json".to_string()),
    ]
}

/// RKI client with connection pooling, User-Agent header and a per-request timeout.
#[derive(Debug, Clone)]
pub struct RkiClient {
    client: reqwest::Client,
    cases_url: String,
    regions_url: String,
    page_size: u32,
    max_pages: u32,
    timeout: Duration,
    /// Days of case history requested per cycle.
    lookback_days: u64,
}

impl RkiClient {
    pub fn new(cfg: &TrackerConfig) -> Result<Self, Error> {
        let timeout = Duration::from_secs(cfg.timing.request_timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(cfg.fetch.user_agent.clone())
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cases_url: cfg.cases_url.clone(),
            regions_url: cfg.regions_url.clone(),
            page_size: cfg.fetch.page_size,
            max_pages: cfg.fetch.max_pages,
            timeout,
            lookback_days: WINDOW_DAYS
                + u64::from(cfg.as_of_lag_days)
                + u64::from(cfg.fetch.lookback_margin_days),
        })
    }

    /// First reporting day requested when fetching on `today`.
    pub fn cases_since(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(self.lookback_days))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Fetch one page body at `offset`.
    async fn fetch_page_body(
        &self,
        url: &str,
        params: &[(&'static str, String)],
        offset: u64,
        what: &str,
    ) -> Result<String, Error> {
        debug!("Fetching {} page at offset {}: {}", what, offset, url);

        let resp = self
            .client
            .get(url)
            .query(params)
            .query(&[
                ("resultOffset", offset.to_string()),
                ("resultRecordCount", self.page_size.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Fetch(format!(
                        "{} request timed out after {}s",
                        what,
                        self.timeout.as_secs()
                    ))
                } else {
                    Error::Fetch(format!("HTTP error for {}: {}", what, e))
                }
            })?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!(
                "RKI returned {} for {}: {}",
                status,
                what,
                body.chars().take(500).collect::<String>()
            )));
        }

        resp.text().await.map_err(|e| {
            if e.is_timeout() {
                Error::Fetch(format!(
                    "{} body timed out after {}s",
                    what,
                    self.timeout.as_secs()
                ))
            } else {
                Error::Fetch(format!("failed to read {} body: {}", what, e))
            }
        })
    }

    /// Follow `exceededTransferLimit` until the server reports the last page.
    async fn fetch_all<T, F>(
        &self,
        url: &str,
        params: &[(&'static str, String)],
        what: &str,
        parse: F,
    ) -> Result<Vec<T>, Error>
    where
        F: Fn(&str) -> Result<Page<T>, Error>,
    {
        let mut rows = Vec::new();
        let mut offset: u64 = 0;

        for page_no in 0..self.max_pages {
            let body = self.fetch_page_body(url, params, offset, what).await?;
            let page = parse(&body)?;
            let count = page.rows.len();
            rows.extend(page.rows);

            debug!(
                "{} page {}: {} rows (total {}), more={}",
                what, page_no, count, rows.len(), page.has_more
            );

            if !page.has_more || count == 0 {
                return Ok(rows);
            }
            offset += count as u64;
        }

        Err(Error::Fetch(format!(
            "{} query still truncated after {} pages",
            what, self.max_pages
        )))
    }
}

#[async_trait]
impl CaseSource for RkiClient {
    async fn fetch_cases(&self) -> Result<RawCaseDataset, Error> {
        let since = self.cases_since(Utc::now().date_naive());
        let params = case_query(since);
        let entries = self
            .fetch_all(&self.cases_url, &params, "case", parse_case_page)
            .await?;
        info!(
            "Fetched {} raw case rows from RKI reported since {}",
            entries.len(),
            since
        );

        Ok(RawCaseDataset {
            entries,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl RegionSource for RkiClient {
    async fn fetch_regions(&self) -> Result<Vec<Region>, Error> {
        let params = region_query();
        let regions = self
            .fetch_all(&self.regions_url, &params, "district", parse_region_page)
            .await?;
        info!("Fetched {} districts from RKI", regions.len());
        Ok(regions)
    }
}
