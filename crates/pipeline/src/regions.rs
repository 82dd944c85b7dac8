//! District reference table: initial load and independent refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{Error, RegionId, RegionTable};
use rki_client::RegionSource;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Shared handle to the current region table; refreshes swap the whole table.
#[derive(Debug)]
pub struct RegionHandle {
    current: RwLock<Arc<RegionTable>>,
}

impl RegionHandle {
    pub fn new(table: RegionTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub async fn current(&self) -> Arc<RegionTable> {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, table: RegionTable) {
        *self.current.write().await = Arc::new(table);
    }
}

/// Fetch and validate a region table, applying configured aliases.
pub async fn load_region_table(
    source: &dyn RegionSource,
    aliases: &BTreeMap<String, RegionId>,
) -> Result<RegionTable, Error> {
    let regions = source.fetch_regions().await?;
    let table = RegionTable::new(regions)?.with_aliases(aliases)?;
    if table.is_empty() {
        return Err(Error::Parse("region reference table is empty".into()));
    }
    Ok(table)
}

/// Reloads the region table on its own cadence.
pub struct RegionRefresher {
    source: Arc<dyn RegionSource>,
    handle: Arc<RegionHandle>,
    aliases: BTreeMap<String, RegionId>,
}

impl RegionRefresher {
    pub fn new(
        source: Arc<dyn RegionSource>,
        handle: Arc<RegionHandle>,
        aliases: BTreeMap<String, RegionId>,
    ) -> Self {
        Self {
            source,
            handle,
            aliases,
        }
    }

    /// Reload once. On failure the previous table stays in place.
    pub async fn refresh(&self) -> Result<usize, Error> {
        match load_region_table(self.source.as_ref(), &self.aliases).await {
            Ok(table) => {
                let count = table.len();
                self.handle.replace(table).await;
                info!("Region table refreshed: {} districts", count);
                Ok(count)
            }
            Err(e) => {
                warn!("Region refresh failed, keeping previous table: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bavaria, FakeRegions};

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_table() {
        let handle = Arc::new(RegionHandle::new(
            RegionTable::new(vec![bavaria()]).expect("valid table"),
        ));
        let source = Arc::new(FakeRegions::new(vec![Err(Error::Fetch(
            "RKI returned 503".into(),
        ))]));
        let refresher = RegionRefresher::new(source, handle.clone(), BTreeMap::new());

        assert!(refresher.refresh().await.is_err());
        let table = handle.current().await;
        assert_eq!(table.len(), 1);
        assert!(table.contains("09000"));
    }

    #[tokio::test]
    async fn test_refresh_swaps_table() {
        let handle = Arc::new(RegionHandle::new(RegionTable::default()));
        let mut updated = bavaria();
        updated.population = 13_100_000;
        let source = Arc::new(FakeRegions::new(vec![Ok(vec![updated])]));
        let refresher = RegionRefresher::new(source, handle.clone(), BTreeMap::new());

        let before = handle.current().await;
        assert_eq!(refresher.refresh().await.expect("refresh"), 1);
        let after = handle.current().await;

        assert!(before.is_empty());
        assert_eq!(after.get("09000").map(|r| r.population), Some(13_100_000));
    }

    #[tokio::test]
    async fn test_empty_reference_is_rejected() {
        let source = FakeRegions::new(vec![Ok(Vec::new())]);
        let result = load_region_table(&source, &BTreeMap::new()).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
