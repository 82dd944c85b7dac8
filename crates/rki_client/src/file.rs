//! Region table loaded from a local JSON file.
//!
//! Used instead of the remote district layer when coordinates are needed
//! for heatmap output, since the FeatureServer query carries none.

use std::path::PathBuf;

use async_trait::async_trait;
use common::{Error, Region};
use tracing::info;

use crate::RegionSource;

#[derive(Debug, Clone)]
pub struct FileRegionSource {
    path: PathBuf,
}

impl FileRegionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegionSource for FileRegionSource {
    async fn fetch_regions(&self) -> Result<Vec<Region>, Error> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let regions: Vec<Region> = serde_json::from_str(&contents)?;
        info!(
            "Loaded {} districts from {}",
            regions.len(),
            self.path.display()
        );
        Ok(regions)
    }
}
