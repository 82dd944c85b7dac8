//! Unified error type for the incidence tracker.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure, timeout, non-success status or an upstream error body.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown region: {key}")]
    UnknownRegion { key: String },

    #[error("Compute error: {0}")]
    Compute(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
