//! Configuration loader: merges env vars, the .env file, and config.toml.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::{canonical_region_key, Error, TrackerConfig};

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

pub fn validate_config(config: &TrackerConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if !is_http_url(&config.cases_url) {
        issues.push("cases_url must be an http(s) URL".into());
    }
    if config.regions_path.is_none() && !is_http_url(&config.regions_url) {
        issues.push("regions_url must be an http(s) URL when regions_path is unset".into());
    }
    if config.listen_addr.parse::<SocketAddr>().is_err() {
        issues.push(format!(
            "listen_addr {:?} is not a socket address",
            config.listen_addr
        ));
    }

    if config.timing.refresh_interval_secs == 0 {
        issues.push("timing.refresh_interval_secs must be > 0".into());
    }
    if config.timing.request_timeout_secs == 0 {
        issues.push("timing.request_timeout_secs must be > 0".into());
    }

    if config.fetch.page_size == 0 || config.fetch.page_size > 32_000 {
        issues.push("fetch.page_size must be in 1..=32000".into());
    }
    if config.fetch.max_pages == 0 {
        issues.push("fetch.max_pages must be > 0".into());
    }
    if config.fetch.user_agent.trim().is_empty() {
        issues.push("fetch.user_agent must not be empty".into());
    }

    for (alias, target) in &config.normalize.aliases {
        if canonical_region_key(target).as_deref() != Some(target.trim()) {
            issues.push(format!(
                "normalize.aliases[{alias:?}] must be a 5-digit district key, got {target:?}"
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

fn apply_env_overrides(config: &mut TrackerConfig) -> Result<(), Error> {
    if let Ok(url) = std::env::var("TRACKER_CASES_URL") {
        config.cases_url = url.trim().to_string();
    }
    if let Ok(url) = std::env::var("TRACKER_REGIONS_URL") {
        config.regions_url = url.trim().to_string();
    }
    if let Ok(path) = std::env::var("TRACKER_REGIONS_PATH") {
        let trimmed = path.trim();
        config.regions_path = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
    }
    if let Ok(raw) = std::env::var("TRACKER_REFRESH_INTERVAL_SECS") {
        config.timing.refresh_interval_secs =
            parse_positive_u64(&raw, "TRACKER_REFRESH_INTERVAL_SECS")?;
    }
    if let Ok(raw) = std::env::var("TRACKER_REGIONS_REFRESH_INTERVAL_SECS") {
        config.timing.regions_refresh_interval_secs =
            parse_non_negative_u64(&raw, "TRACKER_REGIONS_REFRESH_INTERVAL_SECS")?;
    }
    if let Ok(raw) = std::env::var("TRACKER_REQUEST_TIMEOUT_SECS") {
        config.timing.request_timeout_secs =
            parse_positive_u64(&raw, "TRACKER_REQUEST_TIMEOUT_SECS")?;
    }
    if let Ok(raw) = std::env::var("TRACKER_STRICT_REGIONS") {
        config.normalize.strict_regions = parse_bool(&raw);
    }
    if let Ok(raw) = std::env::var("TRACKER_FILL_MISSING_DAYS") {
        config.normalize.fill_missing_days = parse_bool(&raw);
    }
    if let Ok(raw) = std::env::var("TRACKER_AS_OF_LAG_DAYS") {
        let parsed = parse_non_negative_u64(&raw, "TRACKER_AS_OF_LAG_DAYS")?;
        config.as_of_lag_days = u32::try_from(parsed)
            .map_err(|_| Error::Config("TRACKER_AS_OF_LAG_DAYS is too large".into()))?;
    }
    if let Ok(addr) = std::env::var("TRACKER_LISTEN_ADDR") {
        config.listen_addr = addr.trim().to_string();
    }
    if let Ok(dir) = std::env::var("TRACKER_JOURNAL_DIR") {
        config.journal_dir = PathBuf::from(dir.trim());
    }
    Ok(())
}

/// Parse a config file body on top of the defaults.
pub fn parse_config_file(contents: &str) -> Result<TrackerConfig, Error> {
    toml::from_str(contents).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

/// Load tracker configuration from environment and optional config file.
pub fn load_config(config_path: &Path) -> Result<TrackerConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults, then the config file if it exists.
    let mut config = TrackerConfig::default();
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!(
                "Failed to read {}: {}",
                config_path.display(),
                e
            ))
        })?;
        config = parse_config_file(&contents)?;
    }

    // 3. Environment variables take the highest priority.
    apply_env_overrides(&mut config)?;

    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&TrackerConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_intervals_rejected_together() {
        let mut cfg = TrackerConfig::default();
        cfg.timing.refresh_interval_secs = 0;
        cfg.timing.request_timeout_secs = 0;

        let Err(Error::Config(msg)) = validate_config(&cfg) else {
            panic!("expected config error");
        };
        assert!(msg.contains("refresh_interval_secs"));
        assert!(msg.contains("request_timeout_secs"));
    }

    #[test]
    fn test_bad_alias_target_and_listen_addr_rejected() {
        let mut cfg = TrackerConfig::default();
        cfg.listen_addr = "localhost".into();
        cfg.normalize.aliases.insert("Berlin".into(), "110".into());

        let Err(Error::Config(msg)) = validate_config(&cfg) else {
            panic!("expected config error");
        };
        assert!(msg.contains("listen_addr"));
        assert!(msg.contains("normalize.aliases"));
    }

    #[test]
    fn test_regions_path_allows_non_http_regions_url() {
        let mut cfg = TrackerConfig::default();
        cfg.regions_url = String::new();
        cfg.regions_path = Some(PathBuf::from("regions.json"));
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_parse_config_file() {
        let cfg = parse_config_file(
            r#"
            as_of_lag_days = 1
            regions_path = "data/regions.json"

            [timing]
            refresh_interval_secs = 900

            [normalize]
            strict_regions = true
            fill_missing_days = false

            [normalize.aliases]
            "SK Berlin" = "11000"
            "#,
        )
        .expect("config should parse");

        assert_eq!(cfg.as_of_lag_days, 1);
        assert_eq!(cfg.timing.refresh_interval_secs, 900);
        assert_eq!(cfg.timing.request_timeout_secs, 30);
        assert!(cfg.normalize.strict_regions);
        assert!(!cfg.normalize.fill_missing_days);
        assert_eq!(cfg.fetch.lookback_margin_days, 7);
        assert_eq!(cfg.normalize.aliases.len(), 1);
        assert_eq!(cfg.regions_path, Some(PathBuf::from("data/regions.json")));
    }

    #[test]
    fn test_parse_bool_accepts_common_falsy_values() {
        assert!(!parse_bool("off"));
        assert!(!parse_bool(" FALSE "));
        assert!(parse_bool("1"));
    }
}
