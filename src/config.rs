//! Configuration loader and validator for the seller orders console.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::grouping::DEFAULT_TOLERANCE_SECS;
use crate::shipping::{ShipPolicy, DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE};

/// Upper bound for `grouping.tolerance_seconds` (one day).
pub const MAX_TOLERANCE_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    #[serde(default)]
    pub grouping: Grouping,
    #[serde(default)]
    pub shipping: Shipping,
}

/// Remote backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    pub seller_id: i64,
    #[serde(default = "default_user_header")]
    pub user_header: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Client-side grouping of ungrouped orders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Grouping {
    #[serde(default = "default_tolerance_seconds")]
    pub tolerance_seconds: u64,
}

/// Per-order fallback batching used by bulk shipping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shipping {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_user_header() -> String {
    "X-User-ID".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_tolerance_seconds() -> u64 {
    DEFAULT_TOLERANCE_SECS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    DEFAULT_BATCH_DELAY_MS
}

impl Default for Grouping {
    fn default() -> Self {
        Self {
            tolerance_seconds: default_tolerance_seconds(),
        }
    }
}

impl Default for Shipping {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl Config {
    pub fn tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grouping.tolerance_seconds.min(MAX_TOLERANCE_SECS) as i64)
    }

    pub fn ship_policy(&self) -> ShipPolicy {
        ShipPolicy {
            batch_size: self.shipping.batch_size,
            batch_delay: Duration::from_millis(self.shipping.batch_delay_ms),
        }
    }
}

impl Backend {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let base_url = cfg.backend.base_url.trim();
    if base_url.is_empty() {
        return Err(ConfigError::Invalid("backend.base_url must be non-empty"));
    }
    if Url::parse(base_url).is_err() {
        return Err(ConfigError::Invalid("backend.base_url must be an absolute URL"));
    }
    if cfg.backend.seller_id <= 0 {
        return Err(ConfigError::Invalid("backend.seller_id must be > 0"));
    }
    if cfg.backend.user_header.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.user_header must be non-empty"));
    }
    if cfg.backend.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("backend.timeout_seconds must be > 0"));
    }
    if cfg.shipping.batch_size == 0 {
        return Err(ConfigError::Invalid("shipping.batch_size must be > 0"));
    }
    if cfg.grouping.tolerance_seconds > MAX_TOLERANCE_SECS {
        return Err(ConfigError::Invalid("grouping.tolerance_seconds must be <= 86400"));
    }
    // tolerance_seconds and batch_delay_ms may legitimately be zero

    Ok(())
}

/// Returns the example YAML document.
pub fn example() -> &'static str {
    r#"backend:
  base_url: "http://localhost:5000/"
  seller_id: 42
  user_header: "X-User-ID"
  timeout_seconds: 30

grouping:
  tolerance_seconds: 120

shipping:
  batch_size: 3
  batch_delay_ms: 300
"#
}
