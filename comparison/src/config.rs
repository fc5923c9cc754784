//! Configuration for the comparison pipeline.
//!
//! Values are policy knobs, not per-request parameters: the wait budget for
//! each backend sub-query, the per-dimension top-K cutoff and the response
//! cache sitting in front of the backend.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`ComparisonHandler`](crate::ComparisonHandler).
///
/// # Example
///
/// ```
/// use comparison::Config;
///
/// let config = Config::from_toml_str(
///     r#"
///     query_timeout = "30s"
///     top_k = 10
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.top_k, 10);
/// assert!(config.cache.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// How long to wait on each pending sub-query before giving up on the
    /// whole comparison.
    #[serde(with = "humantime_serde", default = "default_query_timeout")]
    pub query_timeout: Duration,

    /// Number of values kept per group-by dimension; the backend folds the
    /// remainder into an `OTHER` group.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Response cache settings. `None` disables caching.
    #[serde(default = "default_cache")]
    pub cache: Option<CacheConfig>,
}

/// Settings for the backend response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached responses.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// How long a cached response stays valid.
    #[serde(with = "humantime_serde", default = "default_time_to_live")]
    pub time_to_live: Duration,
}

impl Config {
    /// Parses a TOML document, filling unspecified fields with defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            query_timeout: default_query_timeout(),
            top_k: default_top_k(),
            cache: default_cache(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            time_to_live: default_time_to_live(),
        }
    }
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_top_k() -> usize {
    25
}

fn default_cache() -> Option<CacheConfig> {
    Some(CacheConfig::default())
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_time_to_live() -> Duration {
    Duration::from_secs(5 * 60)
}
