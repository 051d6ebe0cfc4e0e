//! Query engine configuration
//!
//! Settings come from an optional config file (JSON, TOML or YAML, picked by
//! extension) overridden by `NUP_*` environment variables, e.g.
//! `NUP_MAX_RESULTS=50`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Query engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Maximum number of songs returned for a query
    pub max_results: usize,

    /// Maximum random nudge applied to a song's position when spreading
    /// shuffled results
    pub shuffle_skew: f64,

    /// Maximum number of entries in the fast cache tier
    pub fast_tier_capacity: usize,

    /// Lifetime of fast cache tier entries, in seconds
    pub fast_tier_ttl_secs: u64,

    /// SQLite database backing the durable cache tier
    pub durable_db_path: Option<PathBuf>,

    /// Retry queries with the fallback plan when the store is missing an index
    pub auto_fallback: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_results: 100,
            shuffle_skew: 0.25,
            fast_tier_capacity: 128,
            fast_tier_ttl_secs: 24 * 60 * 60,
            durable_db_path: None,
            auto_fallback: true,
        }
    }
}

impl QueryConfig {
    /// Load configuration from `path` (if given) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix("NUP").try_parsing(true));

        let settings = builder.build().context("Failed to read configuration")?;
        let config: QueryConfig = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if config.max_results == 0 {
            anyhow::bail!("max_results must be positive");
        }
        Ok(config)
    }

    pub fn fast_tier_ttl(&self) -> Duration {
        Duration::from_secs(self.fast_tier_ttl_secs)
    }

    /// Durable tier database path, defaulting to the platform data directory
    pub fn durable_db_path(&self) -> PathBuf {
        self.durable_db_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "nup")
                .map(|dirs| dirs.data_dir().join("cache.db"))
                .unwrap_or_else(|| PathBuf::from("nup-cache.db"))
        })
    }
}
