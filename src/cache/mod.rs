//! Two-tier caching of query results and the tag list
//!
//! Both tiers expose the same byte-oriented key/value interface. The query
//! result map and the tag list are serialized as JSON and read and written
//! whole, so each tier holds at most two entries.

mod coordinator;
mod durable;
mod entries;
mod fast;
mod tier;

use thiserror::Error;

pub use coordinator::CacheCoordinator;
pub use durable::DurableTier;
pub use entries::{CachedQuery, QueryMap, QUERIES_KEY, TAGS_KEY};
pub use fast::FastTier;
pub use tier::{CacheTier, CacheTierStore};

/// Errors returned by cache tiers
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Backend(err.to_string())
    }
}
