//! nup - song query planning and two-tier result caching
//!
//! Songs live in a [`db::SongStore`] that only supports equality filters plus
//! a single inequality filter per query. [`core::QueryPlanner`] splits richer
//! [`models::SongQuery`]s into queries the store can run and merges the
//! results, and [`cache::CacheCoordinator`] serves results from a fast and a
//! durable cache tier, falling back to the planner on a miss.

pub mod cache;
pub mod config;
pub mod core;
pub mod db;
pub mod models;
pub mod stores;
pub mod utils;

use thiserror::Error;

use crate::db::StoreError;

/// Errors returned to callers of the query engine
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Tags were requested from the cache only and neither tier had them
    #[error("tags not cached")]
    TagsNotCached,
    /// One or more cache tiers couldn't be updated
    #[error("failed to flush cache: {0}")]
    CacheFlush(String),
    #[error("failed to hash query: {0}")]
    Hash(#[source] serde_json::Error),
}

pub use cache::CacheCoordinator;
pub use config::QueryConfig;
pub use models::{Song, SongQuery, SongsFlags, UpdateKind};
