//! Entity store interface

use async_trait::async_trait;
use thiserror::Error;

use super::filter::StoreQuery;
use crate::models::Song;

/// Errors returned by song stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// The filter/sort combination requires a composite index that doesn't exist.
    /// Callers may retry with a query shape that doesn't need one.
    #[error("no matching composite index for query: {query}")]
    NeedsIndex { query: String },
    #[error("song {0} not found")]
    SongNotFound(i64),
    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_needs_index(&self) -> bool {
        matches!(self, StoreError::NeedsIndex { .. })
    }
}

/// Backing store holding song records
#[async_trait]
pub trait SongStore: Send + Sync {
    /// Run a query and return matching song IDs
    ///
    /// IDs come back in `query.order` order if set, otherwise ascending.
    async fn run_query(&self, query: &StoreQuery) -> Result<Vec<i64>, StoreError>;

    /// Fetch songs by ID, in the order requested
    async fn get_songs(&self, ids: &[i64]) -> Result<Vec<Song>, StoreError>;

    /// Distinct tags assigned to any song, sorted
    async fn scan_tags(&self) -> Result<Vec<String>, StoreError>;
}
