//! Cached query results and the cached tag list
//!
//! Each tier stores every cached query under [`QUERIES_KEY`] as one JSON map
//! keyed by [`SongQuery::hash`], plus the in-use tag list under [`TAGS_KEY`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CacheError, CacheTierStore};
use crate::models::{SongQuery, UpdateKind};

/// Key of the cached query map in each tier
pub const QUERIES_KEY: &str = "queries";
/// Key of the cached tag list in each tier
pub const TAGS_KEY: &str = "tags";

/// A query and the IDs of the songs it matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuery {
    pub query: SongQuery,
    pub ids: Vec<i64>,
}

/// All cached queries in a tier, keyed by query hash
pub type QueryMap = BTreeMap<String, CachedQuery>;

/// Load the query map from `tier`, or `None` if the tier doesn't have one
pub async fn load_queries(tier: &dyn CacheTierStore) -> Result<Option<QueryMap>, CacheError> {
    match tier.get(QUERIES_KEY).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Load the query map from `tier`, pass it to `f` and save it back
///
/// The map is only written back if `f` returns true, so a no-op update never
/// touches the tier.
pub async fn update_queries<F>(tier: &dyn CacheTierStore, f: F) -> Result<bool, CacheError>
where
    F: FnOnce(&mut QueryMap) -> bool + Send,
{
    let mut queries = load_queries(tier).await?.unwrap_or_default();
    if !f(&mut queries) {
        return Ok(false);
    }
    let bytes = serde_json::to_vec(&queries)?;
    tier.set(QUERIES_KEY, &bytes).await?;
    Ok(true)
}

/// Cached IDs for the query with hash `hash`, if any
pub async fn get_results(
    tier: &dyn CacheTierStore,
    hash: &str,
) -> Result<Option<Vec<i64>>, CacheError> {
    Ok(load_queries(tier)
        .await?
        .and_then(|mut queries| queries.remove(hash))
        .map(|cached| cached.ids))
}

/// Cache `ids` as the results of `query`
pub async fn set_results(
    tier: &dyn CacheTierStore,
    hash: &str,
    query: &SongQuery,
    ids: &[i64],
) -> Result<(), CacheError> {
    let cached = CachedQuery {
        query: query.clone(),
        ids: ids.to_vec(),
    };
    update_queries(tier, |queries| {
        queries.insert(hash.to_string(), cached);
        true
    })
    .await?;
    Ok(())
}

/// Drop every cached query made stale by an update of `kind`
///
/// Returns the number of queries removed.
pub async fn remove_invalidated(
    tier: &dyn CacheTierStore,
    kind: UpdateKind,
) -> Result<usize, CacheError> {
    let mut removed = 0;
    update_queries(tier, |queries| {
        let before = queries.len();
        queries.retain(|_, cached| !cached.query.results_invalidated(kind));
        removed = before - queries.len();
        removed > 0
    })
    .await?;
    Ok(removed)
}

pub async fn get_tags(tier: &dyn CacheTierStore) -> Result<Option<Vec<String>>, CacheError> {
    match tier.get(TAGS_KEY).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn set_tags(tier: &dyn CacheTierStore, tags: &[String]) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(tags)?;
    tier.set(TAGS_KEY, &bytes).await
}
