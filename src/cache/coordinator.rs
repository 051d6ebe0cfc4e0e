//! Cache coordinator - read-through/write-back caching of query results
//!
//! Lookups try the fast tier and then the durable tier. On a full miss the
//! query is planned against the store, and the results are written back to
//! every tier that missed while the matching songs are fetched and arranged.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error};

use super::entries::{self, QUERIES_KEY, TAGS_KEY};
use super::{CacheTier, CacheTierStore};
use crate::config::QueryConfig;
use crate::core::{PostProcessor, QueryPlanner};
use crate::db::SongStore;
use crate::models::{FallbackMode, Song, SongQuery, SongsFlags, UpdateKind};
use crate::utils::dates::msec_since;
use crate::QueryError;

/// Serves song queries and the tag list through the two cache tiers
pub struct CacheCoordinator {
    store: Arc<dyn SongStore>,
    planner: QueryPlanner,
    post: PostProcessor,
    fast: Arc<dyn CacheTierStore>,
    durable: Arc<dyn CacheTierStore>,
    auto_fallback: bool,
}

impl CacheCoordinator {
    pub fn new(
        store: Arc<dyn SongStore>,
        fast: Arc<dyn CacheTierStore>,
        durable: Arc<dyn CacheTierStore>,
        config: &QueryConfig,
    ) -> Self {
        Self {
            planner: QueryPlanner::new(Arc::clone(&store), config.max_results),
            post: PostProcessor::new(config.max_results, config.shuffle_skew),
            store,
            fast,
            durable,
            auto_fallback: config.auto_fallback,
        }
    }

    fn tier(&self, tier: CacheTier) -> &dyn CacheTierStore {
        match tier {
            CacheTier::Fast => self.fast.as_ref(),
            CacheTier::Durable => self.durable.as_ref(),
        }
    }

    /// Run `query` and return the matching songs, ready for playback
    ///
    /// Cache-tier failures are logged and treated as misses.
    pub async fn songs(&self, query: &SongQuery, flags: SongsFlags) -> Result<Vec<Song>, QueryError> {
        let hash = query.hash().map_err(QueryError::Hash)?;

        let mut ids = None;
        let mut missed = Vec::new();
        for tier in CacheTier::ALL {
            let start = Instant::now();
            match entries::get_results(self.tier(tier), &hash).await {
                Ok(Some(cached)) => {
                    debug!(
                        "Got {} cached result(s) from {} in {} ms",
                        cached.len(),
                        tier,
                        msec_since(start)
                    );
                    ids = Some(cached);
                    break;
                }
                Ok(None) => {
                    debug!("Cache miss from {} took {} ms", tier, msec_since(start));
                    missed.push(tier);
                }
                Err(e) => error!("Got error while getting cached results from {}: {}", tier, e),
            }
        }

        let ids = match ids {
            Some(ids) => ids,
            None if flags.cache_only => {
                // empty results aren't real results, so don't cache them
                missed.clear();
                Vec::new()
            }
            None => self.run_planner(query, flags.fallback).await?,
        };

        let backfill = async {
            if !query.can_cache() || missed.is_empty() {
                return;
            }
            join_all(missed.iter().map(|&tier| {
                let ids = &ids;
                let hash = &hash;
                async move {
                    let start = Instant::now();
                    match entries::set_results(self.tier(tier), hash, query, ids).await {
                        Ok(()) => debug!("Cached results to {} in {} ms", tier, msec_since(start)),
                        Err(e) => error!("Got error while caching results to {}: {}", tier, e),
                    }
                }
            }))
            .await;
        };

        let wait_start = Instant::now();
        let ((), songs) = tokio::join!(backfill, self.fetch_songs(&ids, query));
        if query.can_cache() && !missed.is_empty() {
            debug!(
                "Waited {} ms for {} cache write(s)",
                msec_since(wait_start),
                missed.len()
            );
        }
        songs
    }

    /// Plan `query`, retrying once with the fallback plan if allowed
    async fn run_planner(&self, query: &SongQuery, fallback: FallbackMode) -> Result<Vec<i64>, QueryError> {
        let fallback = match fallback {
            FallbackMode::Auto if !self.auto_fallback => FallbackMode::Never,
            mode => mode,
        };

        let ids = match fallback {
            FallbackMode::Force => self.planner.plan(query, true).await?,
            mode => match self.planner.plan(query, false).await {
                Err(e) if e.is_needs_index() && mode == FallbackMode::Auto => {
                    debug!("{}; retrying with fallback plan", e);
                    self.planner.plan(query, true).await?
                }
                result => result?,
            },
        };
        Ok(ids)
    }

    /// Truncate or shuffle the matched IDs and fetch their songs
    async fn fetch_songs(&self, ids: &[i64], query: &SongQuery) -> Result<Vec<Song>, QueryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self
            .post
            .select_ids(ids.to_vec(), query, &mut rand::thread_rng());

        let start = Instant::now();
        let mut songs = self.store.get_songs(&ids).await?;
        debug!("Fetched {} song(s) in {} ms", songs.len(), msec_since(start));

        for song in &mut songs {
            song.clean_for_results();
        }
        self.post.arrange(&mut songs, query, &mut rand::thread_rng());
        Ok(songs)
    }

    /// Every tag assigned to any song, sorted
    ///
    /// With `require_cache`, a cache miss fails with
    /// [`QueryError::TagsNotCached`] instead of scanning the store.
    pub async fn tags(&self, require_cache: bool) -> Result<Vec<String>, QueryError> {
        let mut tags = None;
        let mut missed = Vec::new();
        for tier in CacheTier::ALL {
            let start = Instant::now();
            match entries::get_tags(self.tier(tier)).await {
                Ok(Some(cached)) => {
                    debug!(
                        "Got {} cached tag(s) from {} in {} ms",
                        cached.len(),
                        tier,
                        msec_since(start)
                    );
                    tags = Some(cached);
                    break;
                }
                Ok(None) => {
                    debug!("Cache miss from {} took {} ms", tier, msec_since(start));
                    missed.push(tier);
                }
                Err(e) => error!("Got error while getting cached tags from {}: {}", tier, e),
            }
        }

        let tags = match tags {
            Some(tags) => tags,
            None if require_cache => return Err(QueryError::TagsNotCached),
            None => {
                let start = Instant::now();
                let tags = self.store.scan_tags().await?;
                debug!("Scanned {} tag(s) in {} ms", tags.len(), msec_since(start));
                tags
            }
        };

        if !missed.is_empty() {
            let start = Instant::now();
            join_all(missed.iter().map(|&tier| {
                let tags = &tags;
                async move {
                    if let Err(e) = entries::set_tags(self.tier(tier), tags).await {
                        error!("Failed to cache tags to {}: {}", tier, e);
                    }
                }
            }))
            .await;
            debug!("Waited {} ms for cache write(s)", msec_since(start));
        }
        Ok(tags)
    }

    /// Drop cached data made stale by an update of `kind`
    ///
    /// A tier's query map is only rewritten if something was removed. Errors
    /// from individual tiers are collected into one
    /// [`QueryError::CacheFlush`].
    pub async fn invalidate_for_update(&self, kind: UpdateKind) -> Result<(), QueryError> {
        let mut errs = Vec::new();

        let results = join_all(CacheTier::ALL.map(|tier| async move {
            (tier, entries::remove_invalidated(self.tier(tier), kind).await)
        }))
        .await;
        for (tier, result) in results {
            match result {
                Ok(0) => {}
                Ok(n) => debug!(
                    "Flushed {} cached query(s) from {} in response to {} update",
                    n, tier, kind
                ),
                Err(e) => errs.push(format!("{}: {}", tier, e)),
            }
        }

        if kind.intersects(UpdateKind::TAGS | UpdateKind::METADATA) {
            debug!("Flushing cached tags in response to {} update", kind);
            for tier in CacheTier::ALL {
                if let Err(e) = self.tier(tier).delete(TAGS_KEY).await {
                    errs.push(format!("{}: {}", tier, e));
                }
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(QueryError::CacheFlush(errs.join("; ")))
        }
    }

    /// Remove all cached queries and tags from `tier`
    pub async fn flush(&self, tier: CacheTier) -> Result<(), QueryError> {
        let mut errs = Vec::new();
        for key in [QUERIES_KEY, TAGS_KEY] {
            if let Err(e) = self.tier(tier).delete(key).await {
                errs.push(format!("{}: {}", key, e));
            }
        }
        if errs.is_empty() {
            debug!("Flushed {} cache", tier);
            Ok(())
        } else {
            Err(QueryError::CacheFlush(errs.join("; ")))
        }
    }
}
