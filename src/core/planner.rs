//! Query planning - turns a [`SongQuery`] into store queries and merges them
//!
//! The store can combine any number of equality filters with at most one
//! inequality filter, and only when a matching composite index exists. A song
//! query is therefore split into sub-queries:
//!
//! - one sub-query per inequality filter, each carrying every equality filter
//!   (or, when planning with the fallback shape, the equality filters on their
//!   own plus each inequality filter on its own, needing no composite index)
//! - one sub-query per excluded tag
//!
//! The sub-queries run concurrently and their sorted IDs are intersected, then
//! the excluded tags' IDs are subtracted.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use tracing::debug;

use super::merge::{intersect_sorted_ids, subtract_sorted_ids};
use crate::db::{Field, InequalityFilter, SongStore, StoreError, StoreQuery};
use crate::models::{RatingThreshold, SongQuery, UNRATED};
use crate::utils::dates::msec_since;
use crate::utils::normalize::normalize;

/// Store sub-queries for one song query
#[derive(Debug, Clone, PartialEq)]
struct Plan {
    /// Queries whose results are intersected
    primary: Vec<StoreQuery>,
    /// Queries whose results are subtracted
    negative: Vec<StoreQuery>,
    /// The single primary query already returns the top results in
    /// last-start-time order
    ordered: bool,
}

/// Plans and runs song queries against a [`SongStore`]
pub struct QueryPlanner {
    store: Arc<dyn SongStore>,
    max_results: usize,
}

impl QueryPlanner {
    pub fn new(store: Arc<dyn SongStore>, max_results: usize) -> Self {
        Self { store, max_results }
    }

    /// Find the IDs of all songs matching `query`
    ///
    /// IDs are ascending unless the query orders by last start time, in which
    /// case at most `max_results` IDs are returned in that order once the
    /// match count exceeds the cap. A [`StoreError::NeedsIndex`] from the
    /// regular plan can be retried with `force_fallback` set.
    pub async fn plan(
        &self,
        query: &SongQuery,
        force_fallback: bool,
    ) -> Result<Vec<i64>, StoreError> {
        let plan = self.build_plan(query, force_fallback);
        let boundary = plan.primary.len();
        let queries: Vec<&StoreQuery> = plan.primary.iter().chain(&plan.negative).collect();

        let start = Instant::now();
        let results = try_join_all(queries.iter().map(|q| self.run_one(q, plan.ordered))).await?;
        let details: Vec<String> = results
            .iter()
            .map(|(ids, ms)| format!("{} ({} ms)", ids.len(), ms))
            .collect();
        debug!(
            "Ran {} query(s) in {} ms: {}",
            queries.len(),
            msec_since(start),
            details.join(", ")
        );

        let start = Instant::now();
        let mut merged: Vec<i64> = Vec::new();
        for (i, (ids, _)) in results.into_iter().enumerate() {
            merged = if i == 0 {
                ids
            } else if i < boundary {
                intersect_sorted_ids(&merged, &ids)
            } else {
                subtract_sorted_ids(&merged, &ids)
            };
        }
        debug!("Merged to {} result(s) in {} ms", merged.len(), msec_since(start));

        if query.order_by_last_start_time && !plan.ordered && merged.len() > self.max_results {
            merged = self.order_by_last_start_time(&merged).await?;
        }
        Ok(merged)
    }

    async fn run_one(&self, query: &StoreQuery, ordered: bool) -> Result<(Vec<i64>, u128), StoreError> {
        let start = Instant::now();
        let mut ids = self.store.run_query(query).await?;
        if !ordered {
            ids.sort_unstable();
        }
        Ok((ids, msec_since(start)))
    }

    /// Walk all songs by ascending last start time, keeping those in `ids`
    ///
    /// `ids` must be sorted.
    async fn order_by_last_start_time(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let start = Instant::now();
        let all = self
            .store
            .run_query(&StoreQuery::new().order_by(Field::LastStartTime))
            .await?;
        let ordered: Vec<i64> = all
            .into_iter()
            .filter(|id| ids.binary_search(id).is_ok())
            .take(self.max_results)
            .collect();
        debug!(
            "Ordered {} result(s) by last start time in {} ms",
            ordered.len(),
            msec_since(start)
        );
        Ok(ordered)
    }

    fn build_plan(&self, query: &SongQuery, force_fallback: bool) -> Plan {
        let base = equality_query(query);
        let inequalities = inequality_filters(query);

        let mut primary = Vec::new();
        let mut ordered = false;
        if force_fallback {
            // an unfiltered base would just return every song
            if !base.is_unfiltered() || inequalities.is_empty() {
                primary.push(base.clone());
            }
            for ineq in inequalities {
                primary.push(StoreQuery::new().with_inequality(ineq));
            }
        } else if inequalities.is_empty() {
            let mut single = base.clone();
            if query.not_tags.is_empty() && !query.shuffle {
                if query.order_by_last_start_time {
                    single = single.order_by(Field::LastStartTime);
                    ordered = true;
                }
                single = single.limit(self.max_results);
            }
            primary.push(single);
        } else {
            for ineq in inequalities {
                primary.push(base.clone().with_inequality(ineq));
            }
        }

        let negative = query
            .not_tags
            .iter()
            .map(|tag| base.clone().filter(Field::Tags, tag.as_str()))
            .collect();

        Plan {
            primary,
            negative,
            ordered,
        }
    }
}

/// Every equality filter implied by `query`
fn equality_query(query: &SongQuery) -> StoreQuery {
    let mut q = StoreQuery::new();

    for (field, value) in [
        (Field::ArtistLower, &query.artist),
        (Field::TitleLower, &query.title),
        (Field::AlbumLower, &query.album),
    ] {
        if !value.is_empty() {
            q = q.filter(field, normalize(value));
        }
    }
    for word in &query.keywords {
        let word = normalize(word);
        if !word.is_empty() {
            q = q.filter(Field::Keywords, word);
        }
    }
    if !query.album_id.is_empty() {
        q = q.filter(Field::AlbumId, query.album_id.as_str());
    }

    // rating thresholds use precomputed flags so they don't need the
    // inequality slot
    match query.min_rating {
        Some(RatingThreshold::One) => q = q.filter(Field::Rating, 1.0),
        Some(RatingThreshold::ThreeQuarters) => q = q.filter(Field::RatingAtLeast75, true),
        Some(RatingThreshold::Half) => q = q.filter(Field::RatingAtLeast50, true),
        Some(RatingThreshold::Quarter) => q = q.filter(Field::RatingAtLeast25, true),
        Some(RatingThreshold::Zero) => q = q.filter(Field::RatingAtLeast0, true),
        None if query.unrated => q = q.filter(Field::Rating, UNRATED),
        None => {}
    }

    if query.max_plays == Some(0) {
        q = q.filter(Field::NumPlays, 0i64);
    }
    if let Some(track) = query.track {
        q = q.filter(Field::Track, track);
    }
    if let Some(disc) = query.disc {
        q = q.filter(Field::Disc, disc);
    }
    for tag in &query.tags {
        q = q.filter(Field::Tags, tag.as_str());
    }
    q
}

/// Filters in `query` that need the store's single inequality slot
fn inequality_filters(query: &SongQuery) -> Vec<InequalityFilter> {
    let mut filters = Vec::new();
    if let Some(max) = query.max_plays.filter(|&n| n != 0) {
        filters.push(InequalityFilter::at_most(Field::NumPlays, max));
    }
    if let Some(max) = query.max_disc {
        filters.push(InequalityFilter::at_most(Field::Disc, max));
    }
    if let Some(t) = query.min_first_start_time {
        filters.push(InequalityFilter::at_least(Field::FirstStartTime, t));
    }
    if let Some(t) = query.max_last_start_time {
        filters.push(InequalityFilter::at_most(Field::LastStartTime, t));
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Song;
    use crate::stores::{CompositeIndex, MemorySongStore};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use parking_lot::Mutex;

    /// Store wrapper that records every query it runs
    struct RecordingStore {
        inner: MemorySongStore,
        queries: Mutex<Vec<StoreQuery>>,
    }

    #[async_trait]
    impl SongStore for RecordingStore {
        async fn run_query(&self, query: &StoreQuery) -> Result<Vec<i64>, StoreError> {
            self.queries.lock().push(query.clone());
            self.inner.run_query(query).await
        }

        async fn get_songs(&self, ids: &[i64]) -> Result<Vec<Song>, StoreError> {
            self.inner.get_songs(ids).await
        }

        async fn scan_tags(&self) -> Result<Vec<String>, StoreError> {
            self.inner.scan_tags().await
        }
    }

    fn song(id: i64, artist: &str, rating: f64, tags: &[&str]) -> Song {
        let mut s = Song::new(id, artist, &format!("Title {}", id), "Album");
        s.set_rating(rating);
        s.tags = tags.iter().map(|t| t.to_string()).collect();
        s
    }

    fn planner(songs: Vec<Song>) -> QueryPlanner {
        let store = MemorySongStore::new();
        store.load(songs);
        QueryPlanner::new(Arc::new(store), 100)
    }

    #[tokio::test]
    async fn test_min_rating_uses_equality_flag() {
        let inner = MemorySongStore::new();
        inner.load(vec![
            song(1, "X", 1.0, &[]),
            song(2, "X", 0.8, &[]),
            song(3, "X", 0.4, &[]),
            song(4, "Y", 1.0, &[]),
        ]);
        let store = Arc::new(RecordingStore {
            inner,
            queries: Mutex::new(Vec::new()),
        });
        let planner = QueryPlanner::new(store.clone(), 100);

        let q = SongQuery {
            artist: "X".into(),
            min_rating: Some(RatingThreshold::ThreeQuarters),
            ..Default::default()
        };
        assert_eq!(planner.plan(&q, false).await.unwrap(), vec![1, 2]);

        let queries = store.queries.lock();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].inequality.is_none());
        assert!(queries[0]
            .equalities
            .iter()
            .any(|e| e.field == Field::RatingAtLeast75));
    }

    #[tokio::test]
    async fn test_not_tags_are_subtracted() {
        let planner = planner(vec![
            song(1, "A", 0.5, &["rock"]),
            song(2, "A", 0.5, &["rock", "live"]),
            song(3, "A", 0.5, &["rock"]),
            song(4, "A", 0.5, &["jazz"]),
        ]);
        let q = SongQuery {
            tags: vec!["rock".into()],
            not_tags: vec!["live".into()],
            ..Default::default()
        };
        assert_eq!(planner.plan(&q, false).await.unwrap(), vec![1, 3]);
        assert_eq!(planner.plan(&q, true).await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_unrated_and_keywords() {
        let planner = planner(vec![
            song(1, "Sigur Rós", -1.0, &[]),
            song(2, "Sigur Rós", 0.5, &[]),
            song(3, "Other", -1.0, &[]),
        ]);
        let q = SongQuery {
            keywords: vec!["RÓS".into()],
            unrated: true,
            ..Default::default()
        };
        assert_eq!(planner.plan(&q, false).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_needs_index_and_fallback_equivalence() {
        let mut songs = Vec::new();
        for id in 1..=20 {
            let mut s = song(id, if id % 2 == 0 { "A" } else { "B" }, 0.5, &[]);
            s.num_plays = id % 5;
            s.disc = id % 3;
            songs.push(s);
        }
        let store = Arc::new(MemorySongStore::new());
        store.load(songs);
        let planner = QueryPlanner::new(store.clone(), 100);

        let q = SongQuery {
            artist: "a".into(),
            max_plays: Some(2),
            ..Default::default()
        };
        let err = planner.plan(&q, false).await.unwrap_err();
        assert!(err.is_needs_index());
        let fallback = planner.plan(&q, true).await.unwrap();

        store.add_index(CompositeIndex::new([Field::ArtistLower], Field::NumPlays));
        let indexed = planner.plan(&q, false).await.unwrap();
        assert_eq!(indexed, fallback);
        assert_eq!(indexed, vec![2, 6, 10, 12, 16, 20]);

        // two inequalities are split into separate sub-queries
        store.add_index(CompositeIndex::new([Field::ArtistLower], Field::Disc));
        let q = SongQuery {
            max_disc: Some(1),
            ..q
        };
        let indexed = planner.plan(&q, false).await.unwrap();
        assert_eq!(indexed, planner.plan(&q, true).await.unwrap());
        assert_eq!(indexed, vec![6, 10, 12, 16]);
    }

    #[tokio::test]
    async fn test_limit_applied_to_single_query() {
        let songs = (1..=150).map(|id| song(id, "A", 0.5, &[])).collect();
        let planner = planner(songs);

        let ids = planner.plan(&SongQuery::default(), false).await.unwrap();
        assert_eq!(ids.len(), 100);

        let shuffled = SongQuery {
            shuffle: true,
            ..Default::default()
        };
        assert_eq!(planner.plan(&shuffled, false).await.unwrap().len(), 150);
    }

    #[tokio::test]
    async fn test_order_by_last_start_time() {
        let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut songs = Vec::new();
        for id in 1..=150 {
            let tags: &[&str] = if id % 10 == 0 { &["x"] } else { &[] };
            let mut s = song(id, "A", 0.5, tags);
            // later IDs were played longer ago
            s.update_play_stats(base - Duration::days(id));
            songs.push(s);
        }
        let planner = planner(songs);

        let expected: Vec<i64> = (1..=150).rev().filter(|id| id % 10 != 0).take(100).collect();

        // excluded tags rule out the limited single query, so the merged
        // results get reordered afterward
        let q = SongQuery {
            not_tags: vec!["x".into()],
            order_by_last_start_time: true,
            ..Default::default()
        };
        assert_eq!(planner.plan(&q, false).await.unwrap(), expected);
        assert_eq!(planner.plan(&q, true).await.unwrap(), expected);

        let q = SongQuery {
            order_by_last_start_time: true,
            ..Default::default()
        };
        let ids = planner.plan(&q, false).await.unwrap();
        assert_eq!(ids, (51..=150).rev().collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_time_filter_needs_index() {
        let planner = planner(vec![song(1, "A", 0.5, &[])]);
        let q = SongQuery {
            max_last_start_time: Some(Utc::now()),
            order_by_last_start_time: true,
            artist: "a".into(),
            ..Default::default()
        };
        assert!(planner.plan(&q, false).await.unwrap_err().is_needs_index());
        // never-played songs count as played at the earliest possible time
        assert_eq!(planner.plan(&q, true).await.unwrap(), vec![1]);
    }
}
