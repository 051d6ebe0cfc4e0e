//! Library updates - song mutations paired with cache invalidation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::CacheCoordinator;
use crate::db::StoreError;
use crate::models::{Song, UpdateKind, UNRATED};
use crate::stores::MemorySongStore;
use crate::QueryError;

/// Applies changes to songs and drops the cached data they make stale
pub struct LibraryUpdater {
    store: Arc<MemorySongStore>,
    cache: Arc<CacheCoordinator>,
}

impl LibraryUpdater {
    pub fn new(store: Arc<MemorySongStore>, cache: Arc<CacheCoordinator>) -> Self {
        Self { store, cache }
    }

    /// Record a play of song `id` starting at `start`
    pub async fn record_play(&self, id: i64, start: DateTime<Utc>) -> Result<Song, QueryError> {
        let song = self.store.update_song(id, |s| s.update_play_stats(start))?;
        debug!("Recorded play of song {} at {}", id, start);
        self.cache.invalidate_for_update(UpdateKind::PLAYS).await?;
        Ok(song)
    }

    /// Update a song's rating and/or tags
    ///
    /// `None` leaves the field alone. Caches are only invalidated for fields
    /// whose values actually changed.
    pub async fn rate_and_tag(
        &self,
        id: i64,
        rating: Option<f64>,
        tags: Option<Vec<String>>,
    ) -> Result<Song, QueryError> {
        let mut kind = UpdateKind::empty();
        let song = self.store.update_song(id, |s| {
            if let Some(rating) = rating {
                let old = s.rating;
                s.set_rating(rating);
                if s.rating != old {
                    kind |= UpdateKind::RATING;
                }
            }
            if let Some(tags) = tags {
                let old = std::mem::replace(&mut s.tags, tags);
                s.clean();
                if s.tags != old {
                    kind |= UpdateKind::TAGS;
                }
            }
        })?;

        if !kind.is_empty() {
            self.cache.invalidate_for_update(kind).await?;
        }
        Ok(song)
    }

    /// Store `song`'s metadata, inserting it if its ID is new
    ///
    /// Unless `replace_user_data` is set, an existing song keeps its rating,
    /// tags and play statistics.
    pub async fn update_or_insert(
        &self,
        mut song: Song,
        replace_user_data: bool,
    ) -> Result<(), QueryError> {
        match self.store.get_song(song.id) {
            Some(existing) if !replace_user_data => {
                song.rating = existing.rating;
                song.tags = existing.tags;
                song.num_plays = existing.num_plays;
                song.first_start_time = existing.first_start_time;
                song.last_start_time = existing.last_start_time;
                debug!("Updating song {}", song.id);
            }
            Some(_) => debug!("Replacing song {}", song.id),
            None => {
                if !replace_user_data {
                    song.rating = UNRATED;
                }
                debug!("Inserting song {}", song.id);
            }
        }

        self.store.put_song(song);
        self.cache.invalidate_for_update(UpdateKind::METADATA).await
    }

    /// Remove song `id` from the library
    pub async fn delete_song(&self, id: i64) -> Result<Song, QueryError> {
        let song = self
            .store
            .remove_song(id)
            .ok_or(StoreError::SongNotFound(id))?;
        debug!("Deleted song {}", id);
        self.cache.invalidate_for_update(UpdateKind::METADATA).await?;
        Ok(song)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DurableTier, FastTier, QUERIES_KEY};
    use crate::config::QueryConfig;
    use crate::models::{RatingThreshold, SongQuery, SongsFlags};
    use chrono::TimeZone;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemorySongStore>,
        durable: Arc<DurableTier>,
        cache: Arc<CacheCoordinator>,
        updater: LibraryUpdater,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemorySongStore::new());
        let mut rated = Song::new(1, "A", "One", "Album");
        rated.set_rating(0.5);
        rated.tags = vec!["rock".into()];
        store.load(vec![rated, Song::new(2, "A", "Two", "Album")]);

        let durable = Arc::new(DurableTier::in_memory().await.unwrap());
        let cache = Arc::new(CacheCoordinator::new(
            store.clone(),
            Arc::new(FastTier::new(16, Duration::from_secs(60))),
            durable.clone(),
            &QueryConfig::default(),
        ));
        let updater = LibraryUpdater::new(store.clone(), cache.clone());
        Fixture {
            store,
            durable,
            cache,
            updater,
        }
    }

    fn rated_query() -> SongQuery {
        SongQuery {
            min_rating: Some(RatingThreshold::Half),
            ..Default::default()
        }
    }

    fn ids(songs: &[Song]) -> Vec<i64> {
        songs.iter().map(|s| s.id).collect()
    }

    #[tokio::test]
    async fn test_rating_change_invalidates_cached_query() {
        let f = fixture().await;
        let q = rated_query();
        let songs = f.cache.songs(&q, SongsFlags::default()).await.unwrap();
        assert_eq!(ids(&songs), vec![1]);

        f.updater.rate_and_tag(2, Some(0.75), None).await.unwrap();
        let songs = f.cache.songs(&q, SongsFlags::default()).await.unwrap();
        assert_eq!(ids(&songs), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unchanged_update_skips_invalidation() {
        let f = fixture().await;
        f.cache.songs(&rated_query(), SongsFlags::default()).await.unwrap();
        let version = f.durable.version(QUERIES_KEY).await.unwrap();

        let song = f
            .updater
            .rate_and_tag(1, Some(0.5), Some(vec!["rock".into(), "rock".into()]))
            .await
            .unwrap();
        assert_eq!(song.tags, vec!["rock"]);
        assert_eq!(f.durable.version(QUERIES_KEY).await.unwrap(), version);
    }

    #[tokio::test]
    async fn test_tag_change_invalidates_tag_list() {
        let f = fixture().await;
        assert_eq!(f.cache.tags(false).await.unwrap(), vec!["rock"]);

        f.updater
            .rate_and_tag(2, None, Some(vec!["jazz".into()]))
            .await
            .unwrap();
        assert!(f.cache.tags(true).await.is_err());
        assert_eq!(f.cache.tags(false).await.unwrap(), vec!["jazz", "rock"]);
    }

    #[tokio::test]
    async fn test_record_play() {
        let f = fixture().await;
        let t = Utc.with_ymd_and_hms(2021, 5, 1, 12, 0, 0).unwrap();
        let song = f.updater.record_play(2, t).await.unwrap();
        assert_eq!(song.num_plays, 1);
        assert_eq!(song.last_start_time, Some(t));

        assert!(matches!(
            f.updater.record_play(9, t).await,
            Err(QueryError::Store(StoreError::SongNotFound(9)))
        ));
    }

    #[tokio::test]
    async fn test_update_or_insert_keeps_user_data() {
        let f = fixture().await;
        let mut updated = Song::new(1, "A", "One (Remastered)", "Album");
        updated.set_rating(0.0);
        f.updater.update_or_insert(updated, false).await.unwrap();

        let song = f.store.get_song(1).unwrap();
        assert_eq!(song.title, "One (Remastered)");
        assert_eq!(song.rating, 0.5);
        assert_eq!(song.tags, vec!["rock"]);
        assert!(song.keywords.contains(&"remastered".to_string()));

        let mut replaced = Song::new(1, "A", "One", "Album");
        replaced.set_rating(1.0);
        f.updater.update_or_insert(replaced, true).await.unwrap();
        let song = f.store.get_song(1).unwrap();
        assert_eq!(song.rating, 1.0);
        assert!(song.tags.is_empty());
    }

    #[tokio::test]
    async fn test_delete_song() {
        let f = fixture().await;
        let q = SongQuery {
            artist: "a".into(),
            ..Default::default()
        };
        assert_eq!(ids(&f.cache.songs(&q, SongsFlags::default()).await.unwrap()), vec![1, 2]);

        f.updater.delete_song(1).await.unwrap();
        assert_eq!(ids(&f.cache.songs(&q, SongsFlags::default()).await.unwrap()), vec![2]);
        assert!(f.updater.delete_song(1).await.is_err());
    }
}
