//! Song store - in-memory song storage with datastore-style query rules
//!
//! Queries follow the same shape restrictions as an entity datastore: any
//! number of equality filters can be combined freely, but mixing equality
//! filters with an inequality filter or a sort order needs a declared
//! [`CompositeIndex`]. Without one the query fails with
//! [`StoreError::NeedsIndex`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::db::{EqualityFilter, Field, SongStore, StoreError, StoreQuery, Value};
use crate::models::Song;

/// An index serving equality filters on `equality` combined with an
/// inequality filter or sort order on `sort`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeIndex {
    pub equality: BTreeSet<Field>,
    pub sort: Field,
}

impl CompositeIndex {
    pub fn new(equality: impl IntoIterator<Item = Field>, sort: Field) -> Self {
        Self {
            equality: equality.into_iter().collect(),
            sort,
        }
    }
}

/// In-memory store for songs
#[derive(Default)]
pub struct MemorySongStore {
    /// All songs by ID
    songs: RwLock<HashMap<i64, Song>>,
    /// Song IDs by tag
    songs_by_tag: RwLock<BTreeMap<String, BTreeSet<i64>>>,
    /// Declared composite indexes
    indexes: RwLock<Vec<CompositeIndex>>,
}

impl MemorySongStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an additional composite index
    pub fn add_index(&self, index: CompositeIndex) {
        let mut indexes = self.indexes.write();
        if !indexes.contains(&index) {
            indexes.push(index);
        }
    }

    /// Replace the store's contents, returning the number of songs stored
    ///
    /// A later song with an already-loaded ID replaces the earlier one.
    pub fn load(&self, songs: Vec<Song>) -> usize {
        let mut song_map = self.songs.write();
        let mut tag_map = self.songs_by_tag.write();
        song_map.clear();
        tag_map.clear();

        for mut song in songs {
            song.rebuild_derived();
            if let Some(old) = song_map.get(&song.id) {
                remove_from_tags(&mut tag_map, old);
            }
            for tag in &song.tags {
                tag_map.entry(tag.clone()).or_default().insert(song.id);
            }
            song_map.insert(song.id, song);
        }
        song_map.len()
    }

    /// Load songs from a JSON dump, returning the number of songs stored
    ///
    /// Accepts either a JSON array of songs or one song object per line. Every
    /// song needs an `id`, and IDs must be unique within the dump.
    pub fn load_from_file(&self, path: &Path) -> Result<usize> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let songs: Vec<Song> = if data.trim_start().starts_with('[') {
            serde_json::from_str(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            data.lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(i, line)| {
                    serde_json::from_str(line)
                        .with_context(|| format!("{}:{}: bad song", path.display(), i + 1))
                })
                .collect::<Result<_>>()?
        };

        let mut seen = HashSet::with_capacity(songs.len());
        if let Some(dup) = songs.iter().find(|s| !seen.insert(s.id)) {
            bail!("{}: duplicate song ID {}", path.display(), dup.id);
        }

        let count = self.load(songs);
        info!("Loaded {} songs from {}", count, path.display());
        Ok(count)
    }

    /// Write every song to `path` as a JSON array, ordered by ID
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut songs: Vec<Song> = self.songs.read().values().cloned().collect();
        songs.sort_by_key(|s| s.id);
        let data = serde_json::to_string_pretty(&songs).context("failed to serialize songs")?;
        std::fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
        debug!("Saved {} songs to {}", songs.len(), path.display());
        Ok(())
    }

    /// Insert or replace a song
    pub fn put_song(&self, mut song: Song) {
        song.rebuild_derived();
        let mut song_map = self.songs.write();
        let mut tag_map = self.songs_by_tag.write();

        if let Some(old) = song_map.get(&song.id) {
            remove_from_tags(&mut tag_map, old);
        }
        for tag in &song.tags {
            tag_map.entry(tag.clone()).or_default().insert(song.id);
        }
        song_map.insert(song.id, song);
    }

    /// Modify a song in place and return the updated copy
    ///
    /// Derived fields are rebuilt after `f` runs.
    pub fn update_song<F>(&self, id: i64, f: F) -> Result<Song, StoreError>
    where
        F: FnOnce(&mut Song),
    {
        let mut song_map = self.songs.write();
        let mut tag_map = self.songs_by_tag.write();

        let song = song_map.get_mut(&id).ok_or(StoreError::SongNotFound(id))?;
        remove_from_tags(&mut tag_map, song);
        f(song);
        song.rebuild_derived();
        for tag in &song.tags {
            tag_map.entry(tag.clone()).or_default().insert(id);
        }
        Ok(song.clone())
    }

    /// Remove a song, returning it if it was present
    pub fn remove_song(&self, id: i64) -> Option<Song> {
        let mut song_map = self.songs.write();
        let mut tag_map = self.songs_by_tag.write();
        let song = song_map.remove(&id)?;
        remove_from_tags(&mut tag_map, &song);
        Some(song)
    }

    pub fn get_song(&self, id: i64) -> Option<Song> {
        self.songs.read().get(&id).cloned()
    }

    /// Check the query against the datastore shape rules
    fn check_shape(&self, query: &StoreQuery) -> Result<(), StoreError> {
        let sort = match (&query.inequality, query.order) {
            (Some(ineq), Some(order)) if ineq.field != order => {
                return Err(StoreError::Backend(format!(
                    "inequality on {} must be sorted on the same field, not {}",
                    ineq.field, order
                )));
            }
            (Some(ineq), _) => Some(ineq.field),
            (None, order) => order,
        };

        let Some(sort) = sort else {
            return Ok(());
        };
        if query.equalities.is_empty() {
            return Ok(());
        }

        let equality: BTreeSet<Field> = query.equalities.iter().map(|e| e.field).collect();
        let indexed = self
            .indexes
            .read()
            .iter()
            .any(|idx| idx.sort == sort && idx.equality == equality);
        if indexed {
            Ok(())
        } else {
            Err(StoreError::NeedsIndex {
                query: query.to_string(),
            })
        }
    }
}

fn remove_from_tags(tag_map: &mut BTreeMap<String, BTreeSet<i64>>, song: &Song) {
    for tag in &song.tags {
        if let Some(ids) = tag_map.get_mut(tag) {
            ids.remove(&song.id);
            if ids.is_empty() {
                tag_map.remove(tag);
            }
        }
    }
}

/// Value of a single-valued field
///
/// Songs that have never been played sort before every real timestamp.
fn field_value(song: &Song, field: Field) -> Value {
    let time = |t: Option<DateTime<Utc>>| Value::Time(t.unwrap_or(DateTime::<Utc>::MIN_UTC));
    match field {
        Field::ArtistLower => Value::Str(song.artist_lower.clone()),
        Field::TitleLower => Value::Str(song.title_lower.clone()),
        Field::AlbumLower => Value::Str(song.album_lower.clone()),
        Field::AlbumId => Value::Str(song.album_id.clone()),
        Field::Track => Value::Int(song.track),
        Field::Disc => Value::Int(song.disc),
        Field::Rating => Value::Float(song.rating),
        Field::RatingAtLeast0 => Value::Bool(song.rating_at_least_0),
        Field::RatingAtLeast25 => Value::Bool(song.rating_at_least_25),
        Field::RatingAtLeast50 => Value::Bool(song.rating_at_least_50),
        Field::RatingAtLeast75 => Value::Bool(song.rating_at_least_75),
        Field::NumPlays => Value::Int(song.num_plays),
        Field::FirstStartTime => time(song.first_start_time),
        Field::LastStartTime => time(song.last_start_time),
        // lists sort by their smallest element
        Field::Keywords => Value::Str(song.keywords.first().cloned().unwrap_or_default()),
        Field::Tags => Value::Str(song.tags.first().cloned().unwrap_or_default()),
    }
}

fn matches_equality(song: &Song, filter: &EqualityFilter) -> bool {
    let list = match filter.field {
        Field::Keywords => &song.keywords,
        Field::Tags => &song.tags,
        field => return filter.matches(&field_value(song, field)),
    };
    match &filter.value {
        Value::Str(s) => list.binary_search(s).is_ok(),
        _ => false,
    }
}

#[async_trait]
impl SongStore for MemorySongStore {
    async fn run_query(&self, query: &StoreQuery) -> Result<Vec<i64>, StoreError> {
        self.check_shape(query)?;

        let songs = self.songs.read();

        // narrow by tag first when possible
        let tag_ids = query
            .equalities
            .iter()
            .find(|e| e.field == Field::Tags)
            .map(|e| match &e.value {
                Value::Str(tag) => self.songs_by_tag.read().get(tag).cloned().unwrap_or_default(),
                _ => BTreeSet::new(),
            });
        let candidates: Box<dyn Iterator<Item = &Song>> = match &tag_ids {
            Some(ids) => Box::new(ids.iter().filter_map(|id| songs.get(id))),
            None => Box::new(songs.values()),
        };

        let mut matched: Vec<&Song> = candidates
            .filter(|s| query.equalities.iter().all(|e| matches_equality(s, e)))
            .filter(|s| {
                query
                    .inequality
                    .as_ref()
                    .map_or(true, |ineq| ineq.matches(&field_value(s, ineq.field)))
            })
            .collect();

        match query.order {
            Some(field) => matched.sort_by(|a, b| {
                field_value(a, field)
                    .partial_cmp(&field_value(b, field))
                    .unwrap_or(Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            }),
            None => matched.sort_by_key(|s| s.id),
        }

        let mut ids: Vec<i64> = matched.into_iter().map(|s| s.id).collect();
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }

        debug!("Store query [{}] matched {} songs", query, ids.len());
        Ok(ids)
    }

    async fn get_songs(&self, ids: &[i64]) -> Result<Vec<Song>, StoreError> {
        let songs = self.songs.read();
        ids.iter()
            .map(|id| songs.get(id).cloned().ok_or(StoreError::SongNotFound(*id)))
            .collect()
    }

    async fn scan_tags(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.songs_by_tag.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InequalityFilter;
    use chrono::TimeZone;
    use std::io::Write;

    fn song(id: i64, artist: &str, tags: &[&str], plays: i64) -> Song {
        let mut s = Song::new(id, artist, &format!("Song {}", id), "Album");
        s.tags = tags.iter().map(|t| t.to_string()).collect();
        s.num_plays = plays;
        s
    }

    fn sample_store() -> MemorySongStore {
        let store = MemorySongStore::new();
        store.load(vec![
            song(3, "A", &["rock"], 5),
            song(1, "A", &["rock", "guitar"], 2),
            song(2, "B", &["guitar"], 0),
            song(4, "B", &[], 1),
        ]);
        store
    }

    #[tokio::test]
    async fn test_equality_filters() {
        let store = sample_store();
        let q = StoreQuery::new().filter(Field::ArtistLower, "a");
        assert_eq!(store.run_query(&q).await.unwrap(), vec![1, 3]);

        let q = StoreQuery::new()
            .filter(Field::Tags, "guitar")
            .filter(Field::Tags, "rock");
        assert_eq!(store.run_query(&q).await.unwrap(), vec![1]);

        let q = StoreQuery::new().filter(Field::Keywords, "b");
        assert_eq!(store.run_query(&q).await.unwrap(), vec![2, 4]);

        let q = StoreQuery::new().filter(Field::Tags, "missing");
        assert!(store.run_query(&q).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inequality_and_order() {
        let store = sample_store();
        let q = StoreQuery::new().with_inequality(InequalityFilter::at_most(Field::NumPlays, 2i64));
        assert_eq!(store.run_query(&q).await.unwrap(), vec![1, 2, 4]);

        let q = StoreQuery::new().order_by(Field::NumPlays).limit(3);
        assert_eq!(store.run_query(&q).await.unwrap(), vec![2, 4, 1]);
    }

    #[tokio::test]
    async fn test_needs_index() {
        let store = sample_store();
        let q = StoreQuery::new()
            .filter(Field::ArtistLower, "a")
            .with_inequality(InequalityFilter::at_most(Field::NumPlays, 2i64));
        let err = store.run_query(&q).await.unwrap_err();
        assert!(err.is_needs_index());

        store.add_index(CompositeIndex::new([Field::ArtistLower], Field::NumPlays));
        assert_eq!(store.run_query(&q).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_mismatched_inequality_order() {
        let store = sample_store();
        let q = StoreQuery::new()
            .with_inequality(InequalityFilter::at_most(Field::NumPlays, 2i64))
            .order_by(Field::LastStartTime);
        let err = store.run_query(&q).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_unplayed_sorts_first() {
        let store = sample_store();
        store
            .update_song(3, |s| {
                s.update_play_stats(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
            })
            .unwrap();
        let q = StoreQuery::new().order_by(Field::LastStartTime);
        assert_eq!(store.run_query(&q).await.unwrap(), vec![1, 2, 4, 3]);
    }

    #[tokio::test]
    async fn test_update_song_reindexes_tags() {
        let store = sample_store();
        store.update_song(4, |s| s.tags = vec!["jazz".into()]).unwrap();
        store.update_song(2, |s| s.tags.clear()).unwrap();
        assert_eq!(store.scan_tags().await.unwrap(), vec!["guitar", "jazz", "rock"]);

        let q = StoreQuery::new().filter(Field::Tags, "jazz");
        assert_eq!(store.run_query(&q).await.unwrap(), vec![4]);

        assert!(matches!(
            store.update_song(99, |_| {}),
            Err(StoreError::SongNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_get_songs_preserves_order() {
        let store = sample_store();
        let songs = store.get_songs(&[4, 1]).await.unwrap();
        assert_eq!(songs.iter().map(|s| s.id).collect::<Vec<_>>(), vec![4, 1]);
        assert!(store.get_songs(&[42]).await.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 1, "artist": "A", "title": "T", "album": "X"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": 2, "artist": "B", "title": "U", "album": "Y", "rating": 0.5}}"#)
            .unwrap();

        let store = MemorySongStore::new();
        assert_eq!(store.load_from_file(file.path()).unwrap(), 2);
        let song = store.get_song(2).unwrap();
        assert!(song.rating_at_least_50);
        assert_eq!(song.artist_lower, "b");
    }

    #[tokio::test]
    async fn test_load_replaces_duplicate_ids() {
        let store = MemorySongStore::new();
        let stored = store.load(vec![
            song(1, "A", &["rock"], 0),
            song(1, "A", &["jazz"], 0),
            song(2, "B", &["pop"], 0),
        ]);
        assert_eq!(stored, 2);
        assert_eq!(store.get_song(1).unwrap().tags, vec!["jazz"]);
        assert_eq!(store.scan_tags().await.unwrap(), vec!["jazz", "pop"]);

        let q = StoreQuery::new().filter(Field::Tags, "rock");
        assert!(store.run_query(&q).await.unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file_rejects_bad_ids() {
        let mut missing = tempfile::NamedTempFile::new().unwrap();
        write!(
            missing,
            r#"[{{"artist": "A", "title": "T", "album": "X"}}, {{"artist": "B", "title": "U", "album": "Y"}}]"#
        )
        .unwrap();
        let store = MemorySongStore::new();
        assert!(store.load_from_file(missing.path()).is_err());
        assert!(store.get_song(0).is_none());

        let mut dup = tempfile::NamedTempFile::new().unwrap();
        writeln!(dup, r#"{{"id": 5, "artist": "A", "title": "T", "album": "X"}}"#).unwrap();
        writeln!(dup, r#"{{"id": 5, "artist": "B", "title": "U", "album": "Y"}}"#).unwrap();
        let err = store.load_from_file(dup.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate song ID 5"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.json");
        let store = sample_store();
        store.save_to_file(&path).unwrap();

        let reloaded = MemorySongStore::new();
        assert_eq!(reloaded.load_from_file(&path).unwrap(), 4);
        assert_eq!(reloaded.get_song(3), store.get_song(3));
    }
}
