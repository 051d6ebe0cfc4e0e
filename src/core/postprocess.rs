//! Result post-processing - truncation, ordering and shuffling

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::{Song, SongQuery};

/// Truncates, orders and shuffles query results for playback
#[derive(Debug, Clone, Copy)]
pub struct PostProcessor {
    max_results: usize,
    skew: f64,
}

impl PostProcessor {
    /// `skew` is the largest amount a song's spread position may be nudged,
    /// in units of its group's spacing
    pub fn new(max_results: usize, skew: f64) -> Self {
        Self {
            max_results,
            skew: skew.clamp(0.0, 1.0),
        }
    }

    /// Pick the IDs to fetch, at most `max_results` of them
    ///
    /// Shuffled queries draw a uniformly random subset in random order.
    pub fn select_ids<R: Rng + ?Sized>(
        &self,
        mut ids: Vec<i64>,
        query: &SongQuery,
        rng: &mut R,
    ) -> Vec<i64> {
        let n = ids.len().min(self.max_results);
        if query.shuffle {
            shuffle_partial(&mut ids, n, rng);
        }
        ids.truncate(n);
        ids
    }

    /// Put fetched songs in their final order
    pub fn arrange<R: Rng + ?Sized>(&self, songs: &mut Vec<Song>, query: &SongQuery, rng: &mut R) {
        if query.shuffle {
            spread_songs(songs, self.skew, rng);
        } else if query.order_by_last_start_time {
            sort_by_last_start_time(songs);
        } else {
            sort_songs(songs);
        }
    }
}

/// Swap randomly chosen elements from the whole slice into the first `n`
/// positions
///
/// Only the first `n` positions end up uniformly shuffled.
pub fn shuffle_partial<R: Rng + ?Sized>(ids: &mut [i64], n: usize, rng: &mut R) {
    let n = n.min(ids.len());
    for i in 0..n {
        let j = rng.gen_range(i..ids.len());
        ids.swap(i, j);
    }
}

/// Sort by album, then album ID, disc and track
pub fn sort_songs(songs: &mut [Song]) {
    songs.sort_by(|a, b| {
        a.album_lower
            .cmp(&b.album_lower)
            .then_with(|| a.album_id.cmp(&b.album_id))
            .then(a.disc.cmp(&b.disc))
            .then(a.track.cmp(&b.track))
    });
}

/// Sort least-recently-played first, with never-played songs at the front
pub fn sort_by_last_start_time(songs: &mut [Song]) {
    songs.sort_by_key(|s| s.last_start_time.unwrap_or(DateTime::<Utc>::MIN_UTC));
}

/// Reorder shuffled songs so the same artist rarely plays twice in a row
///
/// Songs are grouped by artist and each group is spread evenly over the whole
/// list: a group of n songs gets one random offset, and its i-th song lands at
/// `(offset + i + skew * r) / n`. Each artist's songs are first spread the same
/// way by album so an album isn't repeated back to back for that artist.
///
/// See <http://keyj.emphy.de/balanced-shuffle/>.
pub fn spread_songs<R: Rng + ?Sized>(songs: &mut Vec<Song>, skew: f64, rng: &mut R) {
    let artist_key = |s: &Song| s.spread_artist_key().to_string();
    let album_key = |s: &Song| s.album_lower.clone();
    spread_by(songs, skew, rng, &artist_key, Some(&album_key));
}

fn spread_by<R: Rng + ?Sized>(
    songs: &mut Vec<Song>,
    skew: f64,
    rng: &mut R,
    outer: &dyn Fn(&Song) -> String,
    inner: Option<&dyn Fn(&Song) -> String>,
) {
    let mut groups: BTreeMap<String, Vec<Song>> = BTreeMap::new();
    for song in songs.drain(..) {
        groups.entry(outer(&song)).or_default().push(song);
    }

    let mut placed: Vec<(f64, Song)> = Vec::new();
    for (_, mut group) in groups {
        if let Some(inner) = inner {
            if group.len() > 1 {
                spread_by(&mut group, skew, rng, inner, None);
            }
        }

        let positions = spread_positions(group.len(), skew, rng);
        placed.extend(positions.into_iter().zip(group));
    }

    placed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    songs.extend(placed.into_iter().map(|(_, song)| song));
}

/// Positions in [0, 1) for a group of `n` songs
///
/// The i-th position always falls in `[i/n, (i+1)/n)`.
fn spread_positions<R: Rng + ?Sized>(n: usize, skew: f64, rng: &mut R) -> Vec<f64> {
    let len = n as f64;
    let offset = (1.0 - skew) * rng.gen::<f64>();
    (0..n)
        .map(|i| (offset + i as f64 + skew * rng.gen::<f64>()) / len)
        .collect()
}
