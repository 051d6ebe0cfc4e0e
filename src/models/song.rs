//! Song model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::normalize::{keywords, normalize};

/// Rating stored for songs that haven't been rated
pub const UNRATED: f64 = -1.0;

/// A song in the library
///
/// Display fields come from the file's metadata. The lowercase fields, keywords
/// and rating flags are derived and are what queries filter on; call
/// [`Song::rebuild_derived`] after changing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    /// Store ID
    pub id: i64,
    /// String form of `id`, only set in query results
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub song_id: String,
    /// Relative path from the base of the music directory
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,

    /// Track artist
    #[serde(default)]
    pub artist: String,
    /// Track title
    #[serde(default)]
    pub title: String,
    /// Album name
    #[serde(default)]
    pub album: String,
    /// Album artist if it differs from the track artist
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub album_artist: String,
    /// Opaque album ID (usually a MusicBrainz release ID)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub album_id: String,

    /// Track number, or 0 if unset
    #[serde(default)]
    pub track: i64,
    /// Disc number, or 0 if unset
    #[serde(default)]
    pub disc: i64,
    /// Duration in seconds
    #[serde(default)]
    pub length: f64,

    /// Rating in [0.0, 1.0], or [`UNRATED`]
    #[serde(default = "default_rating")]
    pub rating: f64,
    /// Number of times the song has been played
    #[serde(default)]
    pub num_plays: i64,
    /// First time the song was played
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_start_time: Option<DateTime<Utc>>,
    /// Last time the song was played
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start_time: Option<DateTime<Utc>>,

    /// User-assigned tags
    #[serde(default)]
    pub tags: Vec<String>,

    // Derived fields used for filtering and sorting
    #[serde(skip)]
    pub artist_lower: String,
    #[serde(skip)]
    pub title_lower: String,
    #[serde(skip)]
    pub album_lower: String,
    #[serde(skip)]
    pub album_artist_lower: String,
    /// Words from the normalized artist, title, album and album artist
    #[serde(skip)]
    pub keywords: Vec<String>,
    /// `rating >= 0.0`, i.e. the song is rated at all
    #[serde(skip)]
    pub rating_at_least_0: bool,
    #[serde(skip)]
    pub rating_at_least_25: bool,
    #[serde(skip)]
    pub rating_at_least_50: bool,
    #[serde(skip)]
    pub rating_at_least_75: bool,
}

fn default_rating() -> f64 {
    UNRATED
}

impl Song {
    /// Create an unrated, unplayed song with derived fields filled in
    pub fn new(id: i64, artist: &str, title: &str, album: &str) -> Self {
        let mut song = Self {
            id,
            song_id: String::new(),
            filename: String::new(),
            artist: artist.to_string(),
            title: title.to_string(),
            album: album.to_string(),
            album_artist: String::new(),
            album_id: String::new(),
            track: 0,
            disc: 0,
            length: 0.0,
            rating: UNRATED,
            num_plays: 0,
            first_start_time: None,
            last_start_time: None,
            tags: Vec::new(),
            artist_lower: String::new(),
            title_lower: String::new(),
            album_lower: String::new(),
            album_artist_lower: String::new(),
            keywords: Vec::new(),
            rating_at_least_0: false,
            rating_at_least_25: false,
            rating_at_least_50: false,
            rating_at_least_75: false,
        };
        song.rebuild_derived();
        song
    }

    /// Recompute lowercase fields, keywords and rating flags
    pub fn rebuild_derived(&mut self) {
        self.artist_lower = normalize(&self.artist);
        self.title_lower = normalize(&self.title);
        self.album_lower = normalize(&self.album);
        self.album_artist_lower = normalize(&self.album_artist);

        self.keywords = [
            &self.artist_lower,
            &self.title_lower,
            &self.album_lower,
            &self.album_artist_lower,
        ]
        .iter()
        .flat_map(|s| keywords(s))
        .map(str::to_string)
        .collect();

        self.set_rating(self.rating);
        self.clean();
    }

    /// Set the rating and keep the threshold flags in sync
    ///
    /// Negative and non-finite values are stored as [`UNRATED`]; values above
    /// 1.0 are clamped to it.
    pub fn set_rating(&mut self, rating: f64) {
        self.rating = if !rating.is_finite() || rating < 0.0 {
            UNRATED
        } else {
            rating.min(1.0)
        };
        self.rating_at_least_0 = self.rating >= 0.0;
        self.rating_at_least_25 = self.rating >= 0.25;
        self.rating_at_least_50 = self.rating >= 0.5;
        self.rating_at_least_75 = self.rating >= 0.75;
    }

    pub fn is_rated(&self) -> bool {
        self.rating >= 0.0
    }

    /// Record a play starting at `start`
    pub fn update_play_stats(&mut self, start: DateTime<Utc>) {
        self.num_plays += 1;
        if self.first_start_time.map_or(true, |t| start < t) {
            self.first_start_time = Some(start);
        }
        if self.last_start_time.map_or(true, |t| start > t) {
            self.last_start_time = Some(start);
        }
    }

    /// Sort and dedupe the tag and keyword lists
    pub fn clean(&mut self) {
        self.keywords.sort();
        self.keywords.dedup();
        self.tags.sort();
        self.tags.dedup();
    }

    /// Prepare the song to be returned in query results
    pub fn clean_for_results(&mut self) {
        self.song_id = self.id.to_string();
    }

    /// Key used to group songs by artist when spreading shuffled results
    ///
    /// Songs credited as "Artist feat. Someone" on an album by "Artist" are
    /// grouped under the album artist.
    pub fn spread_artist_key(&self) -> &str {
        if !self.album_artist_lower.is_empty()
            && self.artist_lower.starts_with(&self.album_artist_lower)
        {
            &self.album_artist_lower
        } else {
            &self.artist_lower
        }
    }
}

impl Default for Song {
    fn default() -> Self {
        Self::new(0, "", "", "")
    }
}
