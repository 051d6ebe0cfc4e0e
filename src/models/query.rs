//! Song query model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UpdateKind;
use crate::utils::hashing::create_json_hash;

/// Minimum rating accepted by a query
///
/// Only these discrete thresholds are supported so that each one can be served
/// by an equality filter on a precomputed flag instead of an inequality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RatingThreshold {
    Zero,
    Quarter,
    Half,
    ThreeQuarters,
    One,
}

impl RatingThreshold {
    pub fn value(&self) -> f64 {
        match self {
            RatingThreshold::Zero => 0.0,
            RatingThreshold::Quarter => 0.25,
            RatingThreshold::Half => 0.5,
            RatingThreshold::ThreeQuarters => 0.75,
            RatingThreshold::One => 1.0,
        }
    }

    /// Map a numeric rating onto one of the supported thresholds
    pub fn from_value(v: f64) -> Option<Self> {
        const ALL: [RatingThreshold; 5] = [
            RatingThreshold::Zero,
            RatingThreshold::Quarter,
            RatingThreshold::Half,
            RatingThreshold::ThreeQuarters,
            RatingThreshold::One,
        ];
        ALL.into_iter().find(|t| (t.value() - v).abs() < 1e-9)
    }
}

/// A query returning a list of songs
///
/// Empty strings and `None` mean "don't filter on this field".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SongQuery {
    /// Song.artist_lower (normalized before filtering)
    pub artist: String,
    /// Song.title_lower (normalized before filtering)
    pub title: String,
    /// Song.album_lower (normalized before filtering)
    pub album: String,
    /// Song.album_id (exact)
    pub album_id: String,

    /// Every keyword must be present in Song.keywords
    pub keywords: Vec<String>,

    /// Song.rating must be at least this
    pub min_rating: Option<RatingThreshold>,
    /// Song must be unrated (ignored if `min_rating` is set)
    pub unrated: bool,

    /// Song.num_plays must be at most this
    pub max_plays: Option<i64>,

    /// Song.first_start_time must be at or after this
    pub min_first_start_time: Option<DateTime<Utc>>,
    /// Song.last_start_time must be at or before this
    pub max_last_start_time: Option<DateTime<Utc>>,

    /// Song.track (exact)
    pub track: Option<i64>,
    /// Song.disc (exact)
    pub disc: Option<i64>,
    /// Song.disc must be at most this
    pub max_disc: Option<i64>,

    /// Tags that must be present
    pub tags: Vec<String>,
    /// Tags that must not be present
    pub not_tags: Vec<String>,

    /// Randomize the result set and order
    pub shuffle: bool,
    /// Return the least-recently-played songs first
    pub order_by_last_start_time: bool,
}

impl SongQuery {
    /// Copy of the query with multi-valued fields sorted and deduped
    pub fn canonical(&self) -> SongQuery {
        let mut q = self.clone();
        for list in [&mut q.keywords, &mut q.tags, &mut q.not_tags] {
            list.sort();
            list.dedup();
        }
        q
    }

    /// Content hash used as the query's cache key
    ///
    /// Queries that differ only in the order of their keyword or tag lists
    /// hash identically.
    pub fn hash(&self) -> serde_json::Result<String> {
        create_json_hash(&self.canonical())
    }

    /// Whether the query's results can be cached
    ///
    /// Results that depend on play counts or play times change continuously
    /// and aren't worth caching.
    pub fn can_cache(&self) -> bool {
        !self.depends_on_plays()
    }

    /// Whether an update of `kind` makes cached results for this query stale
    pub fn results_invalidated(&self, kind: UpdateKind) -> bool {
        if kind.contains(UpdateKind::METADATA) {
            return true;
        }
        if kind.contains(UpdateKind::RATING) && (self.min_rating.is_some() || self.unrated) {
            return true;
        }
        if kind.contains(UpdateKind::TAGS) && (!self.tags.is_empty() || !self.not_tags.is_empty())
        {
            return true;
        }
        kind.contains(UpdateKind::PLAYS) && self.depends_on_plays()
    }

    fn depends_on_plays(&self) -> bool {
        self.max_plays.is_some()
            || self.min_first_start_time.is_some()
            || self.max_last_start_time.is_some()
            || self.order_by_last_start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rating_threshold_from_value() {
        assert_eq!(RatingThreshold::from_value(0.75), Some(RatingThreshold::ThreeQuarters));
        assert_eq!(RatingThreshold::from_value(1.0), Some(RatingThreshold::One));
        assert_eq!(RatingThreshold::from_value(0.0), Some(RatingThreshold::Zero));
        assert_eq!(RatingThreshold::from_value(0.6), None);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let q = SongQuery {
            artist: "Artist".into(),
            min_rating: Some(RatingThreshold::Half),
            ..Default::default()
        };
        assert_eq!(q.hash().unwrap(), q.hash().unwrap());
        assert_eq!(q.hash().unwrap(), q.clone().hash().unwrap());
    }

    #[test]
    fn test_hash_ignores_list_order() {
        let a = SongQuery {
            tags: vec!["a".into(), "b".into()],
            not_tags: vec!["y".into(), "x".into()],
            keywords: vec!["one".into(), "two".into()],
            ..Default::default()
        };
        let b = SongQuery {
            tags: vec!["b".into(), "a".into()],
            not_tags: vec!["x".into(), "y".into(), "x".into()],
            keywords: vec!["two".into(), "one".into()],
            ..Default::default()
        };
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_hash_distinguishes_fields() {
        let a = SongQuery {
            tags: vec!["rock".into()],
            ..Default::default()
        };
        let b = SongQuery {
            not_tags: vec!["rock".into()],
            ..Default::default()
        };
        let c = SongQuery {
            tags: vec!["rock".into()],
            shuffle: true,
            ..Default::default()
        };
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
        assert_ne!(a.hash().unwrap(), c.hash().unwrap());
    }

    #[test]
    fn test_can_cache() {
        assert!(SongQuery::default().can_cache());
        assert!(SongQuery {
            min_rating: Some(RatingThreshold::One),
            tags: vec!["t".into()],
            ..Default::default()
        }
        .can_cache());

        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        for q in [
            SongQuery {
                max_plays: Some(0),
                ..Default::default()
            },
            SongQuery {
                min_first_start_time: Some(t),
                ..Default::default()
            },
            SongQuery {
                max_last_start_time: Some(t),
                ..Default::default()
            },
            SongQuery {
                order_by_last_start_time: true,
                ..Default::default()
            },
        ] {
            assert!(!q.can_cache(), "{:?} shouldn't be cacheable", q);
        }
    }

    #[test]
    fn test_results_invalidated() {
        let plain = SongQuery {
            artist: "a".into(),
            ..Default::default()
        };
        let rated = SongQuery {
            min_rating: Some(RatingThreshold::Half),
            ..Default::default()
        };
        let unrated = SongQuery {
            unrated: true,
            ..Default::default()
        };
        let tagged = SongQuery {
            not_tags: vec!["live".into()],
            ..Default::default()
        };
        let played = SongQuery {
            max_plays: Some(3),
            ..Default::default()
        };

        for q in [&plain, &rated, &unrated, &tagged, &played] {
            assert!(q.results_invalidated(UpdateKind::METADATA));
            assert!(!q.results_invalidated(UpdateKind::empty()));
        }

        assert!(!plain.results_invalidated(UpdateKind::RATING));
        assert!(rated.results_invalidated(UpdateKind::RATING));
        assert!(unrated.results_invalidated(UpdateKind::RATING));
        assert!(!tagged.results_invalidated(UpdateKind::RATING));

        assert!(tagged.results_invalidated(UpdateKind::TAGS));
        assert!(!rated.results_invalidated(UpdateKind::TAGS));

        assert!(played.results_invalidated(UpdateKind::PLAYS));
        assert!(!plain.results_invalidated(UpdateKind::PLAYS));

        assert!(rated.results_invalidated(UpdateKind::PLAYS | UpdateKind::RATING));
    }
}
