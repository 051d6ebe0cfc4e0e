//! Enums and small tag sets shared across nup

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// What changed about a song, used to decide which cached data is stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UpdateKind(u8);

impl UpdateKind {
    /// Song metadata (artist, title, album, track numbers, ...)
    pub const METADATA: UpdateKind = UpdateKind(1 << 0);
    /// Song rating
    pub const RATING: UpdateKind = UpdateKind(1 << 1);
    /// User-assigned tags
    pub const TAGS: UpdateKind = UpdateKind(1 << 2);
    /// Play count and play times
    pub const PLAYS: UpdateKind = UpdateKind(1 << 3);

    const NAMES: [(UpdateKind, &'static str); 4] = [
        (UpdateKind::METADATA, "metadata"),
        (UpdateKind::RATING, "rating"),
        (UpdateKind::TAGS, "tags"),
        (UpdateKind::PLAYS, "plays"),
    ];

    /// An empty set
    pub const fn empty() -> Self {
        UpdateKind(0)
    }

    /// Every kind of update
    pub const fn all() -> Self {
        UpdateKind(0b1111)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if any member of `other` is also in `self`
    pub fn intersects(self, other: UpdateKind) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every member of `other` is also in `self`
    pub fn contains(self, other: UpdateKind) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse a comma-separated list such as "rating,tags"
    pub fn parse(s: &str) -> Option<Self> {
        let mut kind = UpdateKind::empty();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let (k, _) = Self::NAMES
                .iter()
                .find(|(_, n)| n.eq_ignore_ascii_case(name))?;
            kind |= *k;
        }
        Some(kind)
    }
}

impl BitOr for UpdateKind {
    type Output = UpdateKind;

    fn bitor(self, rhs: UpdateKind) -> UpdateKind {
        UpdateKind(self.0 | rhs.0)
    }
}

impl BitOrAssign for UpdateKind {
    fn bitor_assign(&mut self, rhs: UpdateKind) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(k, _)| self.contains(*k))
            .map(|(_, n)| *n)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// How the planner may use the fallback (index-free) query shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackMode {
    /// Use composite-index queries, retrying once with fallback if an index is missing
    #[default]
    Auto,
    /// Always plan with the fallback shape
    Force,
    /// Never fall back; a missing index is returned as an error
    Never,
}

impl FallbackMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" | "" => Some(FallbackMode::Auto),
            "force" => Some(FallbackMode::Force),
            "never" => Some(FallbackMode::Never),
            _ => None,
        }
    }
}

/// Per-request options for song queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SongsFlags {
    /// Return empty results instead of querying the store on a cache miss
    pub cache_only: bool,
    /// Fallback planning policy
    pub fallback: FallbackMode,
}

impl SongsFlags {
    pub fn cache_only() -> Self {
        Self {
            cache_only: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_kind_membership() {
        let kind = UpdateKind::RATING | UpdateKind::TAGS;
        assert!(kind.contains(UpdateKind::RATING));
        assert!(kind.contains(UpdateKind::TAGS));
        assert!(!kind.contains(UpdateKind::PLAYS));
        assert!(kind.intersects(UpdateKind::TAGS | UpdateKind::METADATA));
        assert!(!kind.intersects(UpdateKind::METADATA | UpdateKind::PLAYS));
        assert!(UpdateKind::empty().is_empty());
        assert!(UpdateKind::all().contains(kind));
    }

    #[test]
    fn test_update_kind_parse_and_display() {
        assert_eq!(
            UpdateKind::parse("rating, Tags"),
            Some(UpdateKind::RATING | UpdateKind::TAGS)
        );
        assert_eq!(UpdateKind::parse(""), Some(UpdateKind::empty()));
        assert_eq!(UpdateKind::parse("rating,bogus"), None);

        assert_eq!((UpdateKind::PLAYS | UpdateKind::METADATA).to_string(), "metadata|plays");
        assert_eq!(UpdateKind::empty().to_string(), "none");
    }

    #[test]
    fn test_fallback_mode_from_str() {
        assert_eq!(FallbackMode::from_str("force"), Some(FallbackMode::Force));
        assert_eq!(FallbackMode::from_str("NEVER"), Some(FallbackMode::Never));
        assert_eq!(FallbackMode::from_str(""), Some(FallbackMode::Auto));
        assert_eq!(FallbackMode::from_str("sometimes"), None);
    }
}
