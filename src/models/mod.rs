//! Data models for nup
//!
//! Songs as the store holds them, the queries run against them, and the small
//! tag sets describing updates and request options.

mod enums;
mod query;
mod song;

pub use enums::{FallbackMode, SongsFlags, UpdateKind};
pub use query::{RatingThreshold, SongQuery};
pub use song::{Song, UNRATED};
