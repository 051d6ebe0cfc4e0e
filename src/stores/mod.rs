//! In-memory song storage

mod song_store;

pub use song_store::{CompositeIndex, MemorySongStore};
