//! Database module for nup
//!
//! The abstract song store the query planner runs against, the filter types it
//! accepts, and SQLite setup for the durable cache tier.

mod engine;
pub mod filter;
mod store;

pub use engine::{connect_sqlite, connect_sqlite_memory};
pub use filter::{Comparison, EqualityFilter, Field, InequalityFilter, StoreQuery, Value};
pub use store::{SongStore, StoreError};
