//! Cache tier interface

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CacheError;

/// Identifies one of the two cache tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Volatile, size-bounded tier with a TTL
    Fast,
    /// Persistent tier with no expiry
    Durable,
}

impl CacheTier {
    pub const ALL: [CacheTier; 2] = [CacheTier::Fast, CacheTier::Durable];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" | "memcache" => Some(CacheTier::Fast),
            "durable" | "datastore" => Some(CacheTier::Durable),
            _ => None,
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Fast => f.write_str("fast"),
            CacheTier::Durable => f.write_str("durable"),
        }
    }
}

/// Key/value access to a single cache tier
///
/// A missing key is `Ok(None)`, not an error, and deleting a missing key
/// succeeds.
#[async_trait]
pub trait CacheTierStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
