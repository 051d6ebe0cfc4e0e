//! Durable cache tier - key/value rows in SQLite

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{CacheError, CacheTierStore};
use crate::db::{connect_sqlite, connect_sqlite_memory};

/// Persistent cache tier
///
/// Entries never expire. Every `set` on a key increments its stored version,
/// which makes redundant write-backs observable.
#[derive(Clone)]
pub struct DurableTier {
    pool: SqlitePool,
}

impl DurableTier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a cache database on disk
    pub async fn open(path: &Path) -> Result<Self, CacheError> {
        Ok(Self::new(connect_sqlite(path).await?))
    }

    /// Open a private in-memory cache database
    pub async fn in_memory() -> Result<Self, CacheError> {
        Ok(Self::new(connect_sqlite_memory().await?))
    }

    /// Number of times `key` has been written, or `None` if it's absent
    pub async fn version(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM cache_entry WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }
}

#[async_trait]
impl CacheTierStore for DurableTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM cache_entry WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO cache_entry (key, value, version, updated_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = cache_entry.version + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entry WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
