//! Persistent key-value storage for fetched code-unit bodies.
//!
//! The loader only depends on the [`UnitStore`] contract; hosts without a
//! usable store simply run without caching. [`SqliteUnitStore`] is the
//! durable implementation, [`MemoryUnitStore`] backs tests and throwaway
//! sessions.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would push the store past its configured quota. Callers
    /// are expected to tolerate this one; everything else propagates.
    #[error("store capacity exceeded")]
    CapacityExceeded,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.into())
    }
}

#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SqliteUnitStore {
    pool: Pool<Sqlite>,
    max_total_bytes: Option<i64>,
}

impl SqliteUnitStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_capacity(database_url, None).await
    }

    /// Opens the store with a total-size quota in bytes. Writes that would
    /// exceed the quota fail with [`StoreError::CapacityExceeded`].
    pub async fn with_capacity(database_url: &str, max_total_bytes: Option<i64>) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            max_total_bytes,
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn total_bytes(&self) -> Result<i64, StoreError> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(LENGTH(value)), 0) FROM unit_cache")
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }
}

#[async_trait]
impl UnitStore for SqliteUnitStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM unit_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(max) = self.max_total_bytes {
            // Replacing a key frees its old bytes, so only count the others.
            let others: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM unit_cache WHERE key != ?",
            )
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
            if others + value.len() as i64 > max {
                return Err(StoreError::CapacityExceeded);
            }
        }

        sqlx::query(
            "INSERT INTO unit_cache (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM unit_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Volatile store with the same contract, including the capacity condition.
#[derive(Default)]
pub struct MemoryUnitStore {
    entries: Mutex<HashMap<String, String>>,
    max_total_bytes: Option<usize>,
}

impl MemoryUnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_total_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_total_bytes: Some(max_total_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl UnitStore for MemoryUnitStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if let Some(max) = self.max_total_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if others + value.len() > max {
                return Err(StoreError::CapacityExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
