//! Database connection and operations
//!
//! Re-exports are provided for convenience, even if not all are used within the crate.

#![allow(unused_imports)]

pub mod indexers;
pub mod job_locks;
pub mod job_runs;
pub mod media_titles;
pub mod rate_limit_configs;
pub mod schema_sync;
pub mod sqlite_helpers;
pub mod sync_info;
pub mod torrent_info;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use crate::services::cache::{SharedCache, create_cache};

pub use indexers::{CreateIndexer, IndexerRecord, IndexerRepository};
pub use job_locks::JobLockRepository;
pub use job_runs::{JobRunRecord, JobRunRepository};
pub use media_titles::{MediaTitleRecord, MediaTitleRepository};
pub use rate_limit_configs::RateLimitConfigRepository;
pub use schema_sync::{SchemaSyncResult, sync_schema};
pub use sync_info::{
    QueryPlan, QueryPlanEntry, SyncInfoFilter, SyncInfoRepository, SyncRecord, SyncStatus,
};
pub use torrent_info::{TorrentInfoRecord, TorrentInfoRepository};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    /// Pairs queued recently, shared by every sync info repository handle
    queued: SharedCache<()>,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            queued: create_cache(sync_info::QUEUE_DEDUP_WINDOW, sync_info::QUEUE_DEDUP_CAPACITY),
        }
    }

    /// Create a new database connection pool, creating the file if needed
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        ensure_parent_dir(url)?;

        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {}", url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(
        url: &str,
        max_connections: u32,
        retry_interval: Duration,
    ) -> Self {
        loop {
            match Self::connect(url, max_connections).await {
                Ok(db) => return db,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// Private in-memory database with the schema applied, for tests.
    ///
    /// A single connection that never idles out, since every new connection
    /// to `sqlite::memory:` would see an empty database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self::new(pool);
        db.sync_schema().await?;
        Ok(db)
    }

    /// Create missing tables; fails if any statement failed
    pub async fn sync_schema(&self) -> Result<SchemaSyncResult> {
        let result = sync_schema(&self.pool).await;
        if !result.errors.is_empty() {
            anyhow::bail!("Schema sync failed: {}", result.errors.join("; "));
        }
        if !result.tables_created.is_empty() {
            info!(tables = ?result.tables_created, "Created database tables");
        }
        Ok(result)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a sync info repository
    pub fn sync_info(&self) -> SyncInfoRepository {
        SyncInfoRepository::new(self.pool.clone(), self.queued.clone())
    }

    /// Get a job lease repository
    pub fn job_locks(&self) -> JobLockRepository {
        JobLockRepository::new(self.pool.clone())
    }

    /// Get a job run repository
    pub fn job_runs(&self) -> JobRunRepository {
        JobRunRepository::new(self.pool.clone())
    }

    /// Get a torrent info repository
    pub fn torrent_info(&self) -> TorrentInfoRepository {
        TorrentInfoRepository::new(self.pool.clone())
    }

    /// Get an indexer repository
    pub fn indexers(&self) -> IndexerRepository {
        IndexerRepository::new(self.pool.clone())
    }

    /// Get a rate limit config repository
    pub fn rate_limit_configs(&self) -> RateLimitConfigRepository {
        RateLimitConfigRepository::new(self.pool.clone())
    }

    /// Get a media title repository
    pub fn media_titles(&self) -> MediaTitleRepository {
        MediaTitleRepository::new(self.pool.clone())
    }
}

/// Create the directory holding a file-backed SQLite database
fn ensure_parent_dir(url: &str) -> Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);

    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_parent_dir_ignores_memory() {
        assert!(ensure_parent_dir("sqlite::memory:").is_ok());
        assert!(ensure_parent_dir("sqlite:").is_ok());
    }
}
