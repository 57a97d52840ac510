//! Schema synchronization at startup
//!
//! Every table is declared with `CREATE TABLE IF NOT EXISTS`, so running the
//! sync against an existing database is a no-op. Column renames or type
//! changes are not handled.

use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Result of a schema sync operation
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub errors: Vec<String>,
}

/// Expression producing the current time in the stored timestamp format
macro_rules! now_default {
    () => {
        "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))"
    };
}

/// Table name and DDL, in creation order (referenced tables first)
const TABLES: &[(&str, &str)] = &[
    (
        "rate_limit_configs",
        concat!(
            "CREATE TABLE IF NOT EXISTS rate_limit_configs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                request_limit INTEGER NOT NULL,
                window_secs INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT ",
            now_default!(),
            ")"
        ),
    ),
    (
        "indexers",
        concat!(
            "CREATE TABLE IF NOT EXISTS indexers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                indexer_type TEXT NOT NULL,
                url TEXT NOT NULL,
                api_key TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                rate_limit_config_id TEXT REFERENCES rate_limit_configs(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL DEFAULT ",
            now_default!(),
            ",
                updated_at TEXT NOT NULL DEFAULT ",
            now_default!(),
            ")"
        ),
    ),
    (
        "media_titles",
        "CREATE TABLE IF NOT EXISTS media_titles (
            imdb_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            original_title TEXT,
            year INTEGER,
            kind TEXT NOT NULL DEFAULT 'movie'
        )",
    ),
    (
        "indexer_sync_info",
        "CREATE TABLE IF NOT EXISTS indexer_sync_info (
            indexer_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            queued_at TEXT,
            synced_at TEXT,
            status TEXT NOT NULL DEFAULT 'queued',
            result_count INTEGER,
            queries TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (indexer_id, target_id)
        )",
    ),
    (
        "torrent_info",
        concat!(
            "CREATE TABLE IF NOT EXISTS torrent_info (
                hash TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT -1,
                indexer TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                seeders INTEGER NOT NULL DEFAULT 0,
                leechers INTEGER NOT NULL DEFAULT 0,
                private INTEGER NOT NULL DEFAULT 0,
                files TEXT NOT NULL DEFAULT '[]',
                magnet_link TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT ",
            now_default!(),
            ",
                updated_at TEXT NOT NULL DEFAULT ",
            now_default!(),
            ")"
        ),
    ),
    (
        "job_locks",
        "CREATE TABLE IF NOT EXISTS job_locks (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
    ),
    (
        "job_runs",
        "CREATE TABLE IF NOT EXISTS job_runs (
            name TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            error TEXT
        )",
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_indexer_sync_info_queued_at ON indexer_sync_info(queued_at)",
    "CREATE INDEX IF NOT EXISTS idx_indexer_sync_info_target_id ON indexer_sync_info(target_id)",
    "CREATE INDEX IF NOT EXISTS idx_indexers_enabled ON indexers(enabled)",
];

/// Check if a table exists in the database
async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, sqlx::Error> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;

    Ok(result.is_some())
}

/// Create all tables and indexes that do not exist yet.
///
/// Failures are collected rather than returned so one bad statement does not
/// prevent the remaining tables from being created.
pub async fn sync_schema(pool: &SqlitePool) -> SchemaSyncResult {
    let mut result = SchemaSyncResult::default();

    for (table_name, ddl) in TABLES {
        let existed = match table_exists(pool, table_name).await {
            Ok(existed) => existed,
            Err(e) => {
                result
                    .errors
                    .push(format!("Failed to inspect table {}: {}", table_name, e));
                continue;
            }
        };

        if let Err(e) = sqlx::query(ddl).execute(pool).await {
            let msg = format!("Failed to create table {}: {}", table_name, e);
            warn!("{}", msg);
            result.errors.push(msg);
            continue;
        }

        if !existed {
            debug!(table = %table_name, "Created table");
            result.tables_created.push(table_name.to_string());
        }
    }

    for ddl in INDEXES {
        if let Err(e) = sqlx::query(ddl).execute(pool).await {
            let msg = format!("Failed to create index: {}", e);
            warn!("{}", msg);
            result.errors.push(msg);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_sync_schema_is_idempotent() {
        let db = Database::connect_in_memory().await.unwrap();

        let first = sync_schema(db.pool()).await;
        assert!(first.errors.is_empty(), "{:?}", first.errors);
        // connect_in_memory already synced, so nothing is new here
        assert!(first.tables_created.is_empty());

        for (table_name, _) in TABLES {
            assert!(table_exists(db.pool(), table_name).await.unwrap());
        }

        let second = sync_schema(db.pool()).await;
        assert!(second.errors.is_empty());
        assert!(second.tables_created.is_empty());
    }

    #[tokio::test]
    async fn test_sync_schema_reports_created_tables() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let result = sync_schema(&pool).await;
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.tables_created.len(), TABLES.len());
    }
}
