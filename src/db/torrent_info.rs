//! Materialized search results, keyed by info-hash

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::{
    bool_to_int, decode_err, from_json, int_to_bool, now_iso8601, str_to_datetime, to_json,
};
use crate::indexer::{TorrentCategory, TorrentFile, TorznabResult};

type DbPool = SqlitePool;

/// Where a `torrent_info` row came from
pub const SOURCE_INDEXER: &str = "indexer";

#[derive(Debug, Clone, Serialize)]
pub struct TorrentInfoRecord {
    pub hash: String,
    pub title: String,
    pub size: i64,
    pub indexer: String,
    pub source: String,
    pub category: String,
    pub seeders: i32,
    pub leechers: i32,
    pub private: bool,
    pub files: Vec<TorrentFile>,
    pub magnet_link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for TorrentInfoRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let private: i32 = row.try_get("private")?;
        let files_str: String = row.try_get("files")?;
        let created_str: String = row.try_get("created_at")?;
        let updated_str: String = row.try_get("updated_at")?;

        Ok(Self {
            hash: row.try_get("hash")?,
            title: row.try_get("title")?,
            size: row.try_get("size")?,
            indexer: row.try_get("indexer")?,
            source: row.try_get("source")?,
            category: row.try_get("category")?,
            seeders: row.try_get("seeders")?,
            leechers: row.try_get("leechers")?,
            private: int_to_bool(private),
            files: from_json(&files_str).map_err(decode_err)?,
            magnet_link: row.try_get("magnet_link")?,
            created_at: str_to_datetime(&created_str).map_err(decode_err)?,
            updated_at: str_to_datetime(&updated_str).map_err(decode_err)?,
        })
    }
}

pub struct TorrentInfoRepository {
    pool: DbPool,
}

impl TorrentInfoRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert every result in one transaction.
    ///
    /// Files are only overwritten by a non-empty list, the private flag is
    /// sticky and an existing category is kept.
    pub async fn upsert_batch(
        &self,
        results: &[TorznabResult],
        category: TorrentCategory,
    ) -> Result<usize> {
        if results.is_empty() {
            return Ok(0);
        }

        let now = now_iso8601();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO torrent_info (
                    hash, title, size, indexer, source, category, seeders, leechers,
                    private, files, magnet_link, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(hash) DO UPDATE SET
                    title = excluded.title,
                    size = excluded.size,
                    indexer = excluded.indexer,
                    seeders = excluded.seeders,
                    leechers = excluded.leechers,
                    private = MAX(torrent_info.private, excluded.private),
                    files = CASE WHEN excluded.files = '[]' THEN torrent_info.files ELSE excluded.files END,
                    magnet_link = excluded.magnet_link,
                    category = CASE WHEN torrent_info.category = '' THEN excluded.category ELSE torrent_info.category END,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&result.hash)
            .bind(&result.title)
            .bind(result.size)
            .bind(&result.indexer)
            .bind(SOURCE_INDEXER)
            .bind(category.as_str())
            .bind(result.seeders)
            .bind(result.leechers)
            .bind(bool_to_int(result.private))
            .bind(to_json(&result.files))
            .bind(&result.magnet_link)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to upsert torrent {}", result.hash))?;
        }

        tx.commit().await.context("Failed to commit torrent batch")?;
        Ok(results.len())
    }

    pub async fn get(&self, hash: &str) -> Result<Option<TorrentInfoRecord>> {
        let record = sqlx::query_as::<_, TorrentInfoRecord>(
            r#"
            SELECT hash, title, size, indexer, source, category, seeders, leechers,
                   private, files, magnet_link, created_at, updated_at
            FROM torrent_info
            WHERE hash = ?
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM torrent_info")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
