//! Local title catalogue used to build search queries

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

type DbPool = SqlitePool;

/// A movie or series known by its IMDB id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MediaTitleRecord {
    pub imdb_id: String,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    /// `movie` or `series`
    pub kind: String,
}

pub struct MediaTitleRepository {
    pool: DbPool,
}

impl MediaTitleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, imdb_id: &str) -> Result<Option<MediaTitleRecord>> {
        let record = sqlx::query_as::<_, MediaTitleRecord>(
            "SELECT imdb_id, title, original_title, year, kind FROM media_titles WHERE imdb_id = ?",
        )
        .bind(imdb_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn upsert(&self, record: &MediaTitleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO media_titles (imdb_id, title, original_title, year, kind)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(imdb_id) DO UPDATE SET
                title = excluded.title,
                original_title = excluded.original_title,
                year = excluded.year,
                kind = excluded.kind
            "#,
        )
        .bind(&record.imdb_id)
        .bind(&record.title)
        .bind(&record.original_title)
        .bind(record.year)
        .bind(&record.kind)
        .execute(&self.pool)
        .await
        .context("Failed to upsert media title")?;

        Ok(())
    }
}
