//! Indexer database repository
//!
//! Handles CRUD operations for indexer configurations.
//! Uses runtime query validation to avoid requiring tables to exist at compile time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{
    bool_to_int, decode_err, int_to_bool, now_iso8601, str_to_datetime, str_to_uuid,
    str_to_uuid_opt, uuid_to_str,
};

type DbPool = SqlitePool;

/// Indexer configuration record from database
#[derive(Debug, Clone, Serialize)]
pub struct IndexerRecord {
    pub id: Uuid,
    pub name: String,
    /// Client implementation, e.g. `torznab` or `jackett`
    pub indexer_type: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub enabled: bool,
    pub rate_limit_config_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for IndexerRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let rate_limit_str: Option<String> = row.try_get("rate_limit_config_id")?;
        let enabled: i32 = row.try_get("enabled")?;
        let created_str: String = row.try_get("created_at")?;
        let updated_str: String = row.try_get("updated_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            name: row.try_get("name")?,
            indexer_type: row.try_get("indexer_type")?,
            url: row.try_get("url")?,
            api_key: row.try_get("api_key")?,
            enabled: int_to_bool(enabled),
            rate_limit_config_id: str_to_uuid_opt(rate_limit_str.as_deref()).map_err(decode_err)?,
            created_at: str_to_datetime(&created_str).map_err(decode_err)?,
            updated_at: str_to_datetime(&updated_str).map_err(decode_err)?,
        })
    }
}

/// Data for creating a new indexer configuration
#[derive(Debug, Clone)]
pub struct CreateIndexer {
    pub name: String,
    pub indexer_type: String,
    pub url: String,
    pub api_key: Option<String>,
    pub rate_limit_config_id: Option<Uuid>,
}

const COLUMNS: &str =
    "id, name, indexer_type, url, api_key, enabled, rate_limit_config_id, created_at, updated_at";

/// Indexer database repository
pub struct IndexerRepository {
    pool: DbPool,
}

impl IndexerRepository {
    /// Create a new repository instance
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new indexer configuration
    pub async fn create(&self, data: CreateIndexer) -> Result<IndexerRecord> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO indexers (id, name, indexer_type, url, api_key, rate_limit_config_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&data.name)
        .bind(&data.indexer_type)
        .bind(&data.url)
        .bind(&data.api_key)
        .bind(data.rate_limit_config_id.map(uuid_to_str))
        .execute(&self.pool)
        .await
        .context("Failed to create indexer")?;

        self.get(id)
            .await?
            .context("Indexer not found after insert")
    }

    /// Get an indexer configuration by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<IndexerRecord>> {
        let record = sqlx::query_as::<_, IndexerRecord>(&format!(
            "SELECT {} FROM indexers WHERE id = ?",
            COLUMNS
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List enabled indexer configurations
    pub async fn list_enabled(&self) -> Result<Vec<IndexerRecord>> {
        let records = sqlx::query_as::<_, IndexerRecord>(&format!(
            "SELECT {} FROM indexers WHERE enabled = 1 ORDER BY name ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Enable or disable an indexer
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE indexers SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(bool_to_int(enabled))
            .bind(now_iso8601())
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn torznab(name: &str) -> CreateIndexer {
        CreateIndexer {
            name: name.to_string(),
            indexer_type: "torznab".to_string(),
            url: "http://localhost:9117".to_string(),
            api_key: Some("key".to_string()),
            rate_limit_config_id: None,
        }
    }

    #[tokio::test]
    async fn test_list_enabled_skips_disabled() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.indexers();

        let a = repo.create(torznab("b-indexer")).await.unwrap();
        let b = repo.create(torznab("a-indexer")).await.unwrap();
        assert!(a.enabled);

        let enabled = repo.list_enabled().await.unwrap();
        assert_eq!(enabled.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        assert!(repo.set_enabled(a.id, false).await.unwrap());
        let enabled = repo.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "a-indexer");
    }
}
