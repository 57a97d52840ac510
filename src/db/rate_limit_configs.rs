//! Stored rate limit configurations

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{decode_err, str_to_uuid, uuid_to_str};
use crate::services::rate_limiter::RateLimitConfig;

type DbPool = SqlitePool;

struct RateLimitConfigRow(RateLimitConfig);

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for RateLimitConfigRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let limit: i64 = row.try_get("request_limit")?;
        let window_secs: i64 = row.try_get("window_secs")?;

        Ok(Self(RateLimitConfig {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            name: row.try_get("name")?,
            limit: u32::try_from(limit).unwrap_or(0),
            window: Duration::from_secs(u64::try_from(window_secs).unwrap_or(0)),
        }))
    }
}

pub struct RateLimitConfigRepository {
    pool: DbPool,
}

impl RateLimitConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str, limit: u32, window: Duration) -> Result<RateLimitConfig> {
        let config = RateLimitConfig {
            id: Uuid::new_v4(),
            name: name.to_string(),
            limit,
            window,
        };

        sqlx::query(
            "INSERT INTO rate_limit_configs (id, name, request_limit, window_secs) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid_to_str(config.id))
        .bind(&config.name)
        .bind(i64::from(limit))
        .bind(window.as_secs() as i64)
        .execute(&self.pool)
        .await
        .context("Failed to create rate limit config")?;

        Ok(config)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<RateLimitConfig>> {
        let row = sqlx::query_as::<_, RateLimitConfigRow>(
            "SELECT id, name, request_limit, window_secs FROM rate_limit_configs WHERE id = ?",
        )
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }
}
