//! Last recorded outcome per scheduled job

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::{datetime_to_str, decode_err, str_to_datetime, str_to_datetime_opt};

type DbPool = SqlitePool;

/// Job run record from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRunRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `completed`, `failed`, `skipped` or `disabled`
    pub status: String,
    pub error: Option<String>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for JobRunRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let started_str: String = row.try_get("started_at")?;
        let finished_str: Option<String> = row.try_get("finished_at")?;

        Ok(Self {
            name: row.try_get("name")?,
            started_at: str_to_datetime(&started_str).map_err(decode_err)?,
            finished_at: str_to_datetime_opt(finished_str.as_deref()).map_err(decode_err)?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
        })
    }
}

pub struct JobRunRepository {
    pool: DbPool,
}

impl JobRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Replace the stored outcome for `record.name`
    pub async fn record(&self, record: &JobRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (name, started_at, finished_at, status, error)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                status = excluded.status,
                error = excluded.error
            "#,
        )
        .bind(&record.name)
        .bind(datetime_to_str(record.started_at))
        .bind(record.finished_at.map(datetime_to_str))
        .bind(&record.status)
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record run of job {}", record.name))?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<JobRunRecord>> {
        let record = sqlx::query_as::<_, JobRunRecord>(
            "SELECT name, started_at, finished_at, status, error FROM job_runs WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<JobRunRecord>> {
        let records = sqlx::query_as::<_, JobRunRecord>(
            "SELECT name, started_at, finished_at, status, error FROM job_runs ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_record_replaces_previous_outcome() {
        let db = Database::connect_in_memory().await.unwrap();
        let runs = db.job_runs();
        let started_at = str_to_datetime("2024-05-01T10:00:00.000Z").unwrap();

        let failed = JobRunRecord {
            name: "sync-indexer".to_string(),
            started_at,
            finished_at: Some(started_at),
            status: "failed".to_string(),
            error: Some("database is locked".to_string()),
        };
        runs.record(&failed).await.unwrap();
        assert_eq!(runs.get("sync-indexer").await.unwrap(), Some(failed.clone()));

        let completed = JobRunRecord {
            status: "completed".to_string(),
            error: None,
            ..failed
        };
        runs.record(&completed).await.unwrap();

        let all = runs.list().await.unwrap();
        assert_eq!(all, vec![completed]);
    }
}
