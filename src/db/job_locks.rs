//! Cross-instance job leases
//!
//! A lease row names the holder and an expiry. Acquiring succeeds when no row
//! exists, the row already belongs to the caller, or the previous holder let it
//! expire (e.g. because it crashed).

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::datetime_to_str;

type DbPool = SqlitePool;

pub struct JobLockRepository {
    pool: DbPool,
}

impl JobLockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Try to take the lease `name` for `ttl`. Returns `true` when acquired.
    pub async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).context("Lease TTL out of range")?;
        let now = datetime_to_str(now);

        let result = sqlx::query(
            r#"
            INSERT INTO job_locks (name, holder, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE job_locks.expires_at <= ? OR job_locks.holder = excluded.holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(&now)
        .bind(datetime_to_str(expires_at))
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to acquire job lock {}", name))?;

        Ok(result.rows_affected() == 1)
    }

    /// Extend a held lease. Returns `false` if the lease is no longer ours.
    pub async fn renew(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let expires_at =
            Utc::now() + chrono::Duration::from_std(ttl).context("Lease TTL out of range")?;

        let result =
            sqlx::query("UPDATE job_locks SET expires_at = ? WHERE name = ? AND holder = ?")
                .bind(datetime_to_str(expires_at))
                .bind(name)
                .bind(holder)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to renew job lock {}", name))?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a lease held by `holder`; a lease taken over by someone else is left alone
    pub async fn release(&self, name: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM job_locks WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to release job lock {}", name))?;
        Ok(())
    }
}
