//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// SQLite connection URL (e.g. `sqlite:./data/indexer-sync.db`)
    pub database_url: String,

    /// Maximum connections in the database pool
    pub database_max_connections: u32,

    /// Identity of this process when holding job leases
    pub instance_id: String,

    /// Master switch for the intake queue and both sync jobs
    pub sync_enabled: bool,

    /// Interval of the job that expands queued targets into query plans
    pub queue_sync_interval: Duration,

    /// Interval of the job that executes pending query plans
    pub sync_interval: Duration,

    /// Debounce window of the intake queue
    pub intake_debounce: Duration,

    /// Cumulative rate-limit wait allowed per indexer per run
    pub rate_limit_max_wait: Duration,

    /// Worker pool size for resolving torrent source links
    pub enrichment_concurrency: usize,

    /// Lifetime of a job lease before another instance may take it over
    pub job_lock_ttl: Duration,

    /// How long shutdown waits for in-flight job runs
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("DATABASE_PATH").map(|p| format!("sqlite:{}", p)))
            .unwrap_or_else(|_| "sqlite:./data/indexer-sync.db".to_string());

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_url,

            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            instance_id: env::var("INSTANCE_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),

            sync_enabled: env::var("INDEXER_SYNC_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            queue_sync_interval: secs_from_env("QUEUE_SYNC_INTERVAL_SECS", 10 * 60)?,

            sync_interval: secs_from_env("SYNC_INTERVAL_SECS", 30 * 60)?,

            intake_debounce: secs_from_env("INTAKE_DEBOUNCE_SECS", 5 * 60)?,

            rate_limit_max_wait: secs_from_env("RATE_LIMIT_MAX_WAIT_SECS", 15 * 60)?,

            enrichment_concurrency: env::var("ENRICHMENT_CONCURRENCY")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            job_lock_ttl: secs_from_env("JOB_LOCK_TTL_SECS", 30 * 60)?,

            shutdown_grace: secs_from_env("SHUTDOWN_GRACE_SECS", 60)?,
        })
    }
}

fn secs_from_env(key: &str, default: u64) -> Result<Duration> {
    match env::var(key) {
        Ok(v) => {
            let secs: u64 = v.parse().with_context(|| format!("Invalid {}", key))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
