//! Database service: wraps the SQLite pool for lifecycle (start/stop/health) and dependencies.
//!
//! Other services that need the database (e.g. the scheduler) should declare `dependencies: ["database"]`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::query;
use tracing::{info, warn};

use crate::db::Database;
use crate::services::manager::{Service, ServiceHealth};

/// Service that owns the database pool and provides start/stop/health.
/// Register this first so that services depending on `"database"` can start after it.
pub struct DatabaseService {
    db: Database,
}

impl DatabaseService {
    /// Create a new database service with an already-connected pool.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (e.g. to clone for app state). Valid until [Service::stop] is called.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Service for DatabaseService {
    fn name(&self) -> &str {
        "database"
    }

    async fn start(&self) -> Result<()> {
        info!(service = "database", "Database service starting");
        // Pool is already connected by caller; just verify
        query("SELECT 1").execute(self.db.pool()).await?;

        info!(service = "database", "Syncing schema");
        self.db.sync_schema().await?;

        info!(service = "database", "Database service started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.db.pool().close().await;
        info!(service = "database", "Database service stopped");
        Ok(())
    }

    async fn health(&self) -> Result<ServiceHealth> {
        match query("SELECT 1").execute(self.db.pool()).await {
            Ok(_) => Ok(ServiceHealth::healthy()),
            Err(e) => {
                warn!(service = "database", error = %e, "Health check failed");
                Ok(ServiceHealth::unhealthy(e.to_string()))
            }
        }
    }
}
