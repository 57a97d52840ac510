//! Entry point for requesting and inspecting indexer syncs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{Database, SyncInfoFilter, SyncRecord};
use crate::services::job_queue::{JobQueue, JobQueueConfig};

/// Request to sync one target on every enabled indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerSyncJob {
    pub target_id: String,
}

pub type IndexerSyncQueue = JobQueue<IndexerSyncJob>;

/// Facade over the intake queue and the sync state store
pub struct IndexerSyncService {
    db: Database,
    queue: Arc<IndexerSyncQueue>,
}

impl IndexerSyncService {
    pub fn new(db: Database, debounce: Duration, enabled: bool) -> Self {
        let queue = JobQueue::new(
            JobQueueConfig {
                name: "indexer-sync".to_string(),
                debounce,
                disabled: !enabled,
            },
            |job: &IndexerSyncJob| job.target_id.clone(),
        );

        Self {
            db,
            queue: Arc::new(queue),
        }
    }

    /// The intake queue drained by the `queue-indexer-sync` job
    pub fn queue(&self) -> Arc<IndexerSyncQueue> {
        self.queue.clone()
    }

    /// Request a sync of `target_id`; repeated requests are coalesced
    pub fn queue_job(&self, target_id: impl Into<String>) {
        self.queue.queue(IndexerSyncJob {
            target_id: target_id.into(),
        });
    }

    pub async fn get_sync_pending(&self) -> Result<Vec<SyncRecord>> {
        self.db.sync_info().get_pending().await
    }

    pub async fn get_items(
        &self,
        filter: &SyncInfoFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncRecord>> {
        self.db.sync_info().get_items(filter, limit, offset).await
    }

    pub async fn count_items(&self, filter: &SyncInfoFilter) -> Result<i64> {
        self.db.sync_info().count_items(filter).await
    }

    pub async fn should_sync(&self, indexer_id: Uuid, target_id: &str) -> Result<bool> {
        self.db.sync_info().should_sync(indexer_id, target_id).await
    }
}
