//! Background jobs of the indexer sync pipeline
//!
//! - `queue-indexer-sync` drains the intake queue and turns every requested
//!   target into one query plan per indexer.
//! - `sync-indexer` executes pending query plans, one task per indexer.

pub mod indexer_sync;
pub mod queue_indexer_sync;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::indexer::IndexerCatalog;
use crate::services::enrichment::SourceResolver;
use crate::services::indexer_sync::IndexerSyncQueue;
use crate::services::metadata::TargetMetadataResolver;
use crate::services::query_plan::QueryPlanBuilder;
use crate::services::scheduler::{JobDefinition, JobRegistry};

pub use indexer_sync::{IndexerSyncExecutor, WaitBudget};
pub use queue_indexer_sync::QueueIndexerSyncExecutor;

pub const QUEUE_INDEXER_SYNC_JOB: &str = "queue-indexer-sync";
pub const SYNC_INDEXER_JOB: &str = "sync-indexer";

/// Everything the sync jobs need
#[derive(Clone)]
pub struct SyncJobDeps {
    pub db: Database,
    pub queue: Arc<IndexerSyncQueue>,
    pub catalog: Arc<dyn IndexerCatalog>,
    pub metadata: Arc<dyn TargetMetadataResolver>,
    pub planner: Arc<dyn QueryPlanBuilder>,
    pub resolver: Arc<dyn SourceResolver>,
}

/// Timing knobs of the sync jobs
#[derive(Debug, Clone)]
pub struct SyncJobSettings {
    pub enabled: bool,
    pub queue_interval: Duration,
    pub sync_interval: Duration,
    pub max_rate_limit_wait: Duration,
    pub enrichment_concurrency: usize,
}

/// Register both sync jobs with the registry
pub fn register_sync_jobs(registry: &JobRegistry, deps: SyncJobDeps, settings: &SyncJobSettings) {
    registry.register(
        JobDefinition {
            id: QUEUE_INDEXER_SYNC_JOB.to_string(),
            title: "Queue indexer sync".to_string(),
            interval: settings.queue_interval,
            disabled: !settings.enabled,
        },
        Arc::new(QueueIndexerSyncExecutor::new(
            deps.db.clone(),
            deps.queue,
            deps.catalog.clone(),
            deps.metadata,
            deps.planner,
        )),
    );

    registry.register(
        JobDefinition {
            id: SYNC_INDEXER_JOB.to_string(),
            title: "Sync indexers".to_string(),
            interval: settings.sync_interval,
            disabled: !settings.enabled,
        },
        Arc::new(IndexerSyncExecutor::new(
            deps.db,
            deps.catalog,
            deps.resolver,
            settings.max_rate_limit_wait,
            settings.enrichment_concurrency,
        )),
    );
}
