//! Expansion job: intake queue -> one query plan per (indexer, target)
//!
//! Capabilities are fetched once per run. Indexers whose capabilities cannot
//! be fetched are left out of that run; their targets are picked up again the
//! next time they are requested.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::indexer::{Indexer, IndexerCatalog, TargetId, TorznabCapabilities};
use crate::services::indexer_sync::{IndexerSyncJob, IndexerSyncQueue};
use crate::services::metadata::TargetMetadataResolver;
use crate::services::query_plan::QueryPlanBuilder;
use crate::services::scheduler::JobExecutor;

pub struct QueueIndexerSyncExecutor {
    db: Database,
    queue: Arc<IndexerSyncQueue>,
    catalog: Arc<dyn IndexerCatalog>,
    metadata: Arc<dyn TargetMetadataResolver>,
    planner: Arc<dyn QueryPlanBuilder>,
}

impl QueueIndexerSyncExecutor {
    pub fn new(
        db: Database,
        queue: Arc<IndexerSyncQueue>,
        catalog: Arc<dyn IndexerCatalog>,
        metadata: Arc<dyn TargetMetadataResolver>,
        planner: Arc<dyn QueryPlanBuilder>,
    ) -> Self {
        Self {
            db,
            queue,
            catalog,
            metadata,
            planner,
        }
    }

    async fn load_capabilities(
        &self,
        indexers: Vec<Arc<dyn Indexer>>,
    ) -> Vec<(Arc<dyn Indexer>, TorznabCapabilities)> {
        let mut usable = Vec::with_capacity(indexers.len());
        for indexer in indexers {
            match indexer.capabilities().await {
                Ok(caps) => usable.push((indexer, caps)),
                Err(e) => warn!(
                    indexer = %indexer.name(),
                    error = %e,
                    "Failed to fetch indexer capabilities, skipping indexer"
                ),
            }
        }
        usable
    }

    async fn expand(
        &self,
        job: IndexerSyncJob,
        indexers: &[(Arc<dyn Indexer>, TorznabCapabilities)],
    ) -> Result<()> {
        let target: TargetId = match job.target_id.parse() {
            Ok(target) => target,
            Err(e) => {
                warn!(target_id = %job.target_id, error = %e, "Dropping sync request with invalid target id");
                return Ok(());
            }
        };

        let meta = self.metadata.resolve(&target).await?;

        for (indexer, caps) in indexers {
            let plan = self.planner.build(caps, &meta);
            if plan.is_empty() {
                warn!(
                    indexer = %indexer.name(),
                    target_id = %job.target_id,
                    "No usable queries for target, not queueing"
                );
                continue;
            }

            debug!(
                indexer = %indexer.name(),
                target_id = %job.target_id,
                queries = plan.len(),
                "Queueing indexer sync"
            );
            if let Err(e) = self
                .db
                .sync_info()
                .queue(indexer.id(), &job.target_id, plan)
                .await
            {
                warn!(
                    indexer = %indexer.name(),
                    target_id = %job.target_id,
                    error = %e,
                    "Failed to queue indexer sync"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for QueueIndexerSyncExecutor {
    async fn should_skip(&self) -> bool {
        if self.queue.is_empty() {
            return true;
        }
        match self.catalog.load_enabled().await {
            Ok(indexers) => indexers.is_empty(),
            Err(_) => false,
        }
    }

    async fn execute(&self) -> Result<()> {
        let indexers = self.catalog.load_enabled().await?;
        let indexers = self.load_capabilities(indexers).await;

        let processed = self
            .queue
            .process(|job| self.expand(job, &indexers))
            .await;

        info!(
            targets = processed,
            indexers = indexers.len(),
            "Expanded sync requests into query plans"
        );
        Ok(())
    }
}
