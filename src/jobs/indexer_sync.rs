//! Sync executor: runs pending query plans against their indexers
//!
//! Indexers are processed concurrently, one task each. Within an indexer,
//! records run oldest first and entries in plan order. Progress is persisted
//! after every entry so an interrupted run resumes where it stopped.
//!
//! Rate limiting is cooperative: a denied entry waits for the limiter unless
//! the accumulated wait for this indexer would exceed the configured budget,
//! in which case the indexer stops for this run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{Database, SyncRecord};
use crate::indexer::{
    Indexer, IndexerCatalog, TargetId, TorrentCategory, TorznabQuery, TorznabResult,
};
use crate::services::enrichment::{SourceResolver, enrich};
use crate::services::rate_limiter::{IndexerRateLimiter, indexer_key};
use crate::services::scheduler::JobExecutor;

/// Why a single plan entry failed; stored on the entry and retried next run
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("rate limit check failed: {0}")]
    RateLimitCheck(String),
    #[error("rate limit wait failed: {0}")]
    RateLimitWait(String),
    #[error("search failed: {0}")]
    Search(String),
}

/// Total time an indexer may spend waiting on its rate limiter in one run
#[derive(Debug, Clone, Copy)]
pub struct WaitBudget {
    max: Duration,
    waited: Duration,
}

impl WaitBudget {
    pub fn new(max: Duration) -> Self {
        Self {
            max,
            waited: Duration::ZERO,
        }
    }

    /// Reserve `wait` from the budget, false when it would be exceeded
    pub fn try_spend(&mut self, wait: Duration) -> bool {
        let total = self.waited.saturating_add(wait);
        if total > self.max {
            return false;
        }
        self.waited = total;
        true
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// What one indexer task did during a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexerRunSummary {
    pub indexer: String,
    pub records: usize,
    pub queries_run: usize,
    pub queries_failed: usize,
    pub results_stored: usize,
    /// Stopped before finishing its records, on budget exhaustion or a failed wait
    pub stopped_early: bool,
}

#[derive(Clone)]
pub struct IndexerSyncExecutor {
    db: Database,
    catalog: Arc<dyn IndexerCatalog>,
    resolver: Arc<dyn SourceResolver>,
    max_wait: Duration,
    enrichment_concurrency: usize,
}

impl IndexerSyncExecutor {
    pub fn new(
        db: Database,
        catalog: Arc<dyn IndexerCatalog>,
        resolver: Arc<dyn SourceResolver>,
        max_wait: Duration,
        enrichment_concurrency: usize,
    ) -> Self {
        Self {
            db,
            catalog,
            resolver,
            max_wait,
            enrichment_concurrency,
        }
    }

    async fn persist(&self, indexer_id: Uuid, record: &SyncRecord) {
        if let Err(e) = self
            .db
            .sync_info()
            .record_progress(indexer_id, &record.target_id, &record.plan)
            .await
        {
            error!(
                indexer_id = %indexer_id,
                target_id = %record.target_id,
                error = %e,
                "Failed to persist sync progress"
            );
        }
    }

    /// Run every pending record of one indexer
    async fn sync_indexer(
        &self,
        indexer: Arc<dyn Indexer>,
        records: Vec<SyncRecord>,
    ) -> IndexerRunSummary {
        let mut summary = IndexerRunSummary {
            indexer: indexer.name().to_string(),
            records: records.len(),
            ..Default::default()
        };

        let limiter = match self.catalog.rate_limiter(indexer.id()).await {
            Ok(limiter) => limiter,
            Err(e) => {
                warn!(indexer = %indexer.name(), error = %e, "Failed to resolve rate limiter, skipping indexer");
                return summary;
            }
        };

        let key = indexer_key(indexer.id());
        let mut budget = WaitBudget::new(self.max_wait);

        for mut record in records {
            let mut results: Vec<TorznabResult> = Vec::new();

            for index in 0..record.plan.len() {
                if record.plan[index].done {
                    continue;
                }

                let outcome = self
                    .run_entry(
                        indexer.as_ref(),
                        limiter.as_deref(),
                        &key,
                        &record.plan[index].query,
                        &mut budget,
                    )
                    .await;

                match outcome {
                    EntryOutcome::Found(found) => {
                        summary.queries_run += 1;
                        record.plan[index].complete(found.len());
                        results.extend(found);
                    }
                    EntryOutcome::Failed(e) => {
                        summary.queries_failed += 1;
                        debug!(indexer = %indexer.name(), target_id = %record.target_id, entry = index, error = %e, "Query failed");
                        record.plan[index].fail(e);
                    }
                    EntryOutcome::Stop(e) => {
                        summary.queries_failed += 1;
                        record.plan[index].fail(e);
                        self.persist(indexer.id(), &record).await;
                        summary.stopped_early = true;
                        break;
                    }
                    EntryOutcome::BudgetExhausted => {
                        info!(
                            indexer = %indexer.name(),
                            waited_secs = budget.waited().as_secs(),
                            "Rate limit wait budget exhausted"
                        );
                        summary.stopped_early = true;
                        break;
                    }
                }
                self.persist(indexer.id(), &record).await;
            }

            if record.plan.is_empty() {
                self.persist(indexer.id(), &record).await;
            }

            summary.results_stored += self.materialize(&record.target_id, results).await;

            if summary.stopped_early {
                break;
            }
        }

        summary
    }

    async fn run_entry(
        &self,
        indexer: &dyn Indexer,
        limiter: Option<&dyn IndexerRateLimiter>,
        key: &str,
        encoded: &str,
        budget: &mut WaitBudget,
    ) -> EntryOutcome {
        let query = match TorznabQuery::parse(encoded) {
            Ok(query) => query,
            Err(e) => return EntryOutcome::Failed(EntryError::InvalidQuery(format!("{:#}", e))),
        };

        if let Some(limiter) = limiter {
            match limiter.try_acquire(key) {
                Ok(decision) if !decision.allowed => {
                    if !budget.try_spend(decision.retry_after) {
                        return EntryOutcome::BudgetExhausted;
                    }
                    debug!(
                        indexer = %indexer.name(),
                        retry_after_ms = decision.retry_after.as_millis() as u64,
                        "Rate limited, waiting"
                    );
                    if let Err(e) = limiter.wait(key).await {
                        return EntryOutcome::Stop(EntryError::RateLimitWait(format!("{:#}", e)));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    return EntryOutcome::Failed(EntryError::RateLimitCheck(format!("{:#}", e)));
                }
            }
        }

        match indexer.search(&query).await {
            Ok(found) => EntryOutcome::Found(found),
            Err(e) => EntryOutcome::Failed(EntryError::Search(format!("{:#}", e))),
        }
    }

    /// Enrich incomplete results and store the complete ones
    async fn materialize(&self, target_id: &str, mut results: Vec<TorznabResult>) -> usize {
        if results.is_empty() {
            return 0;
        }

        let category = match target_id.parse::<TargetId>() {
            Ok(target) => target.category(),
            Err(_) => TorrentCategory::Movie,
        };

        enrich(&mut results, self.resolver.clone(), self.enrichment_concurrency).await;

        let total = results.len();
        results.retain(|r| !r.has_missing_data());
        if results.len() < total {
            debug!(
                target_id = %target_id,
                dropped = total - results.len(),
                "Dropping results without hash or magnet"
            );
        }

        match self.db.torrent_info().upsert_batch(&results, category).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(target_id = %target_id, error = %e, "Failed to store search results");
                0
            }
        }
    }
}

enum EntryOutcome {
    Found(Vec<TorznabResult>),
    /// Entry failed, continue with the next one
    Failed(EntryError),
    /// Entry failed and the indexer must stop for this run
    Stop(EntryError),
    BudgetExhausted,
}

#[async_trait]
impl JobExecutor for IndexerSyncExecutor {
    async fn should_skip(&self) -> bool {
        match self.db.sync_info().has_pending().await {
            Ok(pending) => !pending,
            Err(e) => {
                warn!(error = %e, "Failed to check for pending syncs");
                false
            }
        }
    }

    async fn execute(&self) -> Result<()> {
        let pending = self.db.sync_info().get_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }

        let indexers: HashMap<Uuid, Arc<dyn Indexer>> = self
            .catalog
            .load_enabled()
            .await?
            .into_iter()
            .map(|indexer| (indexer.id(), indexer))
            .collect();

        // pending is ordered oldest first; grouping keeps that order per indexer
        let mut groups: Vec<(Uuid, Vec<SyncRecord>)> = Vec::new();
        for record in pending {
            if !indexers.contains_key(&record.indexer_id) {
                debug!(indexer_id = %record.indexer_id, target_id = %record.target_id, "Indexer not enabled, leaving sync pending");
                continue;
            }
            match groups.iter_mut().find(|(id, _)| *id == record.indexer_id) {
                Some((_, records)) => records.push(record),
                None => groups.push((record.indexer_id, vec![record])),
            }
        }

        let mut tasks = JoinSet::new();
        for (indexer_id, records) in groups {
            let Some(indexer) = indexers.get(&indexer_id).cloned() else {
                continue;
            };
            let executor = self.clone();
            tasks.spawn(async move { executor.sync_indexer(indexer, records).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => info!(
                    indexer = %summary.indexer,
                    records = summary.records,
                    queries_run = summary.queries_run,
                    queries_failed = summary.queries_failed,
                    results_stored = summary.results_stored,
                    stopped_early = summary.stopped_early,
                    "Indexer sync finished"
                ),
                Err(e) => error!(error = %e, "Indexer sync task panicked"),
            }
        }

        Ok(())
    }
}
