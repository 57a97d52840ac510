//! Pipeline services and their supporting infrastructure

pub mod cache;
pub mod database;
pub mod enrichment;
pub mod indexer_sync;
pub mod job_queue;
pub mod manager;
pub mod metadata;
pub mod query_plan;
pub mod rate_limiter;
pub mod scheduler;

pub use database::DatabaseService;
pub use enrichment::{HttpSourceResolver, ResolvedSource, SourceResolver};
pub use indexer_sync::{IndexerSyncJob, IndexerSyncQueue, IndexerSyncService};
pub use manager::{HealthStatus, Service, ServiceHealth, ServicesManager};
pub use metadata::{DbTitleResolver, TargetMetadata, TargetMetadataResolver};
pub use query_plan::{QueryPlanBuilder, TorznabPlanBuilder};
pub use scheduler::{JobRegistry, LeaseConfig, RunOutcome, SchedulerService};
