//! Application state and HTTP router construction.
//!
//! [AppState::bootstrap] wires the pipeline together: indexer manager,
//! intake queue, jobs and the services that own their lifecycle. `main` and
//! the integration tests both go through it.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Config;
use crate::db::Database;
use crate::indexer::{IndexerCatalog, IndexerManager};
use crate::jobs::{SyncJobDeps, SyncJobSettings, register_sync_jobs};
use crate::services::{
    DatabaseService, DbTitleResolver, HttpSourceResolver, IndexerSyncService, JobRegistry,
    LeaseConfig, SchedulerService, ServicesManager, SourceResolver, TorznabPlanBuilder,
};

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub sync: Arc<IndexerSyncService>,
    pub registry: Arc<JobRegistry>,
    pub services: Arc<ServicesManager>,
}

impl AppState {
    /// Build the pipeline around an already connected database with the
    /// HTTP source resolver for enrichment
    pub async fn bootstrap(config: Config, db: Database) -> Result<Self> {
        let resolver: Arc<dyn SourceResolver> = Arc::new(HttpSourceResolver::new()?);
        let catalog: Arc<dyn IndexerCatalog> = Arc::new(IndexerManager::new(db.clone()));
        Self::bootstrap_with(config, db, catalog, resolver).await
    }

    /// Like [bootstrap](Self::bootstrap) with explicit indexer catalog and source resolver
    pub async fn bootstrap_with(
        config: Config,
        db: Database,
        catalog: Arc<dyn IndexerCatalog>,
        resolver: Arc<dyn SourceResolver>,
    ) -> Result<Self> {
        let sync = Arc::new(IndexerSyncService::new(
            db.clone(),
            config.intake_debounce,
            config.sync_enabled,
        ));

        let registry = Arc::new(JobRegistry::new(
            db.clone(),
            LeaseConfig {
                holder: config.instance_id.clone(),
                ttl: config.job_lock_ttl,
            },
        ));
        register_sync_jobs(
            &registry,
            SyncJobDeps {
                db: db.clone(),
                queue: sync.queue(),
                catalog,
                metadata: Arc::new(DbTitleResolver::new(db.clone())),
                planner: Arc::new(TorznabPlanBuilder),
                resolver,
            },
            &SyncJobSettings {
                enabled: config.sync_enabled,
                queue_interval: config.queue_sync_interval,
                sync_interval: config.sync_interval,
                max_rate_limit_wait: config.rate_limit_max_wait,
                enrichment_concurrency: config.enrichment_concurrency,
            },
        );

        let services = Arc::new(ServicesManager::new());
        services
            .register(Arc::new(DatabaseService::new(db.clone())))
            .await;
        services
            .register(Arc::new(SchedulerService::new(
                registry.clone(),
                config.shutdown_grace,
            )))
            .await;

        Ok(Self {
            config: Arc::new(config),
            db,
            sync,
            registry,
            services,
        })
    }
}

/// Build the full Axum router: health probes, /api, and layers.
/// Returns Router<()> (state fully applied) for use with axum::serve.
pub fn build_app(state: AppState) -> Router<()> {
    let api = Router::new()
        .merge(api::indexer_sync::router())
        .merge(api::jobs::router());

    Router::new()
        .merge(api::health::router())
        .nest("/api", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
