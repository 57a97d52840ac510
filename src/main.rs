//! Indexer sync service entry point
//!
//! Connects the database, starts the managed services (database, scheduler)
//! and serves the REST API until ctrl-c.

use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use indexer_sync::app::{AppState, build_app};
use indexer_sync::config::Config;
use indexer_sync::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "indexer_sync=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting indexer sync");

    let config = Config::from_env()?;
    tracing::info!(
        instance_id = %config.instance_id,
        sync_enabled = config.sync_enabled,
        "Configuration loaded"
    );

    let db = Database::connect_with_retry(
        &config.database_url,
        config.database_max_connections,
        Duration::from_secs(5),
    )
    .await;
    tracing::info!("Database connected");

    let port = config.port;
    let state = AppState::bootstrap(config, db).await?;
    let services = state.services.clone();
    services.start_all().await?;

    let app = build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down services");
    services.stop_all().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
