//! Indexer Manager
//!
//! The IndexerManager is responsible for:
//! - Loading configured indexers and building their clients
//! - Caching client instances
//! - Handing out the rate limiter configured for each indexer

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::Indexer;
use super::torznab::TorznabClient;
use crate::db::{Database, IndexerRecord};
use crate::services::cache::{SharedCache, create_cache};
use crate::services::rate_limiter::{IndexerRateLimiter, RateLimiterRegistry};

/// How long a built client is reused before its config is re-read
const CLIENT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
const CLIENT_CACHE_CAPACITY: usize = 256;

/// Source of indexers and their limiters for the sync jobs
#[async_trait]
pub trait IndexerCatalog: Send + Sync {
    /// All enabled indexers whose type has a client implementation
    async fn load_enabled(&self) -> Result<Vec<Arc<dyn Indexer>>>;

    /// Limiter for `indexer_id`, `None` when the indexer is unthrottled
    async fn rate_limiter(&self, indexer_id: Uuid) -> Result<Option<Arc<dyn IndexerRateLimiter>>>;
}

/// Manages all configured indexer instances
pub struct IndexerManager {
    db: Database,
    clients: SharedCache<Arc<dyn Indexer>>,
    rate_limiters: RateLimiterRegistry,
}

impl IndexerManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            clients: create_cache(CLIENT_CACHE_TTL, CLIENT_CACHE_CAPACITY),
            rate_limiters: RateLimiterRegistry::new(),
        }
    }

    /// Build a client for a stored indexer config
    fn build_client(config: &IndexerRecord) -> Result<Arc<dyn Indexer>> {
        match config.indexer_type.as_str() {
            "torznab" | "jackett" => Ok(Arc::new(TorznabClient::new(
                config.id,
                config.name.clone(),
                &config.url,
                config.api_key.as_deref().unwrap_or(""),
            )?)),
            // Add more indexer types here
            other => Err(anyhow!("Unsupported indexer type: {}", other)),
        }
    }

    /// Cached client for `config`. The key includes `updated_at`, so an
    /// edited indexer gets a fresh client on the next load.
    fn client(&self, config: &IndexerRecord) -> Result<Arc<dyn Indexer>> {
        let key = format!("{}:{}", config.id, config.updated_at.timestamp_micros());
        if let Some(client) = self.clients.get(&key) {
            return Ok(client);
        }

        let client = Self::build_client(config)?;
        self.clients.set(key, client.clone());
        debug!(
            indexer_id = %config.id,
            indexer_name = %config.name,
            indexer_type = %config.indexer_type,
            "Built indexer client"
        );
        Ok(client)
    }
}

#[async_trait]
impl IndexerCatalog for IndexerManager {
    async fn load_enabled(&self) -> Result<Vec<Arc<dyn Indexer>>> {
        let configs = self.db.indexers().list_enabled().await?;

        let mut indexers = Vec::with_capacity(configs.len());
        for config in configs {
            match self.client(&config) {
                Ok(client) => indexers.push(client),
                Err(e) => {
                    warn!(
                        indexer_id = %config.id,
                        indexer_name = %config.name,
                        error = %e,
                        "Skipping indexer"
                    );
                }
            }
        }

        Ok(indexers)
    }

    async fn rate_limiter(&self, indexer_id: Uuid) -> Result<Option<Arc<dyn IndexerRateLimiter>>> {
        let config = self
            .db
            .indexers()
            .get(indexer_id)
            .await?
            .ok_or_else(|| anyhow!("Indexer config not found: {}", indexer_id))?;

        let Some(config_id) = config.rate_limit_config_id else {
            return Ok(None);
        };

        let limit = self
            .db
            .rate_limit_configs()
            .get(config_id)
            .await?
            .ok_or_else(|| anyhow!("Rate limit config not found: {}", config_id))?;

        let limiter: Arc<dyn IndexerRateLimiter> = self.rate_limiters.get_or_create(&limit)?;
        Ok(Some(limiter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateIndexer;

    fn create(name: &str, indexer_type: &str, rate_limit_config_id: Option<Uuid>) -> CreateIndexer {
        CreateIndexer {
            name: name.to_string(),
            indexer_type: indexer_type.to_string(),
            url: "http://localhost:9117".to_string(),
            api_key: Some("key".to_string()),
            rate_limit_config_id,
        }
    }

    #[tokio::test]
    async fn test_load_enabled_skips_unsupported_types() {
        let db = Database::connect_in_memory().await.unwrap();
        db.indexers().create(create("jackett", "jackett", None)).await.unwrap();
        db.indexers().create(create("scraper", "cardigann", None)).await.unwrap();

        let manager = IndexerManager::new(db);
        let indexers = manager.load_enabled().await.unwrap();

        assert_eq!(indexers.len(), 1);
        assert_eq!(indexers[0].name(), "jackett");
    }

    #[tokio::test]
    async fn test_clients_are_cached_until_config_changes() {
        let db = Database::connect_in_memory().await.unwrap();
        let record = db.indexers().create(create("jackett", "torznab", None)).await.unwrap();

        let manager = IndexerManager::new(db.clone());
        let first = manager.load_enabled().await.unwrap();
        let second = manager.load_enabled().await.unwrap();
        assert!(Arc::ptr_eq(&first[0], &second[0]));

        sqlx::query("UPDATE indexers SET url = ?, updated_at = ? WHERE id = ?")
            .bind("http://localhost:9696")
            .bind(crate::db::sqlite_helpers::datetime_to_str(
                record.updated_at + chrono::Duration::seconds(1),
            ))
            .bind(record.id.to_string())
            .execute(db.pool())
            .await
            .unwrap();
        let third = manager.load_enabled().await.unwrap();
        assert!(!Arc::ptr_eq(&first[0], &third[0]));
    }

    #[tokio::test]
    async fn test_rate_limiter_resolution() {
        let db = Database::connect_in_memory().await.unwrap();
        let limit = db
            .rate_limit_configs()
            .create("slow", 1, Duration::from_secs(60))
            .await
            .unwrap();
        let throttled = db
            .indexers()
            .create(create("throttled", "torznab", Some(limit.id)))
            .await
            .unwrap();
        let free = db.indexers().create(create("free", "torznab", None)).await.unwrap();

        let manager = IndexerManager::new(db);
        assert!(manager.rate_limiter(free.id).await.unwrap().is_none());

        let limiter = manager.rate_limiter(throttled.id).await.unwrap().unwrap();
        let key = crate::services::rate_limiter::indexer_key(throttled.id);
        assert!(limiter.try_acquire(&key).unwrap().allowed);
        assert!(!limiter.try_acquire(&key).unwrap().allowed);

        assert!(manager.rate_limiter(Uuid::new_v4()).await.is_err());
    }
}
