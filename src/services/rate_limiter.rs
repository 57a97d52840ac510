//! Rate limiting and retry logic for indexer calls
//!
//! Indexers are throttled through keyed token buckets built from stored
//! rate-limit configs. Each indexer gets its own key (`torznab:{id}`), so one
//! config can be shared by several indexers without them sharing a budget.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    DefaultKeyedRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use parking_lot::RwLock;
use reqwest::Response;
use tracing::{debug, warn};
use uuid::Uuid;

/// Limiter key for an indexer
pub fn indexer_key(indexer_id: Uuid) -> String {
    format!("torznab:{}", indexer_id)
}

/// Stored rate limit: at most `limit` requests per `window`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub id: Uuid,
    pub name: String,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    /// Token bucket refilling one request every `window / limit`, with a
    /// burst of `limit`
    pub fn quota(&self) -> Result<Quota> {
        let burst = NonZeroU32::new(self.limit)
            .ok_or_else(|| anyhow!("Rate limit '{}' has a limit of zero", self.name))?;
        let period = self.window / self.limit;
        let quota = Quota::with_period(period)
            .ok_or_else(|| anyhow!("Rate limit '{}' has an empty window", self.name))?;
        Ok(quota.allow_burst(burst))
    }
}

/// Outcome of a non-blocking limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// How long until a request would be allowed; zero when allowed
    pub retry_after: Duration,
}

impl RateLimitDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    pub fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Throttling capability consumed by the sync executor
#[async_trait]
pub trait IndexerRateLimiter: Send + Sync {
    /// Take a permit for `key` if one is available right now
    fn try_acquire(&self, key: &str) -> Result<RateLimitDecision>;

    /// Wait until a permit for `key` is available and take it
    async fn wait(&self, key: &str) -> Result<()>;
}

/// In-process token bucket limiter backed by `governor`
pub struct GovernorRateLimiter {
    config: RateLimitConfig,
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl GovernorRateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        let quota = config.quota()?;
        let clock = DefaultClock::default();
        let limiter = RateLimiter::dashmap_with_clock(quota, &clock);

        Ok(Self {
            config,
            limiter,
            clock,
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[async_trait]
impl IndexerRateLimiter for GovernorRateLimiter {
    fn try_acquire(&self, key: &str) -> Result<RateLimitDecision> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(RateLimitDecision::allowed()),
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(self.clock.now());
                debug!(key = %key, retry_after_ms = retry_after.as_millis() as u64, "Rate limited");
                Ok(RateLimitDecision::denied(retry_after))
            }
        }
    }

    async fn wait(&self, key: &str) -> Result<()> {
        self.limiter.until_key_ready(&key.to_string()).await;
        Ok(())
    }
}

/// Limiters built from stored configs, one per config id.
///
/// A config whose limit or window changed gets a fresh limiter on next lookup.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<Uuid, Arc<GovernorRateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, config: &RateLimitConfig) -> Result<Arc<GovernorRateLimiter>> {
        if let Some(limiter) = self.limiters.read().get(&config.id) {
            if limiter.config() == config {
                return Ok(limiter.clone());
            }
        }

        let limiter = Arc::new(GovernorRateLimiter::new(config.clone())?);
        self.limiters.write().insert(config.id, limiter.clone());
        debug!(config = %config.name, limit = config.limit, window_secs = config.window.as_secs(), "Created rate limiter");
        Ok(limiter)
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Execute an async operation with retry logic
pub async fn retry_async<T, E, Fut, F>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempts >= config.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    let retry_ms: u128 = duration.as_millis();
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = retry_ms,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

/// Helper trait for classifying HTTP responses
pub trait ResponseExt {
    /// Check if the response indicates a transient error that should be retried
    fn is_transient_error(&self) -> bool;
}

impl ResponseExt for Response {
    fn is_transient_error(&self) -> bool {
        let status = self.status().as_u16();
        // 429 (rate limit), 500-599 (server errors), 408 (timeout)
        status == 429 || status == 408 || (500..600).contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(limit: u32, window: Duration) -> RateLimitConfig {
        RateLimitConfig {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            limit,
            window,
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(GovernorRateLimiter::new(config(0, Duration::from_secs(60))).is_err());
        assert!(GovernorRateLimiter::new(config(5, Duration::ZERO)).is_err());
    }

    #[test]
    fn test_burst_then_denied_with_retry_after() {
        let limiter = GovernorRateLimiter::new(config(2, Duration::from_secs(60))).unwrap();
        let key = indexer_key(Uuid::new_v4());

        assert!(limiter.try_acquire(&key).unwrap().allowed);
        assert!(limiter.try_acquire(&key).unwrap().allowed);

        let denied = limiter.try_acquire(&key).unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after > Duration::from_secs(25));
        assert!(denied.retry_after <= Duration::from_secs(30));
    }

    #[test]
    fn test_keys_have_independent_budgets() {
        let limiter = GovernorRateLimiter::new(config(1, Duration::from_secs(60))).unwrap();
        let a = indexer_key(Uuid::new_v4());
        let b = indexer_key(Uuid::new_v4());

        assert!(limiter.try_acquire(&a).unwrap().allowed);
        assert!(!limiter.try_acquire(&a).unwrap().allowed);
        assert!(limiter.try_acquire(&b).unwrap().allowed);
    }

    #[tokio::test]
    async fn test_wait_blocks_until_permit() {
        let limiter = GovernorRateLimiter::new(config(1, Duration::from_millis(50))).unwrap();
        let key = "torznab:wait".to_string();
        assert!(limiter.try_acquire(&key).unwrap().allowed);

        let start = std::time::Instant::now();
        limiter.wait(&key).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_registry_reuses_and_rebuilds() {
        let registry = RateLimiterRegistry::new();
        let mut cfg = config(3, Duration::from_secs(10));

        let first = registry.get_or_create(&cfg).unwrap();
        let again = registry.get_or_create(&cfg).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        cfg.limit = 4;
        let rebuilt = registry.get_or_create(&cfg).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }

    #[tokio::test]
    async fn test_retry_async_stops_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 1.0,
        };

        let result: Result<(), String> = retry_async(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("nope".to_string()) }
            },
            &config,
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
