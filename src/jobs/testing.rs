//! Hand-written fakes for the sync job collaborators

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::indexer::{
    Indexer, IndexerCatalog, SearchingItem, TorznabCapabilities, TorznabQuery, TorznabResult,
};
use crate::services::enrichment::{ResolvedSource, SourceResolver};
use crate::services::rate_limiter::{IndexerRateLimiter, RateLimitDecision};

/// Indexer answering searches from a table keyed by the encoded query
pub struct FakeIndexer {
    pub id: Uuid,
    pub name: String,
    pub caps: Option<TorznabCapabilities>,
    pub responses: HashMap<String, Result<Vec<TorznabResult>, String>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeIndexer {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            caps: Some(TorznabCapabilities {
                search: SearchingItem::from_attrs("yes", "q"),
                tv_search: SearchingItem::from_attrs("yes", "q,season,ep,imdbid"),
                movie_search: SearchingItem::from_attrs("yes", "q,imdbid,year"),
            }),
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(mut self, query: &str, results: Vec<TorznabResult>) -> Self {
        self.responses.insert(query.to_string(), Ok(results));
        self
    }

    pub fn fail(mut self, query: &str, error: &str) -> Self {
        self.responses.insert(query.to_string(), Err(error.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Indexer for FakeIndexer {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn capabilities(&self) -> Result<TorznabCapabilities> {
        match &self.caps {
            Some(caps) => Ok(caps.clone()),
            None => bail!("caps unavailable"),
        }
    }

    async fn search(&self, query: &TorznabQuery) -> Result<Vec<TorznabResult>> {
        let encoded = query.encode();
        self.calls.lock().push(encoded.clone());
        match self.responses.get(&encoded) {
            Some(Ok(results)) => Ok(results.clone()),
            Some(Err(e)) => bail!("{}", e),
            None => Ok(Vec::new()),
        }
    }
}

/// Limiter with scripted answers; counts waits
pub struct FakeLimiter {
    /// Delay reported on every check, `None` allows immediately
    pub retry_after: Option<Duration>,
    /// Number of upcoming checks that return an error
    pub failing_checks: Mutex<usize>,
    pub fail_waits: bool,
    pub waits: Mutex<usize>,
}

impl FakeLimiter {
    pub fn allowing() -> Self {
        Self {
            retry_after: None,
            failing_checks: Mutex::new(0),
            fail_waits: false,
            waits: Mutex::new(0),
        }
    }

    pub fn denying(retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::allowing()
        }
    }

    pub fn fail_checks(self, count: usize) -> Self {
        *self.failing_checks.lock() = count;
        self
    }

    pub fn fail_waits(mut self) -> Self {
        self.fail_waits = true;
        self
    }

    pub fn waits(&self) -> usize {
        *self.waits.lock()
    }
}

#[async_trait]
impl IndexerRateLimiter for FakeLimiter {
    fn try_acquire(&self, _key: &str) -> Result<RateLimitDecision> {
        {
            let mut failing = self.failing_checks.lock();
            if *failing > 0 {
                *failing -= 1;
                bail!("limiter store unreachable");
            }
        }
        Ok(match self.retry_after {
            Some(delay) => RateLimitDecision::denied(delay),
            None => RateLimitDecision::allowed(),
        })
    }

    async fn wait(&self, _key: &str) -> Result<()> {
        *self.waits.lock() += 1;
        if self.fail_waits {
            bail!("wait cancelled");
        }
        Ok(())
    }
}

pub struct FakeCatalog {
    pub indexers: Vec<Arc<FakeIndexer>>,
    pub limiter: Option<Arc<dyn IndexerRateLimiter>>,
    pub limiter_error: bool,
}

impl FakeCatalog {
    pub fn new(indexers: Vec<Arc<FakeIndexer>>) -> Self {
        Self {
            indexers,
            limiter: None,
            limiter_error: false,
        }
    }
}

#[async_trait]
impl IndexerCatalog for FakeCatalog {
    async fn load_enabled(&self) -> Result<Vec<Arc<dyn Indexer>>> {
        Ok(self
            .indexers
            .iter()
            .map(|i| i.clone() as Arc<dyn Indexer>)
            .collect())
    }

    async fn rate_limiter(&self, _indexer_id: Uuid) -> Result<Option<Arc<dyn IndexerRateLimiter>>> {
        if self.limiter_error {
            bail!("limiter config missing");
        }
        Ok(self.limiter.clone())
    }
}

/// Resolver that answers every link with a hash derived from the link
#[derive(Default)]
pub struct FakeResolver {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SourceResolver for FakeResolver {
    async fn resolve(&self, source_link: &str) -> Result<ResolvedSource> {
        self.calls.lock().push(source_link.to_string());
        let hash = format!("{:0>40}", source_link.len());
        Ok(ResolvedSource {
            magnet_link: format!("magnet:?xt=urn:btih:{}", hash),
            hash,
            ..Default::default()
        })
    }
}

/// A complete result with the given hash
pub fn torrent(hash: &str) -> TorznabResult {
    TorznabResult {
        indexer: "fake".to_string(),
        hash: hash.to_string(),
        title: format!("Release {}", hash),
        size: 1024,
        seeders: 1,
        magnet_link: format!("magnet:?xt=urn:btih:{}", hash),
        ..Default::default()
    }
}
