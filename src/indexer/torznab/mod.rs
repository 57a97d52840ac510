//! Torznab HTTP client
//!
//! Talks to Jackett-style Torznab endpoints (`{url}/api?apikey=..&t=..`).

pub mod response;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::indexer::{Indexer, TorznabCapabilities, TorznabQuery, TorznabResult};

/// Torznab indexer reached over HTTP
pub struct TorznabClient {
    id: Uuid,
    name: String,
    /// API base URL (e.g., "http://jackett:9117/api/v2.0/indexers/all/results/torznab")
    api_url: String,
    api_key: String,
    client: Client,
}

impl TorznabClient {
    pub fn new(id: Uuid, name: String, api_url: &str, api_key: &str) -> Result<Self> {
        if api_url.is_empty() {
            return Err(anyhow!("API URL is required for Torznab indexer"));
        }

        let client = Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            id,
            name,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    /// Build the API URL with query parameters
    fn build_api_url(&self, params: &[(&str, String)]) -> Result<String> {
        let mut url = url::Url::parse(&format!("{}/api", self.api_url))
            .with_context(|| format!("Invalid indexer URL: {}", self.api_url))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("apikey", &self.api_key);
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    async fn fetch(&self, params: &[(&str, String)]) -> Result<String> {
        let url = self.build_api_url(params)?;

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Request failed: HTTP {}", response.status()));
        }

        let body = response.text().await?;
        if let Some(message) = response::parse_error(&body) {
            return Err(anyhow!("API error: {}", message));
        }

        Ok(body)
    }
}

#[async_trait]
impl Indexer for TorznabClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn capabilities(&self) -> Result<TorznabCapabilities> {
        let body = self.fetch(&[("t", "caps".to_string())]).await?;
        response::parse_capabilities(&body)
    }

    async fn search(&self, query: &TorznabQuery) -> Result<Vec<TorznabResult>> {
        debug!(
            indexer_name = %self.name,
            query = %query,
            "Searching Torznab indexer"
        );

        let body = self.fetch(&query.params()).await?;
        let results = response::parse_results(&body, &self.name)?;

        info!(
            indexer_name = %self.name,
            results_found = results.len(),
            "Torznab search complete"
        );

        Ok(results)
    }
}
