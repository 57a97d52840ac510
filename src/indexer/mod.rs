//! Torznab indexer module
//!
//! # Architecture
//!
//! - `Indexer` trait: abstraction over a remote indexer
//! - `IndexerManager`: builds clients from the `indexers` table and hands
//!   out their rate limiters
//! - `types`: Torznab-compatible query, capability and result types
//! - `target`: identifiers of the things being synchronized
//! - `torznab`: HTTP client for Jackett-style Torznab endpoints

pub mod manager;
pub mod target;
pub mod torznab;
pub mod types;

pub use manager::{IndexerCatalog, IndexerManager};
pub use target::{TargetId, TorrentCategory};
pub use types::{
    QueryType, SearchParam, SearchingItem, TorrentFile, TorznabCapabilities, TorznabQuery,
    TorznabResult,
};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Core trait for all indexer implementations
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Database id of the indexer
    fn id(&self) -> Uuid;

    /// Display name for the indexer
    fn name(&self) -> &str;

    /// Fetch the search functions and parameters the indexer supports
    async fn capabilities(&self) -> Result<TorznabCapabilities>;

    /// Run a search
    async fn search(&self, query: &TorznabQuery) -> Result<Vec<TorznabResult>>;
}
