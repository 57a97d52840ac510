//! Resumable, rate-limited synchronization of search results from Torznab indexers.
//!
//! Targets requested through the API are debounced in an in-memory queue,
//! expanded into one query plan per enabled indexer and executed by a
//! periodic, deployment-wide exclusive job. Results end up in `torrent_info`.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod indexer;
pub mod jobs;
pub mod services;

pub use app::AppState;
