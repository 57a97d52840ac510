//! API route definitions
//!
//! Health probes live at the root, everything else under /api.

pub mod health;
pub mod indexer_sync;
pub mod jobs;
