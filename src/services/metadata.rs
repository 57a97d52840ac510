//! Titles and release year of sync targets, used to build search queries

use anyhow::Result;
use async_trait::async_trait;

use crate::db::Database;
use crate::indexer::TargetId;

/// What is known about a target when planning its queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMetadata {
    pub target: TargetId,
    /// Distinct titles to search for, primary title first
    pub titles: Vec<String>,
    pub year: Option<i32>,
}

impl TargetMetadata {
    /// Metadata with nothing but the id, for targets missing from the catalogue
    pub fn bare(target: TargetId) -> Self {
        Self {
            target,
            titles: Vec::new(),
            year: None,
        }
    }
}

#[async_trait]
pub trait TargetMetadataResolver: Send + Sync {
    async fn resolve(&self, target: &TargetId) -> Result<TargetMetadata>;
}

/// Looks targets up in the local `media_titles` table
pub struct DbTitleResolver {
    db: Database,
}

impl DbTitleResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TargetMetadataResolver for DbTitleResolver {
    async fn resolve(&self, target: &TargetId) -> Result<TargetMetadata> {
        let Some(record) = self.db.media_titles().get(target.imdb_id()).await? else {
            return Ok(TargetMetadata::bare(target.clone()));
        };

        let mut titles = vec![record.title.clone()];
        if let Some(original) = record.original_title.filter(|t| !t.is_empty()) {
            if !original.eq_ignore_ascii_case(&record.title) {
                titles.push(original);
            }
        }

        Ok(TargetMetadata {
            target: target.clone(),
            titles,
            year: record.year,
        })
    }
}
