//! Per (indexer, target) sync state: the persisted query plan and its progress
//!
//! A record is created by [SyncInfoRepository::queue] and then advanced one
//! query at a time by [SyncInfoRepository::record_progress]. Status, result
//! count and the aggregated error are all derived from the plan, so the stored
//! `status` column can never disagree with the entries it summarizes.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::sqlite_helpers::{
    datetime_to_str, decode_err, from_json, now_iso8601, str_to_datetime_opt, str_to_uuid,
    to_json, uuid_to_str,
};
use crate::services::cache::SharedCache;

type DbPool = SqlitePool;

/// How long a synced record stays fresh before a re-queue makes it pending again
pub const STALE_AFTER: Duration = Duration::hours(24);

/// How long repeated `queue` calls for the same pair are absorbed in memory
pub const QUEUE_DEDUP_WINDOW: std::time::Duration = std::time::Duration::from_secs(3 * 60 * 60);

/// Maximum number of pairs remembered by the queue dedup cache
pub const QUEUE_DEDUP_CAPACITY: usize = 2048;

/// One search in a query plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlanEntry {
    /// URL-encoded search parameters (`t=movie&imdbid=...`)
    pub query: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub count: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Whether the query targets the exact item (e.g. by IMDb id) rather than a title match
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exact: bool,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl QueryPlanEntry {
    pub fn new(query: impl Into<String>, exact: bool) -> Self {
        Self {
            query: query.into(),
            exact,
            ..Default::default()
        }
    }

    /// Mark the entry as successfully executed
    pub fn complete(&mut self, count: usize) {
        self.done = true;
        self.count = count as i64;
        self.error.clear();
    }

    /// Record a failure; the entry stays pending and is retried next run
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = error.to_string();
    }
}

/// Ordered sequence of queries for one (indexer, target) pair.
///
/// Entries are only ever updated in place, so indexes are stable across
/// persists and can be used to report errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryPlan(Vec<QueryPlanEntry>);

impl QueryPlan {
    pub fn new(entries: Vec<QueryPlanEntry>) -> Self {
        Self(entries)
    }

    /// `synced` when every entry is done, `queued` when none is, `syncing` otherwise.
    /// An empty plan has nothing left to do and counts as synced.
    pub fn status(&self) -> SyncStatus {
        let all_done = self.0.iter().all(|e| e.done);
        let some_done = self.0.iter().any(|e| e.done);

        if all_done {
            SyncStatus::Synced
        } else if some_done {
            SyncStatus::Syncing
        } else {
            SyncStatus::Queued
        }
    }

    /// Sum of entry counts, absent while nothing has run yet
    pub fn result_count(&self) -> Option<i64> {
        match self.status() {
            SyncStatus::Queued => None,
            _ => Some(self.0.iter().map(|e| e.count).sum()),
        }
    }

    /// Every entry error as `"{index}: {error}"`, newline-joined
    pub fn error(&self) -> Option<String> {
        let lines: Vec<String> = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.error.is_empty())
            .map(|(i, e)| format!("{}: {}", i, e.error))
            .collect();

        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// Reset progress and errors on every entry, keeping queries and their order.
    /// A re-queued plan shows no stale errors from the previous sync.
    pub fn clean(&mut self) {
        for entry in &mut self.0 {
            entry.done = false;
            entry.count = 0;
            entry.error.clear();
        }
    }

    pub fn into_entries(self) -> Vec<QueryPlanEntry> {
        self.0
    }
}

impl Deref for QueryPlan {
    type Target = [QueryPlanEntry];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for QueryPlan {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<QueryPlanEntry>> for QueryPlan {
    fn from(entries: Vec<QueryPlanEntry>) -> Self {
        Self(entries)
    }
}

/// Derived sync status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Queued,
    Syncing,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Queued => "queued",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(SyncStatus::Queued),
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            _ => Err(anyhow!("Unknown sync status: {}", s)),
        }
    }
}

/// Sync record from database
#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub indexer_id: Uuid,
    pub target_id: String,
    pub queued_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub result_count: Option<i64>,
    pub plan: QueryPlan,
}

impl SyncRecord {
    /// Aggregated entry errors (see [QueryPlan::error])
    pub fn error(&self) -> Option<String> {
        self.plan.error()
    }

    /// Whether the pair needs a (re-)sync as of `now`
    pub fn should_sync_at(&self, now: DateTime<Utc>) -> bool {
        let Some(synced_at) = self.synced_at else {
            return true;
        };
        if let Some(queued_at) = self.queued_at {
            if queued_at <= synced_at {
                return false;
            }
        }
        synced_at + STALE_AFTER < now
    }
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for SyncRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let indexer_id_str: String = row.try_get("indexer_id")?;
        let queued_str: Option<String> = row.try_get("queued_at")?;
        let synced_str: Option<String> = row.try_get("synced_at")?;
        let status_str: String = row.try_get("status")?;
        let queries_str: String = row.try_get("queries")?;

        Ok(Self {
            indexer_id: str_to_uuid(&indexer_id_str).map_err(decode_err)?,
            target_id: row.try_get("target_id")?,
            queued_at: str_to_datetime_opt(queued_str.as_deref()).map_err(decode_err)?,
            synced_at: str_to_datetime_opt(synced_str.as_deref()).map_err(decode_err)?,
            status: status_str.parse().map_err(decode_err)?,
            result_count: row.try_get("result_count")?,
            plan: from_json(&queries_str).map_err(decode_err)?,
        })
    }
}

/// Listing filter for observability queries
#[derive(Debug, Clone, Default)]
pub struct SyncInfoFilter {
    pub target_id: Option<String>,
    pub indexer_id: Option<Uuid>,
}

impl SyncInfoFilter {
    fn where_clause(&self) -> String {
        let mut conditions = vec!["queued_at IS NOT NULL".to_string()];
        if self.target_id.is_some() {
            conditions.push("target_id = ?".to_string());
        }
        if self.indexer_id.is_some() {
            conditions.push("indexer_id = ?".to_string());
        }
        conditions.join(" AND ")
    }
}

const COLUMNS: &str =
    "indexer_id, target_id, queued_at, synced_at, status, result_count, queries";

/// Queued, and either never synced or re-queued after a sync that has gone stale
const PENDING_CONDITION: &str =
    "queued_at IS NOT NULL AND (synced_at IS NULL OR (queued_at > synced_at AND synced_at <= ?))";

pub struct SyncInfoRepository {
    pool: DbPool,
    queued: SharedCache<()>,
}

impl SyncInfoRepository {
    /// `queued` remembers recently queued pairs; share one instance across
    /// repository handles so the dedup window holds process-wide.
    pub fn new(pool: DbPool, queued: SharedCache<()>) -> Self {
        Self { pool, queued }
    }

    /// Queue a (re-)sync of `target_id` on `indexer_id` with the given plan.
    ///
    /// Existing `synced` records get a fresh `queued_at`, status `queued` and a
    /// cleaned copy of the plan; `synced_at` is left as is so staleness still
    /// applies. Records still `queued` or `syncing` keep their plan, progress
    /// and queue position.
    pub async fn queue(&self, indexer_id: Uuid, target_id: &str, mut plan: QueryPlan) -> Result<()> {
        if target_id.is_empty() {
            warn!(indexer_id = %indexer_id, "Refusing to queue sync for empty target id");
            return Ok(());
        }

        let cache_key = format!("{}:{}", indexer_id, target_id);
        if self.queued.contains(&cache_key) {
            debug!(indexer_id = %indexer_id, target_id = %target_id, "Sync recently queued, skipping");
            return Ok(());
        }

        plan.clean();

        sqlx::query(
            r#"
            INSERT INTO indexer_sync_info (indexer_id, target_id, queued_at, synced_at, status, result_count, queries)
            VALUES (?, ?, ?, NULL, ?, NULL, ?)
            ON CONFLICT(indexer_id, target_id) DO UPDATE SET
                queued_at = excluded.queued_at,
                status = excluded.status,
                result_count = NULL,
                queries = excluded.queries
            WHERE indexer_sync_info.status = 'synced'
            "#,
        )
        .bind(uuid_to_str(indexer_id))
        .bind(target_id)
        .bind(now_iso8601())
        .bind(SyncStatus::Queued.as_str())
        .bind(to_json(&plan))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to queue sync for {}", cache_key))?;

        self.queued.set(cache_key, ());
        Ok(())
    }

    /// Persist the current plan together with its derived status and count.
    /// Reaching `synced` stamps `synced_at` in the same statement.
    pub async fn record_progress(
        &self,
        indexer_id: Uuid,
        target_id: &str,
        plan: &QueryPlan,
    ) -> Result<()> {
        let status = plan.status();

        let sql = if status == SyncStatus::Synced {
            "UPDATE indexer_sync_info SET result_count = ?, status = ?, queries = ?, synced_at = ? \
             WHERE indexer_id = ? AND target_id = ?"
        } else {
            "UPDATE indexer_sync_info SET result_count = ?, status = ?, queries = ? \
             WHERE indexer_id = ? AND target_id = ?"
        };

        let mut query = sqlx::query(sql)
            .bind(plan.result_count())
            .bind(status.as_str())
            .bind(to_json(plan));
        if status == SyncStatus::Synced {
            query = query.bind(now_iso8601());
        }

        query
            .bind(uuid_to_str(indexer_id))
            .bind(target_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to record progress for {}:{}", indexer_id, target_id))?;

        Ok(())
    }

    /// Get a single record
    pub async fn get(&self, indexer_id: Uuid, target_id: &str) -> Result<Option<SyncRecord>> {
        let record = sqlx::query_as::<_, SyncRecord>(&format!(
            "SELECT {} FROM indexer_sync_info WHERE indexer_id = ? AND target_id = ?",
            COLUMNS
        ))
        .bind(uuid_to_str(indexer_id))
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Whether the pair needs a sync: no record, never synced, or re-queued
    /// after a sync older than [STALE_AFTER]
    pub async fn should_sync(&self, indexer_id: Uuid, target_id: &str) -> Result<bool> {
        Ok(match self.get(indexer_id, target_id).await? {
            Some(record) => record.should_sync_at(Utc::now()),
            None => true,
        })
    }

    /// All records waiting to be executed, oldest `queued_at` first
    pub async fn get_pending(&self) -> Result<Vec<SyncRecord>> {
        let records = sqlx::query_as::<_, SyncRecord>(&format!(
            "SELECT {} FROM indexer_sync_info WHERE {} ORDER BY queued_at ASC",
            COLUMNS, PENDING_CONDITION
        ))
        .bind(stale_cutoff())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pending syncs")?;

        Ok(records)
    }

    /// Cheap existence check for [get_pending](Self::get_pending)
    pub async fn has_pending(&self) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT 1 FROM indexer_sync_info WHERE {} LIMIT 1",
            PENDING_CONDITION
        ))
        .bind(stale_cutoff())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// List records, newest `queued_at` first
    pub async fn get_items(
        &self,
        filter: &SyncInfoFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {} FROM indexer_sync_info WHERE {} ORDER BY queued_at DESC LIMIT ? OFFSET ?",
            COLUMNS,
            filter.where_clause()
        );

        let mut query = sqlx::query_as::<_, SyncRecord>(&sql);
        if let Some(ref target_id) = filter.target_id {
            query = query.bind(target_id.clone());
        }
        if let Some(indexer_id) = filter.indexer_id {
            query = query.bind(uuid_to_str(indexer_id));
        }

        let records = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        Ok(records)
    }

    /// Count records matching the filter
    pub async fn count_items(&self, filter: &SyncInfoFilter) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(1) FROM indexer_sync_info WHERE {}",
            filter.where_clause()
        );

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(ref target_id) = filter.target_id {
            query = query.bind(target_id.clone());
        }
        if let Some(indexer_id) = filter.indexer_id {
            query = query.bind(uuid_to_str(indexer_id));
        }

        Ok(query.fetch_one(&self.pool).await?)
    }
}

fn stale_cutoff() -> String {
    datetime_to_str(Utc::now() - STALE_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::cache::create_cache;
    use pretty_assertions::assert_eq;

    fn plan(queries: &[&str]) -> QueryPlan {
        QueryPlan::new(queries.iter().map(|q| QueryPlanEntry::new(*q, false)).collect())
    }

    /// Repository without queue dedup so tests can re-queue immediately
    fn repo(db: &Database) -> SyncInfoRepository {
        SyncInfoRepository::new(db.pool().clone(), create_cache(std::time::Duration::ZERO, 16))
    }

    async fn set_timestamps(
        db: &Database,
        indexer_id: Uuid,
        target_id: &str,
        queued_at: DateTime<Utc>,
        synced_at: Option<DateTime<Utc>>,
    ) {
        sqlx::query(
            "UPDATE indexer_sync_info SET queued_at = ?, synced_at = ? WHERE indexer_id = ? AND target_id = ?",
        )
        .bind(datetime_to_str(queued_at))
        .bind(synced_at.map(datetime_to_str))
        .bind(uuid_to_str(indexer_id))
        .bind(target_id)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[test]
    fn test_status_derivation() {
        let mut p = plan(&["t=search&q=a", "t=search&q=b"]);
        assert_eq!(p.status(), SyncStatus::Queued);
        assert_eq!(p.result_count(), None);

        p[0].complete(2);
        assert_eq!(p.status(), SyncStatus::Syncing);
        assert_eq!(p.result_count(), Some(2));

        p[1].complete(3);
        assert_eq!(p.status(), SyncStatus::Synced);
        assert_eq!(p.result_count(), Some(5));

        assert_eq!(QueryPlan::default().status(), SyncStatus::Synced);
    }

    #[test]
    fn test_error_aggregation() {
        let mut p = plan(&["a=1", "a=2", "a=3"]);
        assert_eq!(p.error(), None);

        p[0].fail("timeout");
        p[2].fail("HTTP 500");
        assert_eq!(p.error().as_deref(), Some("0: timeout\n2: HTTP 500"));

        p[0].complete(1);
        assert_eq!(p.error().as_deref(), Some("2: HTTP 500"));
    }

    #[test]
    fn test_plan_json_shape() {
        let mut p = plan(&["t=movie&imdbid=1234567"]);
        p[0].exact = true;
        let json = to_json(&p);
        assert_eq!(json, r#"[{"query":"t=movie&imdbid=1234567","exact":true}]"#);

        let parsed: QueryPlan = from_json(&json).unwrap();
        assert_eq!(parsed, p);
    }

    #[tokio::test]
    async fn test_queue_creates_queued_record() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);
        let indexer_id = Uuid::new_v4();

        repo.queue(indexer_id, "tt0111161", plan(&["t=search&q=x"])).await.unwrap();

        let record = repo.get(indexer_id, "tt0111161").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Queued);
        assert!(record.queued_at.is_some());
        assert!(record.synced_at.is_none());
        assert_eq!(record.result_count, None);
        assert_eq!(record.plan.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_ignores_empty_target() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);

        repo.queue(Uuid::new_v4(), "", plan(&["q=x"])).await.unwrap();
        assert_eq!(repo.count_items(&SyncInfoFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_round_trips_through_record_progress() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);
        let indexer_id = Uuid::new_v4();
        let mut p = plan(&["q=a", "q=b"]);
        repo.queue(indexer_id, "tt1", p.clone()).await.unwrap();

        p[0].complete(4);
        repo.record_progress(indexer_id, "tt1", &p).await.unwrap();
        let record = repo.get(indexer_id, "tt1").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Syncing);
        assert_eq!(record.status, record.plan.status());
        assert!(record.synced_at.is_none());

        p[1].complete(0);
        repo.record_progress(indexer_id, "tt1", &p).await.unwrap();
        let record = repo.get(indexer_id, "tt1").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
        assert_eq!(record.plan, p);
        assert_eq!(record.result_count, Some(4));
        assert!(record.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_requeue_resets_entries_but_keeps_synced_at() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);
        let indexer_id = Uuid::new_v4();
        let mut p = plan(&["q=a", "q=b"]);
        repo.queue(indexer_id, "tt2", p.clone()).await.unwrap();

        p[0].complete(1);
        p[1].complete(2);
        repo.record_progress(indexer_id, "tt2", &p).await.unwrap();
        let synced = repo.get(indexer_id, "tt2").await.unwrap().unwrap();
        let synced_at = synced.synced_at.unwrap();

        let mut requeued_plan = p.clone();
        requeued_plan[1].fail("stale error");
        repo.queue(indexer_id, "tt2", requeued_plan).await.unwrap();

        let record = repo.get(indexer_id, "tt2").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Queued);
        assert_eq!(record.result_count, None);
        assert_eq!(record.synced_at, Some(synced_at));
        assert!(record.queued_at.unwrap() >= synced.queued_at.unwrap());
        assert!(record.plan.iter().all(|e| !e.done && e.count == 0 && e.error.is_empty()));
        assert_eq!(record.plan[0].query, "q=a");
        assert_eq!(record.plan[1].query, "q=b");
    }

    #[tokio::test]
    async fn test_requeue_keeps_in_progress_record() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);
        let indexer_id = Uuid::new_v4();
        let mut p = plan(&["q=a", "q=b"]);
        repo.queue(indexer_id, "tt5", p.clone()).await.unwrap();

        p[0].complete(3);
        p[1].fail("HTTP 503");
        repo.record_progress(indexer_id, "tt5", &p).await.unwrap();
        let before = repo.get(indexer_id, "tt5").await.unwrap().unwrap();
        assert_eq!(before.status, SyncStatus::Syncing);

        repo.queue(indexer_id, "tt5", plan(&["q=a", "q=b", "q=c"])).await.unwrap();

        let after = repo.get(indexer_id, "tt5").await.unwrap().unwrap();
        assert_eq!(after.status, SyncStatus::Syncing);
        assert_eq!(after.queued_at, before.queued_at);
        assert_eq!(after.result_count, Some(3));
        assert_eq!(after.plan, p);
        assert!(after.plan[0].done);
    }

    #[tokio::test]
    async fn test_queue_dedup_window_absorbs_repeats() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = SyncInfoRepository::new(
            db.pool().clone(),
            create_cache(QUEUE_DEDUP_WINDOW, QUEUE_DEDUP_CAPACITY),
        );
        let indexer_id = Uuid::new_v4();

        repo.queue(indexer_id, "tt3", plan(&["q=first"])).await.unwrap();
        repo.queue(indexer_id, "tt3", plan(&["q=second", "q=third"])).await.unwrap();

        let record = repo.get(indexer_id, "tt3").await.unwrap().unwrap();
        assert_eq!(record.plan.len(), 1);
        assert_eq!(record.plan[0].query, "q=first");
    }

    #[tokio::test]
    async fn test_should_sync_transitions() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);
        let indexer_id = Uuid::new_v4();
        let now = Utc::now();

        // no record
        assert!(repo.should_sync(indexer_id, "tt4").await.unwrap());

        // queued, never synced
        repo.queue(indexer_id, "tt4", plan(&["q=a"])).await.unwrap();
        assert!(repo.should_sync(indexer_id, "tt4").await.unwrap());

        // synced after the last queue
        set_timestamps(&db, indexer_id, "tt4", now - Duration::hours(2), Some(now - Duration::hours(1))).await;
        assert!(!repo.should_sync(indexer_id, "tt4").await.unwrap());

        // re-queued after a fresh sync
        set_timestamps(&db, indexer_id, "tt4", now, Some(now - Duration::hours(1))).await;
        assert!(!repo.should_sync(indexer_id, "tt4").await.unwrap());

        // re-queued after a stale sync
        set_timestamps(&db, indexer_id, "tt4", now, Some(now - Duration::hours(25))).await;
        assert!(repo.should_sync(indexer_id, "tt4").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_pending_predicate_and_order() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);
        let indexer_id = Uuid::new_v4();
        let now = Utc::now();

        for target in ["never-synced", "fresh", "stale", "synced"] {
            repo.queue(indexer_id, target, plan(&["q=a"])).await.unwrap();
        }
        set_timestamps(&db, indexer_id, "never-synced", now - Duration::hours(3), None).await;
        set_timestamps(&db, indexer_id, "fresh", now, Some(now - Duration::hours(1))).await;
        set_timestamps(&db, indexer_id, "stale", now - Duration::hours(1), Some(now - Duration::hours(30))).await;
        set_timestamps(&db, indexer_id, "synced", now - Duration::hours(2), Some(now - Duration::hours(1))).await;

        let pending = repo.get_pending().await.unwrap();
        let targets: Vec<&str> = pending.iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(targets, vec!["never-synced", "stale"]);
        assert!(repo.has_pending().await.unwrap());

        for target in ["never-synced", "stale"] {
            set_timestamps(&db, indexer_id, target, now - Duration::hours(2), Some(now)).await;
        }
        assert!(repo.get_pending().await.unwrap().is_empty());
        assert!(!repo.has_pending().await.unwrap());
    }

    #[tokio::test]
    async fn test_get_items_filters_and_pagination() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = repo(&db);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let now = Utc::now();

        repo.queue(first, "tt10", plan(&["q=a"])).await.unwrap();
        repo.queue(first, "tt11", plan(&["q=a"])).await.unwrap();
        repo.queue(second, "tt10", plan(&["q=a"])).await.unwrap();
        set_timestamps(&db, first, "tt10", now - Duration::minutes(3), None).await;
        set_timestamps(&db, first, "tt11", now - Duration::minutes(2), None).await;
        set_timestamps(&db, second, "tt10", now - Duration::minutes(1), None).await;

        let all = repo.get_items(&SyncInfoFilter::default(), 10, 0).await.unwrap();
        let order: Vec<(Uuid, &str)> = all.iter().map(|r| (r.indexer_id, r.target_id.as_str())).collect();
        assert_eq!(order, vec![(second, "tt10"), (first, "tt11"), (first, "tt10")]);

        let by_target = SyncInfoFilter {
            target_id: Some("tt10".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.count_items(&by_target).await.unwrap(), 2);

        let by_both = SyncInfoFilter {
            target_id: Some("tt10".to_string()),
            indexer_id: Some(first),
        };
        let items = repo.get_items(&by_both, 10, 0).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].indexer_id, first);

        let page = repo.get_items(&SyncInfoFilter::default(), 1, 1).await.unwrap();
        assert_eq!(page[0].target_id, "tt11");
        assert_eq!(repo.count_items(&SyncInfoFilter::default()).await.unwrap(), 3);
    }
}
