//! Indexer sync REST endpoints
//!
//! Requests are only queued here; the `queue-indexer-sync` and
//! `sync-indexer` jobs do the actual work.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::db::{QueryPlanEntry, SyncInfoFilter, SyncRecord};
use crate::indexer::TargetId;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Serialize)]
pub struct SyncRecordResponse {
    pub indexer_id: Uuid,
    pub target_id: String,
    pub queued_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub status: String,
    pub result_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub queries: Vec<QueryPlanEntry>,
}

impl From<SyncRecord> for SyncRecordResponse {
    fn from(record: SyncRecord) -> Self {
        Self {
            error: record.error(),
            indexer_id: record.indexer_id,
            target_id: record.target_id,
            queued_at: record.queued_at,
            synced_at: record.synced_at,
            status: record.status.as_str().to_string(),
            result_count: record.result_count,
            queries: record.plan.into_entries(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SyncListResponse {
    pub items: Vec<SyncRecordResponse>,
    pub total_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct SyncListQuery {
    pub target_id: Option<String>,
    pub indexer_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSyncRequest {
    pub target_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// List sync records, newest first
async fn list_syncs(
    State(state): State<AppState>,
    Query(query): Query<SyncListQuery>,
) -> Result<Json<SyncListResponse>, (StatusCode, Json<ActionResponse>)> {
    let filter = SyncInfoFilter {
        target_id: query.target_id,
        indexer_id: query.indexer_id,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let internal = |e: anyhow::Error| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ActionResponse::error(e.to_string())),
        )
    };

    let items = state
        .sync
        .get_items(&filter, limit, offset)
        .await
        .map_err(internal)?;
    let total_count = state.sync.count_items(&filter).await.map_err(internal)?;

    Ok(Json(SyncListResponse {
        items: items.into_iter().map(Into::into).collect(),
        total_count,
    }))
}

/// Request a sync of one target on every enabled indexer
async fn queue_sync(
    State(state): State<AppState>,
    Json(body): Json<QueueSyncRequest>,
) -> (StatusCode, Json<ActionResponse>) {
    let target_id = body.target_id.trim();
    if let Err(e) = target_id.parse::<TargetId>() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ActionResponse::error(e.to_string())),
        );
    }

    state.sync.queue_job(target_id);
    (StatusCode::ACCEPTED, Json(ActionResponse::ok()))
}

/// Records waiting for the executor, oldest first
async fn pending_syncs(
    State(state): State<AppState>,
) -> Result<Json<Vec<SyncRecordResponse>>, (StatusCode, Json<ActionResponse>)> {
    match state.sync.get_sync_pending().await {
        Ok(records) => Ok(Json(records.into_iter().map(Into::into).collect())),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ActionResponse::error(e.to_string())),
        )),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/indexer-sync", get(list_syncs).post(queue_sync))
        .route("/indexer-sync/pending", get(pending_syncs))
}
