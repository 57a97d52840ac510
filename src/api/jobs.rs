//! Job inspection and control endpoints

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::services::scheduler::JobStatus;

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct JobActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn unknown_job(id: &str) -> (StatusCode, Json<JobActionResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(JobActionResponse {
            success: false,
            error: Some(format!("Unknown job: {}", id)),
        }),
    )
}

/// Every registered job with its last persisted run
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobStatus>> {
    Json(state.registry.list().await)
}

/// Start a run in the background; the outcome shows up in the job list
async fn trigger_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<JobActionResponse>) {
    match state.registry.trigger(&id) {
        Some(_) => (
            StatusCode::ACCEPTED,
            Json(JobActionResponse {
                success: true,
                error: None,
            }),
        ),
        None => unknown_job(&id),
    }
}

async fn set_job_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetEnabledRequest>,
) -> (StatusCode, Json<JobActionResponse>) {
    if state.registry.set_enabled(&id, body.enabled) {
        (
            StatusCode::OK,
            Json(JobActionResponse {
                success: true,
                error: None,
            }),
        )
    } else {
        unknown_job(&id)
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}/trigger", post(trigger_job))
        .route("/jobs/{id}/enabled", post(set_job_enabled))
}
