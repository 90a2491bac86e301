//! Worker Protocol handlers: register, heartbeat, poll, claim, progress,
//! complete, fail.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, response::IntoResponse};
use uuid::Uuid;

use cq_api_types::{
    ClaimRequest, CompleteRequest, FailRequest, HeartbeatRequest, HeartbeatResponse, PollQuery,
    PollResponse, ProgressRequest, RegisterRequest, RegisterResponse,
};
use cq_core::types::TaskStatus;

use crate::api_error::ApiError;
use crate::auth::AuthUser;
use crate::dto::task_to_dto;
use crate::state::ApiState;

pub async fn register(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let worker = state
        .registry
        .register(user_id, req.hostname, req.version, req.capabilities, req.max_concurrent_tasks)
        .await?;
    Ok(Json(RegisterResponse {
        worker_id: worker.id,
        status: "online".to_string(),
    }))
}

pub async fn heartbeat(
    State(state): State<Arc<ApiState>>,
    AuthUser(_user_id): AuthUser,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let cancel_task_ids = state.registry.heartbeat(req.worker_id, &req.running_task_ids).await?;
    Ok(Json(HeartbeatResponse { cancel_task_ids }))
}

pub async fn poll(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollResponse>, ApiError> {
    state
        .poll_limiter
        .check(&query.worker_id.to_string())
        .map_err(|e| ApiError::RateLimited(e.to_string()))?;

    let tasks = state.store.list_pending_for_user(user_id, query.limit).await?;
    Ok(Json(PollResponse {
        tasks: tasks.iter().map(task_to_dto).collect(),
    }))
}

pub async fn claim(
    State(state): State<Arc<ApiState>>,
    AuthUser(_user_id): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(req): Json<ClaimRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.coordinator.claim(task_id, req.worker_id).await?;
    Ok((StatusCode::OK, Json(task_to_dto(&task))))
}

pub async fn progress(
    State(state): State<Arc<ApiState>>,
    AuthUser(_user_id): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.coordinator.progress(task_id, req.worker_id, req.progress).await?;
    Ok((StatusCode::OK, Json(task_to_dto(&task))))
}

pub async fn complete(
    State(state): State<Arc<ApiState>>,
    AuthUser(_user_id): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(req): Json<CompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.coordinator.complete(task_id, req.worker_id, req.output_text).await?;
    Ok((StatusCode::OK, Json(task_to_dto(&task))))
}

pub async fn fail(
    State(state): State<Arc<ApiState>>,
    AuthUser(_user_id): AuthUser,
    Path(task_id): Path<Uuid>,
    Json(req): Json<FailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .coordinator
        .fail(task_id, req.worker_id, req.error_summary, req.output_text)
        .await?;
    Ok((StatusCode::OK, Json(task_to_dto(&task))))
}

/// Used by `/tasks` list/cancel handlers too; kept here since both modules
/// need to agree on the `status` query string → `TaskStatus` mapping.
pub fn parse_status(s: &str) -> Option<TaskStatus> {
    match s {
        "pending" => Some(TaskStatus::Pending),
        "claimed" => Some(TaskStatus::Claimed),
        "running" => Some(TaskStatus::Running),
        "completed" => Some(TaskStatus::Completed),
        "failed" => Some(TaskStatus::Failed),
        "cancelled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}
