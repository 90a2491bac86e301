//! `/tasks` handlers: list and cancel. Unlike the worker-protocol endpoints,
//! these are called by the browser on behalf of a user, not by a worker
//! acting on a claimed task.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{response::IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::auth::AuthUser;
use crate::dto::task_to_dto;
use crate::state::ApiState;
use crate::workers::parse_status;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub board_id: Option<Uuid>,
    pub status: Option<String>,
    pub card_id: Option<Uuid>,
}

pub async fn list(
    State(state): State<Arc<ApiState>>,
    AuthUser(_user_id): AuthUser,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status {
        Some(s) => Some(parse_status(&s).ok_or_else(|| ApiError::ProtocolError(format!("unknown status `{s}`")))?),
        None => None,
    };

    let tasks = state.coordinator.list(query.board_id, status, query.card_id).await?;
    let dtos: Vec<_> = tasks.iter().map(task_to_dto).collect();
    Ok(Json(dtos))
}

pub async fn cancel(
    State(state): State<Arc<ApiState>>,
    AuthUser(_user_id): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.cancel(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
