//! HTTP API error types.
//!
//! Provides a unified `ApiError` enum for consistent error responses across
//! the HTTP API layer. Implements Axum's `IntoResponse` trait to automatically
//! convert errors into appropriate HTTP responses, and a `From<CoreError>`
//! impl so handlers can just `?` on store/service calls.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use cq_core::error::CoreError;

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            CoreError::Forbidden(msg) => ApiError::Forbidden(msg),
            CoreError::RateLimited(msg) => ApiError::RateLimited(msg),
            CoreError::Storage(msg) => ApiError::StorageError(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::StorageError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::ProtocolError(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_contains(response: Response, needle: &str) -> bool {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap().contains(needle)
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let response = ApiError::NotFound("task not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_contains(response, "task not found").await);
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let response = ApiError::Conflict("already claimed".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rate_limited_maps_to_429() {
        let response = ApiError::RateLimited("poll too frequent".into()).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn storage_error_maps_to_500() {
        let response = ApiError::StorageError("database connection failed".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_contains(response, "database connection failed").await);
    }

    #[test]
    fn core_error_conflict_converts_to_api_conflict() {
        let api_err: ApiError = CoreError::Conflict("task already claimed".into()).into();
        assert!(matches!(api_err, ApiError::Conflict(_)));
    }
}
