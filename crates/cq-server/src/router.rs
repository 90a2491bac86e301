//! Route table for the Worker Protocol and board HTTP surface.

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cq_telemetry::middleware::metrics_middleware;
use cq_telemetry::tracing_setup::request_id_middleware;

use crate::state::ApiState;
use crate::{stream, tasks, workers};

pub fn api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/workers/register", post(workers::register))
        .route("/workers/heartbeat", post(workers::heartbeat))
        .route("/workers/tasks/poll", get(workers::poll))
        .route("/workers/tasks/{id}/claim", post(workers::claim))
        .route("/workers/tasks/{id}/progress", post(workers::progress))
        .route("/workers/tasks/{id}/complete", post(workers::complete))
        .route("/workers/tasks/{id}/fail", post(workers::fail))
        .route("/tasks", get(tasks::list))
        .route("/tasks/{id}/cancel", post(tasks::cancel))
        .route("/events/stream", get(stream::stream))
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
