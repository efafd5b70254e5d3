//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

use crate::api::error::ApiResult;
use crate::api::models::HealthResponse;
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness_check))
        .route("/ready", get(readiness_check))
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_tasks: state.executor.active_count(),
        tracked_tasks: state.broadcaster.task_count(),
        observers: state.broadcaster.observer_count(),
    }))
}

/// Liveness check - is the process responsive?
async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}

/// Readiness check - is the service ready to accept traffic?
async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}
