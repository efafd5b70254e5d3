//! API route modules.
//!
//! Organizes routes by resource type.

pub mod events;
pub mod health;
pub mod tasks;

use axum::Router;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::pipeline::TaskId;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/tasks", tasks::router().merge(events::router()))
        .nest("/health", health::router())
        .with_state(state)
}

/// Parse a task id path segment.
pub(crate) fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    TaskId::parse(raw).map_err(|_| ApiError::bad_request(format!("invalid task id: {raw}")))
}
