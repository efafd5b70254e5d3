//! Task submission, inspection and cancellation routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};

use crate::api::error::ApiResult;
use crate::api::models::{DeliveryEndpoints, SubmitTaskRequest, SubmitTaskResponse};
use crate::api::routes::parse_task_id;
use crate::api::server::AppState;
use crate::pipeline::Task;
use crate::progress::ProgressEvent;

/// Create the tasks router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_task).get(list_tasks))
        .route("/{id}", delete(cancel_task))
        .route("/{id}/events", get(task_history))
        .route("/{id}/events/latest", get(latest_event))
}

/// Submit a new lip-sync task.
///
/// Validation failures surface immediately as 422; the task never
/// starts. On success the response carries the task id plus the three
/// delivery endpoints keyed by it.
async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitTaskRequest>,
) -> ApiResult<(StatusCode, Json<SubmitTaskResponse>)> {
    let (input, options) = request.into_parts();
    let task_id = state.executor.submit(input, options)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id,
            endpoints: DeliveryEndpoints::for_task(task_id),
        }),
    ))
}

/// List tasks currently executing.
async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.executor.active_tasks()))
}

/// Request cooperative cancellation of a running task.
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let task_id = parse_task_id(&id)?;
    state.executor.cancel(task_id)?;
    Ok(StatusCode::ACCEPTED)
}

/// Most recent event for a task, for stateless pollers.
async fn latest_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProgressEvent>> {
    let task_id = parse_task_id(&id)?;
    let event = state.broadcaster.latest(task_id)?;
    Ok(Json(event))
}

/// Full retained event history for a task.
async fn task_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ProgressEvent>>> {
    let task_id = parse_task_id(&id)?;
    let events = state.broadcaster.history(task_id)?;
    Ok(Json(events))
}
