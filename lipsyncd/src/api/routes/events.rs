//! Real-time progress delivery routes.
//!
//! Two transports over the same broadcaster `attach` capability: a
//! WebSocket push-stream (preferred) and a long-lived NDJSON poll
//! stream. Both replay retained history first, then stream live events,
//! and end after the terminal event or an eviction notice. The stateless
//! snapshot transport lives with the task routes.

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::header,
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::parse_task_id;
use crate::api::server::AppState;
use crate::progress::{ObserverHandle, ProgressBroadcaster};

/// Create the event delivery router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/events/ws", get(event_push_stream))
        .route("/{id}/events/stream", get(event_poll_stream))
}

/// WebSocket push-stream handler.
///
/// Attaches before upgrading so unknown or evicted task ids fail with a
/// proper 404 instead of a dead socket. Each event is one JSON text
/// frame; broadcaster heartbeats double as keepalive frames.
async fn event_push_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let task_id = parse_task_id(&id)?;
    let observer = state.broadcaster.attach(task_id)?;
    let broadcaster = state.broadcaster.clone();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, observer, broadcaster)))
}

/// Handle an established WebSocket connection.
async fn handle_socket(
    socket: WebSocket,
    mut observer: ObserverHandle,
    broadcaster: Arc<ProgressBroadcaster>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Client frames: only liveness traffic and close are expected.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(task_id = %observer.task_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }

            event = observer.recv() => {
                match event {
                    Some(event) => {
                        let frame = match serde_json::to_string(&event) {
                            Ok(frame) => frame,
                            Err(e) => {
                                debug!(error = %e, "failed to encode event frame");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            debug!(task_id = %observer.task_id, "client gone, closing stream");
                            break;
                        }
                        if event.is_terminal() {
                            break;
                        }
                    }
                    // Queue dropped for falling behind, or task evicted.
                    None => break,
                }
            }
        }
    }

    broadcaster.detach(&observer);
    let _ = sender.close().await;
}

/// Long-lived poll handler: chunked NDJSON over the same attach
/// capability, one record per event.
async fn event_poll_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let task_id = parse_task_id(&id)?;
    let observer = state.broadcaster.attach(task_id)?;

    let stream = futures::stream::unfold((observer, false), |(mut observer, done)| async move {
        if done {
            return None;
        }
        let event = observer.recv().await?;
        let mut line = serde_json::to_vec(&event).ok()?;
        line.push(b'\n');
        let terminal = event.is_terminal();
        Some((
            Ok::<_, std::convert::Infallible>(Bytes::from(line)),
            (observer, terminal),
        ))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::internal(format!("failed to build stream response: {e}")))
}
