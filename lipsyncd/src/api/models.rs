//! API request/response models.

use serde::{Deserialize, Serialize};

use crate::adapters::MediaRef;
use crate::pipeline::{TaskId, TaskInput, TaskOptions};

/// Task submission body.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTaskRequest {
    /// Still portrait image reference.
    pub image_ref: String,
    /// Audio clip reference.
    pub audio_ref: String,
    /// Optional transcript for prosody adjustment.
    #[serde(default)]
    pub text: Option<String>,
    /// Pipeline options; every field has a default.
    #[serde(default)]
    pub options: Option<TaskOptions>,
}

impl SubmitTaskRequest {
    pub fn into_parts(self) -> (TaskInput, TaskOptions) {
        let input = TaskInput {
            image_ref: MediaRef::new(self.image_ref),
            audio_ref: MediaRef::new(self.audio_ref),
            text: self.text,
        };
        (input, self.options.unwrap_or_default())
    }
}

/// The three delivery endpoints for one task, preferred-first.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryEndpoints {
    /// WebSocket push-stream.
    pub stream: String,
    /// Long-lived NDJSON poll stream.
    pub poll: String,
    /// Stateless most-recent-event snapshot.
    pub snapshot: String,
    /// Full retained history.
    pub history: String,
}

impl DeliveryEndpoints {
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            stream: format!("/api/tasks/{task_id}/events/ws"),
            poll: format!("/api/tasks/{task_id}/events/stream"),
            snapshot: format!("/api/tasks/{task_id}/events/latest"),
            history: format!("/api/tasks/{task_id}/events"),
        }
    }
}

/// Response to a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
    pub endpoints: DeliveryEndpoints,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Tasks currently executing.
    pub active_tasks: usize,
    /// Tasks tracked by the broadcaster (active + retained-terminal).
    pub tracked_tasks: usize,
    /// Currently attached observers.
    pub observers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_defaults() {
        let json = r#"{"image_ref": "s3://in/a.png", "audio_ref": "s3://in/a.wav"}"#;
        let request: SubmitTaskRequest = serde_json::from_str(json).unwrap();
        let (input, options) = request.into_parts();
        assert_eq!(input.image_ref.as_str(), "s3://in/a.png");
        assert!(input.text.is_none());
        assert!(options.enable_prosody);
    }

    #[test]
    fn test_endpoints_are_keyed_by_task_id() {
        let task_id = TaskId::generate();
        let endpoints = DeliveryEndpoints::for_task(task_id);
        let id = task_id.to_string();
        assert!(endpoints.stream.contains(&id));
        assert!(endpoints.poll.contains(&id));
        assert!(endpoints.snapshot.contains(&id));
        assert!(endpoints.history.contains(&id));
    }
}
