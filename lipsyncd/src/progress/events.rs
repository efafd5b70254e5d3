//! Progress event model.
//!
//! One immutable record per task transition, flowing from the executor
//! through the broadcaster to every attached observer. Constructors
//! derive the progress value from the stage's band, so an event outside
//! [0, 100] ∪ {-1} cannot be built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::{FAILED_PROGRESS, Stage, TaskId};

/// Event kinds carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StageUpdate,
    ProgressUpdate,
    Error,
    Complete,
    Heartbeat,
}

/// Stable failure detail carried by terminal `Error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Final result carried by the `Complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub video_url: String,
}

/// One immutable progress update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub kind: EventKind,
    pub stage: Stage,
    /// 0..=100, or -1 on failure.
    pub progress: i8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn base(task_id: TaskId, kind: EventKind, stage: Stage, progress: i8, message: String) -> Self {
        Self {
            task_id,
            kind,
            stage,
            progress,
            message,
            metadata: Map::new(),
            error: None,
            result: None,
            timestamp: Utc::now(),
        }
    }

    /// Stage entered; progress sits at the stage's lower bound.
    pub fn stage_entered(task_id: TaskId, stage: Stage) -> Self {
        Self::base(
            task_id,
            EventKind::StageUpdate,
            stage,
            stage.spec().lower,
            format!("{stage} started"),
        )
    }

    /// Stage finished; progress jumps to the stage's upper bound.
    pub fn stage_completed(task_id: TaskId, stage: Stage) -> Self {
        Self::base(
            task_id,
            EventKind::ProgressUpdate,
            stage,
            stage.spec().upper,
            format!("{stage} finished"),
        )
    }

    /// Optional stage skipped; single jump to the upper bound with a
    /// `skipped` marker.
    pub fn stage_skipped(task_id: TaskId, stage: Stage, reason: &str) -> Self {
        let mut event = Self::base(
            task_id,
            EventKind::ProgressUpdate,
            stage,
            stage.spec().upper,
            format!("{stage} skipped: {reason}"),
        );
        event.metadata.insert("skipped".into(), Value::Bool(true));
        event
    }

    /// Terminal success carrying the published video URL.
    pub fn completed(task_id: TaskId, video_url: impl Into<String>) -> Self {
        let mut event = Self::base(
            task_id,
            EventKind::Complete,
            Stage::Complete,
            100,
            "video ready".to_string(),
        );
        event.result = Some(TaskResult {
            video_url: video_url.into(),
        });
        event
    }

    /// Terminal failure with a stable error code.
    pub fn failed(task_id: TaskId, code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut event = Self::base(
            task_id,
            EventKind::Error,
            Stage::Failed,
            FAILED_PROGRESS,
            message.clone(),
        );
        event.error = Some(ErrorDetail {
            code: code.into(),
            message,
        });
        event
    }

    /// Keepalive. Carries the task's last known position; observers must
    /// not derive state from it.
    pub fn heartbeat(task_id: TaskId, stage: Stage, progress: i8) -> Self {
        Self::base(
            task_id,
            EventKind::Heartbeat,
            stage,
            progress,
            "heartbeat".to_string(),
        )
    }

    /// Eviction notice delivered to observers still attached when a
    /// terminal task's retention window ends.
    pub fn expired(task_id: TaskId, stage: Stage, progress: i8) -> Self {
        let mut event = Self::base(
            task_id,
            EventKind::Error,
            stage,
            progress,
            "task history evicted".to_string(),
        );
        event.error = Some(ErrorDetail {
            code: "TASK_EXPIRED".to_string(),
            message: "task history evicted".to_string(),
        });
        event
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete | EventKind::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> TaskId {
        TaskId::generate()
    }

    #[test]
    fn test_stage_events_use_band_bounds() {
        let entered = ProgressEvent::stage_entered(id(), Stage::BackgroundRemoval);
        assert_eq!(entered.kind, EventKind::StageUpdate);
        assert_eq!(entered.progress, 20);

        let completed = ProgressEvent::stage_completed(id(), Stage::BackgroundRemoval);
        assert_eq!(completed.kind, EventKind::ProgressUpdate);
        assert_eq!(completed.progress, 40);
    }

    #[test]
    fn test_skip_marks_metadata() {
        let event = ProgressEvent::stage_skipped(id(), Stage::ProsodyAdjustment, "no text");
        assert_eq!(event.progress, 60);
        assert_eq!(event.metadata.get("skipped"), Some(&Value::Bool(true)));
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_completed_event() {
        let event = ProgressEvent::completed(id(), "https://media.local/v/1");
        assert_eq!(event.progress, 100);
        assert_eq!(event.stage, Stage::Complete);
        assert!(event.is_terminal());
        assert_eq!(
            event.result.as_ref().map(|r| r.video_url.as_str()),
            Some("https://media.local/v/1")
        );
    }

    #[test]
    fn test_failed_event() {
        let event = ProgressEvent::failed(id(), "NO_SUBJECT_DETECTED", "no subject");
        assert_eq!(event.progress, FAILED_PROGRESS);
        assert_eq!(event.stage, Stage::Failed);
        assert!(event.is_terminal());
        assert_eq!(event.error.as_ref().unwrap().code, "NO_SUBJECT_DETECTED");
    }

    #[test]
    fn test_heartbeat_is_not_terminal() {
        let event = ProgressEvent::heartbeat(id(), Stage::RemoteSynthesis, 70);
        assert_eq!(event.kind, EventKind::Heartbeat);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_wire_format_round_trip() {
        let event = ProgressEvent::stage_entered(id(), Stage::Detection)
            .with_metadata("selected_index", Value::from(1));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"stage_update\""));
        assert!(json.contains("\"detection\""));

        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.task_id, event.task_id);
        assert_eq!(parsed.metadata.get("selected_index"), Some(&Value::from(1)));
    }
}
