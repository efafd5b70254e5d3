//! Task record and submission types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::MediaRef;
use crate::error::{Error, Result};
use crate::pipeline::stage::Stage;

/// Opaque, unguessable task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| Error::validation(format!("invalid task id: {value}")))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Input references for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    /// Still portrait image.
    pub image_ref: MediaRef,
    /// Audio clip to lip-sync against.
    pub audio_ref: MediaRef,
    /// Optional transcript driving prosody adjustment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TaskInput {
    pub fn validate(&self) -> Result<()> {
        if self.image_ref.as_str().trim().is_empty() {
            return Err(Error::validation("image_ref must not be empty"));
        }
        if self.audio_ref.as_str().trim().is_empty() {
            return Err(Error::validation("audio_ref must not be empty"));
        }
        Ok(())
    }
}

/// Recognized submission options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Minimum detector confidence for subject candidates.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Whether the vendor applies temporal smoothing.
    #[serde(default = "default_true")]
    pub apply_smoothing: bool,
    /// Named prosody preset, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prosody_preset: Option<String>,
    /// Whether the prosody-adjustment stage runs at all.
    #[serde(default = "default_true")]
    pub enable_prosody: bool,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            apply_smoothing: true,
            prosody_preset: None,
            enable_prosody: true,
        }
    }
}

impl TaskOptions {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::validation(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }
}

/// Terminal result of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskOutcome {
    Completed { video_url: String },
    Failed { code: String, message: String },
}

/// One end-to-end pipeline execution.
///
/// Owned by the executor while running; read-only once terminal.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub input: TaskInput,
    pub options: TaskOptions,
    pub stage: Stage,
    /// 0..=100 while running, -1 once failed.
    pub progress: i8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    pub fn new(input: TaskInput, options: TaskOptions) -> Self {
        Self {
            id: TaskId::generate(),
            input,
            options,
            stage: Stage::Initialized,
            progress: 0,
            created_at: Utc::now(),
            finished_at: None,
            outcome: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_input() -> TaskInput {
        TaskInput {
            image_ref: MediaRef::new("s3://in/portrait.png"),
            audio_ref: MediaRef::new("s3://in/clip.wav"),
            text: None,
        }
    }

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(TaskId::generate(), TaskId::generate());
    }

    #[test]
    fn test_task_id_round_trip() {
        let id = TaskId::generate();
        assert_eq!(TaskId::parse(&id.to_string()).unwrap(), id);
        assert!(TaskId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_input_validation() {
        assert!(test_input().validate().is_ok());

        let empty = TaskInput {
            image_ref: MediaRef::new("  "),
            ..test_input()
        };
        assert!(matches!(empty.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_options_validation() {
        assert!(TaskOptions::default().validate().is_ok());

        let bad = TaskOptions {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: TaskOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.confidence_threshold, 0.5);
        assert!(options.apply_smoothing);
        assert!(options.enable_prosody);
        assert!(options.prosody_preset.is_none());
    }

    #[test]
    fn test_new_task_starts_initialized() {
        let task = Task::new(test_input(), TaskOptions::default());
        assert_eq!(task.stage, Stage::Initialized);
        assert_eq!(task.progress, 0);
        assert!(!task.is_terminal());
        assert!(task.outcome.is_none());
    }
}
