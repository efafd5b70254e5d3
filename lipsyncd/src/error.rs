//! Application-wide error types.

use thiserror::Error;

use crate::pipeline::Stage;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out waiting for a {stage} slot")]
    ResourceTimeout { stage: Stage },

    #[error("Transient adapter failure in {stage}: {detail}")]
    AdapterTransient { stage: Stage, detail: String },

    #[error("Permanent adapter failure in {stage}: {detail}")]
    AdapterPermanent { stage: Stage, detail: String },

    #[error("No subject detected in the input image")]
    NoSubjectDetected,

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Task deadline of {deadline_secs}s exceeded")]
    DeadlineExceeded { deadline_secs: u64 },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task expired: {0}")]
    TaskExpired(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable error code surfaced in terminal `error` events and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::ResourceTimeout { .. } => "RESOURCE_TIMEOUT",
            Error::AdapterTransient { .. } => "RETRIES_EXHAUSTED",
            Error::AdapterPermanent { .. } => "ADAPTER_PERMANENT",
            Error::NoSubjectDetected => "NO_SUBJECT_DETECTED",
            Error::Cancelled => "CANCELLED",
            Error::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Error::TaskNotFound(_) => "TASK_NOT_FOUND",
            Error::TaskExpired(_) => "TASK_EXPIRED",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::ApiError(_) => "API_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry under the stage retry policy may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::AdapterTransient { .. } | Error::ResourceTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::NoSubjectDetected.code(), "NO_SUBJECT_DETECTED");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
        assert_eq!(
            Error::DeadlineExceeded { deadline_secs: 80 }.code(),
            "DEADLINE_EXCEEDED"
        );
    }

    #[test]
    fn test_transient_classification() {
        let transient = Error::AdapterTransient {
            stage: Stage::Detection,
            detail: "connection reset".to_string(),
        };
        assert!(transient.is_transient());

        let timeout = Error::ResourceTimeout {
            stage: Stage::BackgroundRemoval,
        };
        assert!(timeout.is_transient());

        assert!(!Error::NoSubjectDetected.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }
}
