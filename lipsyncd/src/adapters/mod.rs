//! Stage adapter seams.
//!
//! The pipeline invokes every heavy operation (person detection,
//! background removal, prosody adjustment, remote synthesis, media
//! storage) through the traits defined here. The implementations are
//! external collaborators; this crate ships only the `dryrun` set used
//! for development runs and tests.

mod dryrun;

pub use dryrun::{DryRunAdapters, DryRunConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Failure taxonomy an adapter may surface.
///
/// `Transient` failures (network, timeout) are retried by the executor;
/// `Permanent` failures (validation, content) fail the task immediately.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("transient adapter failure: {0}")]
    Transient(String),

    #[error("permanent adapter failure: {0}")]
    Permanent(String),

    #[error("no subject detected")]
    NoSubjectDetected,
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Opaque reference to a media object (input image, audio clip,
/// intermediate artifact). Resolution is the media store's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef(pub String);

impl MediaRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One detected subject candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSubject {
    /// Position in the detector's output order.
    pub index: usize,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Inputs staged with the media store, ready for remote synthesis.
#[derive(Debug, Clone)]
pub struct UploadedBundle {
    pub portrait: MediaRef,
    pub audio: MediaRef,
}

/// Request handed to the remote synthesis vendor.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub portrait: MediaRef,
    pub audio: MediaRef,
    pub subject: DetectedSubject,
    pub apply_smoothing: bool,
}

/// Person/face detector.
#[async_trait]
pub trait SubjectDetector: Send + Sync {
    /// Detect subject candidates at or above the confidence threshold.
    /// An empty result means no usable subject.
    async fn detect(
        &self,
        image: &MediaRef,
        confidence_threshold: f32,
    ) -> AdapterResult<Vec<DetectedSubject>>;
}

/// Background remover producing a clean portrait cutout.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(&self, image: &MediaRef) -> AdapterResult<MediaRef>;
}

/// Audio prosody adjuster, driven by the supplied text and preset.
#[async_trait]
pub trait ProsodyAdjuster: Send + Sync {
    async fn adjust(
        &self,
        audio: &MediaRef,
        text: &str,
        preset: Option<&str>,
    ) -> AdapterResult<MediaRef>;
}

/// Remote video-synthesis vendor client.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Run the vendor job to completion and return the raw rendered video.
    async fn synthesize(&self, request: &SynthesisRequest) -> AdapterResult<MediaRef>;
}

/// Narrow seam over input/output media storage.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Stage the prepared inputs where the synthesis vendor can read them.
    async fn stage_inputs(
        &self,
        portrait: &MediaRef,
        audio: &MediaRef,
    ) -> AdapterResult<UploadedBundle>;

    /// Publish the rendered video and return its final URL.
    async fn publish(&self, raw: &MediaRef) -> AdapterResult<String>;
}

/// The full adapter set the executor is constructed with.
#[derive(Clone)]
pub struct StageAdapters {
    pub detector: Arc<dyn SubjectDetector>,
    pub remover: Arc<dyn BackgroundRemover>,
    pub prosody: Arc<dyn ProsodyAdjuster>,
    pub synthesis: Arc<dyn SynthesisClient>,
    pub store: Arc<dyn MediaStore>,
}
