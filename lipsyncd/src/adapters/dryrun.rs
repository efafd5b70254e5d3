//! Simulated stage adapters.
//!
//! Used by the binary when `LIPSYNCD_DRY_RUN` is set and by tests that
//! need a full pipeline without the CV/DSP/vendor collaborators. Every
//! operation sleeps for a configurable latency and returns deterministic
//! artifacts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AdapterResult, BackgroundRemover, BoundingBox, DetectedSubject, MediaRef, MediaStore,
    ProsodyAdjuster, StageAdapters, SubjectDetector, SynthesisClient, SynthesisRequest,
    UploadedBundle,
};

/// Configuration for the simulated adapter set.
#[derive(Debug, Clone)]
pub struct DryRunConfig {
    /// Latency applied to every simulated operation.
    pub stage_latency: Duration,
    /// Subjects returned by the simulated detector.
    pub subjects: Vec<DetectedSubject>,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            stage_latency: Duration::from_millis(50),
            subjects: vec![DetectedSubject {
                index: 0,
                confidence: 0.97,
                bbox: BoundingBox {
                    x: 120,
                    y: 40,
                    width: 480,
                    height: 640,
                },
            }],
        }
    }
}

/// Deterministic adapter set backed by timers.
pub struct DryRunAdapters {
    config: DryRunConfig,
}

impl DryRunAdapters {
    pub fn new(config: DryRunConfig) -> Self {
        Self { config }
    }

    /// Build a full `StageAdapters` set sharing one configuration.
    pub fn adapter_set(config: DryRunConfig) -> StageAdapters {
        let shared = Arc::new(Self::new(config));
        StageAdapters {
            detector: shared.clone(),
            remover: shared.clone(),
            prosody: shared.clone(),
            synthesis: shared.clone(),
            store: shared,
        }
    }

    async fn simulate(&self) {
        tokio::time::sleep(self.config.stage_latency).await;
    }
}

#[async_trait]
impl SubjectDetector for DryRunAdapters {
    async fn detect(
        &self,
        _image: &MediaRef,
        confidence_threshold: f32,
    ) -> AdapterResult<Vec<DetectedSubject>> {
        self.simulate().await;
        Ok(self
            .config
            .subjects
            .iter()
            .filter(|s| s.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BackgroundRemover for DryRunAdapters {
    async fn remove_background(&self, image: &MediaRef) -> AdapterResult<MediaRef> {
        self.simulate().await;
        Ok(MediaRef::new(format!("{image}#nobg")))
    }
}

#[async_trait]
impl ProsodyAdjuster for DryRunAdapters {
    async fn adjust(
        &self,
        audio: &MediaRef,
        _text: &str,
        preset: Option<&str>,
    ) -> AdapterResult<MediaRef> {
        self.simulate().await;
        let preset = preset.unwrap_or("neutral");
        Ok(MediaRef::new(format!("{audio}#prosody-{preset}")))
    }
}

#[async_trait]
impl SynthesisClient for DryRunAdapters {
    async fn synthesize(&self, request: &SynthesisRequest) -> AdapterResult<MediaRef> {
        self.simulate().await;
        Ok(MediaRef::new(format!("{}#rendered", request.portrait)))
    }
}

#[async_trait]
impl MediaStore for DryRunAdapters {
    async fn stage_inputs(
        &self,
        portrait: &MediaRef,
        audio: &MediaRef,
    ) -> AdapterResult<UploadedBundle> {
        self.simulate().await;
        Ok(UploadedBundle {
            portrait: portrait.clone(),
            audio: audio.clone(),
        })
    }

    async fn publish(&self, raw: &MediaRef) -> AdapterResult<String> {
        self.simulate().await;
        Ok(format!("https://media.local/videos/{}", raw.as_str().len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detector_filters_by_threshold() {
        let adapters = DryRunAdapters::new(DryRunConfig {
            stage_latency: Duration::ZERO,
            subjects: vec![
                DetectedSubject {
                    index: 0,
                    confidence: 0.4,
                    bbox: BoundingBox {
                        x: 0,
                        y: 0,
                        width: 10,
                        height: 10,
                    },
                },
                DetectedSubject {
                    index: 1,
                    confidence: 0.9,
                    bbox: BoundingBox {
                        x: 0,
                        y: 0,
                        width: 10,
                        height: 10,
                    },
                },
            ],
        });

        let found = adapters
            .detect(&MediaRef::new("img"), 0.5)
            .await
            .expect("detect");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 1);
    }

    #[tokio::test]
    async fn test_publish_returns_url() {
        let adapters = DryRunAdapters::new(DryRunConfig {
            stage_latency: Duration::ZERO,
            ..Default::default()
        });
        let url = adapters
            .publish(&MediaRef::new("raw-video"))
            .await
            .expect("publish");
        assert!(url.starts_with("https://"));
    }
}
