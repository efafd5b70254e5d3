//! Pipeline executor.
//!
//! One asynchronous state-machine loop per submitted task. The loop
//! walks the stage transition table, gates expensive stages through the
//! shared [`StageGate`], retries transient adapter failures with
//! exponential backoff and emits a progress event at every transition.
//! `submit` returns as soon as the task is spawned; callers observe the
//! run through the broadcaster.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{
    AdapterError, DetectedSubject, MediaRef, StageAdapters, SynthesisRequest, UploadedBundle,
};
use crate::error::{Error, Result};
use crate::pipeline::gate::{GateConfig, StageGate};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::stage::Stage;
use crate::pipeline::task::{Task, TaskId, TaskInput, TaskOptions, TaskOutcome};
use crate::progress::{ProgressBroadcaster, ProgressEvent};

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Overall deadline after which a task is force-failed.
    pub task_deadline: Duration,
    /// Retry policy for transient stage failures.
    pub retry: RetryPolicy,
    /// Per-stage concurrency limits.
    pub gate: GateConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_deadline: Duration::from_secs(80),
            retry: RetryPolicy::default(),
            gate: GateConfig::default(),
        }
    }
}

/// A task currently owned by the executor.
struct ActiveTask {
    state: RwLock<Task>,
    cancel: CancellationToken,
}

/// Artifacts threaded through the stages of one run.
#[derive(Default)]
struct StageContext {
    portrait: Option<MediaRef>,
    audio: Option<MediaRef>,
    subject: Option<DetectedSubject>,
    staged: Option<UploadedBundle>,
    raw_video: Option<MediaRef>,
    video_url: Option<String>,
}

/// Drives every submitted task through the fixed stage sequence.
pub struct PipelineExecutor {
    adapters: StageAdapters,
    gate: StageGate,
    broadcaster: Arc<ProgressBroadcaster>,
    tasks: DashMap<TaskId, Arc<ActiveTask>>,
    deadline: Duration,
    retry: RetryPolicy,
}

impl PipelineExecutor {
    pub fn new(
        adapters: StageAdapters,
        broadcaster: Arc<ProgressBroadcaster>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            adapters,
            gate: StageGate::new(config.gate),
            broadcaster,
            tasks: DashMap::new(),
            deadline: config.task_deadline,
            retry: config.retry,
        }
    }

    /// Validate and enqueue a task. Never awaits stage work; the state
    /// machine runs on its own spawned task.
    pub fn submit(self: &Arc<Self>, input: TaskInput, options: TaskOptions) -> Result<TaskId> {
        input.validate()?;
        options.validate()?;

        let task = Task::new(input, options);
        let task_id = task.id;
        self.broadcaster.register(task_id);

        let active = Arc::new(ActiveTask {
            state: RwLock::new(task),
            cancel: CancellationToken::new(),
        });
        self.tasks.insert(task_id, active.clone());
        self.emit(&active, ProgressEvent::stage_entered(task_id, Stage::Initialized));
        info!(%task_id, "task submitted");

        let executor = self.clone();
        tokio::spawn(async move {
            executor.run(active).await;
        });

        Ok(task_id)
    }

    /// Request cooperative cancellation. Takes effect at the next stage
    /// boundary; in-flight adapter calls are not interrupted.
    pub fn cancel(&self, task_id: TaskId) -> Result<()> {
        let active = self
            .tasks
            .get(&task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        active.cancel.cancel();
        info!(%task_id, "cancellation requested");
        Ok(())
    }

    /// Snapshot of every task still executing.
    pub fn active_tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|entry| entry.state.read().clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Run one task to its terminal state and publish exactly one
    /// terminal event.
    async fn run(&self, active: Arc<ActiveTask>) {
        let task_id = active.state.read().id;

        let result = match tokio::time::timeout(self.deadline, self.execute(&active)).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded {
                deadline_secs: self.deadline.as_secs(),
            }),
        };

        match result {
            Ok(video_url) => {
                {
                    let mut task = active.state.write();
                    task.stage = Stage::Complete;
                    task.progress = 100;
                    task.finished_at = Some(Utc::now());
                    task.outcome = Some(TaskOutcome::Completed {
                        video_url: video_url.clone(),
                    });
                }
                self.broadcaster
                    .publish(ProgressEvent::completed(task_id, &video_url));
                info!(%task_id, %video_url, "task complete");
            }
            Err(err) => {
                let code = err.code();
                let message = err.to_string();
                {
                    let mut task = active.state.write();
                    task.stage = Stage::Failed;
                    task.progress = crate::pipeline::FAILED_PROGRESS;
                    task.finished_at = Some(Utc::now());
                    task.outcome = Some(TaskOutcome::Failed {
                        code: code.to_string(),
                        message: message.clone(),
                    });
                }
                self.broadcaster
                    .publish(ProgressEvent::failed(task_id, code, message));
                warn!(%task_id, code, error = %err, "task failed");
            }
        }

        self.tasks.remove(&task_id);
    }

    /// Walk the transition table from `Initialized` to `Complete`.
    async fn execute(&self, active: &ActiveTask) -> Result<String> {
        let (task_id, input, options) = {
            let task = active.state.read();
            (task.id, task.input.clone(), task.options.clone())
        };

        let mut ctx = StageContext {
            portrait: Some(input.image_ref.clone()),
            audio: Some(input.audio_ref.clone()),
            ..Default::default()
        };

        let mut stage = Stage::Initialized;
        while let Some(next) = stage.spec().next {
            stage = next;
            if stage == Stage::Complete {
                break;
            }
            if active.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if stage.spec().optional
                && let Some(reason) = skip_reason(stage, &input, &options)
            {
                self.emit(active, ProgressEvent::stage_skipped(task_id, stage, reason));
                continue;
            }

            self.run_stage(active, stage, &input, &options, &mut ctx)
                .await?;
        }

        ctx.video_url
            .ok_or_else(|| Error::Other("pipeline finished without a published video".to_string()))
    }

    /// Execute one stage with gating and transient-failure retries.
    async fn run_stage(
        &self,
        active: &ActiveTask,
        stage: Stage,
        input: &TaskInput,
        options: &TaskOptions,
        ctx: &mut StageContext,
    ) -> Result<()> {
        let task_id = active.state.read().id;
        self.emit(active, ProgressEvent::stage_entered(task_id, stage));

        let mut attempt = 0u32;
        loop {
            match self.attempt_stage(stage, input, options, ctx).await {
                Ok(metadata) => {
                    let mut event = ProgressEvent::stage_completed(task_id, stage);
                    for (key, value) in metadata {
                        event = event.with_metadata(&key, value);
                    }
                    self.emit(active, event);
                    return Ok(());
                }
                Err(err) if err.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        %task_id, %stage, attempt, error = %err,
                        "transient stage failure, retrying in {:?}", delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One gated attempt at a stage's adapter call. The gate slot is
    /// held for the duration of the call and released between retries.
    async fn attempt_stage(
        &self,
        stage: Stage,
        input: &TaskInput,
        options: &TaskOptions,
        ctx: &mut StageContext,
    ) -> Result<Map<String, Value>> {
        let _ticket = self.gate.acquire(stage).await?;
        let mut metadata = Map::new();

        match stage {
            Stage::Detection => {
                let subjects = self
                    .adapters
                    .detector
                    .detect(&input.image_ref, options.confidence_threshold)
                    .await
                    .map_err(|err| adapter_failure(stage, err))?;
                let selected = select_subject(&subjects)
                    .ok_or(Error::NoSubjectDetected)?
                    .clone();
                metadata.insert("candidates".into(), Value::from(subjects.len()));
                metadata.insert("selected_index".into(), Value::from(selected.index));
                metadata.insert(
                    "selected_confidence".into(),
                    Value::from(selected.confidence as f64),
                );
                ctx.subject = Some(selected);
            }
            Stage::BackgroundRemoval => {
                // Clone, not take: the artifact must survive a failed
                // attempt for the retry to reuse.
                let portrait = ctx.portrait.clone().ok_or_else(|| missing_artifact(stage))?;
                ctx.portrait = Some(
                    self.adapters
                        .remover
                        .remove_background(&portrait)
                        .await
                        .map_err(|err| adapter_failure(stage, err))?,
                );
            }
            Stage::ProsodyAdjustment => {
                // The skip path never reaches here, so text is present.
                let text = input.text.as_deref().unwrap_or_default();
                let audio = ctx.audio.clone().ok_or_else(|| missing_artifact(stage))?;
                ctx.audio = Some(
                    self.adapters
                        .prosody
                        .adjust(&audio, text, options.prosody_preset.as_deref())
                        .await
                        .map_err(|err| adapter_failure(stage, err))?,
                );
            }
            Stage::Upload => {
                let portrait = ctx.portrait.as_ref().ok_or_else(|| missing_artifact(stage))?;
                let audio = ctx.audio.as_ref().ok_or_else(|| missing_artifact(stage))?;
                ctx.staged = Some(
                    self.adapters
                        .store
                        .stage_inputs(portrait, audio)
                        .await
                        .map_err(|err| adapter_failure(stage, err))?,
                );
            }
            Stage::RemoteSynthesis => {
                let staged = ctx.staged.as_ref().ok_or_else(|| missing_artifact(stage))?;
                let subject = ctx.subject.clone().ok_or_else(|| missing_artifact(stage))?;
                let request = SynthesisRequest {
                    portrait: staged.portrait.clone(),
                    audio: staged.audio.clone(),
                    subject,
                    apply_smoothing: options.apply_smoothing,
                };
                ctx.raw_video = Some(
                    self.adapters
                        .synthesis
                        .synthesize(&request)
                        .await
                        .map_err(|err| adapter_failure(stage, err))?,
                );
            }
            Stage::Finalizing => {
                let raw = ctx.raw_video.as_ref().ok_or_else(|| missing_artifact(stage))?;
                ctx.video_url = Some(
                    self.adapters
                        .store
                        .publish(raw)
                        .await
                        .map_err(|err| adapter_failure(stage, err))?,
                );
            }
            Stage::Initialized | Stage::Complete | Stage::Failed => {}
        }

        Ok(metadata)
    }

    /// Update the task snapshot and hand the event to the broadcaster.
    fn emit(&self, active: &ActiveTask, event: ProgressEvent) {
        {
            let mut task = active.state.write();
            task.stage = event.stage;
            task.progress = event.progress;
        }
        self.broadcaster.publish(event);
    }
}

/// Why the prosody stage does not run, if it doesn't.
fn skip_reason(stage: Stage, input: &TaskInput, options: &TaskOptions) -> Option<&'static str> {
    if stage != Stage::ProsodyAdjustment {
        return None;
    }
    if !options.enable_prosody {
        return Some("prosody disabled");
    }
    let has_text = input
        .text
        .as_deref()
        .is_some_and(|text| !text.trim().is_empty());
    if !has_text {
        return Some("no text supplied");
    }
    None
}

/// Deterministic best-subject selection: highest confidence, ties broken
/// by largest bounding-box area, then lowest index.
fn select_subject(subjects: &[DetectedSubject]) -> Option<&DetectedSubject> {
    subjects.iter().max_by(|a, b| {
        a.confidence
            .total_cmp(&b.confidence)
            .then_with(|| a.bbox.area().cmp(&b.bbox.area()))
            .then_with(|| b.index.cmp(&a.index))
    })
}

fn adapter_failure(stage: Stage, err: AdapterError) -> Error {
    match err {
        AdapterError::Transient(detail) => Error::AdapterTransient { stage, detail },
        AdapterError::Permanent(detail) => Error::AdapterPermanent { stage, detail },
        AdapterError::NoSubjectDetected => Error::NoSubjectDetected,
    }
}

fn missing_artifact(stage: Stage) -> Error {
    Error::Other(format!("{stage} reached without its input artifact"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::BoundingBox;

    fn subject(index: usize, confidence: f32, side: u32) -> DetectedSubject {
        DetectedSubject {
            index,
            confidence,
            bbox: BoundingBox {
                x: 0,
                y: 0,
                width: side,
                height: side,
            },
        }
    }

    #[test]
    fn test_select_subject_highest_confidence() {
        let subjects = vec![subject(0, 0.9, 100), subject(1, 0.95, 50)];
        assert_eq!(select_subject(&subjects).unwrap().index, 1);
    }

    #[test]
    fn test_select_subject_ties_break_on_area_then_index() {
        let subjects = vec![subject(0, 0.9, 50), subject(1, 0.9, 100)];
        assert_eq!(select_subject(&subjects).unwrap().index, 1);

        let same_area = vec![subject(0, 0.9, 80), subject(1, 0.9, 80)];
        assert_eq!(select_subject(&same_area).unwrap().index, 0);
    }

    #[test]
    fn test_select_subject_empty() {
        assert!(select_subject(&[]).is_none());
    }

    #[test]
    fn test_skip_reason() {
        let input = TaskInput {
            image_ref: MediaRef::new("img"),
            audio_ref: MediaRef::new("audio"),
            text: Some("hello there".to_string()),
        };
        let options = TaskOptions::default();
        assert_eq!(skip_reason(Stage::ProsodyAdjustment, &input, &options), None);

        let disabled = TaskOptions {
            enable_prosody: false,
            ..TaskOptions::default()
        };
        assert_eq!(
            skip_reason(Stage::ProsodyAdjustment, &input, &disabled),
            Some("prosody disabled")
        );

        let no_text = TaskInput {
            text: Some("   ".to_string()),
            ..input.clone()
        };
        assert_eq!(
            skip_reason(Stage::ProsodyAdjustment, &no_text, &options),
            Some("no text supplied")
        );

        assert_eq!(skip_reason(Stage::Upload, &input, &options), None);
    }
}
