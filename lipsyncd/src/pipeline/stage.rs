//! Pipeline stages and the transition table driving the executor.
//!
//! The stage sequence is a fixed finite-state machine. Each stage owns a
//! progress band; the executor emits events at the band's lower bound on
//! entry and at its upper bound on success. `Complete` and `Failed` are
//! terminal.

use serde::{Deserialize, Serialize};

/// Progress value reported for failed tasks.
pub const FAILED_PROGRESS: i8 = -1;

/// One ordered step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialized,
    Detection,
    BackgroundRemoval,
    ProsodyAdjustment,
    Upload,
    RemoteSynthesis,
    Finalizing,
    Complete,
    Failed,
}

/// Concurrency gate classes. Stages without a gate run unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Detection,
    BackgroundRemoval,
}

/// Static description of one stage: progress band, gating, optionality
/// and the successor stage.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    /// Progress emitted when the stage is entered.
    pub lower: i8,
    /// Progress emitted when the stage succeeds (or is skipped).
    pub upper: i8,
    /// Concurrency gate guarding the stage, if any.
    pub gate: Option<GateKind>,
    /// Whether the stage may be skipped without failing the task.
    pub optional: bool,
    /// Next stage on success; `None` for terminal stages.
    pub next: Option<Stage>,
}

impl Stage {
    /// The transition table. Pure data; the executor's control loop is
    /// generic over it.
    pub fn spec(&self) -> StageSpec {
        match self {
            Stage::Initialized => StageSpec {
                lower: 0,
                upper: 0,
                gate: None,
                optional: false,
                next: Some(Stage::Detection),
            },
            Stage::Detection => StageSpec {
                lower: 0,
                upper: 20,
                gate: Some(GateKind::Detection),
                optional: false,
                next: Some(Stage::BackgroundRemoval),
            },
            Stage::BackgroundRemoval => StageSpec {
                lower: 20,
                upper: 40,
                gate: Some(GateKind::BackgroundRemoval),
                optional: false,
                next: Some(Stage::ProsodyAdjustment),
            },
            Stage::ProsodyAdjustment => StageSpec {
                lower: 40,
                upper: 60,
                gate: None,
                optional: true,
                next: Some(Stage::Upload),
            },
            Stage::Upload => StageSpec {
                lower: 60,
                upper: 70,
                gate: None,
                optional: false,
                next: Some(Stage::RemoteSynthesis),
            },
            Stage::RemoteSynthesis => StageSpec {
                lower: 70,
                upper: 80,
                gate: None,
                optional: false,
                next: Some(Stage::Finalizing),
            },
            Stage::Finalizing => StageSpec {
                lower: 80,
                upper: 90,
                gate: None,
                optional: false,
                next: Some(Stage::Complete),
            },
            Stage::Complete => StageSpec {
                lower: 100,
                upper: 100,
                gate: None,
                optional: false,
                next: None,
            },
            Stage::Failed => StageSpec {
                lower: FAILED_PROGRESS,
                upper: FAILED_PROGRESS,
                gate: None,
                optional: false,
                next: None,
            },
        }
    }

    /// Check whether no transition leaves this stage.
    pub fn is_terminal(&self) -> bool {
        self.spec().next.is_none()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initialized => "initialized",
            Stage::Detection => "detection",
            Stage::BackgroundRemoval => "background_removal",
            Stage::ProsodyAdjustment => "prosody_adjustment",
            Stage::Upload => "upload",
            Stage::RemoteSynthesis => "remote_synthesis",
            Stage::Finalizing => "finalizing",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateKind::Detection => f.write_str("detection"),
            GateKind::BackgroundRemoval => f.write_str("background_removal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_reaches_complete() {
        let mut stage = Stage::Initialized;
        let mut hops = 0;
        while let Some(next) = stage.spec().next {
            stage = next;
            hops += 1;
            assert!(hops < 16, "transition table must not cycle");
        }
        assert_eq!(stage, Stage::Complete);
    }

    #[test]
    fn test_progress_bands_are_monotonic() {
        let mut stage = Stage::Initialized;
        let mut last_upper = 0;
        loop {
            let spec = stage.spec();
            assert!(spec.lower <= spec.upper, "band inverted for {stage}");
            assert!(spec.lower >= last_upper, "band regressed for {stage}");
            assert!(spec.lower >= 0 && spec.upper <= 100);
            last_upper = spec.upper;
            match spec.next {
                Some(next) => stage = next,
                None => break,
            }
        }
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::Complete.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Detection.is_terminal());
        assert_eq!(Stage::Failed.spec().lower, FAILED_PROGRESS);
        assert_eq!(Stage::Complete.spec().upper, 100);
    }

    #[test]
    fn test_only_prosody_is_optional() {
        let mut stage = Stage::Initialized;
        loop {
            let spec = stage.spec();
            assert_eq!(spec.optional, stage == Stage::ProsodyAdjustment);
            match spec.next {
                Some(next) => stage = next,
                None => break,
            }
        }
    }

    #[test]
    fn test_gated_stages() {
        assert_eq!(Stage::Detection.spec().gate, Some(GateKind::Detection));
        assert_eq!(
            Stage::BackgroundRemoval.spec().gate,
            Some(GateKind::BackgroundRemoval)
        );
        assert_eq!(Stage::Upload.spec().gate, None);
        assert_eq!(Stage::RemoteSynthesis.spec().gate, None);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Stage::BackgroundRemoval).unwrap();
        assert_eq!(json, "\"background_removal\"");
        let parsed: Stage = serde_json::from_str("\"remote_synthesis\"").unwrap();
        assert_eq!(parsed, Stage::RemoteSynthesis);
    }
}
