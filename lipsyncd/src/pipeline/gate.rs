//! Per-stage concurrency gate.
//!
//! Gated stages (detection, background removal) are expensive and run a
//! bounded number of executions at once. Each gate kind owns an
//! independent counting semaphore with FIFO waiters; capacity is never
//! shared across kinds. Acquisition suspends the task's own run loop,
//! never the submitter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::pipeline::stage::{GateKind, Stage};

/// Capacity configuration per gate kind.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum concurrent detection stage executions.
    pub detection_slots: usize,
    /// Maximum concurrent background-removal stage executions.
    pub background_removal_slots: usize,
    /// How long a task may wait for a slot before failing the attempt.
    pub acquire_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            detection_slots: 2,
            background_removal_slots: 1,
            acquire_timeout: Duration::from_secs(15),
        }
    }
}

/// A held slot. Releasing is dropping.
#[derive(Debug)]
pub struct GateTicket {
    _permit: OwnedSemaphorePermit,
}

/// Per-stage counting admission gate.
pub struct StageGate {
    semaphores: HashMap<GateKind, Arc<Semaphore>>,
    acquire_timeout: Duration,
}

impl StageGate {
    pub fn new(config: GateConfig) -> Self {
        let mut semaphores = HashMap::new();
        semaphores.insert(
            GateKind::Detection,
            Arc::new(Semaphore::new(config.detection_slots)),
        );
        semaphores.insert(
            GateKind::BackgroundRemoval,
            Arc::new(Semaphore::new(config.background_removal_slots)),
        );
        Self {
            semaphores,
            acquire_timeout: config.acquire_timeout,
        }
    }

    /// Acquire a slot for `stage`, waiting up to the configured timeout.
    ///
    /// Returns `Ok(None)` for ungated stages. Waiters are served in FIFO
    /// order, so no task starves while capacity turns over.
    pub async fn acquire(&self, stage: Stage) -> Result<Option<GateTicket>> {
        let Some(kind) = stage.spec().gate else {
            return Ok(None);
        };

        // Every gated kind is registered at construction.
        let semaphore = self.semaphores[&kind].clone();

        match tokio::time::timeout(self.acquire_timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Some(GateTicket { _permit: permit })),
            // The semaphore is never closed while the gate is alive.
            Ok(Err(_)) => Err(Error::Other(format!("gate for {kind} is closed"))),
            Err(_) => Err(Error::ResourceTimeout { stage }),
        }
    }

    /// Currently free slots for a gate kind. Diagnostic only.
    pub fn available(&self, kind: GateKind) -> usize {
        self.semaphores[&kind].available_permits()
    }
}
