//! Progress broadcaster.
//!
//! One shared instance fans progress events out to any number of live
//! observers per task. Slow or gone observers never stall `publish`:
//! each observer owns a bounded queue and is dropped on overflow,
//! replaying history on re-attach. Terminal tasks are retained for a
//! configurable window, then evicted atomically by the sweeper.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::TaskId;
use crate::progress::events::ProgressEvent;

/// Broadcaster tuning knobs.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Events retained per task for replay.
    pub history_capacity: usize,
    /// Outbound queue slots per observer; overflow drops the observer.
    pub observer_queue_capacity: usize,
    /// Cadence of keepalive events for active tasks.
    pub heartbeat_interval: Duration,
    /// How long terminal tasks stay queryable.
    pub retention: Duration,
    /// Cadence of the eviction sweeper.
    pub sweep_interval: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            history_capacity: 256,
            observer_queue_capacity: 64,
            heartbeat_interval: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// One attached observer's outbound queue.
struct ObserverSlot {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

/// Per-task registry entry: retained history plus live observers.
struct TaskChannel {
    history: VecDeque<ProgressEvent>,
    observers: Vec<ObserverSlot>,
    // tokio's clock, so retention follows paused time in tests.
    terminal_at: Option<tokio::time::Instant>,
}

impl TaskChannel {
    fn new(history_capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(history_capacity.min(32)),
            observers: Vec::new(),
            terminal_at: None,
        }
    }

    /// Hand the event to every observer without blocking; observers whose
    /// queue is full or closed are dropped and must re-attach.
    fn deliver(&mut self, event: &ProgressEvent) {
        self.observers.retain(|slot| {
            match slot.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        task_id = %event.task_id,
                        observer_id = slot.id,
                        "observer queue overflow, dropping observer"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

/// Live observer attachment. Dropping it detaches implicitly; the
/// broadcaster prunes the dead queue on the next delivery.
pub struct ObserverHandle {
    pub task_id: TaskId,
    observer_id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ObserverHandle {
    /// Next event, `None` once the task is evicted or this observer was
    /// dropped for falling behind.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}

/// Fan-out hub between the pipeline executor and delivery transports.
pub struct ProgressBroadcaster {
    tasks: DashMap<TaskId, TaskChannel>,
    next_observer_id: AtomicU64,
    config: BroadcasterConfig,
}

impl ProgressBroadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            tasks: DashMap::new(),
            next_observer_id: AtomicU64::new(1),
            config,
        }
    }

    /// Register a task before its first event. Idempotent.
    pub fn register(&self, task_id: TaskId) {
        self.tasks
            .entry(task_id)
            .or_insert_with(|| TaskChannel::new(self.config.history_capacity));
    }

    /// Append to history and push to all attached observers.
    ///
    /// Heartbeats are delivered but never retained, so replay contains
    /// only state-bearing events. Publishing never blocks on observers.
    pub fn publish(&self, event: ProgressEvent) {
        let Some(mut channel) = self.tasks.get_mut(&event.task_id) else {
            debug!(task_id = %event.task_id, "publish for unknown task, dropping");
            return;
        };

        if event.kind == crate::progress::EventKind::Heartbeat {
            channel.deliver(&event);
            return;
        }

        if channel.history.len() >= self.config.history_capacity {
            channel.history.pop_front();
        }
        channel.history.push_back(event.clone());
        if event.is_terminal() && channel.terminal_at.is_none() {
            channel.terminal_at = Some(tokio::time::Instant::now());
        }
        channel.deliver(&event);
    }

    /// Attach an observer: replay retained history in original order,
    /// then stream live events.
    pub fn attach(&self, task_id: TaskId) -> Result<ObserverHandle> {
        let mut channel = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| Error::TaskExpired(task_id.to_string()))?;

        // Queue must absorb the full replay plus a burst of live events.
        let capacity = self
            .config
            .observer_queue_capacity
            .max(channel.history.len() + 16);
        let (tx, rx) = mpsc::channel(capacity);

        for event in &channel.history {
            // Cannot fail: the queue was sized for the replay.
            let _ = tx.try_send(event.clone());
        }

        let observer_id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        channel.observers.push(ObserverSlot {
            id: observer_id,
            tx,
        });

        debug!(%task_id, observer_id, "observer attached");
        Ok(ObserverHandle {
            task_id,
            observer_id,
            rx,
        })
    }

    /// Remove an observer. Idempotent; unknown handles are ignored.
    pub fn detach(&self, handle: &ObserverHandle) {
        if let Some(mut channel) = self.tasks.get_mut(&handle.task_id) {
            channel
                .observers
                .retain(|slot| slot.id != handle.observer_id);
        }
    }

    /// Most recent retained event, for stateless pollers.
    pub fn latest(&self, task_id: TaskId) -> Result<ProgressEvent> {
        self.tasks
            .get(&task_id)
            .and_then(|channel| channel.history.back().cloned())
            .ok_or_else(|| Error::TaskExpired(task_id.to_string()))
    }

    /// Full retained event sequence, for diagnostics clients.
    pub fn history(&self, task_id: TaskId) -> Result<Vec<ProgressEvent>> {
        self.tasks
            .get(&task_id)
            .map(|channel| channel.history.iter().cloned().collect())
            .ok_or_else(|| Error::TaskExpired(task_id.to_string()))
    }

    /// Number of tracked tasks (active and retained-terminal).
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of currently attached observers across all tasks.
    pub fn observer_count(&self) -> usize {
        self.tasks
            .iter()
            .map(|channel| channel.observers.len())
            .sum()
    }

    /// Start the heartbeat loop and the eviction sweeper.
    pub fn start_background_tasks(self: &Arc<Self>, cancel: CancellationToken) {
        let broadcaster = self.clone();
        let heartbeat_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broadcaster.config.heartbeat_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => {
                        debug!("heartbeat loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => broadcaster.send_heartbeats(),
                }
            }
        });

        let broadcaster = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broadcaster.config.sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("eviction sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => broadcaster.evict_expired(),
                }
            }
        });
    }

    /// Deliver a keepalive to observers of every non-terminal task.
    fn send_heartbeats(&self) {
        for mut entry in self.tasks.iter_mut() {
            if entry.terminal_at.is_some() {
                continue;
            }
            let task_id = *entry.key();
            let (stage, progress) = entry
                .history
                .back()
                .map(|event| (event.stage, event.progress))
                .unwrap_or((crate::pipeline::Stage::Initialized, 0));
            let heartbeat = ProgressEvent::heartbeat(task_id, stage, progress);
            entry.deliver(&heartbeat);
        }
    }

    /// Delete tasks whose retention window has elapsed. Still-attached
    /// observers get a terminal notice as their queues close.
    fn evict_expired(&self) {
        let retention = self.config.retention;
        let expired: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|entry| {
                entry
                    .terminal_at
                    .is_some_and(|at| at.elapsed() >= retention)
            })
            .map(|entry| *entry.key())
            .collect();

        for task_id in expired {
            if let Some((_, mut channel)) = self.tasks.remove(&task_id) {
                let (stage, progress) = channel
                    .history
                    .back()
                    .map(|event| (event.stage, event.progress))
                    .unwrap_or((crate::pipeline::Stage::Failed, -1));
                let notice = ProgressEvent::expired(task_id, stage, progress);
                channel.deliver(&notice);
                debug!(%task_id, observers = channel.observers.len(), "task history evicted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use crate::progress::EventKind;

    fn small_config() -> BroadcasterConfig {
        BroadcasterConfig {
            history_capacity: 8,
            observer_queue_capacity: 4,
            heartbeat_interval: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
        }
    }

    fn hub() -> ProgressBroadcaster {
        ProgressBroadcaster::new(small_config())
    }

    #[tokio::test]
    async fn test_publish_reaches_attached_observer() {
        let hub = hub();
        let id = TaskId::generate();
        hub.register(id);

        let mut observer = hub.attach(id).unwrap();
        hub.publish(ProgressEvent::stage_entered(id, Stage::Detection));

        let event = observer.recv().await.unwrap();
        assert_eq!(event.stage, Stage::Detection);
        assert_eq!(event.kind, EventKind::StageUpdate);
    }

    #[tokio::test]
    async fn test_late_attach_replays_history_in_order() {
        let hub = hub();
        let id = TaskId::generate();
        hub.register(id);

        hub.publish(ProgressEvent::stage_entered(id, Stage::Detection));
        hub.publish(ProgressEvent::stage_completed(id, Stage::Detection));
        hub.publish(ProgressEvent::stage_entered(id, Stage::BackgroundRemoval));

        let mut observer = hub.attach(id).unwrap();
        let progresses: Vec<i8> = vec![
            observer.recv().await.unwrap().progress,
            observer.recv().await.unwrap().progress,
            observer.recv().await.unwrap().progress,
        ];
        assert_eq!(progresses, vec![0, 20, 20]);
    }

    #[tokio::test]
    async fn test_history_ring_is_bounded() {
        let hub = hub();
        let id = TaskId::generate();
        hub.register(id);

        for _ in 0..20 {
            hub.publish(ProgressEvent::stage_entered(id, Stage::Detection));
        }
        assert_eq!(hub.history(id).unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_slow_observer_is_dropped_not_blocking() {
        let hub = hub();
        let id = TaskId::generate();
        hub.register(id);

        let mut observer = hub.attach(id).unwrap();
        // Queue capacity is 16 at attach (empty history); overflow it.
        for _ in 0..40 {
            hub.publish(ProgressEvent::stage_entered(id, Stage::Detection));
        }
        assert_eq!(hub.observer_count(), 0);

        // The dropped observer drains what fit, then sees end-of-stream.
        let mut received = 0;
        while observer.recv().await.is_some() {
            received += 1;
        }
        assert!(received < 40);

        // Re-attach replays retained history.
        let mut fresh = hub.attach(id).unwrap();
        assert!(fresh.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_detach_is_idempotent_and_isolating() {
        let hub = hub();
        let id = TaskId::generate();
        hub.register(id);

        let observer = hub.attach(id).unwrap();
        hub.detach(&observer);
        hub.detach(&observer);
        assert_eq!(hub.observer_count(), 0);

        let other = TaskId::generate();
        hub.register(other);
        hub.publish(ProgressEvent::stage_entered(other, Stage::Detection));

        // The detached observer's channel stays silent.
        let mut observer = observer;
        assert!(observer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_latest_and_history_for_unknown_task() {
        let hub = hub();
        let id = TaskId::generate();
        assert!(matches!(hub.latest(id), Err(Error::TaskExpired(_))));
        assert!(matches!(hub.history(id), Err(Error::TaskExpired(_))));
        assert!(matches!(hub.attach(id), Err(Error::TaskExpired(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_not_retained() {
        let hub = hub();
        let id = TaskId::generate();
        hub.register(id);
        hub.publish(ProgressEvent::stage_entered(id, Stage::Detection));
        hub.publish(ProgressEvent::heartbeat(id, Stage::Detection, 0));

        let history = hub.history(id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, EventKind::StageUpdate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_flow_to_active_tasks() {
        let hub = Arc::new(ProgressBroadcaster::new(BroadcasterConfig {
            heartbeat_interval: Duration::from_secs(30),
            ..small_config()
        }));
        let cancel = CancellationToken::new();
        hub.start_background_tasks(cancel.clone());

        let id = TaskId::generate();
        hub.register(id);
        hub.publish(ProgressEvent::stage_entered(id, Stage::RemoteSynthesis));
        let mut observer = hub.attach(id).unwrap();
        assert_eq!(observer.recv().await.unwrap().kind, EventKind::StageUpdate);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let event = observer.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Heartbeat);
        assert_eq!(event.stage, Stage::RemoteSynthesis);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_after_retention() {
        let hub = Arc::new(ProgressBroadcaster::new(BroadcasterConfig {
            retention: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            ..small_config()
        }));
        let cancel = CancellationToken::new();
        hub.start_background_tasks(cancel.clone());

        let id = TaskId::generate();
        hub.register(id);
        hub.publish(ProgressEvent::completed(id, "https://media.local/v/1"));

        // Terminal state stays queryable inside the retention window.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(hub.latest(id).is_ok());

        let mut observer = hub.attach(id).unwrap();
        assert_eq!(observer.recv().await.unwrap().kind, EventKind::Complete);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(matches!(hub.latest(id), Err(Error::TaskExpired(_))));
        assert!(matches!(hub.history(id), Err(Error::TaskExpired(_))));

        // The still-attached observer got the eviction notice, then EOF.
        let notice = observer.recv().await.unwrap();
        assert_eq!(notice.error.unwrap().code, "TASK_EXPIRED");
        assert!(observer.recv().await.is_none());

        cancel.cancel();
    }
}
