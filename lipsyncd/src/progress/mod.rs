//! Progress event model and real-time delivery.

mod broadcaster;
mod events;

pub use broadcaster::{BroadcasterConfig, ObserverHandle, ProgressBroadcaster};
pub use events::{ErrorDetail, EventKind, ProgressEvent, TaskResult};
