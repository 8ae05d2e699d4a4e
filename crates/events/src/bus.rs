//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`FarmEvent`]s out to any number of subscribers.
//! Workers publish one [`FarmEvent::JobFinished`] per dequeued job and
//! the dispatcher publishes [`FarmEvent::Progress`] snapshots. Share it
//! via `Arc<EventBus>`.

use serde::Serialize;
use tokio::sync::broadcast;
use viewfarm_core::{JobRecord, ProgressSnapshot, WorkerSlot};

// ---------------------------------------------------------------------------
// FarmEvent
// ---------------------------------------------------------------------------

/// Progress payload as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub completed: u64,
    pub total: u64,
    pub fraction: f64,
}

impl From<ProgressSnapshot> for ProgressEvent {
    fn from(snapshot: ProgressSnapshot) -> Self {
        Self {
            completed: snapshot.completed,
            total: snapshot.total,
            fraction: snapshot.fraction(),
        }
    }
}

/// Something observable that happened during a dispatch run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FarmEvent {
    Progress(ProgressEvent),
    /// A worker finished handling one job, whatever the outcome.
    JobFinished(JobRecord),
    /// A worker consumed its sentinel and left its loop.
    WorkerStopped { slot: WorkerSlot },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use viewfarm_events::bus::{EventBus, FarmEvent};
/// use viewfarm_core::WorkerSlot;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(FarmEvent::WorkerStopped { slot: WorkerSlot { gpu_index: 0, ordinal: 0 } });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<FarmEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers that fall more than `capacity` events behind
    /// observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: FarmEvent) {
        // Zero receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FarmEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Log every event as JSON at `debug` until all senders are dropped.
///
/// Returns the number of events received.
pub async fn log_events(mut rx: broadcast::Receiver<FarmEvent>) -> u64 {
    let mut received = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                received += 1;
                let json = serde_json::to_string(&event).unwrap_or_default();
                tracing::debug!(event = %json, "Farm event");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    received
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
