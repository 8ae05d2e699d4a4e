//! Progress reporting sinks.
//!
//! The dispatcher polls its [`ProgressCounter`](viewfarm_core::ProgressCounter)
//! on a fixed interval and hands each snapshot to a [`ProgressReporter`].
//! Reporters must not fail the run: delivery problems are logged and
//! swallowed.

use async_trait::async_trait;

use crate::bus::{EventBus, FarmEvent, ProgressEvent};

/// Consumer of `{completed, total, fraction}` progress events.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, event: ProgressEvent);
}

/// Writes every progress event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl ProgressReporter for LogReporter {
    async fn report(&self, event: ProgressEvent) {
        tracing::info!(
            completed = event.completed,
            total = event.total,
            progress = %format!("{:.1}%", event.fraction * 100.0),
            "Render progress",
        );
    }
}

#[async_trait]
impl ProgressReporter for EventBus {
    async fn report(&self, event: ProgressEvent) {
        self.publish(FarmEvent::Progress(event));
    }
}
