//! Event bus and progress reporting for viewfarm.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`FarmEvent`]: job, worker and progress events.
//! - [`ProgressReporter`]: sink for periodic progress snapshots, with a
//!   log implementation and an HTTP webhook implementation.

pub mod bus;
pub mod reporter;
pub mod webhook;

pub use bus::{log_events, EventBus, FarmEvent, ProgressEvent};
pub use reporter::{LogReporter, ProgressReporter};
pub use webhook::{WebhookError, WebhookReporter};
