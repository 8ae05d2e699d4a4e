//! Domain types and primitives for the viewfarm render dispatcher.
//!
//! Everything here is free of process spawning and network I/O so it can
//! be tested in isolation:
//!
//! - [`queue::JobQueue`]: joinable multi-consumer FIFO with sentinels.
//! - [`progress::ProgressCounter`]: shared processed-job counter.
//! - [`manifest::Manifest`]: job key to model path mapping.
//! - [`job`]: descriptors, output-directory derivation, outcomes.
//! - [`pool`]: GPU selection and worker slot assignment.

pub mod error;
pub mod job;
pub mod manifest;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod types;

pub use error::CoreError;
pub use job::{JobDescriptor, JobOutcome, JobRecord, RenderFailure};
pub use manifest::Manifest;
pub use progress::{ProgressCounter, ProgressSnapshot};
pub use queue::{JobQueue, QueueError, QueueItem};
pub use types::{GpuIndex, WorkerSlot};
