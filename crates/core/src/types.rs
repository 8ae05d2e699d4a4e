use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a physical GPU as exposed to the render subprocess through
/// `CUDA_VISIBLE_DEVICES`.
pub type GpuIndex = u32;

/// Fixed (GPU, ordinal) binding of a worker for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerSlot {
    pub gpu_index: GpuIndex,
    /// Position of the worker in the pool, `0..worker_count`.
    pub ordinal: u32,
}

impl fmt::Display for WorkerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}@gpu{}", self.ordinal, self.gpu_index)
    }
}
