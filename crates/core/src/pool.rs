//! Worker pool sizing and GPU slot assignment.
//!
//! Pure functions used by the dispatcher to turn `(num_gpus,
//! workers_per_gpu)` into a concrete list of [`WorkerSlot`]s. GPU
//! discovery itself (NVML) happens outside this crate and is passed in
//! as a plain count.

use crate::error::CoreError;
use crate::types::{GpuIndex, WorkerSlot};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Value of `num_gpus` that means "every GPU visible to the host".
pub const ALL_GPUS: i32 = -1;

/// Upper bound on workers sharing one GPU. Anything beyond this is almost
/// certainly a typo and would exhaust VRAM long before it helped.
pub const MAX_WORKERS_PER_GPU: u32 = 64;

// ---------------------------------------------------------------------------
// GPU selection
// ---------------------------------------------------------------------------

/// How many GPUs the pool should span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuSelection {
    /// Use every GPU the environment reports.
    All,
    /// Use exactly this many GPUs, indices `0..n`.
    Count(u32),
}

impl GpuSelection {
    /// Parse the CLI form where `-1` means all GPUs.
    pub fn from_arg(num_gpus: i32) -> Result<Self, CoreError> {
        match num_gpus {
            ALL_GPUS => Ok(Self::All),
            n if n > 0 => Ok(Self::Count(n as u32)),
            n => Err(CoreError::Validation(format!(
                "num_gpus must be positive or {ALL_GPUS} (all GPUs), got {n}"
            ))),
        }
    }

    /// Resolve against the number of GPUs the host actually exposes.
    ///
    /// `visible` is only consulted for [`GpuSelection::All`]; an explicit
    /// count is trusted as given. A result of zero is a pre-flight error.
    pub fn resolve(self, visible: u32) -> Result<u32, CoreError> {
        let count = match self {
            Self::All => visible,
            Self::Count(n) => n,
        };
        if count == 0 {
            return Err(CoreError::Validation(
                "No GPUs available: GPU count resolved to zero".to_string(),
            ));
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Slot assignment
// ---------------------------------------------------------------------------

/// Validate a `workers_per_gpu` value.
pub fn validate_workers_per_gpu(workers_per_gpu: u32) -> Result<(), CoreError> {
    if workers_per_gpu == 0 {
        return Err(CoreError::Validation(
            "workers_per_gpu must be at least 1".to_string(),
        ));
    }
    if workers_per_gpu > MAX_WORKERS_PER_GPU {
        return Err(CoreError::Validation(format!(
            "workers_per_gpu must not exceed {MAX_WORKERS_PER_GPU}"
        )));
    }
    Ok(())
}

/// GPU a worker with the given ordinal is pinned to.
pub fn gpu_for_ordinal(ordinal: u32, workers_per_gpu: u32) -> GpuIndex {
    ordinal / workers_per_gpu
}

/// Build every worker slot for `gpu_count * workers_per_gpu` workers.
///
/// Slots are ordered by ordinal, so the first `workers_per_gpu` slots land
/// on GPU 0, the next batch on GPU 1, and so on.
pub fn worker_slots(gpu_count: u32, workers_per_gpu: u32) -> Result<Vec<WorkerSlot>, CoreError> {
    if gpu_count == 0 {
        return Err(CoreError::Validation(
            "gpu_count must be at least 1".to_string(),
        ));
    }
    validate_workers_per_gpu(workers_per_gpu)?;

    let worker_count = gpu_count
        .checked_mul(workers_per_gpu)
        .ok_or_else(|| CoreError::Validation("worker count overflows u32".to_string()))?;

    Ok((0..worker_count)
        .map(|ordinal| WorkerSlot {
            gpu_index: gpu_for_ordinal(ordinal, workers_per_gpu),
            ordinal,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn minus_one_means_all_gpus() {
        assert_eq!(GpuSelection::from_arg(-1).unwrap(), GpuSelection::All);
        assert_eq!(GpuSelection::from_arg(3).unwrap(), GpuSelection::Count(3));
    }

    #[test]
    fn zero_and_other_negatives_rejected() {
        assert_matches!(GpuSelection::from_arg(0), Err(CoreError::Validation(_)));
        assert_matches!(GpuSelection::from_arg(-2), Err(CoreError::Validation(_)));
    }

    #[test]
    fn all_resolves_to_visible_count() {
        assert_eq!(GpuSelection::All.resolve(4).unwrap(), 4);
        assert_eq!(GpuSelection::Count(2).resolve(8).unwrap(), 2);
    }

    #[test]
    fn zero_visible_gpus_is_fatal() {
        assert_matches!(GpuSelection::All.resolve(0), Err(CoreError::Validation(_)));
    }

    #[test]
    fn slots_are_grouped_by_gpu() {
        let slots = worker_slots(2, 3).unwrap();
        let gpus: Vec<u32> = slots.iter().map(|s| s.gpu_index).collect();
        assert_eq!(gpus, vec![0, 0, 0, 1, 1, 1]);
        let ordinals: Vec<u32> = slots.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn single_gpu_two_workers() {
        let slots = worker_slots(1, 2).unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.gpu_index == 0));
    }

    #[test]
    fn zero_workers_per_gpu_rejected() {
        assert_matches!(worker_slots(1, 0), Err(CoreError::Validation(_)));
        assert_matches!(
            worker_slots(1, MAX_WORKERS_PER_GPU + 1),
            Err(CoreError::Validation(_))
        );
    }
}
