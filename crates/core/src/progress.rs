//! Shared progress counter and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Count of jobs a worker actually processed (rendered or failed).
///
/// Cloning shares the underlying cell. There is no decrement; skipped
/// jobs never touch the counter. Observability only: nothing decides
/// correctness based on this value.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    completed: Arc<AtomicU64>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add one and return the new value.
    pub fn increment(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn snapshot(&self, total: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.value(),
            total,
        }
    }
}

/// Point-in-time progress, as handed to reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub total: u64,
}

impl ProgressSnapshot {
    /// `completed / total`, or `1.0` for an empty batch.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_cell() {
        let counter = ProgressCounter::new();
        let other = counter.clone();
        assert_eq!(counter.increment(), 1);
        assert_eq!(other.increment(), 2);
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn fraction_of_empty_batch_is_one() {
        let snap = ProgressSnapshot {
            completed: 0,
            total: 0,
        };
        assert_eq!(snap.fraction(), 1.0);
        assert!(snap.is_complete());
    }

    #[test]
    fn fraction_is_ratio() {
        let counter = ProgressCounter::new();
        counter.increment();
        let snap = counter.snapshot(4);
        assert_eq!(snap.fraction(), 0.25);
        assert!(!snap.is_complete());
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let counter = ProgressCounter::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    counter.increment();
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert_eq!(counter.value(), 1600);
    }
}
