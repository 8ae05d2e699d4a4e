//! Joinable multi-consumer job queue.
//!
//! [`JobQueue`] is a FIFO shared via `Arc` between one producer (the
//! dispatcher) and many consumers (workers). It tracks how many pushed
//! jobs are still waiting for a [`JobQueue::mark_done`] call so the
//! producer can [`JobQueue::join`] on drain before telling workers to
//! stop.
//!
//! Shutdown sentinels ride the same transport but live outside the
//! accounting: they are never counted as unfinished and must not be
//! marked done.

use tokio::sync::{mpsc, watch, Mutex};

/// A value handed out by [`JobQueue::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem<T> {
    Job(T),
    /// No more work: the consumer should exit.
    Sentinel,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    /// `mark_done` was called more often than jobs were pushed.
    #[error("mark_done called more times than jobs were pushed")]
    TooManyDone,
}

pub struct JobQueue<T> {
    tx: mpsc::UnboundedSender<QueueItem<T>>,
    /// Held across `recv` so exactly one consumer waits on the channel at
    /// a time; the lock is FIFO-fair across waiting workers.
    rx: Mutex<mpsc::UnboundedReceiver<QueueItem<T>>>,
    /// Jobs pushed but not yet marked done.
    unfinished: watch::Sender<usize>,
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (unfinished, _) = watch::channel(0);
        Self {
            tx,
            rx: Mutex::new(rx),
            unfinished,
        }
    }

    /// Enqueue a job. Never blocks.
    pub fn push(&self, job: T) {
        // Count first so a fast consumer can never mark done before the
        // increment lands.
        self.unfinished.send_modify(|n| *n += 1);
        // The receiver lives inside `self`, so the channel is open.
        let _ = self.tx.send(QueueItem::Job(job));
    }

    /// Enqueue a shutdown sentinel. Not counted toward `unfinished`.
    pub fn push_sentinel(&self) {
        let _ = self.tx.send(QueueItem::Sentinel);
    }

    /// Wait for the next item.
    ///
    /// Concurrent callers are served one at a time, so no item is ever
    /// delivered twice.
    pub async fn pop(&self) -> QueueItem<T> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.unwrap_or(QueueItem::Sentinel)
    }

    /// Record that one popped job has been fully handled (rendered or
    /// skipped).
    pub fn mark_done(&self) -> Result<(), QueueError> {
        let mut result = Ok(());
        self.unfinished.send_if_modified(|n| {
            if *n == 0 {
                result = Err(QueueError::TooManyDone);
                false
            } else {
                *n -= 1;
                true
            }
        });
        result
    }

    /// Wait until every pushed job has had a matching `mark_done`.
    ///
    /// Returns immediately if nothing is outstanding.
    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender is owned by `self`, so this only returns on drain.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Number of jobs pushed but not yet marked done.
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fifo_order_single_consumer() {
        let queue = JobQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop().await, QueueItem::Job(1));
        assert_eq!(queue.pop().await, QueueItem::Job(2));
        assert_eq!(queue.pop().await, QueueItem::Job(3));
    }

    #[tokio::test]
    async fn join_on_empty_queue_returns_immediately() {
        let queue: JobQueue<u32> = JobQueue::new();
        tokio::time::timeout(Duration::from_secs(1), queue.join())
            .await
            .expect("join should not block on an empty queue");
    }

    #[tokio::test]
    async fn join_unblocks_only_after_last_mark_done() {
        const N: usize = 5;
        let queue = Arc::new(JobQueue::new());
        for i in 0..N {
            queue.push(i);
        }

        let joiner = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.join().await })
        };

        for i in 0..N {
            assert_eq!(queue.pop().await, QueueItem::Job(i));
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!joiner.is_finished(), "join returned before mark_done #{}", i + 1);
            queue.mark_done().expect("mark_done");
        }

        tokio::time::timeout(Duration::from_secs(1), joiner)
            .await
            .expect("join should return after the Nth mark_done")
            .expect("join task panicked");
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn sentinels_do_not_count_as_unfinished() {
        let queue: JobQueue<u32> = JobQueue::new();
        queue.push_sentinel();
        queue.push_sentinel();
        assert_eq!(queue.unfinished(), 0);
        assert_eq!(queue.pop().await, QueueItem::Sentinel);
        tokio::time::timeout(Duration::from_secs(1), queue.join())
            .await
            .expect("sentinels must not hold up join");
    }

    #[test]
    fn too_many_mark_done_is_an_error() {
        let queue = JobQueue::new();
        queue.push("a");
        assert_eq!(queue.mark_done(), Ok(()));
        assert_eq!(queue.mark_done(), Err(QueueError::TooManyDone));
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_share_an_item() {
        const ITEMS: usize = 200;
        const CONSUMERS: usize = 8;

        let queue = Arc::new(JobQueue::new());
        for i in 0..ITEMS {
            queue.push(i);
        }
        for _ in 0..CONSUMERS {
            queue.push_sentinel();
        }

        let mut handles = Vec::new();
        for _ in 0..CONSUMERS {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let QueueItem::Job(i) = queue.pop().await {
                    seen.push(i);
                    queue.mark_done().expect("mark_done");
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.expect("consumer panicked"));
        }

        let unique: HashSet<usize> = all.iter().copied().collect();
        assert_eq!(all.len(), ITEMS, "every item delivered exactly once");
        assert_eq!(unique.len(), ITEMS);
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let queue = Arc::new(JobQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());
        queue.push("late");
        let item = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("pop should wake up")
            .expect("consumer panicked");
        assert_eq!(item, QueueItem::Job("late"));
    }
}
