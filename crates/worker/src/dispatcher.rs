//! Batch render dispatcher.
//!
//! [`Dispatcher::run`] drives one batch end to end:
//!
//! 1. load the manifest (fatal on error, before any worker exists);
//! 2. spawn `gpu_count * workers_per_gpu` workers, worker `i` pinned to
//!    GPU `i / workers_per_gpu`;
//! 3. enqueue one job per manifest entry;
//! 4. optionally poll the progress counter and report snapshots;
//! 5. wait for drain (every job marked done);
//! 6. push one sentinel per worker and join them all.
//!
//! Sentinels are only pushed after drain is observed. Pushing them
//! earlier would let a worker exit while jobs are still queued.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinSet};
use viewfarm_cloud::ArtifactUploader;
use viewfarm_core::{
    pool, CoreError, JobOutcome, JobQueue, JobRecord, Manifest, ProgressCounter, ProgressSnapshot,
    WorkerSlot,
};
use viewfarm_events::{EventBus, ProgressReporter};

use crate::renderer::RenderBackend;
use crate::worker::{Worker, WorkerContext, WorkerReport};

/// Default interval between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Error / summary
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Pool sizing rejected before any worker was spawned.
    #[error(transparent)]
    Config(CoreError),

    /// Manifest missing or malformed.
    #[error(transparent)]
    Manifest(CoreError),

    /// A worker left its loop before shutdown. Its in-flight job can
    /// never be marked done, so waiting for drain would hang.
    #[error("{slot} lost before shutdown: {reason}")]
    WorkerLost { slot: WorkerSlot, reason: String },
}

/// Aggregate result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Jobs enqueued (manifest entries).
    pub total: u64,
    pub worker_count: u32,
    pub rendered: u64,
    pub skipped: u64,
    /// Every job whose render failed, with the reason.
    pub failed: Vec<JobRecord>,
    /// Final progress counter value.
    pub completed: u64,
}

impl DispatchSummary {
    /// Jobs a worker actually rendered or attempted.
    pub fn processed(&self) -> u64 {
        self.rendered + self.failed.len() as u64
    }

    fn record(&mut self, record: JobRecord) {
        match record.outcome {
            JobOutcome::Rendered { .. } => self.rendered += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::Failed { .. } => self.failed.push(record),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Pool sizing and filesystem roots for a batch.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers_per_gpu: u32,
    /// Already resolved; "all GPUs" is looked up before construction.
    pub gpu_count: u32,
    /// Manifest paths are relative to this directory.
    pub model_root: PathBuf,
    /// Renders land in `<output_root>/<model stem>/`.
    pub output_root: PathBuf,
    pub progress_interval: Duration,
}

pub struct Dispatcher {
    config: DispatchConfig,
    backend: Arc<dyn RenderBackend>,
    uploader: Option<Arc<dyn ArtifactUploader>>,
    reporter: Option<Arc<dyn ProgressReporter>>,
    events: Option<Arc<EventBus>>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, backend: Arc<dyn RenderBackend>) -> Self {
        Self {
            config,
            backend,
            uploader: None,
            reporter: None,
            events: None,
        }
    }

    /// Upload each successfully rendered output directory.
    pub fn with_uploader(mut self, uploader: Arc<dyn ArtifactUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Report progress snapshots every `progress_interval`.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Publish per-job and per-worker events.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Load the manifest at `manifest_path` and render every entry.
    pub async fn run(&self, manifest_path: &Path) -> Result<DispatchSummary, DispatchError> {
        let manifest = Manifest::load(manifest_path)
            .await
            .map_err(DispatchError::Manifest)?;
        self.run_manifest(&manifest).await
    }

    /// Render every entry of an already-loaded manifest.
    pub async fn run_manifest(&self, manifest: &Manifest) -> Result<DispatchSummary, DispatchError> {
        let slots = pool::worker_slots(self.config.gpu_count, self.config.workers_per_gpu)
            .map_err(DispatchError::Config)?;
        let worker_count = slots.len() as u32;
        let jobs = manifest.jobs(&self.config.model_root, &self.config.output_root);
        let total = jobs.len() as u64;

        tracing::info!(
            gpu_count = self.config.gpu_count,
            workers_per_gpu = self.config.workers_per_gpu,
            worker_count,
            total,
            "Starting render dispatch",
        );

        let queue = Arc::new(JobQueue::new());
        let counter = ProgressCounter::new();
        let (records_tx, mut records_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            counter: counter.clone(),
            backend: Arc::clone(&self.backend),
            uploader: self.uploader.clone(),
            output_root: self.config.output_root.clone(),
            records: records_tx,
            events: self.events.clone(),
        });

        let mut workers = WorkerSet::default();
        for slot in slots {
            workers.spawn(slot, Worker::new(slot, Arc::clone(&ctx)).run());
        }
        drop(ctx);

        for job in jobs {
            tracing::debug!(job_key = %job.key, model = %job.model_path.display(), "Enqueue job");
            queue.push(job);
        }

        let progress = self.reporter.as_ref().map(|reporter| {
            let (stop_tx, stop_rx) = oneshot::channel();
            let task = tokio::spawn(poll_progress(
                Arc::clone(reporter),
                counter.clone(),
                total,
                self.config.progress_interval,
                stop_rx,
            ));
            (stop_tx, task)
        });

        let drained = wait_for_drain(&queue, &mut workers).await;

        if let Some((stop_tx, task)) = progress {
            let _ = stop_tx.send(());
            let _ = task.await;
            if drained.is_ok() {
                if let Some(reporter) = &self.reporter {
                    reporter.report(counter.snapshot(total).into()).await;
                }
            }
        }

        if let Err(e) = drained {
            workers.tasks.abort_all();
            return Err(e);
        }

        tracing::info!(worker_count, "All jobs drained, stopping workers");
        for _ in 0..worker_count {
            queue.push_sentinel();
        }

        let mut reports: Vec<WorkerReport> = Vec::with_capacity(worker_count as usize);
        while let Some(joined) = workers.tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => return Err(workers.lost(e)),
            }
        }

        let mut summary = DispatchSummary {
            total,
            worker_count,
            completed: counter.value(),
            ..Default::default()
        };
        while let Ok(record) = records_rx.try_recv() {
            summary.record(record);
        }

        tracing::info!(
            total,
            rendered = summary.rendered,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            workers_joined = reports.len(),
            "Render dispatch complete",
        );
        Ok(summary)
    }
}

/// Worker tasks, with the slot each task id was spawned for.
#[derive(Default)]
struct WorkerSet {
    tasks: JoinSet<WorkerReport>,
    slots: HashMap<task::Id, WorkerSlot>,
}

impl WorkerSet {
    fn spawn<F>(&mut self, slot: WorkerSlot, fut: F)
    where
        F: std::future::Future<Output = WorkerReport> + Send + 'static,
    {
        let handle = self.tasks.spawn(fut);
        self.slots.insert(handle.id(), slot);
    }

    /// Resolve a failed worker task back to its slot.
    fn lost(&self, error: JoinError) -> DispatchError {
        // Every task in the set was spawned through `spawn`, so the id is known.
        let slot = self.slots.get(&error.id()).copied().unwrap_or(WorkerSlot {
            gpu_index: 0,
            ordinal: u32::MAX,
        });
        let reason = if error.is_panic() {
            let payload = error.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|m| m.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned());
            match message {
                Some(m) => format!("panicked: {m}"),
                None => "panicked".to_string(),
            }
        } else {
            error.to_string()
        };
        DispatchError::WorkerLost { slot, reason }
    }
}

/// Wait until every job is marked done, unless a worker exits first.
///
/// Workers only leave their loop on a sentinel, and none have been sent
/// yet, so any worker finishing here was lost.
async fn wait_for_drain<T>(
    queue: &JobQueue<T>,
    workers: &mut WorkerSet,
) -> Result<(), DispatchError> {
    tokio::select! {
        biased;
        _ = queue.join() => Ok(()),
        Some(joined) = workers.tasks.join_next() => {
            let error = match joined {
                Ok(report) => DispatchError::WorkerLost {
                    slot: report.slot,
                    reason: "exited without a sentinel".to_string(),
                },
                Err(e) => workers.lost(e),
            };
            tracing::error!(
                unfinished = queue.unfinished(),
                error = %error,
                "Worker lost while jobs were outstanding",
            );
            Err(error)
        }
    }
}

/// Report a snapshot every `interval` until all jobs are counted or the
/// dispatcher signals drain.
///
/// Skipped jobs never increment the counter, so `completed == total` is
/// not guaranteed; the stop signal covers that case.
async fn poll_progress(
    reporter: Arc<dyn ProgressReporter>,
    counter: ProgressCounter,
    total: u64,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; report after a full interval.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let snapshot: ProgressSnapshot = counter.snapshot(total);
                reporter.report(snapshot.into()).await;
                if snapshot.is_complete() {
                    break;
                }
            }
        }
    }
}
