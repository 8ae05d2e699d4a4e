//! GPU-pinned render worker.
//!
//! A [`Worker`] drains the shared [`JobQueue`] until it pops a sentinel.
//! For each job it either skips (output already present) or renders,
//! then marks the job done. Render failures are recorded, logged and
//! otherwise swallowed: the job still counts as processed and the loop
//! keeps going. No retries.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use viewfarm_cloud::ArtifactUploader;
use viewfarm_core::job::has_rendered_output;
use viewfarm_core::{
    JobDescriptor, JobOutcome, JobQueue, JobRecord, ProgressCounter, QueueItem, RenderFailure,
    WorkerSlot,
};
use viewfarm_events::{EventBus, FarmEvent};

use crate::renderer::{RenderBackend, RenderRequest};

/// State shared by every worker in a pool, handed over at spawn time.
pub struct WorkerContext {
    pub queue: Arc<JobQueue<JobDescriptor>>,
    pub counter: ProgressCounter,
    pub backend: Arc<dyn RenderBackend>,
    pub uploader: Option<Arc<dyn ArtifactUploader>>,
    pub output_root: PathBuf,
    /// Per-job outcomes flow back to the dispatcher here.
    pub records: mpsc::UnboundedSender<JobRecord>,
    pub events: Option<Arc<EventBus>>,
}

/// Per-worker tallies, returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub rendered: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// What a worker hands back after consuming its sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub slot: WorkerSlot,
    pub stats: WorkerStats,
}

pub struct Worker {
    slot: WorkerSlot,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub fn new(slot: WorkerSlot, ctx: Arc<WorkerContext>) -> Self {
        Self { slot, ctx }
    }

    pub fn slot(&self) -> WorkerSlot {
        self.slot
    }

    /// Pop and handle jobs until a sentinel arrives.
    pub async fn run(self) -> WorkerReport {
        tracing::info!(worker = %self.slot, "Worker started");
        let mut stats = WorkerStats::default();

        loop {
            let job = match self.ctx.queue.pop().await {
                QueueItem::Job(job) => job,
                QueueItem::Sentinel => break,
            };

            let outcome = self.handle(&job).await;
            match &outcome {
                JobOutcome::Rendered { .. } => stats.rendered += 1,
                JobOutcome::Skipped => stats.skipped += 1,
                JobOutcome::Failed { .. } => stats.failed += 1,
            }

            let record = JobRecord {
                key: job.key,
                slot: self.slot,
                outcome,
            };
            if let Some(events) = &self.ctx.events {
                events.publish(FarmEvent::JobFinished(record.clone()));
            }
            // The dispatcher may have stopped listening after losing a
            // worker; the record is then irrelevant.
            let _ = self.ctx.records.send(record);
        }

        tracing::info!(
            worker = %self.slot,
            rendered = stats.rendered,
            skipped = stats.skipped,
            failed = stats.failed,
            "Worker stopped",
        );
        if let Some(events) = &self.ctx.events {
            events.publish(FarmEvent::WorkerStopped { slot: self.slot });
        }
        WorkerReport {
            slot: self.slot,
            stats,
        }
    }

    /// Handle one dequeued job and mark it done exactly once.
    pub async fn handle(&self, job: &JobDescriptor) -> JobOutcome {
        if has_rendered_output(&job.output_dir).await {
            tracing::info!(
                worker = %self.slot,
                job_key = %job.key,
                output_dir = %job.output_dir.display(),
                "Output already rendered, skipping",
            );
            self.mark_done(job);
            return JobOutcome::Skipped;
        }

        let outcome = self.render(job).await;

        if let JobOutcome::Rendered { .. } = outcome {
            self.upload(job).await;
        }

        self.ctx.counter.increment();
        self.mark_done(job);
        outcome
    }

    async fn render(&self, job: &JobDescriptor) -> JobOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&job.output_dir).await {
            return self.failed(
                job,
                RenderFailure::OutputDir(format!("{}: {e}", job.output_dir.display())),
            );
        }

        let request = RenderRequest {
            model_path: job.model_path.clone(),
            gpu_index: self.slot.gpu_index,
            output_root: self.ctx.output_root.clone(),
        };

        tracing::info!(
            worker = %self.slot,
            job_key = %job.key,
            model = %job.model_path.display(),
            gpu_index = self.slot.gpu_index,
            "Rendering model",
        );

        match self.ctx.backend.render(&request).await {
            Ok(report) => {
                tracing::info!(
                    worker = %self.slot,
                    job_key = %job.key,
                    elapsed_ms = report.elapsed_ms,
                    "Render finished",
                );
                JobOutcome::Rendered {
                    elapsed_ms: report.elapsed_ms,
                }
            }
            Err(failure) => self.failed(job, failure),
        }
    }

    fn failed(&self, job: &JobDescriptor, failure: RenderFailure) -> JobOutcome {
        tracing::warn!(
            worker = %self.slot,
            job_key = %job.key,
            model = %job.model_path.display(),
            reason = %failure,
            "Render failed",
        );
        JobOutcome::Failed { failure }
    }

    async fn upload(&self, job: &JobDescriptor) {
        let Some(uploader) = &self.ctx.uploader else {
            return;
        };
        if let Err(e) = uploader.upload_dir(&job.output_dir).await {
            tracing::error!(
                worker = %self.slot,
                job_key = %job.key,
                error = %e,
                "Upload of rendered views failed",
            );
        }
    }

    fn mark_done(&self, job: &JobDescriptor) {
        if let Err(e) = self.ctx.queue.mark_done() {
            tracing::error!(worker = %self.slot, job_key = %job.key, error = %e, "Queue accounting error");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
