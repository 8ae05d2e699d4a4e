//! `viewfarm` -- batch render dispatcher.
//!
//! Loads a manifest of 3D models, spawns `num_gpus * workers_per_gpu`
//! GPU-pinned workers and renders every model that does not already have
//! output under `--view-path-root`. See [`config`](viewfarm_worker::config)
//! for the full flag / environment reference.
//!
//! Exits `0` once every worker has been joined, even if individual renders
//! failed (those are logged). Exits `1` on configuration, manifest or GPU
//! detection errors, or when a worker is lost mid-run.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use viewfarm_cloud::S3Uploader;
use viewfarm_core::pool::GpuSelection;
use viewfarm_events::{log_events, EventBus, LogReporter, WebhookReporter};
use viewfarm_worker::config::{self, FarmArgs, ProgressTarget};
use viewfarm_worker::{gpu, BlenderRenderer, Dispatcher};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "viewfarm=info,viewfarm_worker=info,viewfarm_core=info,viewfarm_events=info,viewfarm_cloud=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = match FarmArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(config::usage_exit_code(&e));
        }
    };

    if let Err(e) = run(args).await {
        tracing::error!(error = %format!("{e:#}"), "Render dispatch aborted");
        std::process::exit(1);
    }
}

async fn run(args: FarmArgs) -> anyhow::Result<()> {
    let config = args.into_config().context("invalid configuration")?;

    let visible = match config.gpus {
        GpuSelection::All => gpu::visible_gpu_count(),
        GpuSelection::Count(_) => 0,
    };
    let gpu_count = config.gpus.resolve(visible)?;

    tracing::info!(
        manifest = %config.input_models_path.display(),
        gpu_count,
        workers_per_gpu = config.workers_per_gpu,
        blender = %config.blender_path.display(),
        view_path_root = %config.view_path_root.display(),
        "Starting viewfarm",
    );

    let renderer = BlenderRenderer::new(&config.blender_path, config.render_script.clone())
        .with_timeout(config.render_timeout);
    let events = Arc::new(EventBus::default());
    let event_log = tokio::spawn(log_events(events.subscribe()));
    let mut dispatcher = Dispatcher::new(config.dispatch(gpu_count), Arc::new(renderer))
        .with_events(Arc::clone(&events));

    if let Some(s3) = &config.s3 {
        let uploader = S3Uploader::from_env(s3.bucket.clone(), s3.prefix.clone()).await;
        tracing::info!(bucket = %uploader.bucket(), prefix = %s3.prefix, "S3 upload enabled");
        dispatcher = dispatcher.with_uploader(Arc::new(uploader));
    }

    match &config.progress {
        Some(ProgressTarget::Log) => {
            dispatcher = dispatcher.with_reporter(Arc::new(LogReporter));
        }
        Some(ProgressTarget::Webhook(url)) => {
            let reporter = WebhookReporter::new(url.clone())
                .context("failed to build progress webhook client")?;
            dispatcher = dispatcher.with_reporter(Arc::new(reporter));
        }
        None => {}
    }

    let summary = dispatcher
        .run(&config.input_models_path)
        .await
        .context("render dispatch failed")?;

    drop(dispatcher);
    drop(events);
    let logged = event_log.await.unwrap_or_default();
    tracing::debug!(events = logged, "Event log closed");

    for record in &summary.failed {
        if let viewfarm_core::JobOutcome::Failed { failure } = &record.outcome {
            tracing::warn!(job_key = %record.key, worker = %record.slot, reason = %failure, "Job failed");
        }
    }

    tracing::info!(
        total = summary.total,
        rendered = summary.rendered,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "Done",
    );
    Ok(())
}
