//! Command-line and environment configuration.
//!
//! Every flag can also be set through a `VIEWFARM_*` environment
//! variable (a `.env` file is honoured via `dotenvy`):
//!
//! | Flag                       | Env var                            | Default                       |
//! |----------------------------|------------------------------------|-------------------------------|
//! | `--workers-per-gpu`        | `VIEWFARM_WORKERS_PER_GPU`         | required                      |
//! | `--input-models-path`      | `VIEWFARM_INPUT_MODELS_PATH`       | required                      |
//! | `--num-gpus`               | `VIEWFARM_NUM_GPUS`                | `-1` (all visible GPUs)       |
//! | `--upload-to-s3`           | `VIEWFARM_UPLOAD_TO_S3`            | off                           |
//! | `--s3-bucket`              | `VIEWFARM_S3_BUCKET`               | --                            |
//! | `--s3-prefix`              | `VIEWFARM_S3_PREFIX`               | empty                         |
//! | `--report-progress`        | `VIEWFARM_REPORT_PROGRESS`         | off                           |
//! | `--progress-webhook-url`   | `VIEWFARM_PROGRESS_WEBHOOK_URL`    | -- (log only)                 |
//! | `--progress-interval-secs` | `VIEWFARM_PROGRESS_INTERVAL_SECS`  | `5`                           |
//! | `--blender-path`           | `VIEWFARM_BLENDER_PATH`            | `/opt/blender`                |
//! | `--render-script`          | `VIEWFARM_RENDER_SCRIPT`           | `scripts/blender_script.py`   |
//! | `--view-path-root`         | `VIEWFARM_VIEW_PATH_ROOT`          | `./views`                     |
//! | `--model-root`             | `VIEWFARM_MODEL_ROOT`              | `./models`                    |
//! | `--render-timeout-secs`    | `VIEWFARM_RENDER_TIMEOUT_SECS`     | -- (wait indefinitely)        |

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use viewfarm_core::pool::{self, GpuSelection};
use viewfarm_core::CoreError;

use crate::dispatcher::{DispatchConfig, DEFAULT_PROGRESS_INTERVAL};

/// Raw command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "viewfarm",
    version,
    about = "Render a manifest of 3D models across a pool of GPU workers"
)]
pub struct FarmArgs {
    /// Number of workers per GPU.
    #[arg(long, env = "VIEWFARM_WORKERS_PER_GPU")]
    pub workers_per_gpu: u32,

    /// JSON file mapping job keys to model paths relative to --model-root.
    #[arg(long, env = "VIEWFARM_INPUT_MODELS_PATH")]
    pub input_models_path: PathBuf,

    /// Number of GPUs to use; -1 means every visible GPU.
    #[arg(
        long,
        env = "VIEWFARM_NUM_GPUS",
        default_value_t = pool::ALL_GPUS,
        allow_negative_numbers = true
    )]
    pub num_gpus: i32,

    /// Upload each rendered output directory to S3.
    #[arg(long, env = "VIEWFARM_UPLOAD_TO_S3")]
    pub upload_to_s3: bool,

    /// Target bucket for --upload-to-s3.
    #[arg(long, env = "VIEWFARM_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix for uploaded objects.
    #[arg(long, env = "VIEWFARM_S3_PREFIX", default_value = "")]
    pub s3_prefix: String,

    /// Periodically report {completed, total, fraction}.
    #[arg(long, env = "VIEWFARM_REPORT_PROGRESS")]
    pub report_progress: bool,

    /// POST progress reports to this URL instead of only logging them.
    #[arg(long, env = "VIEWFARM_PROGRESS_WEBHOOK_URL")]
    pub progress_webhook_url: Option<String>,

    /// Seconds between progress reports.
    #[arg(
        long,
        env = "VIEWFARM_PROGRESS_INTERVAL_SECS",
        default_value_t = DEFAULT_PROGRESS_INTERVAL.as_secs()
    )]
    pub progress_interval_secs: u64,

    /// Blender installation directory (contains the `blender` binary).
    #[arg(long, env = "VIEWFARM_BLENDER_PATH", default_value = "/opt/blender")]
    pub blender_path: PathBuf,

    /// Python script Blender runs for each model.
    #[arg(
        long,
        env = "VIEWFARM_RENDER_SCRIPT",
        default_value = "scripts/blender_script.py"
    )]
    pub render_script: PathBuf,

    /// Root directory for rendered views.
    #[arg(long, env = "VIEWFARM_VIEW_PATH_ROOT", default_value = "./views")]
    pub view_path_root: PathBuf,

    /// Directory manifest paths are resolved against.
    #[arg(long, env = "VIEWFARM_MODEL_ROOT", default_value = "./models")]
    pub model_root: PathBuf,

    /// Kill a render after this many seconds.
    #[arg(long, env = "VIEWFARM_RENDER_TIMEOUT_SECS")]
    pub render_timeout_secs: Option<u64>,
}

/// Where progress snapshots go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressTarget {
    Log,
    Webhook(String),
}

/// Where rendered views are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Target {
    pub bucket: String,
    pub prefix: String,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct FarmConfig {
    pub workers_per_gpu: u32,
    pub input_models_path: PathBuf,
    pub gpus: GpuSelection,
    pub s3: Option<S3Target>,
    pub progress: Option<ProgressTarget>,
    pub progress_interval: Duration,
    pub blender_path: PathBuf,
    pub render_script: PathBuf,
    pub view_path_root: PathBuf,
    pub model_root: PathBuf,
    pub render_timeout: Option<Duration>,
}

impl FarmArgs {
    /// Validate and convert into typed configuration.
    pub fn into_config(self) -> Result<FarmConfig, CoreError> {
        pool::validate_workers_per_gpu(self.workers_per_gpu)?;
        let gpus = GpuSelection::from_arg(self.num_gpus)?;

        let s3 = if self.upload_to_s3 {
            let bucket = self.s3_bucket.filter(|b| !b.trim().is_empty()).ok_or_else(|| {
                CoreError::Validation("--upload-to-s3 requires --s3-bucket".to_string())
            })?;
            Some(S3Target {
                bucket,
                prefix: self.s3_prefix,
            })
        } else {
            None
        };

        let progress = match (self.report_progress, self.progress_webhook_url) {
            (_, Some(url)) => Some(ProgressTarget::Webhook(url)),
            (true, None) => Some(ProgressTarget::Log),
            (false, None) => None,
        };

        if self.progress_interval_secs == 0 {
            return Err(CoreError::Validation(
                "progress_interval_secs must be at least 1".to_string(),
            ));
        }

        let render_timeout = match self.render_timeout_secs {
            Some(0) => {
                return Err(CoreError::Validation(
                    "render_timeout_secs must be at least 1".to_string(),
                ))
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(FarmConfig {
            workers_per_gpu: self.workers_per_gpu,
            input_models_path: self.input_models_path,
            gpus,
            s3,
            progress,
            progress_interval: Duration::from_secs(self.progress_interval_secs),
            blender_path: self.blender_path,
            render_script: self.render_script,
            view_path_root: self.view_path_root,
            model_root: self.model_root,
            render_timeout,
        })
    }
}

/// Process exit code for an argument parsing error.
///
/// `--help` and `--version` succeed; every real usage error is a fatal
/// pre-flight error and exits `1`, like any other configuration error.
pub fn usage_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

impl FarmConfig {
    /// Dispatcher settings once the GPU count is known.
    pub fn dispatch(&self, gpu_count: u32) -> DispatchConfig {
        DispatchConfig {
            workers_per_gpu: self.workers_per_gpu,
            gpu_count,
            model_root: self.model_root.clone(),
            output_root: self.view_path_root.clone(),
            progress_interval: self.progress_interval,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(extra: &[&str]) -> FarmArgs {
        let mut argv = vec![
            "viewfarm",
            "--workers-per-gpu",
            "2",
            "--input-models-path",
            "models.json",
        ];
        argv.extend_from_slice(extra);
        FarmArgs::try_parse_from(argv).expect("args should parse")
    }

    #[test]
    fn defaults_select_all_gpus_and_no_integrations() {
        let config = parse(&[]).into_config().expect("valid config");
        assert_eq!(config.workers_per_gpu, 2);
        assert_eq!(config.gpus, GpuSelection::All);
        assert!(config.s3.is_none());
        assert!(config.progress.is_none());
        assert_eq!(config.progress_interval, DEFAULT_PROGRESS_INTERVAL);
        assert!(config.render_timeout.is_none());
    }

    #[test]
    fn explicit_gpu_count_and_negative_one() {
        let config = parse(&["--num-gpus", "3"]).into_config().expect("valid");
        assert_eq!(config.gpus, GpuSelection::Count(3));
        let config = parse(&["--num-gpus", "-1"]).into_config().expect("valid");
        assert_eq!(config.gpus, GpuSelection::All);
    }

    #[test]
    fn upload_without_bucket_is_rejected() {
        let result = parse(&["--upload-to-s3"]).into_config();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("s3-bucket"));
    }

    #[test]
    fn upload_with_bucket() {
        let config = parse(&["--upload-to-s3", "--s3-bucket", "renders", "--s3-prefix", "v1"])
            .into_config()
            .expect("valid");
        assert_eq!(
            config.s3,
            Some(S3Target {
                bucket: "renders".into(),
                prefix: "v1".into()
            })
        );
    }

    #[test]
    fn progress_targets() {
        let config = parse(&["--report-progress"]).into_config().expect("valid");
        assert_eq!(config.progress, Some(ProgressTarget::Log));

        let config = parse(&["--progress-webhook-url", "http://dash/progress"])
            .into_config()
            .expect("valid");
        assert_eq!(
            config.progress,
            Some(ProgressTarget::Webhook("http://dash/progress".into()))
        );
    }

    #[test]
    fn zero_workers_and_zero_intervals_rejected() {
        let args = FarmArgs::try_parse_from([
            "viewfarm",
            "--workers-per-gpu",
            "0",
            "--input-models-path",
            "m.json",
        ])
        .expect("parse");
        assert_matches!(args.into_config(), Err(CoreError::Validation(_)));

        assert_matches!(
            parse(&["--progress-interval-secs", "0"]).into_config(),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            parse(&["--render-timeout-secs", "0"]).into_config(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn dispatch_config_carries_roots() {
        let config = parse(&["--view-path-root", "/out", "--model-root", "/in"])
            .into_config()
            .expect("valid");
        let dispatch = config.dispatch(4);
        assert_eq!(dispatch.gpu_count, 4);
        assert_eq!(dispatch.output_root, PathBuf::from("/out"));
        assert_eq!(dispatch.model_root, PathBuf::from("/in"));
    }

    #[test]
    fn missing_required_args_fail_to_parse() {
        let err = FarmArgs::try_parse_from(["viewfarm"]).expect_err("missing args");
        assert_eq!(usage_exit_code(&err), 1);
    }

    #[test]
    fn invalid_values_exit_one_and_help_exits_zero() {
        let err = FarmArgs::try_parse_from([
            "viewfarm",
            "--workers-per-gpu",
            "many",
            "--input-models-path",
            "m.json",
        ])
        .expect_err("non-numeric workers");
        assert_eq!(usage_exit_code(&err), 1);

        let help = FarmArgs::try_parse_from(["viewfarm", "--help"]).expect_err("help short-circuits");
        assert_eq!(usage_exit_code(&help), 0);
    }
}
