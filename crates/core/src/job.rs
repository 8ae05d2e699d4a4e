//! Render job descriptors and per-job outcomes.
//!
//! A [`JobDescriptor`] is built once by the dispatcher from a manifest
//! entry and consumed exactly once by whichever worker dequeues it. The
//! output directory is derived from the model's file stem so that the
//! dispatcher, every worker, and any later re-run agree on where a
//! model's renders live.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::WorkerSlot;

// ---------------------------------------------------------------------------
// Output location
// ---------------------------------------------------------------------------

/// Directory under `output_root` that holds the renders for `model_path`.
///
/// Named after the model's base filename without its extension, e.g.
/// `models/chair/m1.obj` renders into `<output_root>/m1`.
pub fn output_dir_for(model_path: &Path, output_root: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| model_path.as_os_str().to_os_string());
    output_root.join(stem)
}

/// Whether `dir` exists and contains at least one entry.
///
/// This is the only "already rendered" marker: there is no separate
/// record of completed jobs. An empty directory is left behind when a
/// render crashes before writing anything and does not count.
pub async fn has_rendered_output(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// JobDescriptor
// ---------------------------------------------------------------------------

/// One unit of work: render one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Manifest key the job was created from.
    pub key: String,
    /// Absolute (or root-relative) path of the source model.
    pub model_path: PathBuf,
    /// Where the renders for this model end up.
    pub output_dir: PathBuf,
}

impl JobDescriptor {
    pub fn new(key: impl Into<String>, model_path: PathBuf, output_root: &Path) -> Self {
        let output_dir = output_dir_for(&model_path, output_root);
        Self {
            key: key.into(),
            model_path,
            output_dir,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a render did not produce a clean exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderFailure {
    /// The renderer exited with a non-zero status.
    ExitCode { code: i32, stderr_tail: String },
    /// The renderer was killed by a signal (no exit code).
    Signal { stderr_tail: String },
    /// The renderer exceeded the configured render timeout and was killed.
    Timeout { elapsed_ms: u64 },
    /// The renderer could not be started at all.
    Launch(String),
    /// The output directory could not be created.
    OutputDir(String),
}

impl fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode { code, stderr_tail } => {
                write!(f, "renderer exited with code {code}")?;
                if !stderr_tail.is_empty() {
                    write!(f, ": {stderr_tail}")?;
                }
                Ok(())
            }
            Self::Signal { .. } => write!(f, "renderer terminated by signal"),
            Self::Timeout { elapsed_ms } => write!(f, "renderer timed out after {elapsed_ms}ms"),
            Self::Launch(reason) => write!(f, "renderer failed to launch: {reason}"),
            Self::OutputDir(reason) => write!(f, "output directory not created: {reason}"),
        }
    }
}

/// What happened to one dequeued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The renderer ran and exited cleanly.
    Rendered { elapsed_ms: u64 },
    /// Output was already present; nothing was invoked.
    Skipped,
    /// The renderer ran (or tried to) and failed. The job still counts
    /// as processed.
    Failed { failure: RenderFailure },
}

impl JobOutcome {
    /// Whether the worker did real work for this job (rendered or failed).
    ///
    /// Exactly these outcomes increment the progress counter.
    pub fn is_processed(&self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// A job outcome tagged with the job and the worker that handled it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: String,
    pub slot: WorkerSlot,
    pub outcome: JobOutcome,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dir_uses_file_stem() {
        let dir = output_dir_for(Path::new("/data/models/m1.obj"), Path::new("/views"));
        assert_eq!(dir, PathBuf::from("/views/m1"));
    }

    #[test]
    fn output_dir_keeps_inner_dots() {
        let dir = output_dir_for(Path::new("a/char.v2.vrm"), Path::new("out"));
        assert_eq!(dir, PathBuf::from("out/char.v2"));
    }

    #[test]
    fn output_dir_without_extension() {
        let dir = output_dir_for(Path::new("models/bare"), Path::new("out"));
        assert_eq!(dir, PathBuf::from("out/bare"));
    }

    #[test]
    fn descriptor_derives_output_dir() {
        let job = JobDescriptor::new("a", PathBuf::from("/m/m2.obj"), Path::new("/root"));
        assert_eq!(job.key, "a");
        assert_eq!(job.output_dir, PathBuf::from("/root/m2"));
    }

    #[tokio::test]
    async fn missing_dir_is_not_rendered() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(!has_rendered_output(&tmp.path().join("nope")).await);
    }

    #[tokio::test]
    async fn empty_dir_is_not_rendered() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("m1");
        std::fs::create_dir(&dir).expect("mkdir");
        assert!(!has_rendered_output(&dir).await);
    }

    #[tokio::test]
    async fn non_empty_dir_is_rendered() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("m1");
        std::fs::create_dir(&dir).expect("mkdir");
        std::fs::write(dir.join("000.png"), b"png").expect("write");
        assert!(has_rendered_output(&dir).await);
    }

    #[test]
    fn skipped_is_not_processed() {
        assert!(!JobOutcome::Skipped.is_processed());
        assert!(JobOutcome::Rendered { elapsed_ms: 1 }.is_processed());
        assert!(JobOutcome::Failed {
            failure: RenderFailure::Launch("boom".into())
        }
        .is_processed());
    }

    #[test]
    fn failure_display_includes_stderr_tail() {
        let failure = RenderFailure::ExitCode {
            code: 3,
            stderr_tail: "CUDA out of memory".into(),
        };
        assert_eq!(
            failure.to_string(),
            "renderer exited with code 3: CUDA out of memory"
        );
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(JobOutcome::Skipped).expect("serialize");
        assert_eq!(json["status"], "skipped");
    }
}
