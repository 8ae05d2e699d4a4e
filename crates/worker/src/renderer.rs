//! External render invocation.
//!
//! [`RenderBackend`] is the seam between a worker and the host rendering
//! application. [`BlenderRenderer`] launches Blender in background mode
//! as an isolated child process, pinned to one GPU through
//! `CUDA_VISIBLE_DEVICES`:
//!
//! ```text
//! CUDA_VISIBLE_DEVICES=<gpu> <blender_path>/blender -b -P <script> -- \
//!     --object_path <model> --output_dir <output_root>
//! ```
//!
//! The child is spawned directly (no shell), so model paths never go
//! through shell word splitting.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use viewfarm_core::{GpuIndex, RenderFailure};

/// Bytes of stderr kept for failure reports. Earlier output is discarded
/// while the stream is still drained, so a chatty renderer never blocks
/// on a full pipe.
const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// Lines of stderr quoted in a [`RenderFailure`].
const STDERR_TAIL_LINES: usize = 20;

/// Environment variable that restricts the child to one GPU.
pub const GPU_ENV_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Parameters for rendering a single model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub model_path: PathBuf,
    pub gpu_index: GpuIndex,
    /// Shared output root. The renderer writes into
    /// `<output_root>/<model stem>/`.
    pub output_root: PathBuf,
}

/// Successful render summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderReport {
    pub elapsed_ms: u64,
}

/// Renders one model. Implementations must not panic on renderer
/// failure; every failure mode maps onto a [`RenderFailure`].
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderReport, RenderFailure>;
}

// ---------------------------------------------------------------------------
// BlenderRenderer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BlenderRenderer {
    executable: PathBuf,
    script: PathBuf,
    /// `None` waits for the renderer indefinitely.
    timeout: Option<Duration>,
}

impl BlenderRenderer {
    /// `install_root` is the Blender installation directory containing
    /// the `blender` binary.
    pub fn new(install_root: &Path, script: impl Into<PathBuf>) -> Self {
        Self::with_executable(install_root.join("blender"), script)
    }

    /// Use an explicit executable path instead of `<root>/blender`.
    pub fn with_executable(executable: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            script: script.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Command-line arguments passed to the renderer for `request`.
    pub fn args(&self, request: &RenderRequest) -> Vec<OsString> {
        vec![
            "-b".into(),
            "-P".into(),
            self.script.clone().into_os_string(),
            "--".into(),
            "--object_path".into(),
            request.model_path.clone().into_os_string(),
            "--output_dir".into(),
            request.output_root.clone().into_os_string(),
        ]
    }

    fn command(&self, request: &RenderRequest) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(self.args(request))
            .env(GPU_ENV_VAR, request.gpu_index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child (timeout, worker shutdown) kills it.
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RenderBackend for BlenderRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderReport, RenderFailure> {
        let start = Instant::now();

        tracing::debug!(
            executable = %self.executable.display(),
            model = %request.model_path.display(),
            gpu_index = request.gpu_index,
            "Launching renderer",
        );

        let mut child = self
            .command(request)
            .spawn()
            .map_err(|e| RenderFailure::Launch(format!("{}: {e}", self.executable.display())))?;

        // Drain both pipes concurrently with `wait()`.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move { read_tail(stdout, 0).await });
        let stderr_task = tokio::spawn(async move { read_tail(stderr, STDERR_TAIL_BYTES).await });

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    // `child` is dropped here, which kills the process.
                    return Err(RenderFailure::Timeout {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    });
                }
            },
            None => child.wait().await,
        }
        .map_err(|e| RenderFailure::Launch(format!("wait failed: {e}")))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let (stdout_len, _) = stdout_task.await.unwrap_or_default();
        let (_, stderr_bytes) = stderr_task.await.unwrap_or_default();
        tracing::trace!(stdout_bytes = stdout_len, elapsed_ms, "Renderer exited");

        if status.success() {
            return Ok(RenderReport { elapsed_ms });
        }

        let stderr_tail = tail_lines(&String::from_utf8_lossy(&stderr_bytes), STDERR_TAIL_LINES);
        Err(match status.code() {
            Some(code) => RenderFailure::ExitCode { code, stderr_tail },
            None => RenderFailure::Signal { stderr_tail },
        })
    }
}

/// Read `handle` to EOF, returning the total byte count and the last
/// `keep` bytes.
async fn read_tail<R: AsyncRead + Unpin>(handle: Option<R>, keep: usize) -> (usize, Vec<u8>) {
    let mut total = 0usize;
    let mut tail = Vec::new();
    let Some(mut h) = handle else {
        return (total, tail);
    };

    let mut chunk = [0u8; 8192];
    loop {
        match h.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total += n;
                if keep > 0 {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > keep {
                        let excess = tail.len() - keep;
                        tail.drain(..excess);
                    }
                }
            }
        }
    }
    (total, tail)
}

/// Last `max_lines` non-empty lines of `text`, joined with `\n`.
fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
