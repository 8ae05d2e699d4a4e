//! Artifact upload for rendered views.
//!
//! After a successful render a worker may push the model's output
//! directory to object storage. [`ArtifactUploader`] is the seam;
//! [`s3::S3Uploader`] is the production implementation.

pub mod s3;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use s3::S3Uploader;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("Failed to list {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Upload of '{key}' failed: {reason}")]
    Upload { key: String, reason: String },
}

/// Uploads the contents of a rendered output directory.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Upload every file under `local_dir`. Returns the number of objects
    /// written.
    async fn upload_dir(&self, local_dir: &Path) -> Result<usize, CloudError>;
}

/// Recursively list regular files under `root`, sorted for stable order.
pub async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, CloudError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| CloudError::Walk {
                path: dir.clone(),
                source,
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| CloudError::Walk {
                path: dir.clone(),
                source,
            })?
        {
            let file_type = entry.file_type().await.map_err(|source| CloudError::Walk {
                path: entry.path(),
                source,
            })?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Object key for `file` inside `local_dir`.
///
/// The key is `<prefix>/<dir name>/<relative path>` with `/` separators,
/// and no leading slash when `prefix` is empty.
pub fn object_key(prefix: &str, local_dir: &Path, file: &Path) -> String {
    let dir_name = local_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rel = file.strip_prefix(local_dir).unwrap_or(file);
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{dir_name}/{rel}")
    } else {
        format!("{prefix}/{dir_name}/{rel}")
    }
}
