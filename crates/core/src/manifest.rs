//! Job manifest loading.
//!
//! A manifest is a JSON object mapping arbitrary job keys to model paths
//! relative to a model root:
//!
//! ```json
//! { "a": "m1.obj", "b": "chairs/m2.obj" }
//! ```
//!
//! The file is parsed once, fully, before any job is enqueued. Key order
//! from the file is preserved and becomes the enqueue order.

use std::path::Path;

use indexmap::IndexMap;

use crate::error::CoreError;
use crate::job::JobDescriptor;

/// Read-only mapping from job key to relative model path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: IndexMap<String, String>,
}

impl Manifest {
    /// Build a manifest from `(key, relative_path)` pairs.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Load and validate a manifest file.
    ///
    /// A missing/unreadable file, non-object JSON, non-string values and
    /// empty paths are all fatal.
    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| CoreError::ManifestIo {
                path: path.to_path_buf(),
                source,
            })?;
        let manifest = Self::parse(&raw).map_err(|reason| CoreError::ManifestFormat {
            path: path.to_path_buf(),
            reason,
        })?;
        tracing::debug!(path = %path.display(), entries = manifest.len(), "Manifest loaded");
        Ok(manifest)
    }

    fn parse(raw: &[u8]) -> Result<Self, String> {
        let entries: IndexMap<String, String> =
            serde_json::from_slice(raw).map_err(|e| e.to_string())?;
        if let Some((key, _)) = entries.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(format!("entry '{key}' has an empty model path"));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(key, relative_path)` in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Turn every entry into a [`JobDescriptor`], resolving model paths
    /// against `model_root` and output directories against `output_root`.
    pub fn jobs(&self, model_root: &Path, output_root: &Path) -> Vec<JobDescriptor> {
        self.iter()
            .map(|(key, rel)| JobDescriptor::new(key, model_root.join(rel), output_root))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
