//! Filesystem-based state storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::state::SyncState;
use crate::store::StateStore;

/// Filesystem implementation of the StateStore trait.
///
/// Stores the full sync state as a single JSON file. Writes go through a
/// temporary file in the same directory followed by a rename, so a crash
/// mid-persist never leaves a truncated state file behind.
pub struct FilesystemStore {
    path: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FilesystemStore {
    async fn load(&self) -> Result<Option<SyncState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading state file {}", self.path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("parsing state file {}", self.path.display()))?;
        Ok(Some(state))
    }

    async fn persist(&self, state: &SyncState) -> Result<()> {
        let parent = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                std::fs::create_dir_all(dir)?;
                dir
            }
            _ => Path::new("."),
        };

        let tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&tmp, state)?;
        tmp.as_file().sync_all()?;
        // Rename onto the final path; PersistError is unwrapped to its
        // io::Error so it can cross the anyhow boundary.
        tmp.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!("Persisted sync state to {}", self.path.display());
        Ok(())
    }
}
