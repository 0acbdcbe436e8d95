//! Status file persistence
//!
//! Reads and writes `status.json` with atomic writes.

use super::status::AppStatus;
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Loads and saves the [`AppStatus`] document
#[derive(Debug, Clone)]
pub struct StatusManager {
    /// Path to the status file
    path: PathBuf,
}

impl StatusManager {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the status file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted status
    ///
    /// A missing file yields the default status. So does an unreadable or
    /// corrupt one, after a warning: a damaged status must not block a run.
    pub async fn load(&self) -> AppStatus {
        match self.try_load().await {
            Ok(Some(status)) => status,
            Ok(None) => {
                debug!("No status file at {}", self.path.display());
                AppStatus::default()
            }
            Err(e) => {
                warn!("Ignoring status file {}: {e}", self.path.display());
                AppStatus::default()
            }
        }
    }

    /// Load the persisted status, reporting read or parse failures
    pub async fn try_load(&self) -> Result<Option<AppStatus>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::state(format!("Failed to read status file: {e}")))?;

        let status = serde_json::from_str(&contents)
            .map_err(|e| Error::state(format!("Failed to parse status file: {e}")))?;

        Ok(Some(status))
    }

    /// Save the status, replacing the previous file atomically
    pub async fn save(&self, status: &AppStatus) -> Result<()> {
        write_json_atomic(&self.path, status).await?;
        debug!("Saved status ({}) to {}", status.progress, self.path.display());
        Ok(())
    }
}

/// Write `value` as pretty JSON next to `path`, then rename it into place
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)
        .map_err(|e| Error::state(format!("Failed to serialize {}: {e}", path.display())))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::state(format!("Failed to create {}: {e}", parent.display())))?;
    }

    // Write to temp file first, then rename for atomicity
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, &contents)
        .await
        .map_err(|e| Error::state(format!("Failed to write {}: {e}", temp_path.display())))?;

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| Error::state(format!("Failed to replace {}: {e}", path.display())))?;

    Ok(())
}
