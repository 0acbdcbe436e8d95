//! Crash-safe index of outline results awaiting detail loads
//!
//! Each form that finished outline extraction gets a group listing the request
//! ids still to be loaded. Ids leave the group as they are stored; the group
//! leaves the index once it is empty, and the file itself is removed once no
//! group remains.

use super::manager::write_json_atomic;
use crate::error::{Error, Result};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pending work for one form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Whether the outline for this form was fetched completely
    #[serde(default)]
    pub success: bool,

    /// Request ids not yet durably loaded, in discovery order
    #[serde(default)]
    pub ids: Vec<String>,

    /// Access time to record once the group drains
    #[serde(default, rename = "lastAccess")]
    pub last_access: Option<Timestamp>,
}

/// File-backed map of form id to [`GroupEntry`]
#[derive(Debug, Clone)]
pub struct TempIndex {
    path: PathBuf,
    groups: BTreeMap<i64, GroupEntry>,
}

impl TempIndex {
    /// An empty index that persists to `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            groups: BTreeMap::new(),
        }
    }

    /// Load the index at `path`, starting empty if it is missing or corrupt
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let mut index = Self::new(path);
        if !index.path.exists() {
            return index;
        }
        match read_groups(&index.path).await {
            Ok(groups) => {
                debug!(
                    "Loaded {} pending groups from {}",
                    groups.len(),
                    index.path.display()
                );
                index.groups = groups;
            }
            Err(e) => warn!("Ignoring temp index {}: {e}", index.path.display()),
        }
        index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups in ascending form id order
    pub fn groups(&self) -> impl Iterator<Item = (i64, &GroupEntry)> + '_ {
        self.groups.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn group(&self, form_id: i64) -> Option<&GroupEntry> {
        self.groups.get(&form_id)
    }

    /// Total number of pending ids
    pub fn pending(&self) -> usize {
        self.groups.values().map(|g| g.ids.len()).sum()
    }

    /// Open (or reopen) a group before its outline is fetched
    ///
    /// Pending ids left over from an earlier run are kept.
    pub fn begin_group(&mut self, form_id: i64, last_access: Timestamp) {
        let entry = self.groups.entry(form_id).or_default();
        entry.success = false;
        entry.last_access = Some(last_access);
    }

    /// Add a pending id to a group, creating the group if needed
    pub fn add_pending(&mut self, form_id: i64, id: impl Into<String>) {
        let id = id.into();
        let entry = self.groups.entry(form_id).or_default();
        if !entry.ids.contains(&id) {
            entry.ids.push(id);
        }
    }

    pub fn set_success(&mut self, form_id: i64, success: bool) {
        if let Some(entry) = self.groups.get_mut(&form_id) {
            entry.success = success;
        }
    }

    /// Drop a group regardless of its pending ids
    pub fn remove_group(&mut self, form_id: i64) -> Option<GroupEntry> {
        self.groups.remove(&form_id)
    }

    /// Mark one id as durably loaded
    ///
    /// Returns the group's final entry when this was its last pending id.
    pub fn complete_item(&mut self, form_id: i64, id: &str) -> Option<GroupEntry> {
        let entry = self.groups.get_mut(&form_id)?;
        entry.ids.retain(|pending| pending != id);
        if entry.ids.is_empty() {
            self.groups.remove(&form_id)
        } else {
            None
        }
    }

    /// Write the index, or remove the file once nothing is pending
    pub async fn persist(&self) -> Result<()> {
        if self.groups.is_empty() {
            if self.path.exists() {
                tokio::fs::remove_file(&self.path).await.map_err(|e| {
                    Error::state(format!(
                        "Failed to remove temp index {}: {e}",
                        self.path.display()
                    ))
                })?;
                debug!("Removed drained temp index {}", self.path.display());
            }
            return Ok(());
        }
        write_json_atomic(&self.path, &self.groups).await
    }
}

async fn read_groups(path: &Path) -> Result<BTreeMap<i64, GroupEntry>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::state(format!("Failed to read temp index: {e}")))?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::state(format!("Failed to parse temp index: {e}")))
}
