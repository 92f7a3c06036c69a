// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// Set of known snapshots, derived from the snapshot directory on every read.
///
/// Nothing is cached: callers re-fetch after each mutation. The directory is
/// created on first use; when it cannot be created the registry reads as empty.
#[derive(Debug, Clone)]
pub struct SnapshotRegistry {
    snapshot_dir: PathBuf,
}

impl SnapshotRegistry {
    pub fn new(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
        }
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Final component of the snapshot directory, as it appears in subvolume listings.
    pub fn dir_name(&self) -> String {
        self.snapshot_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Location of the subvolume backing `name`.
    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.snapshot_dir.join(name)
    }

    pub fn list_snapshots(&self) -> Result<BTreeSet<String>> {
        debug!("Getting snapshots from {}", self.snapshot_dir.display());
        if let Err(err) = fs::create_dir_all(&self.snapshot_dir) {
            // Unprivileged readers cannot create it; nothing has been snapshotted yet.
            if !self.snapshot_dir.is_dir() {
                debug!("Snapshot directory {} unavailable: {}", self.snapshot_dir.display(), err);
                return Ok(BTreeSet::new());
            }
        }

        let mut snapshots = BTreeSet::new();
        for entry in fs::read_dir(&self.snapshot_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(name) => {
                    snapshots.insert(name);
                }
                Err(raw) => warn!("Ignoring snapshot with non UTF-8 name {:?}", raw),
            }
        }

        Ok(snapshots)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.list_snapshots()?.contains(name))
    }
}
