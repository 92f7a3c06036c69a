// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric btrfs subvolume id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubvolumeId(pub u64);

impl SubvolumeId {
    /// Id that addresses the filesystem's default/root subvolume.
    pub const DEFAULT: Self = Self(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

impl fmt::Display for SubvolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of a subvolume listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubvolumeEntry {
    pub id: SubvolumeId,
    pub path: String,
}

impl SubvolumeEntry {
    pub fn new(id: u64, path: impl Into<String>) -> Self {
        Self {
            id: SubvolumeId(id),
            path: path.into(),
        }
    }
}

/// Transient id lookup built from a single listing call; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubvolumeTable {
    entries: Vec<SubvolumeEntry>,
}

impl SubvolumeTable {
    pub fn new(entries: Vec<SubvolumeEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SubvolumeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the snapshot subvolume `<snapshot_dir>/<name>`.
    ///
    /// `snapshot_dir` is the final component of the snapshot directory (e.g.
    /// `.shadow`). Listing paths are relative to the filesystem top, so the row
    /// must either equal `<snapshot_dir>/<name>` or end with `/<snapshot_dir>/<name>`
    /// when the root filesystem is itself a nested subvolume. An empty
    /// `snapshot_dir` matches on the last path component alone. Id 0 is never
    /// returned from here.
    pub fn find_snapshot(&self, snapshot_dir: &str, name: &str) -> Option<SubvolumeId> {
        if name.is_empty() || name.contains('/') {
            return None;
        }

        self.entries
            .iter()
            .filter(|entry| !entry.id.is_default())
            .find(|entry| is_snapshot_row(&entry.path, snapshot_dir, name))
            .map(|entry| entry.id)
    }
}

fn is_snapshot_row(path: &str, snapshot_dir: &str, name: &str) -> bool {
    let Some(parent) = path.strip_suffix(name).and_then(|rest| rest.strip_suffix('/')) else {
        return path == name && snapshot_dir.is_empty();
    };

    snapshot_dir.is_empty()
        || parent == snapshot_dir
        || parent
            .strip_suffix(snapshot_dir)
            .is_some_and(|rest| rest.ends_with('/'))
}

impl FromIterator<SubvolumeEntry> for SubvolumeTable {
    fn from_iter<I: IntoIterator<Item = SubvolumeEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SubvolumeTable {
        SubvolumeTable::new(vec![
            SubvolumeEntry::new(0, "<FS_TREE>/202401011200"),
            SubvolumeEntry::new(256, "home"),
            SubvolumeEntry::new(257, ".shadow/202401011200"),
            SubvolumeEntry::new(258, ".shadow/pre-upgrade"),
        ])
    }

    #[test]
    fn resolves_rows_below_the_snapshot_dir() {
        assert_eq!(
            table().find_snapshot(".shadow", "pre-upgrade"),
            Some(SubvolumeId(258))
        );
        assert_eq!(
            table().find_snapshot(".shadow", "202401011200"),
            Some(SubvolumeId(257))
        );
    }

    #[test]
    fn never_resolves_the_default_id_by_name() {
        assert_eq!(table().find_snapshot("", "202401011200"), Some(SubvolumeId(257)));
        assert_eq!(table().find_snapshot(".shadow", ""), None);
    }

    #[test]
    fn partial_names_do_not_match() {
        assert_eq!(table().find_snapshot(".shadow", "20240101"), None);
        assert_eq!(table().find_snapshot(".shadow", "upgrade"), None);
        // Contained in the snapshot directory name itself.
        assert_eq!(table().find_snapshot(".shadow", "sha"), None);
        assert_eq!(table().find_snapshot(".shadow", "w"), None);
    }

    #[test]
    fn other_subvolumes_are_not_snapshots() {
        let table = SubvolumeTable::new(vec![
            SubvolumeEntry::new(256, "@home"),
            SubvolumeEntry::new(257, "home"),
            SubvolumeEntry::new(258, "@/.shadow/home"),
        ]);

        assert_eq!(table.find_snapshot(".shadow", "home"), Some(SubvolumeId(258)));
        assert_eq!(table.find_snapshot("shadow", "home"), None);
    }

    #[test]
    fn default_constant_is_zero() {
        assert!(SubvolumeId::DEFAULT.is_default());
        assert_eq!(SubvolumeId(5).to_string(), "5");
    }
}
