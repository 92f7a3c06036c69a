// SPDX-License-Identifier: GPL-3.0-only

//! Mount table inspection
//!
//! The device backing `/` is resolved on demand and never cached: merges and
//! activations may remount in between operations.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SysError};

/// One line of a `/proc/mounts`-style table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Backing device with any `[label]` annotation removed
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: String,
}

impl MountEntry {
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(&self.device)
    }

    pub fn is_btrfs(&self) -> bool {
        self.fs_type == "btrfs"
    }
}

/// Finds the mount that provides the live root filesystem.
pub trait RootDeviceResolver: Send + Sync {
    /// Mount entry whose mountpoint is exactly `/`.
    fn root_mount(&self) -> Result<MountEntry>;

    fn find_root_device(&self) -> Result<PathBuf> {
        Ok(self.root_mount()?.device_path())
    }
}

/// Resolver backed by the kernel's mount table
#[derive(Debug, Clone)]
pub struct ProcMounts {
    table: PathBuf,
}

impl ProcMounts {
    pub fn new(table: impl Into<PathBuf>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &Path {
        &self.table
    }
}

impl Default for ProcMounts {
    fn default() -> Self {
        Self::new("/proc/self/mounts")
    }
}

impl RootDeviceResolver for ProcMounts {
    fn root_mount(&self) -> Result<MountEntry> {
        let raw = fs::read_to_string(&self.table)?;
        let entries = parse_mount_table(&raw);
        let root = find_root_mount(&entries)
            .cloned()
            .ok_or(SysError::MissingRootDevice)?;

        debug!(device = %root.device, fs_type = %root.fs_type, "resolved root mount");
        Ok(root)
    }
}

/// Parse `device mountpoint fstype options ...` lines, skipping malformed ones.
pub fn parse_mount_table(input: &str) -> Vec<MountEntry> {
    input
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next().unwrap_or_default();
            let options = fields.next().unwrap_or_default();

            Some(MountEntry {
                device: strip_label(&unescape_mount_field(device)).to_string(),
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                fs_type: fs_type.to_string(),
                options: options.to_string(),
            })
        })
        .collect()
}

/// The last entry mounted on `/` is the one currently visible.
pub fn find_root_mount(entries: &[MountEntry]) -> Option<&MountEntry> {
    entries
        .iter()
        .rev()
        .find(|entry| entry.mount_point == Path::new("/"))
}

/// `device[label]` -> `device`
fn strip_label(device: &str) -> &str {
    match device.find('[') {
        Some(index) => &device[..index],
        None => device,
    }
}

/// Unescape octal sequences in mount fields (e.g. `\040` -> ` `)
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            let octal = &bytes[index + 1..index + 4];
            if octal.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let byte = octal.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(byte) {
                    output.push(byte);
                    index += 4;
                    continue;
                }
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
