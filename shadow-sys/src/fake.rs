// SPDX-License-Identifier: GPL-3.0-only

//! In-memory backends for exercising the lifecycle controller without root.
//!
//! [`FakeSubvolumes`] turns snapshots into plain directories so the registry
//! (a directory listing) still observes them, and records every call.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use shadow_types::{SubvolumeEntry, SubvolumeId};

use crate::error::{Result, SysError};
use crate::mounts::{MountEntry, RootDeviceResolver};
use crate::subvolume::SubvolumeController;
use crate::sync::FileSync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubvolumeCall {
    CreateSnapshot { source: PathBuf, dest: PathBuf },
    Delete(PathBuf),
    List(PathBuf),
    SetDefault { id: SubvolumeId, mountpoint: PathBuf },
    Mount {
        device: PathBuf,
        id: SubvolumeId,
        target: PathBuf,
    },
    Unmount(PathBuf),
}

#[derive(Debug)]
struct FakeState {
    next_id: u64,
    subvolumes: Vec<SubvolumeEntry>,
    default_id: SubvolumeId,
    calls: Vec<SubvolumeCall>,
    fail_unmounts: bool,
    fail_set_default: bool,
    failing_deletes: Vec<String>,
}

#[derive(Debug)]
pub struct FakeSubvolumes {
    state: Mutex<FakeState>,
}

impl Default for FakeSubvolumes {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubvolumes {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 256,
                subvolumes: Vec::new(),
                default_id: SubvolumeId(5),
                calls: Vec::new(),
                fail_unmounts: false,
                fail_set_default: false,
                failing_deletes: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<SubvolumeCall> {
        self.state().calls.clone()
    }

    pub fn set_default_calls(&self) -> Vec<SubvolumeId> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                SubvolumeCall::SetDefault { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn default_id(&self) -> SubvolumeId {
        self.state().default_id
    }

    pub fn subvolumes(&self) -> Vec<SubvolumeEntry> {
        self.state().subvolumes.clone()
    }

    pub fn fail_unmounts(&self, fail: bool) {
        self.state().fail_unmounts = fail;
    }

    pub fn fail_set_default(&self, fail: bool) {
        self.state().fail_set_default = fail;
    }

    /// Drop listing rows named `name` while leaving any directory in place,
    /// as seen when booted into that snapshot.
    pub fn forget(&self, name: &str) {
        self.state()
            .subvolumes
            .retain(|entry| entry.path.rsplit('/').next() != Some(name));
    }

    /// Register a subvolume that is not a snapshot, e.g. `@home`.
    pub fn add_subvolume(&self, path: &str) -> SubvolumeId {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.subvolumes.push(SubvolumeEntry::new(id, path));
        SubvolumeId(id)
    }

    /// Make deleting the subvolume whose last component is `name` fail.
    pub fn fail_delete(&self, name: &str) {
        self.state().failing_deletes.push(name.to_string());
    }
}

/// `btrfs subvolume list` reports paths relative to the filesystem root; keep
/// only the snapshot directory and name so temporary prefixes never match.
fn listing_path(path: &Path) -> String {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    match path.parent().and_then(Path::file_name) {
        Some(parent) => format!("{}/{}", parent.to_string_lossy(), name),
        None => name.into_owned(),
    }
}

impl SubvolumeController for FakeSubvolumes {
    fn create_snapshot(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push(SubvolumeCall::CreateSnapshot {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
        });

        if dest.exists() {
            return Err(SysError::CommandFailed {
                command: format!("btrfs subvolume snapshot {} {}", source.display(), dest.display()),
                code: Some(1),
                stderr: format!("ERROR: target path already exists: {}", dest.display()),
            });
        }

        fs::create_dir_all(dest)?;
        let id = state.next_id;
        state.next_id += 1;
        state
            .subvolumes
            .push(SubvolumeEntry::new(id, listing_path(dest)));
        Ok(())
    }

    fn delete_subvolume(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push(SubvolumeCall::Delete(path.to_path_buf()));

        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if state.failing_deletes.iter().any(|failing| *failing == name) {
            return Err(SysError::CommandFailed {
                command: format!("btrfs subvolume delete {}", path.display()),
                code: Some(1),
                stderr: format!("ERROR: cannot delete '{}': Device or resource busy", path.display()),
            });
        }

        let rendered = listing_path(path);
        state.subvolumes.retain(|entry| entry.path != rendered);
        fs::remove_dir_all(path)?;
        Ok(())
    }

    fn list_subvolumes(&self, root: &Path) -> Result<Vec<SubvolumeEntry>> {
        let mut state = self.state();
        state.calls.push(SubvolumeCall::List(root.to_path_buf()));
        Ok(state.subvolumes.clone())
    }

    fn set_default_subvolume(&self, id: SubvolumeId, mountpoint: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push(SubvolumeCall::SetDefault {
            id,
            mountpoint: mountpoint.to_path_buf(),
        });

        if state.fail_set_default {
            return Err(SysError::CommandFailed {
                command: format!("btrfs subvolume set-default {id} {}", mountpoint.display()),
                code: Some(1),
                stderr: "ERROR: unable to set default subvolume".to_string(),
            });
        }

        state.default_id = id;
        Ok(())
    }

    fn mount(&self, device: &Path, id: SubvolumeId, target: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push(SubvolumeCall::Mount {
            device: device.to_path_buf(),
            id,
            target: target.to_path_buf(),
        });

        if !target.is_dir() {
            return Err(SysError::MountFailed {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                reason: "mount point does not exist".to_string(),
            });
        }
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push(SubvolumeCall::Unmount(path.to_path_buf()));

        if state.fail_unmounts {
            return Err(SysError::UnmountFailed {
                path: path.to_path_buf(),
                reason: "target is busy".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolver returning a fixed root mount, or none at all
#[derive(Debug, Clone)]
pub struct StaticRootDevice {
    entry: Option<MountEntry>,
}

impl StaticRootDevice {
    pub fn btrfs(device: &str) -> Self {
        Self::with_fs_type(device, "btrfs")
    }

    pub fn with_fs_type(device: &str, fs_type: &str) -> Self {
        Self {
            entry: Some(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from("/"),
                fs_type: fs_type.to_string(),
                options: "rw,relatime".to_string(),
            }),
        }
    }

    pub fn missing() -> Self {
        Self { entry: None }
    }
}

impl RootDeviceResolver for StaticRootDevice {
    fn root_mount(&self) -> Result<MountEntry> {
        self.entry.clone().ok_or(SysError::MissingRootDevice)
    }
}

/// File sync that only records what it was asked to copy
#[derive(Debug, Default)]
pub struct RecordingSync {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail: Mutex<bool>,
}

impl RecordingSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }
}

impl FileSync for RecordingSync {
    fn sync(&self, source: &Path, target: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((source.to_path_buf(), target.to_path_buf()));

        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(SysError::CommandFailed {
                command: format!("rsync -aAX {} {}", source.display(), target.display()),
                code: Some(23),
                stderr: "rsync: some files could not be transferred".to_string(),
            });
        }
        Ok(())
    }
}
