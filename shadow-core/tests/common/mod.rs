// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use shadow_core::{Backends, ShadowConfig, SnapshotManager, SnapshotNamer};
use shadow_sys::fake::{FakeSubvolumes, RecordingSync, StaticRootDevice};
use tempfile::TempDir;

pub fn destructive_enabled() -> bool {
    std::env::var("SHADOW_TESTING_ENABLE_DESTRUCTIVE")
        .ok()
        .as_deref()
        == Some("1")
}

/// A throwaway root with `boot/` and `.shadow/` wired to fake backends.
pub struct Lab {
    pub root: TempDir,
    pub subvolumes: Arc<FakeSubvolumes>,
    pub sync: Arc<RecordingSync>,
    pub resolver: StaticRootDevice,
}

impl Lab {
    pub fn new() -> Self {
        Self::with_resolver(StaticRootDevice::btrfs("/dev/vda2"))
    }

    pub fn with_resolver(resolver: StaticRootDevice) -> Self {
        let root = tempfile::tempdir().expect("create lab root");
        fs::create_dir_all(root.path().join("boot")).expect("create boot dir");
        Self {
            root,
            subvolumes: Arc::new(FakeSubvolumes::new()),
            sync: Arc::new(RecordingSync::new()),
            resolver,
        }
    }

    pub fn config(&self) -> ShadowConfig {
        ShadowConfig {
            rootfs_dir: self.root.path().to_path_buf(),
            kernel_dir: self.boot_dir(),
            snapshot_dir: self.snapshot_dir(),
            ..ShadowConfig::default()
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            subvolumes: self.subvolumes.clone(),
            resolver: Arc::new(self.resolver.clone()),
            sync: self.sync.clone(),
        }
    }

    pub fn manager(&self) -> SnapshotManager {
        SnapshotManager::with_backends(self.config(), self.backends())
    }

    /// Manager whose generated names all fall on the given minute.
    pub fn manager_at(&self, year: i32, month: u32, day: u32, hour: u32, min: u32) -> SnapshotManager {
        let at = Local
            .with_ymd_and_hms(year, month, day, hour, min, 0)
            .single()
            .expect("unambiguous local time");
        self.manager().with_namer(SnapshotNamer::Fixed(at))
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.root.path().join("boot")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.root.path().join(".shadow")
    }

    pub fn install_kernels(&self, files: &[&str]) {
        for file in files {
            fs::write(self.boot_dir().join(file), format!("live {file}")).expect("write kernel");
        }
    }

    pub fn boot_files(&self) -> Vec<String> {
        list(&self.boot_dir())
    }
}

pub fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
