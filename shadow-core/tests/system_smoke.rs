// SPDX-License-Identifier: GPL-3.0-only

//! Runs against the real tools; opt in with `SHADOW_TESTING_ENABLE_DESTRUCTIVE=1`.

mod common;

use shadow_core::{ShadowConfig, SnapshotManager};
use shadow_sys::{ProcMounts, RootDeviceResolver};

#[test]
fn root_mount_is_readable() {
    match ProcMounts::default().root_mount() {
        Ok(root) => assert_eq!(root.mount_point, std::path::Path::new("/")),
        Err(error) => eprintln!("SKIP root mount lookup: {error}"),
    }
}

#[test]
fn snapshot_roundtrip_on_live_root() {
    if !common::destructive_enabled() {
        eprintln!("SKIP snapshot roundtrip: destructive tests disabled");
        return;
    }
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("SKIP snapshot roundtrip: requires root");
        return;
    }
    let root_is_btrfs = ProcMounts::default()
        .root_mount()
        .map(|root| root.is_btrfs())
        .unwrap_or(false);
    if !root_is_btrfs {
        eprintln!("SKIP snapshot roundtrip: / is not btrfs");
        return;
    }

    let kernel_dir = tempfile::tempdir().unwrap();
    let config = ShadowConfig {
        kernel_dir: kernel_dir.path().to_path_buf(),
        ..ShadowConfig::default()
    };
    let manager = SnapshotManager::new(config);

    let info = manager.take_snapshot(Some("shadow-smoke-test")).unwrap();
    assert!(manager.list_snapshots().unwrap().contains(&info.name));

    manager.remove_snapshot(&info.name).unwrap();
    assert!(!manager.list_snapshots().unwrap().contains(&info.name));
}
