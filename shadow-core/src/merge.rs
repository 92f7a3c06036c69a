// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;

use shadow_sys::{FileSync, RootDeviceResolver, ScratchMount, ScratchRelease, SubvolumeController};
use shadow_types::{SnapshotTarget, SubvolumeId, SubvolumeTable};
use tracing::{info, warn};

use crate::error::{Result, ShadowError};
use crate::registry::SnapshotRegistry;

#[derive(Debug)]
pub struct MergeReport {
    pub source: SnapshotTarget,
    pub target: SnapshotTarget,
    /// Scratch mounts in release order (target first)
    pub cleanup: Vec<ScratchRelease>,
}

/// Copies the contents of one subvolume over another.
pub struct MergeController {
    rootfs_dir: PathBuf,
    registry: SnapshotRegistry,
    subvolumes: Arc<dyn SubvolumeController>,
    resolver: Arc<dyn RootDeviceResolver>,
    sync: Arc<dyn FileSync>,
}

impl MergeController {
    pub fn new(
        rootfs_dir: impl Into<PathBuf>,
        registry: SnapshotRegistry,
        subvolumes: Arc<dyn SubvolumeController>,
        resolver: Arc<dyn RootDeviceResolver>,
        sync: Arc<dyn FileSync>,
    ) -> Self {
        Self {
            rootfs_dir: rootfs_dir.into(),
            registry,
            subvolumes,
            resolver,
            sync,
        }
    }

    pub fn merge(&self, source: &SnapshotTarget, target: &SnapshotTarget) -> Result<MergeReport> {
        if source == target {
            return Err(ShadowError::MergeIntoSelf(source.to_string()));
        }
        for side in [source, target] {
            if let Some(name) = side.name() {
                if !self.registry.snapshot_path(name).is_dir() {
                    return Err(ShadowError::SnapshotNotFound(name.to_string()));
                }
            }
        }

        let device = self.resolver.find_root_device()?;
        let table = self.subvolumes.subvolume_table(&self.rootfs_dir)?;
        let dir_name = self.registry.dir_name();
        let source_id = resolve(&table, &dir_name, source)?;
        let target_id = resolve(&table, &dir_name, target)?;

        let controller = self.subvolumes.as_ref();
        let source_mount = ScratchMount::mount(controller, &device, source_id)?;
        let target_mount = ScratchMount::mount(controller, &device, target_id)?;

        info!("Merging {} into {}", source, target);
        self.sync.sync(source_mount.path(), target_mount.path())?;

        let cleanup = vec![target_mount.release(), source_mount.release()];
        for release in cleanup.iter().filter(|release| release.is_leaked()) {
            warn!("Scratch mount {} left in place", release.path().display());
        }

        Ok(MergeReport {
            source: source.clone(),
            target: target.clone(),
            cleanup,
        })
    }
}

fn resolve(table: &SubvolumeTable, dir_name: &str, side: &SnapshotTarget) -> Result<SubvolumeId> {
    match side {
        SnapshotTarget::Default => Ok(SubvolumeId::DEFAULT),
        SnapshotTarget::Named(name) => table
            .find_snapshot(dir_name, name)
            .ok_or_else(|| ShadowError::SubvolumeLookupFailure(name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use shadow_sys::fake::{FakeSubvolumes, RecordingSync, StaticRootDevice, SubvolumeCall};

    use super::*;

    struct Fixture {
        root: tempfile::TempDir,
        subvolumes: Arc<FakeSubvolumes>,
        sync: Arc<RecordingSync>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            fs::create_dir_all(root.path().join(".shadow")).unwrap();
            Self {
                root,
                subvolumes: Arc::new(FakeSubvolumes::new()),
                sync: Arc::new(RecordingSync::new()),
            }
        }

        fn snapshot(&self, name: &str) {
            self.subvolumes
                .create_snapshot(self.root.path(), &self.root.path().join(".shadow").join(name))
                .unwrap();
        }

        fn controller(&self) -> MergeController {
            MergeController::new(
                self.root.path(),
                SnapshotRegistry::new(self.root.path().join(".shadow")),
                self.subvolumes.clone(),
                Arc::new(StaticRootDevice::btrfs("/dev/sda2")),
                self.sync.clone(),
            )
        }

        fn mounted_ids(&self) -> Vec<SubvolumeId> {
            self.subvolumes
                .calls()
                .into_iter()
                .filter_map(|call| match call {
                    SubvolumeCall::Mount { id, .. } => Some(id),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn syncs_source_into_target_and_cleans_up() {
        let fixture = Fixture::new();
        fixture.snapshot("base-image");
        fixture.snapshot("work-tree");

        let report = fixture
            .controller()
            .merge(&SnapshotTarget::named("base-image"), &SnapshotTarget::named("work-tree"))
            .unwrap();

        assert_eq!(fixture.mounted_ids(), vec![SubvolumeId(256), SubvolumeId(257)]);
        let calls = fixture.sync.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(report.cleanup.len(), 2);
        assert_eq!(report.cleanup[0].path(), calls[0].1.as_path());
        assert_eq!(report.cleanup[1].path(), calls[0].0.as_path());
        assert!(report.cleanup.iter().all(|release| !release.is_leaked()));
        assert!(!calls[0].0.exists());
        assert!(!calls[0].1.exists());
    }

    #[test]
    fn default_subvolume_can_be_merged_into() {
        let fixture = Fixture::new();
        fixture.snapshot("pre-upgrade");

        fixture
            .controller()
            .merge(&SnapshotTarget::named("pre-upgrade"), &SnapshotTarget::Default)
            .unwrap();

        assert_eq!(fixture.mounted_ids(), vec![SubvolumeId(256), SubvolumeId::DEFAULT]);
    }

    #[test]
    fn refuses_to_merge_into_itself() {
        let fixture = Fixture::new();
        fixture.snapshot("pre-upgrade");
        let side = SnapshotTarget::named("pre-upgrade");

        let err = fixture.controller().merge(&side, &side).unwrap_err();

        assert!(matches!(err, ShadowError::MergeIntoSelf(_)));
        assert!(fixture.sync.calls().is_empty());
    }

    #[test]
    fn unknown_target_mounts_nothing() {
        let fixture = Fixture::new();
        fixture.snapshot("pre-upgrade");

        let err = fixture
            .controller()
            .merge(&SnapshotTarget::named("pre-upgrade"), &SnapshotTarget::named("gone"))
            .unwrap_err();

        assert!(matches!(err, ShadowError::SnapshotNotFound(name) if name == "gone"));
        assert!(fixture.mounted_ids().is_empty());
    }

    #[test]
    fn failed_sync_still_unmounts_both_sides() {
        let fixture = Fixture::new();
        fixture.snapshot("base-image");
        fixture.snapshot("work-tree");
        fixture.sync.fail(true);

        let err = fixture
            .controller()
            .merge(&SnapshotTarget::named("base-image"), &SnapshotTarget::named("work-tree"))
            .unwrap_err();

        assert!(matches!(err, ShadowError::CommandExecutionFailure { .. }));
        let (source, target) = fixture.sync.calls().remove(0);
        let calls = fixture.subvolumes.calls();
        assert!(calls.contains(&SubvolumeCall::Unmount(source.clone())));
        assert!(calls.contains(&SubvolumeCall::Unmount(target.clone())));
        assert!(!source.exists());
        assert!(!target.exists());
    }
}
