// SPDX-License-Identifier: GPL-3.0-only

//! Facade over the lifecycle components.
//!
//! Every mutating operation holds [`SnapshotLock`] on the snapshot directory for
//! its whole duration and re-reads the registry after each mutation. Steps that
//! already completed are not rolled back when a later step fails.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use shadow_sys::{
    BtrfsCli, FileSync, ProcMounts, RootDeviceResolver, Rsync, SnapshotLock, SubvolumeController,
};
use shadow_types::{ShadowConfig, SnapshotInfo, SnapshotTarget, parse_timestamp_name};
use tracing::{Span, debug, info, info_span, warn};

use crate::activation::{ActivationController, ActivationReport, ActivationState};
use crate::error::{Result, ShadowError};
use crate::kernel::KernelArtifactSynchronizer;
use crate::merge::{MergeController, MergeReport};
use crate::namer::{SnapshotNamer, check_conflicts, validate_name};
use crate::registry::SnapshotRegistry;

/// External collaborators the manager drives
#[derive(Clone)]
pub struct Backends {
    pub subvolumes: Arc<dyn SubvolumeController>,
    pub resolver: Arc<dyn RootDeviceResolver>,
    pub sync: Arc<dyn FileSync>,
}

impl Backends {
    /// The real tools: `btrfs`/`mount`/`umount`, the kernel mount table and `rsync`.
    pub fn system(config: &ShadowConfig) -> Self {
        Self {
            subvolumes: Arc::new(BtrfsCli::new(config.command_timeout())),
            resolver: Arc::new(ProcMounts::new(&config.mount_table)),
            sync: Arc::new(Rsync::new(config.merge_timeout())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    pub name: String,
    pub subvolume_removed: bool,
    pub kernel_artifacts: Vec<PathBuf>,
}

/// Outcome of [`SnapshotManager::clear_snapshots`]
#[derive(Debug)]
pub struct ClearReport {
    pub removed: Vec<RemovalReport>,
    pub failed: Vec<(String, ShadowError)>,
    /// Registry contents re-read after every entry was attempted
    pub remaining: BTreeSet<String>,
}

impl ClearReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.remaining.is_empty()
    }
}

pub struct SnapshotManager {
    config: ShadowConfig,
    registry: SnapshotRegistry,
    kernels: KernelArtifactSynchronizer,
    backends: Backends,
    activation: ActivationController,
    merger: MergeController,
    namer: SnapshotNamer,
    span: Span,
}

impl SnapshotManager {
    pub fn new(config: ShadowConfig) -> Self {
        let backends = Backends::system(&config);
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: ShadowConfig, backends: Backends) -> Self {
        let registry = SnapshotRegistry::new(&config.snapshot_dir);
        let kernels = KernelArtifactSynchronizer::new(&config.kernel_dir);
        let activation = ActivationController::new(
            &config.rootfs_dir,
            registry.clone(),
            kernels.clone(),
            backends.subvolumes.clone(),
            backends.resolver.clone(),
        );
        let merger = MergeController::new(
            &config.rootfs_dir,
            registry.clone(),
            backends.subvolumes.clone(),
            backends.resolver.clone(),
            backends.sync.clone(),
        );

        Self {
            config,
            registry,
            kernels,
            backends,
            activation,
            merger,
            namer: SnapshotNamer::default(),
            span: info_span!("shadow"),
        }
    }

    pub fn with_namer(mut self, namer: SnapshotNamer) -> Self {
        self.namer = namer;
        self
    }

    /// Span entered for the duration of every operation.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    pub fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    pub fn list_snapshots(&self) -> Result<BTreeSet<String>> {
        let _enter = self.span.enter();
        self.registry.list_snapshots()
    }

    pub fn snapshot_details(&self) -> Result<Vec<SnapshotInfo>> {
        let _enter = self.span.enter();
        self.registry
            .list_snapshots()?
            .into_iter()
            .map(|name| self.describe(name))
            .collect()
    }

    /// Snapshot the kernel images and the root filesystem under `name`, or
    /// under a timestamp name when none is given.
    pub fn take_snapshot(&self, name: Option<&str>) -> Result<SnapshotInfo> {
        let _enter = self.span.enter();
        let _lock = self.lock()?;

        let registered = self.registry.list_snapshots()?;
        let name = match name {
            Some(name) => {
                validate_name(name)?;
                name.to_string()
            }
            None => self.namer.timestamp_name(),
        };
        check_conflicts(&name, &registered)?;

        let artifacts = self.kernels.snapshot_artifacts(&name, &registered)?;
        debug!("Snapshotted {} kernel artifacts for {}", artifacts.len(), name);

        let root = self.backends.resolver.root_mount()?;
        if !root.is_btrfs() {
            return Err(ShadowError::FilesystemIncompatible {
                fs_type: root.fs_type,
            });
        }

        let dest = self.registry.snapshot_path(&name);
        self.backends
            .subvolumes
            .create_snapshot(&self.config.rootfs_dir, &dest)?;

        if !self.registry.contains(&name)? {
            warn!("Snapshot {} is missing from {}", name, self.registry.snapshot_dir().display());
        }
        info!("Created snapshot {}", name);
        self.describe(name)
    }

    pub fn remove_snapshot(&self, name: &str) -> Result<RemovalReport> {
        let _enter = self.span.enter();
        let _lock = self.lock()?;
        validate_name(name)?;

        let registered = self.registry.list_snapshots()?;
        let report = self.remove_locked(name, &registered)?;
        if !report.subvolume_removed && report.kernel_artifacts.is_empty() {
            return Err(ShadowError::SnapshotNotFound(name.to_string()));
        }
        Ok(report)
    }

    /// Remove every registered snapshot along with its kernel images.
    ///
    /// A failed entry does not stop the others; it is kept in
    /// [`ClearReport::failed`] with its subvolume and kernel images left together.
    pub fn clear_snapshots(&self) -> Result<ClearReport> {
        let _enter = self.span.enter();
        let _lock = self.lock()?;

        let registered = self.registry.list_snapshots()?;
        let mut removed = Vec::with_capacity(registered.len());
        let mut failed = Vec::new();
        for name in &registered {
            match self.remove_locked(name, &registered) {
                Ok(report) => removed.push(report),
                Err(error) => {
                    warn!("Unable to remove snapshot {}: {}", name, error);
                    failed.push((name.clone(), error));
                }
            }
        }

        let remaining = self.registry.list_snapshots()?;
        if !remaining.is_empty() {
            warn!("Snapshots still present after clear: {:?}", remaining);
        }
        Ok(ClearReport {
            removed,
            failed,
            remaining,
        })
    }

    pub fn activate_snapshot(&mut self, target: &SnapshotTarget) -> Result<ActivationReport> {
        let _enter = self.span.enter();
        let _lock = self.lock()?;
        self.activation.activate(target)
    }

    pub fn activation_state(&self) -> ActivationState {
        self.activation.state()
    }

    /// Copy the contents of `source` over `target`.
    pub fn merge_snapshot(
        &self,
        source: &SnapshotTarget,
        target: &SnapshotTarget,
    ) -> Result<MergeReport> {
        let _enter = self.span.enter();
        let _lock = self.lock()?;
        self.merger.merge(source, target)
    }

    /// Delete timestamp-tagged kernel images whose snapshot no longer exists.
    pub fn prune_kernel_artifacts(&self) -> Result<Vec<PathBuf>> {
        let _enter = self.span.enter();
        let _lock = self.lock()?;

        let registered = self.registry.list_snapshots()?;
        self.kernels.prune_orphans(&registered)
    }

    fn lock(&self) -> Result<SnapshotLock> {
        Ok(SnapshotLock::acquire(self.registry.snapshot_dir())?)
    }

    fn remove_locked(&self, name: &str, registered: &BTreeSet<String>) -> Result<RemovalReport> {
        let subvolume_removed = registered.contains(name);
        if subvolume_removed {
            self.backends
                .subvolumes
                .delete_subvolume(&self.registry.snapshot_path(name))?;
        }

        let kernel_artifacts = self.kernels.remove_artifacts(name)?;
        info!("Removed snapshot {}", name);
        Ok(RemovalReport {
            name: name.to_string(),
            subvolume_removed,
            kernel_artifacts,
        })
    }

    fn describe(&self, name: String) -> Result<SnapshotInfo> {
        let created_at = match parse_timestamp_name(&name) {
            Some(created_at) => Some(created_at),
            None => fs::metadata(self.registry.snapshot_path(&name))
                .and_then(|metadata| metadata.modified())
                .ok()
                .map(DateTime::<Local>::from),
        };
        let kernel_artifacts = self.kernels.artifacts_for(&name)?;

        Ok(SnapshotInfo {
            name,
            created_at,
            kernel_artifacts,
        })
    }
}
