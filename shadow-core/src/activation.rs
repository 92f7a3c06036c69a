// SPDX-License-Identifier: GPL-3.0-only

//! Selects the subvolume (and kernel images) used on next boot.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use shadow_sys::{RootDeviceResolver, ScratchMount, ScratchRelease, SubvolumeController};
use shadow_types::{SnapshotTarget, SubvolumeId};
use tracing::{debug, info, warn};

use crate::error::{Result, ShadowError};
use crate::kernel::KernelArtifactSynchronizer;
use crate::registry::SnapshotRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    #[default]
    Idle,
    ActivatingDefault,
    ActivatingNamed,
    Failed,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::ActivatingDefault => "activating default",
            Self::ActivatingNamed => "activating snapshot",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Final state of a successful activation
#[derive(Debug)]
pub struct ActivationReport {
    pub target: SnapshotTarget,
    pub subvolume_id: SubvolumeId,
    /// Live kernel images overwritten from the snapshot's copies
    pub kernel_artifacts: Vec<PathBuf>,
    /// Only set when the default subvolume was activated through a scratch mount
    pub scratch: Option<ScratchRelease>,
}

pub struct ActivationController {
    rootfs_dir: PathBuf,
    registry: SnapshotRegistry,
    kernels: KernelArtifactSynchronizer,
    subvolumes: Arc<dyn SubvolumeController>,
    resolver: Arc<dyn RootDeviceResolver>,
    state: ActivationState,
}

impl ActivationController {
    pub fn new(
        rootfs_dir: impl Into<PathBuf>,
        registry: SnapshotRegistry,
        kernels: KernelArtifactSynchronizer,
        subvolumes: Arc<dyn SubvolumeController>,
        resolver: Arc<dyn RootDeviceResolver>,
    ) -> Self {
        Self {
            rootfs_dir: rootfs_dir.into(),
            registry,
            kernels,
            subvolumes,
            resolver,
            state: ActivationState::Idle,
        }
    }

    /// State after the most recent transition; `Idle` once an activation completed.
    pub fn state(&self) -> ActivationState {
        self.state
    }

    pub fn activate(&mut self, target: &SnapshotTarget) -> Result<ActivationReport> {
        let outcome = match target {
            SnapshotTarget::Default => {
                self.state = ActivationState::ActivatingDefault;
                self.activate_default()
            }
            SnapshotTarget::Named(name) => {
                self.state = ActivationState::ActivatingNamed;
                self.activate_named(name)
            }
        };

        self.state = match outcome {
            Ok(_) => ActivationState::Idle,
            Err(_) => ActivationState::Failed,
        };
        outcome
    }

    fn activate_default(&self) -> Result<ActivationReport> {
        let device = self.resolver.find_root_device()?;
        let scratch = ScratchMount::mount(self.subvolumes.as_ref(), &device, SubvolumeId::DEFAULT)?;

        // A failed set-default still unmounts the scratch directory on drop.
        self.subvolumes
            .set_default_subvolume(SubvolumeId::DEFAULT, scratch.path())?;

        let release = scratch.release();
        if let ScratchRelease::Leaked { path, error } = &release {
            warn!("Scratch mount {} left in place: {}", path.display(), error);
        }

        info!("Default subvolume set as active. Reboot to activate.");
        Ok(ActivationReport {
            target: SnapshotTarget::Default,
            subvolume_id: SubvolumeId::DEFAULT,
            kernel_artifacts: Vec::new(),
            scratch: Some(release),
        })
    }

    fn activate_named(&self, name: &str) -> Result<ActivationReport> {
        if !self.registry.snapshot_path(name).is_dir() {
            return Err(ShadowError::SnapshotNotFound(name.to_string()));
        }

        let table = self.subvolumes.subvolume_table(&self.rootfs_dir)?;
        let Some(id) = table.find_snapshot(&self.registry.dir_name(), name) else {
            return Err(ShadowError::SubvolumeLookupFailure(name.to_string()));
        };

        debug!("Activating snapshot {} as subvolume {}", name, id);
        self.subvolumes.set_default_subvolume(id, &self.rootfs_dir)?;

        let kernel_artifacts = self.kernels.activate_artifacts(name)?;
        if !kernel_artifacts.is_empty() {
            debug!("Activated kernel/initrd snapshot for {}", name);
        }

        info!("Snapshot {} set as default. Reboot to activate.", name);
        Ok(ActivationReport {
            target: SnapshotTarget::named(name),
            subvolume_id: id,
            kernel_artifacts,
            scratch: None,
        })
    }
}
