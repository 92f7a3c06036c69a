// SPDX-License-Identifier: GPL-3.0-only

//! Temporary mountpoints for subvolume-scoped work.
//!
//! A scratch directory is only removed after its unmount succeeded, and only
//! with `remove_dir`: if the unmount fails the directory still holds a live
//! subvolume and is left in place.

use std::fs;
use std::path::{Path, PathBuf};

use shadow_types::SubvolumeId;
use tracing::{debug, warn};

use crate::error::{Result, SysError};
use crate::subvolume::SubvolumeController;

/// Outcome of tearing down a scratch mount
#[derive(Debug)]
pub enum ScratchRelease {
    Removed(PathBuf),
    Leaked { path: PathBuf, error: SysError },
}

impl ScratchRelease {
    pub fn path(&self) -> &Path {
        match self {
            Self::Removed(path) => path,
            Self::Leaked { path, .. } => path,
        }
    }

    pub fn is_leaked(&self) -> bool {
        matches!(self, Self::Leaked { .. })
    }
}

/// A subvolume mounted on a freshly allocated temporary directory.
///
/// Dropping an unreleased mount unmounts it; call [`ScratchMount::release`] to
/// observe the outcome.
pub struct ScratchMount<'a> {
    controller: &'a dyn SubvolumeController,
    path: PathBuf,
    mounted: bool,
}

impl<'a> ScratchMount<'a> {
    pub fn mount(
        controller: &'a dyn SubvolumeController,
        device: &Path,
        id: SubvolumeId,
    ) -> Result<Self> {
        let path = tempfile::Builder::new()
            .prefix("shadow-")
            .tempdir()?
            .keep();
        debug!("Mounting subvolume {} of {} at {}", id, device.display(), path.display());

        if let Err(error) = controller.mount(device, id, &path) {
            if let Err(cleanup) = fs::remove_dir(&path) {
                warn!("Unable to remove scratch directory {}: {}", path.display(), cleanup);
            }
            return Err(error);
        }

        Ok(Self {
            controller,
            path,
            mounted: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> ScratchRelease {
        self.mounted = false;
        teardown(self.controller, &self.path)
    }
}

impl Drop for ScratchMount<'_> {
    fn drop(&mut self) {
        if self.mounted {
            self.mounted = false;
            // Outcome is logged by teardown.
            let _ = teardown(self.controller, &self.path);
        }
    }
}

fn teardown(controller: &dyn SubvolumeController, path: &Path) -> ScratchRelease {
    if let Err(error) = controller.unmount(path) {
        warn!("Unable to unmount {}: {}", path.display(), error);
        return ScratchRelease::Leaked {
            path: path.to_path_buf(),
            error,
        };
    }

    match fs::remove_dir(path) {
        Ok(()) => ScratchRelease::Removed(path.to_path_buf()),
        Err(error) => {
            warn!("Unable to remove scratch directory {}: {}", path.display(), error);
            ScratchRelease::Leaked {
                path: path.to_path_buf(),
                error: error.into(),
            }
        }
    }
}
