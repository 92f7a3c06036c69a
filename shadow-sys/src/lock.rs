// SPDX-License-Identifier: GPL-3.0-only

//! Advisory lock serialising mutating snapshot operations.
//!
//! The lock is an exclusive `flock` on the snapshot directory itself, so no
//! extra entry appears in the registry listing. It is released on drop.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::error::{Result, SysError};

pub struct SnapshotLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl SnapshotLock {
    /// Block until the lock on `dir` is held. Creates `dir` if needed.
    pub fn acquire(dir: &Path) -> Result<Self> {
        Self::lock(dir, FlockArg::LockExclusive)
    }

    /// Fail with [`SysError::Locked`] instead of waiting.
    pub fn try_acquire(dir: &Path) -> Result<Self> {
        Self::lock(dir, FlockArg::LockExclusiveNonblock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(dir: &Path, arg: FlockArg) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let file = File::open(dir)?;

        let lock = Flock::lock(file, arg).map_err(|(_, errno)| match errno {
            Errno::EAGAIN => SysError::Locked(dir.to_path_buf()),
            other => SysError::Io(other.into()),
        })?;

        debug!("Holding snapshot lock on {}", dir.display());
        Ok(Self {
            _lock: lock,
            path: dir.to_path_buf(),
        })
    }
}

impl std::fmt::Debug for SnapshotLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotLock")
            .field("path", &self.path)
            .finish()
    }
}
