// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use shadow_sys::SysError;
use shadow_types::ConfigError;
use thiserror::Error;

/// Error kinds surfaced by the snapshot manager
#[derive(Error, Debug)]
pub enum ShadowError {
    #[error("root filesystem is {fs_type}; only btrfs root filesystems are supported")]
    FilesystemIncompatible { fs_type: String },

    #[error("unable to find the mount for /")]
    MissingRootDevice,

    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),

    #[error(
        "unable to find the subvolume for snapshot {0}; make sure you are not currently running inside a snapshot"
    )]
    SubvolumeLookupFailure(String),

    #[error("snapshot {0} already exists")]
    SnapshotExists(String),

    #[error("snapshot name {name} overlaps existing snapshot {existing}")]
    NameConflict { name: String, existing: String },

    #[error("invalid snapshot name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("cannot merge {0} into itself")]
    MergeIntoSelf(String),

    #[error("`{command}` failed ({}): {}", exit_label(.code), .stderr.trim())]
    CommandExecutionFailure {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` did not finish within {}s", .timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("required tool is not installed: {0}")]
    ToolMissing(String),

    #[error("failed to mount {device:?} at {target:?}: {reason}")]
    MountFailure {
        device: PathBuf,
        target: PathBuf,
        reason: String,
    },

    #[error("failed to unmount {path:?}: {reason}")]
    UnmountFailure { path: PathBuf, reason: String },

    #[error("{0:?} is locked by another shadow process")]
    Locked(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SysError> for ShadowError {
    fn from(error: SysError) -> Self {
        match error {
            SysError::Io(error) => Self::Io(error),
            SysError::CommandNotFound(command) => Self::ToolMissing(command),
            SysError::CommandFailed {
                command,
                code,
                stderr,
            } => Self::CommandExecutionFailure {
                command,
                code,
                stderr,
            },
            SysError::CommandTimeout { command, timeout } => {
                Self::CommandTimeout { command, timeout }
            }
            SysError::MountFailed {
                device,
                target,
                reason,
            } => Self::MountFailure {
                device,
                target,
                reason,
            },
            SysError::UnmountFailed { path, reason } => Self::UnmountFailure { path, reason },
            SysError::MissingRootDevice => Self::MissingRootDevice,
            SysError::Locked(path) => Self::Locked(path),
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Result type alias for snapshot operations
pub type Result<T> = std::result::Result<T, ShadowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failures_keep_their_diagnostics() {
        let error = ShadowError::from(SysError::CommandFailed {
            command: "btrfs subvolume delete /.shadow/T1".to_string(),
            code: Some(1),
            stderr: "ERROR: not a subvolume\n".to_string(),
        });

        assert_eq!(
            error.to_string(),
            "`btrfs subvolume delete /.shadow/T1` failed (exit code 1): ERROR: not a subvolume"
        );
    }

    #[test]
    fn low_level_kinds_map_onto_matching_kinds() {
        assert!(matches!(
            ShadowError::from(SysError::MissingRootDevice),
            ShadowError::MissingRootDevice
        ));
        assert!(matches!(
            ShadowError::from(SysError::UnmountFailed {
                path: PathBuf::from("/tmp/shadow-x"),
                reason: "target is busy".to_string(),
            }),
            ShadowError::UnmountFailure { .. }
        ));
        assert!(matches!(
            ShadowError::from(SysError::CommandTimeout {
                command: "rsync".to_string(),
                timeout: Duration::from_secs(1),
            }),
            ShadowError::CommandTimeout { .. }
        ));
    }
}
