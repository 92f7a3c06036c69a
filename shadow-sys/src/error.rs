// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("`{command}` failed ({}): {}", exit_label(.code), .stderr.trim())]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` did not finish within {}s", .timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("failed to mount {device:?} at {target:?}: {reason}")]
    MountFailed {
        device: PathBuf,
        target: PathBuf,
        reason: String,
    },

    #[error("failed to unmount {path:?}: {reason}")]
    UnmountFailed { path: PathBuf, reason: String },

    #[error("no mount table entry for /")]
    MissingRootDevice,

    #[error("{0:?} is locked by another shadow process")]
    Locked(PathBuf),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
