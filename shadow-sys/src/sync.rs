// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};
use which::which;

use crate::cmd::ToolCommand;
use crate::error::Result;

/// Pseudo-filesystem paths never copied during a merge, relative to the source root.
pub const MERGE_EXCLUDES: &[&str] = &["/tmp*", "/proc/*", "/sys/*", "/dev/*"];

/// Copies file differences from one tree into another.
pub trait FileSync: Send + Sync {
    fn sync(&self, source: &Path, target: &Path) -> Result<()>;
}

/// `rsync -aAX` with the fixed exclude set; differing files in the target are overwritten.
#[derive(Debug, Clone)]
pub struct Rsync {
    binary: PathBuf,
    timeout: Duration,
}

impl Rsync {
    pub fn new(timeout: Duration) -> Self {
        let binary = which("rsync").unwrap_or_else(|_| {
            warn!("rsync not found in PATH; relying on plain `rsync` lookup");
            PathBuf::from("rsync")
        });
        Self { binary, timeout }
    }

    pub fn command(&self, source: &Path, target: &Path) -> ToolCommand {
        ToolCommand::new(&self.binary)
            .arg("-aAX")
            .args(MERGE_EXCLUDES.iter().map(|pattern| format!("--exclude={pattern}")))
            .arg(with_trailing_slash(source))
            .arg(with_trailing_slash(target))
    }
}

impl FileSync for Rsync {
    fn sync(&self, source: &Path, target: &Path) -> Result<()> {
        info!("Merging {} into {}", source.display(), target.display());
        self.command(source, target).run(self.timeout)?;
        Ok(())
    }
}

/// rsync copies a directory's contents, not the directory itself, when the source ends in `/`.
fn with_trailing_slash(path: &Path) -> OsString {
    let mut raw = path.as_os_str().to_os_string();
    if !raw.to_string_lossy().ends_with('/') {
        raw.push("/");
    }
    raw
}
