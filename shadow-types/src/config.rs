// SPDX-License-Identifier: GPL-3.0-only

//! On-disk configuration for the snapshot manager

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/shadow.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Filesystem layout and command bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShadowConfig {
    /// Live root filesystem that gets snapshotted
    pub rootfs_dir: PathBuf,
    /// Directory holding live and snapshot-tagged kernel/initrd images
    pub kernel_dir: PathBuf,
    /// One subvolume per snapshot lives directly below this directory
    pub snapshot_dir: PathBuf,
    /// Mount table consulted to find the device backing `/`
    pub mount_table: PathBuf,
    pub command_timeout_secs: u64,
    pub merge_timeout_secs: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            rootfs_dir: PathBuf::from("/"),
            kernel_dir: PathBuf::from("/boot"),
            snapshot_dir: PathBuf::from("/.shadow"),
            mount_table: PathBuf::from("/proc/self/mounts"),
            command_timeout_secs: 300,
            merge_timeout_secs: 3600,
        }
    }
}

impl ShadowConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` when given; otherwise the default location if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_standard_layout() {
        let config = ShadowConfig::default();
        assert_eq!(config.kernel_dir, PathBuf::from("/boot"));
        assert_eq!(config.snapshot_dir, PathBuf::from("/.shadow"));
        assert_eq!(config.command_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadow.toml");
        fs::write(&path, "snapshot_dir = \"/snapshots\"\nmerge_timeout_secs = 60\n").unwrap();

        let config = ShadowConfig::load(&path).unwrap();
        assert_eq!(config.snapshot_dir, PathBuf::from("/snapshots"));
        assert_eq!(config.merge_timeout(), Duration::from_secs(60));
        assert_eq!(config.rootfs_dir, PathBuf::from("/"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadow.toml");
        fs::write(&path, "snap_dir = \"/typo\"\n").unwrap();

        assert!(matches!(
            ShadowConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            ShadowConfig::load_or_default(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }
}
