// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::time::Duration;

use shadow_types::{SubvolumeEntry, SubvolumeId, SubvolumeTable};
use tracing::{info, warn};
use which::which;

use crate::cmd::ToolCommand;
use crate::error::{Result, SysError};

/// Subvolume and mount operations, one external command per call.
pub trait SubvolumeController: Send + Sync {
    fn create_snapshot(&self, source: &Path, dest: &Path) -> Result<()>;

    fn delete_subvolume(&self, path: &Path) -> Result<()>;

    fn list_subvolumes(&self, root: &Path) -> Result<Vec<SubvolumeEntry>>;

    fn set_default_subvolume(&self, id: SubvolumeId, mountpoint: &Path) -> Result<()>;

    /// Mount subvolume `id` of `device` at `target`.
    fn mount(&self, device: &Path, id: SubvolumeId, target: &Path) -> Result<()>;

    fn unmount(&self, path: &Path) -> Result<()>;

    fn subvolume_table(&self, root: &Path) -> Result<SubvolumeTable> {
        Ok(self.list_subvolumes(root)?.into_iter().collect())
    }
}

/// Controller that shells out to `btrfs`, `mount` and `umount`
#[derive(Debug, Clone)]
pub struct BtrfsCli {
    btrfs: PathBuf,
    timeout: Duration,
}

impl BtrfsCli {
    pub fn new(timeout: Duration) -> Self {
        let btrfs = which("btrfs").unwrap_or_else(|_| {
            warn!("btrfs not found in PATH; relying on plain `btrfs` lookup");
            PathBuf::from("btrfs")
        });
        Self { btrfs, timeout }
    }

    fn btrfs(&self) -> ToolCommand {
        ToolCommand::new(&self.btrfs).arg("subvolume")
    }
}

impl SubvolumeController for BtrfsCli {
    fn create_snapshot(&self, source: &Path, dest: &Path) -> Result<()> {
        info!("Snapshotting {} to {}", source.display(), dest.display());
        self.btrfs()
            .arg("snapshot")
            .arg(source)
            .arg(dest)
            .run(self.timeout)?;
        Ok(())
    }

    fn delete_subvolume(&self, path: &Path) -> Result<()> {
        info!("Deleting subvolume {}", path.display());
        self.btrfs().arg("delete").arg(path).run(self.timeout)?;
        Ok(())
    }

    fn list_subvolumes(&self, root: &Path) -> Result<Vec<SubvolumeEntry>> {
        let outcome = self.btrfs().arg("list").arg(root).run(self.timeout)?;
        let subvolumes = parse_subvolume_list(&outcome.stdout);

        if subvolumes.is_empty() && !outcome.stdout.trim().is_empty() {
            warn!("No subvolumes found - output may not have been parsed correctly");
        }

        Ok(subvolumes)
    }

    fn set_default_subvolume(&self, id: SubvolumeId, mountpoint: &Path) -> Result<()> {
        info!("Setting default subvolume {} on {}", id, mountpoint.display());
        self.btrfs()
            .arg("set-default")
            .arg(id.to_string())
            .arg(mountpoint)
            .run(self.timeout)?;
        Ok(())
    }

    fn mount(&self, device: &Path, id: SubvolumeId, target: &Path) -> Result<()> {
        ToolCommand::new("mount")
            .args(["-t", "btrfs", "-o"])
            .arg(format!("subvolid={id}"))
            .arg(device)
            .arg(target)
            .run(self.timeout)
            .map_err(|error| match error {
                SysError::CommandFailed { stderr, .. } => SysError::MountFailed {
                    device: device.to_path_buf(),
                    target: target.to_path_buf(),
                    reason: stderr.trim().to_string(),
                },
                other => other,
            })?;
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        ToolCommand::new("umount")
            .arg(path)
            .run(self.timeout)
            .map_err(|error| match error {
                SysError::CommandFailed { stderr, .. } => SysError::UnmountFailed {
                    path: path.to_path_buf(),
                    reason: stderr.trim().to_string(),
                },
                other => other,
            })?;
        Ok(())
    }
}

/// Parse `btrfs subvolume list` output.
///
/// Lines look like `ID 257 gen 1342 top level 5 path .shadow/202401011200`; the
/// id is the second token and the path is everything after the `path` keyword.
pub fn parse_subvolume_list(output: &str) -> Vec<SubvolumeEntry> {
    let mut subvolumes = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 || parts[0] != "ID" {
            continue;
        }

        let Ok(id) = parts[1].parse::<u64>() else {
            continue;
        };

        let Some(path_idx) = parts.iter().position(|&p| p == "path") else {
            continue;
        };
        let path = parts[path_idx + 1..].join(" ");
        let path = path
            .strip_prefix("<FS_TREE>/")
            .map(str::to_string)
            .unwrap_or(path);

        subvolumes.push(SubvolumeEntry::new(id, path));
    }

    subvolumes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_btrfs_subvolume_list_output() {
        let parsed = parse_subvolume_list(
            "ID 256 gen 89534 top level 5 path home\n\
             ID 257 gen 89530 top level 5 path .shadow/202401011200\n\
             ID 258 gen 89531 top level 5 path <FS_TREE>/.shadow/pre upgrade\n",
        );

        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], SubvolumeEntry::new(257, ".shadow/202401011200"));
        assert_eq!(parsed[2].path, ".shadow/pre upgrade");
    }

    #[test]
    fn skips_lines_without_an_id_or_path() {
        let parsed = parse_subvolume_list(
            "ERROR: can't access '/nope'\nID x gen 1 top level 5 path a\nID 260 gen 1 top level 5\n",
        );
        assert!(parsed.is_empty());
    }

    #[test]
    fn table_lookup_over_parsed_rows() {
        let table: SubvolumeTable =
            parse_subvolume_list("ID 257 gen 1 top level 5 path .shadow/T1\n")
                .into_iter()
                .collect();
        assert_eq!(table.find_snapshot(".shadow", "T1"), Some(SubvolumeId(257)));
    }
}
