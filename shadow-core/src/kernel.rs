// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use shadow_types::is_timestamp_name;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Substrings identifying kernel images and initial ramdisks.
pub const BOOT_IMAGE_MARKERS: &[&str] = &["kernel", "vmlinuz", "initrd"];

pub fn is_boot_image(file_name: &str) -> bool {
    BOOT_IMAGE_MARKERS
        .iter()
        .any(|marker| file_name.contains(marker))
}

/// Live file name of an artifact tagged with `name`, if `file_name` is one.
pub fn strip_snapshot_suffix<'a>(file_name: &'a str, name: &str) -> Option<&'a str> {
    let base = file_name.strip_suffix(name)?.strip_suffix('.')?;
    (!base.is_empty()).then_some(base)
}

/// Snapshot suffix of `file_name` if it looks like a tagged copy of a boot image.
///
/// A copy is `<base>.<suffix>` where `<base>` is a boot image and either the
/// suffix is a timestamp name or `<base>` itself is present in `files`.
fn copy_suffix<'a>(file_name: &'a str, files: &BTreeSet<&str>) -> Option<&'a str> {
    let (base, suffix) = file_name.rsplit_once('.')?;
    let tagged = is_boot_image(base) && (is_timestamp_name(suffix) || files.contains(base));
    tagged.then_some(suffix)
}

/// Keeps `<file>.<snapshot>` copies of the boot images in the kernel directory.
#[derive(Debug, Clone)]
pub struct KernelArtifactSynchronizer {
    kernel_dir: PathBuf,
}

impl KernelArtifactSynchronizer {
    pub fn new(kernel_dir: impl Into<PathBuf>) -> Self {
        Self {
            kernel_dir: kernel_dir.into(),
        }
    }

    pub fn kernel_dir(&self) -> &Path {
        &self.kernel_dir
    }

    fn file_names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.kernel_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("Kernel directory {} does not exist", self.kernel_dir.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!("Skipping non UTF-8 kernel file {:?}", raw),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Copy every live boot image to `<file>.<name>`.
    ///
    /// Files already carrying a registered snapshot name or `name` itself are
    /// skipped, so repeating the call does not multiply artifacts. Leftover
    /// copies of removed snapshots are skipped too.
    pub fn snapshot_artifacts(
        &self,
        name: &str,
        registered: &BTreeSet<String>,
    ) -> Result<Vec<PathBuf>> {
        let file_names = self.file_names()?;
        let files: BTreeSet<&str> = file_names.iter().map(String::as_str).collect();

        let mut created = Vec::new();
        for file_name in &file_names {
            if !is_boot_image(file_name)
                || file_name.contains(name)
                || copy_suffix(file_name, &files).is_some()
                || registered.iter().any(|snapshot| file_name.contains(snapshot.as_str()))
            {
                continue;
            }

            let source = self.kernel_dir.join(file_name);
            let dest = self.kernel_dir.join(format!("{file_name}.{name}"));
            debug!("Creating snapshot for kernel or initrd: {}", dest.display());
            fs::copy(&source, &dest)?;
            created.push(dest);
        }
        Ok(created)
    }

    /// File names tagged with `name`.
    pub fn artifacts_for(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .file_names()?
            .into_iter()
            .filter(|file_name| strip_snapshot_suffix(file_name, name).is_some())
            .collect())
    }

    pub fn remove_artifacts(&self, name: &str) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for file_name in self.artifacts_for(name)? {
            let path = self.kernel_dir.join(file_name);
            debug!("Removing kernel artifact {}", path.display());
            fs::remove_file(&path)?;
            removed.push(path);
        }
        if !removed.is_empty() {
            info!("Removed kernel/initrd snapshot for {}", name);
        }
        Ok(removed)
    }

    /// Overwrite the live images with the copies tagged with `name`.
    pub fn activate_artifacts(&self, name: &str) -> Result<Vec<PathBuf>> {
        let mut activated = Vec::new();
        for file_name in self.artifacts_for(name)? {
            let Some(live) = strip_snapshot_suffix(&file_name, name) else {
                continue;
            };
            let dest = self.kernel_dir.join(live);
            debug!("Activating {} as {}", file_name, dest.display());
            fs::copy(self.kernel_dir.join(&file_name), &dest)?;
            activated.push(dest);
        }
        Ok(activated)
    }

    /// Tagged boot image copies whose suffix matches no registered snapshot.
    pub fn orphaned_artifacts(&self, registered: &BTreeSet<String>) -> Result<Vec<String>> {
        let file_names = self.file_names()?;
        let files: BTreeSet<&str> = file_names.iter().map(String::as_str).collect();

        Ok(file_names
            .iter()
            .filter(|file_name| {
                copy_suffix(file_name, &files).is_some_and(|suffix| !registered.contains(suffix))
                    && !registered
                        .iter()
                        .any(|name| strip_snapshot_suffix(file_name, name).is_some())
            })
            .cloned()
            .collect())
    }

    pub fn prune_orphans(&self, registered: &BTreeSet<String>) -> Result<Vec<PathBuf>> {
        let mut pruned = Vec::new();
        for file_name in self.orphaned_artifacts(registered)? {
            let path = self.kernel_dir.join(file_name);
            info!("Pruning orphaned kernel artifact {}", path.display());
            fs::remove_file(&path)?;
            pruned.push(path);
        }
        Ok(pruned)
    }
}
