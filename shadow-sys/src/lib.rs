// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for snapshot management
//!
//! Every privileged action goes through an external tool and is wrapped here:
//! - `mount` / `umount` and `btrfs subvolume` ([`SubvolumeController`])
//! - mount-table inspection ([`RootDeviceResolver`])
//! - `rsync` for merging snapshot contents ([`FileSync`])
//!
//! The traits are the seams the lifecycle controller is written against, so it
//! can be exercised without root or a btrfs filesystem (see the `fake` feature).

pub mod cmd;
pub mod error;
pub mod lock;
pub mod mounts;
pub mod scratch;
pub mod subvolume;
pub mod sync;

#[cfg(feature = "fake")]
pub mod fake;

pub use cmd::{CommandOutcome, ToolCommand};
pub use error::{Result, SysError};
pub use lock::SnapshotLock;
pub use mounts::{MountEntry, ProcMounts, RootDeviceResolver, parse_mount_table};
pub use scratch::{ScratchMount, ScratchRelease};
pub use subvolume::{BtrfsCli, SubvolumeController, parse_subvolume_list};
pub use sync::{FileSync, MERGE_EXCLUDES, Rsync};
