// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot lifecycle controller
//!
//! Keeps three independently mutable resources in correspondence: the btrfs
//! subvolume namespace, the snapshot directory (the registry), and the
//! kernel/initrd images tagged with each snapshot's name. There is no
//! transaction log; consistency comes from step ordering and from re-reading
//! the registry after every mutation.

pub mod activation;
pub mod error;
pub mod kernel;
pub mod manager;
pub mod merge;
pub mod namer;
pub mod registry;

pub use activation::{ActivationController, ActivationReport, ActivationState};
pub use error::{Result, ShadowError};
pub use kernel::KernelArtifactSynchronizer;
pub use manager::{Backends, ClearReport, RemovalReport, SnapshotManager};
pub use merge::{MergeController, MergeReport};
pub use namer::SnapshotNamer;
pub use registry::SnapshotRegistry;

pub use shadow_types::{ShadowConfig, SnapshotInfo, SnapshotTarget, SubvolumeId};
