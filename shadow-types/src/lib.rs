// SPDX-License-Identifier: GPL-3.0-only

//! Shared data models for the shadow snapshot manager
//!
//! These types are used by every layer of the workspace:
//!
//! - **shadow-sys**: returns [`SubvolumeEntry`] rows and consumes [`SubvolumeId`]
//! - **shadow-core**: builds [`SnapshotInfo`] records and resolves [`SnapshotTarget`]s
//! - **shadow-cli**: parses targets from the command line and loads [`ShadowConfig`]

pub mod config;
pub mod snapshot;
pub mod subvolume;

pub use config::*;
pub use snapshot::*;
pub use subvolume::*;
