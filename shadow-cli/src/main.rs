// SPDX-License-Identifier: GPL-3.0-only

//! shadow - snapshot and roll back a btrfs root filesystem with its kernels

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shadow_core::{ShadowConfig, SnapshotManager, SnapshotTarget};
use tracing_subscriber::EnvFilter;

mod output;

#[derive(Parser, Debug)]
#[command(name = "shadow", version)]
#[command(about = "Point-in-time snapshots of a btrfs root filesystem and its boot images", long_about = None)]
struct Cli {
    /// Configuration file (defaults to /etc/shadow.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Root filesystem to snapshot
    #[arg(long, global = true)]
    rootfs_dir: Option<PathBuf>,

    /// Directory holding kernel and initrd images
    #[arg(long, global = true)]
    kernel_dir: Option<PathBuf>,

    /// Directory holding one subvolume per snapshot
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Snapshot the kernels and the root filesystem
    Create {
        /// Snapshot name (defaults to the current time as YYYYMMDDHHMM)
        name: Option<String>,
    },
    /// List snapshots
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove a snapshot and its kernel images
    Remove { name: String },
    /// Remove every snapshot
    Clear,
    /// Boot a snapshot (or `default`) on next reboot
    Activate {
        /// Snapshot name, or `default`/`0` for the root subvolume
        target: String,
    },
    /// Copy the contents of one snapshot over another
    Merge { source: String, target: String },
    /// Delete kernel images left behind by removed snapshots
    Prune,
}

impl Commands {
    fn requires_root(&self) -> bool {
        !matches!(self, Self::List { .. })
    }
}

impl Cli {
    fn load_config(&self) -> Result<ShadowConfig> {
        let mut config = ShadowConfig::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(dir) = &self.rootfs_dir {
            config.rootfs_dir = dir.clone();
        }
        if let Some(dir) = &self.kernel_dir {
            config.kernel_dir = dir.clone();
        }
        if let Some(dir) = &self.snapshot_dir {
            config.snapshot_dir = dir.clone();
        }
        Ok(config)
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "shadow=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.command.requires_root() && unsafe { libc::geteuid() } != 0 {
        tracing::error!("shadow must run as root to modify snapshots");
        anyhow::bail!("This command requires root privileges");
    }

    let config = cli.load_config()?;
    tracing::debug!(?config, "Loaded configuration");
    let mut manager = SnapshotManager::new(config);

    match cli.command {
        Commands::Create { name } => {
            let info = manager.take_snapshot(name.as_deref())?;
            println!("Created snapshot {}", info.name);
        }
        Commands::List { json } => {
            let details = manager.snapshot_details()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print!("{}", output::snapshot_table(&details));
            }
        }
        Commands::Remove { name } => {
            let report = manager.remove_snapshot(&name)?;
            println!("{}", output::removal_summary(&report));
        }
        Commands::Clear => {
            let report = manager.clear_snapshots()?;
            for removal in &report.removed {
                println!("{}", output::removal_summary(removal));
            }
            for (name, error) in &report.failed {
                eprintln!("Failed to remove {name}: {error}");
            }
            println!("Removed {} snapshot(s)", report.removed.len());
            if !report.is_complete() {
                anyhow::bail!(
                    "{} snapshot(s) could not be removed: {}",
                    report.remaining.len(),
                    output::name_list(&report.remaining)
                );
            }
        }
        Commands::Activate { target } => {
            let target = SnapshotTarget::parse(&target);
            let report = manager.activate_snapshot(&target)?;
            if let Some(scratch) = report.scratch.as_ref().filter(|scratch| scratch.is_leaked()) {
                eprintln!(
                    "Warning: scratch mount {} could not be cleaned up",
                    scratch.path().display()
                );
            }
            match &report.target {
                SnapshotTarget::Default => {
                    println!("Default subvolume set as active. Reboot to activate.")
                }
                SnapshotTarget::Named(name) => {
                    println!("Snapshot {name} set as default. Reboot to activate.")
                }
            }
        }
        Commands::Merge { source, target } => {
            let source = SnapshotTarget::parse(&source);
            let target = SnapshotTarget::parse(&target);
            let report = manager.merge_snapshot(&source, &target)?;
            for scratch in report.cleanup.iter().filter(|scratch| scratch.is_leaked()) {
                eprintln!(
                    "Warning: scratch mount {} could not be cleaned up",
                    scratch.path().display()
                );
            }
            println!("Merged {} into {}", report.source, report.target);
        }
        Commands::Prune => {
            let pruned = manager.prune_kernel_artifacts()?;
            for path in &pruned {
                println!("Removed {}", path.display());
            }
            println!("Pruned {} orphaned kernel image(s)", pruned.len());
        }
    }

    Ok(())
}
