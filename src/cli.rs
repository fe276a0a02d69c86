use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::FeatureOverrides;
use crate::logging::DEFAULT_LOG_DIR;

/// arch-secure-deploy - Encrypted, hardened Arch Linux workstation installer
#[derive(Parser, Debug)]
#[command(name = "arch-secure-deploy")]
#[command(about = "Install a hardened Arch Linux workstation (LUKS2 + BTRFS + GRUB)")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Destructive commands (wipe, partition, format, install) and file
    /// writes are logged with a [DRY-RUN] marker and skipped. Read-only
    /// queries (lsblk, blkid, cryptsetup isLuks) still run so the preview
    /// is realistic. The destructive confirmation prompt is skipped.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Enroll a TPM2 key for automatic unlock
    #[arg(long, global = true)]
    pub enable_tpm2: bool,

    /// Do not install or enable AppArmor
    #[arg(long, global = true)]
    pub disable_apparmor: bool,

    /// Do not install or enable the ufw firewall
    #[arg(long, global = true)]
    pub disable_firewall: bool,

    /// Directory for the general and errors-only log files
    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// State file; point a later run at the same file to reuse its configuration
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Deployment configuration (JSON) offered for reuse instead of prompting
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Mountpoint of the new system
    #[arg(long, global = true, default_value = "/mnt")]
    pub target: PathBuf,

    /// Debug output on the console
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the deployment (default)
    Deploy,
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        file: PathBuf,
    },
    /// List the deployment phases in order
    Phases,
    /// Delete the oldest snapshots beyond the retention count
    PruneSnapshots {
        /// Snapshot directory
        #[arg(short, long, default_value = "/.snapshots")]
        dir: PathBuf,
        /// Number of snapshots to keep
        #[arg(short, long, default_value_t = 8)]
        keep: usize,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    pub fn overrides(&self) -> FeatureOverrides {
        FeatureOverrides {
            enable_tpm2: self.enable_tpm2,
            disable_apparmor: self.disable_apparmor,
            disable_firewall: self.disable_firewall,
        }
    }
}
