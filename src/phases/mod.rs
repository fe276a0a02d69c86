//! The fifteen deployment phases.
//!
//! Each module exposes `run(&mut DeployContext) -> Result<()>`. A phase checks
//! the post-conditions of the phases before it (configuration gathered, disk
//! selected, mapper open, target mounted) and fails with
//! `DeployError::Precondition` rather than operating on a device that is not
//! ready.

pub mod bootloader;
pub mod btrfs;
pub mod configure;
pub mod device;
pub mod disk;
pub mod encryption;
pub mod finalize;
pub mod hardening;
pub mod initramfs;
pub mod install;
pub mod preflight;
pub mod snapshots;
pub mod system;
pub mod tables;
pub mod user;

use crate::context::DeployContext;
use crate::error::Result;
use crate::phase::Phase;

/// Run the body of `phase`. The tracker must already be at `phase`.
pub fn run_phase(phase: Phase, ctx: &mut DeployContext<'_>) -> Result<()> {
    match phase {
        Phase::Preflight => preflight::run(ctx),
        Phase::Configuration => configure::run(ctx),
        Phase::DeviceSelection => device::run(ctx),
        Phase::DiskPreparation => disk::run(ctx),
        Phase::Encryption => encryption::run(ctx),
        Phase::BtrfsLayout => btrfs::run(ctx),
        Phase::BaseInstall => install::run(ctx),
        Phase::FilesystemTables => tables::run(ctx),
        Phase::Initramfs => initramfs::run(ctx),
        Phase::Bootloader => bootloader::run(ctx),
        Phase::SystemConfig => system::run(ctx),
        Phase::UserSetup => user::run(ctx),
        Phase::SnapshotAutomation => snapshots::run(ctx),
        Phase::Hardening => hardening::run(ctx),
        Phase::Finalize => finalize::run(ctx),
        Phase::NotStarted | Phase::Completed | Phase::Failed => Ok(()),
    }
}
