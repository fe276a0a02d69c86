//! Pre-flight checks: privileges, tools, firmware, network.
//!
//! In dry-run every failed check is downgraded to a warning so that a plan
//! can be rehearsed from an unprivileged shell on any machine.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::executor::Executor;
use crate::phase::Phase;
use crate::success;

/// Environment variable that skips the EUID check.
pub const SKIP_ROOT_CHECK_ENV: &str = "ARCH_SECURE_DEPLOY_SKIP_ROOT_CHECK";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Binaries the deployment shells out to.
pub const REQUIRED_BINARIES: &[&str] = &[
    "lsblk",
    "blkid",
    "wipefs",
    "dd",
    "parted",
    "partprobe",
    "udevadm",
    "sgdisk",
    "cryptsetup",
    "mkfs.fat",
    "mkfs.btrfs",
    "btrfs",
    "mount",
    "umount",
    "pacstrap",
    "genfstab",
    "arch-chroot",
];

/// Map a binary to the Arch package that ships it.
pub fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "lsblk" | "blkid" | "wipefs" | "mount" | "umount" => "util-linux",
        "dd" => "coreutils",
        "parted" | "partprobe" => "parted",
        "udevadm" => "systemd",
        "sgdisk" => "gptfdisk",
        "cryptsetup" => "cryptsetup",
        "mkfs.fat" => "dosfstools",
        "mkfs.btrfs" | "btrfs" => "btrfs-progs",
        "pacstrap" | "genfstab" | "arch-chroot" => "arch-install-scripts",
        _ => "unknown",
    }
}

/// Binaries `which` cannot find.
pub fn missing_binaries(exec: &dyn Executor) -> Vec<&'static str> {
    REQUIRED_BINARIES
        .iter()
        .copied()
        .filter(|binary| {
            exec.run(&CommandSpec::query("which").arg(*binary))
                .map(|out| !out.success)
                .unwrap_or(true)
        })
        .collect()
}

/// The kernel exposes `/sys/firmware/efi` only when booted in UEFI mode.
pub fn is_uefi(exec: &dyn Executor) -> bool {
    exec.path_exists(Path::new("/sys/firmware/efi"))
}

/// Try each `host:port` in order; the first successful TCP connect wins.
pub fn first_reachable(hosts: &[String], timeout: Duration) -> Option<String> {
    hosts.iter().find_map(|host| {
        let addrs = match host.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                tracing::debug!("Cannot resolve {}: {}", host, e);
                return None;
            }
        };
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return Some(host.clone()),
                Err(e) => tracing::debug!("{} ({}) unreachable: {}", host, addr, e),
            }
        }
        None
    })
}

fn is_root(skip: bool) -> bool {
    skip
        || std::env::var(SKIP_ROOT_CHECK_ENV).is_ok_and(|v| v == "1")
        || nix::unistd::geteuid().is_root()
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    let exec = ctx.exec;
    let mut problems = Vec::new();

    if is_root(ctx.options.skip_root_check) {
        tracing::debug!("Running with root privileges");
    } else {
        problems.push("root privileges required (run with sudo or as root)".to_string());
    }

    let missing = missing_binaries(exec);
    if missing.is_empty() {
        tracing::debug!("All {} required tools found", REQUIRED_BINARIES.len());
    } else {
        let mut packages: Vec<&str> = missing.iter().map(|b| package_for_binary(b)).collect();
        packages.sort_unstable();
        packages.dedup();
        problems.push(format!(
            "missing tools: {} (install: pacman -S {})",
            missing.join(", "),
            packages.join(" ")
        ));
    }

    if is_uefi(exec) {
        tracing::info!("UEFI firmware detected");
    } else {
        problems.push("system is not booted in UEFI mode (/sys/firmware/efi missing)".to_string());
    }

    match first_reachable(&ctx.options.network_hosts, CONNECT_TIMEOUT) {
        Some(host) => tracing::info!("Network reachable via {}", host),
        None => problems.push(format!(
            "no network: none of {} host(s) reachable",
            ctx.options.network_hosts.len()
        )),
    }

    if problems.is_empty() {
        success!("Pre-flight checks passed");
        return Ok(());
    }

    if ctx.dry_run() {
        for problem in &problems {
            tracing::warn!("Pre-flight (ignored in dry-run): {}", problem);
        }
        return Ok(());
    }

    for problem in &problems {
        tracing::error!("Pre-flight: {}", problem);
    }
    Err(DeployError::precondition(Phase::Preflight, problems.join("; ")))
}
