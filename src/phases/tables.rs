//! `fstab` and `crypttab` generation.

use std::path::Path;

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::executor::{execute, Criticality, Executor};
use crate::success;

/// crypttab options for both encrypted volumes.
pub const CRYPTTAB_OPTIONS: &str = "luks,x-systemd.device-timeout=30s";

/// One `etc/crypttab` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrypttabEntry {
    pub mapper: String,
    pub partuuid: String,
}

/// Render `etc/crypttab`; key file is `none` so the passphrase is asked at boot.
pub fn render_crypttab(entries: &[CrypttabEntry]) -> String {
    let mut out = String::from("# <name>\t<device>\t<password>\t<options>\n");
    for entry in entries {
        out.push_str(&format!(
            "{}\tPARTUUID={}\tnone\t{}\n",
            entry.mapper, entry.partuuid, CRYPTTAB_OPTIONS
        ));
    }
    out
}

/// `blkid -s PARTUUID -o value <partition>`
pub fn partuuid(exec: &dyn Executor, partition: &Path) -> Result<String> {
    let output = execute(
        exec,
        &CommandSpec::query("blkid")
            .args(["-s", "PARTUUID", "-o", "value"])
            .arg(partition.display().to_string()),
        &format!("Read PARTUUID of {}", partition.display()),
        Criticality::Critical,
    )?;
    let value = output.stdout_trimmed();
    if !value.is_empty() {
        return Ok(value.to_string());
    }
    if exec.is_dry_run() {
        return Ok(format!("<partuuid-of-{}>", partition.display()));
    }
    Err(DeployError::precondition(
        crate::phase::Phase::FilesystemTables,
        format!("{} has no PARTUUID", partition.display()),
    ))
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let config = ctx.config()?.clone();
    let layout = ctx.layout()?.clone();
    let exec = ctx.exec;

    let fstab = execute(
        exec,
        &CommandSpec::query("genfstab").arg("-U").arg(ctx.target_root().display().to_string()),
        "Generate fstab",
        Criticality::Critical,
    )?;
    let fstab_path = ctx.target("etc/fstab");
    exec.append_file(&fstab_path, &fstab.stdout)?;
    tracing::debug!("Appended {} bytes to {}", fstab.stdout.len(), fstab_path.display());

    let entries = vec![
        CrypttabEntry {
            mapper: config.root_mapper.clone(),
            partuuid: partuuid(exec, &layout.root_partition)?,
        },
        CrypttabEntry {
            mapper: config.home_mapper.clone(),
            partuuid: partuuid(exec, &layout.home_partition)?,
        },
    ];
    exec.write_file(&ctx.target("etc/crypttab"), &render_crypttab(&entries), Some(0o600))?;

    success!("fstab and crypttab written");
    Ok(())
}
