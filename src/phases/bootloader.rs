//! GRUB installation and the encrypted-root kernel command line.
//!
//! `etc/default/grub` is edited in place with [`set_grub_var`]; the hardening
//! phase reuses the same helpers to extend `GRUB_CMDLINE_LINUX`.

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::executor::{execute, Criticality};
use crate::layout::Subvolume;
use crate::phase::Phase;
use crate::success;

pub const GRUB_DEFAULTS: &str = "etc/default/grub";

/// Read `KEY` from a shell-style config, unquoting the value.
pub fn grub_var(conf: &str, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    conf.lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with(&prefix))
        .last()
        .map(|line| {
            let value = &line[prefix.len()..];
            value.trim().trim_matches('"').to_string()
        })
}

/// Set `KEY="value"`, replacing every active definition and appending when
/// there is none.
pub fn set_grub_var(conf: &str, key: &str, value: &str) -> String {
    let prefix = format!("{}=", key);
    let assignment = format!("{}\"{}\"", prefix, value);
    let mut replaced = false;

    let mut lines: Vec<String> = Vec::new();
    for line in conf.lines() {
        if line.trim_start().starts_with(&prefix) {
            if !replaced {
                lines.push(assignment.clone());
                replaced = true;
            }
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(assignment);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Kernel parameters that unlock and mount the encrypted root.
pub fn root_cmdline(luks_uuid: &str, mapper: &str) -> String {
    format!(
        "rd.luks.name={}={} root=/dev/mapper/{} rootflags=subvol={}",
        luks_uuid,
        mapper,
        mapper,
        Subvolume::Root
    )
}

/// `grub-mkconfig -o /boot/grub/grub.cfg` inside the target.
pub fn regenerate_config(ctx: &DeployContext<'_>) -> Result<()> {
    execute(
        ctx.exec,
        &CommandSpec::in_chroot(ctx.target_root(), "grub-mkconfig").args(["-o", "/boot/grub/grub.cfg"]),
        "Generate GRUB configuration",
        Criticality::Critical,
    )?;
    Ok(())
}

fn luks_uuid(ctx: &DeployContext<'_>) -> Result<String> {
    let layout = ctx.layout()?;
    let output = execute(
        ctx.exec,
        &CommandSpec::query("cryptsetup")
            .arg("luksUUID")
            .arg(layout.root_partition.display().to_string()),
        "Read LUKS UUID of the root partition",
        Criticality::Critical,
    )?;
    let uuid = output.stdout_trimmed();
    if !uuid.is_empty() {
        Ok(uuid.to_string())
    } else if ctx.dry_run() {
        Ok("<luks-uuid>".to_string())
    } else {
        Err(DeployError::precondition(
            Phase::Bootloader,
            format!("{} has no LUKS UUID", layout.root_partition.display()),
        ))
    }
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let config = ctx.config()?.clone();
    let exec = ctx.exec;

    execute(
        exec,
        &CommandSpec::in_chroot(ctx.target_root(), "grub-install").args([
            "--target=x86_64-efi",
            "--efi-directory=/boot",
            "--bootloader-id=GRUB",
            "--recheck",
        ]),
        "Install GRUB (x86_64-efi)",
        Criticality::Critical,
    )?;

    let uuid = luks_uuid(ctx)?;
    let path = ctx.target(GRUB_DEFAULTS);
    let mut conf = exec.read_file(&path).unwrap_or_default();
    conf = set_grub_var(&conf, "GRUB_CMDLINE_LINUX", &root_cmdline(&uuid, &config.root_mapper));
    conf = set_grub_var(&conf, "GRUB_ENABLE_CRYPTODISK", "y");
    exec.write_file(&path, &conf, None)?;

    regenerate_config(ctx)?;
    success!("GRUB installed; root unlocks via {}", config.root_mapper);
    Ok(())
}
