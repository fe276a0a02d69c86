//! mkinitcpio configuration and image generation.

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::Result;
use crate::executor::{execute, Criticality};
use crate::success;

pub const MODULES: &str = "MODULES=(btrfs)";

/// systemd-based initramfs with `sd-encrypt` so `rd.luks.name` unlocks root.
pub const HOOKS: &str = "HOOKS=(base systemd autodetect microcode modconf kms keyboard sd-vconsole block sd-encrypt filesystems fsck)";

/// Replace the active `MODULES=` and `HOOKS=` lines, appending them when
/// missing. Commented-out lines are left alone.
pub fn rewrite_mkinitcpio(conf: &str) -> String {
    let mut saw_modules = false;
    let mut saw_hooks = false;

    let mut lines: Vec<String> = conf
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("MODULES=") {
                saw_modules = true;
                MODULES.to_string()
            } else if trimmed.starts_with("HOOKS=") {
                saw_hooks = true;
                HOOKS.to_string()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !saw_modules {
        lines.push(MODULES.to_string());
    }
    if !saw_hooks {
        lines.push(HOOKS.to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let exec = ctx.exec;

    let path = ctx.target("etc/mkinitcpio.conf");
    let current = exec.read_file(&path).unwrap_or_default();
    exec.write_file(&path, &rewrite_mkinitcpio(&current), None)?;
    tracing::debug!("Rewrote {}", path.display());

    execute(
        exec,
        &CommandSpec::in_chroot(ctx.target_root(), "mkinitcpio").arg("-P"),
        "Generate initramfs images",
        Criticality::Critical,
    )?;

    success!("Initramfs generated with sd-encrypt");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_replaces_active_lines_only() {
        let conf = "# MODULES=(foo)\nMODULES=()\nBINARIES=()\nHOOKS=(base udev autodetect block filesystems fsck)\n";
        let out = rewrite_mkinitcpio(conf);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "# MODULES=(foo)");
        assert_eq!(lines[1], MODULES);
        assert_eq!(lines[2], "BINARIES=()");
        assert_eq!(lines[3], HOOKS);
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_rewrite_appends_missing_lines() {
        let out = rewrite_mkinitcpio("");
        assert!(out.contains(MODULES));
        assert!(out.contains("sd-encrypt"));
        assert!(out.ends_with('\n'));
    }
}
