//! Hostname, time, locale, console, networking and sudo inside the target.

use crate::command::CommandSpec;
use crate::config::DeploymentConfig;
use crate::context::DeployContext;
use crate::error::Result;
use crate::executor::{execute, Criticality};
use crate::success;

pub const SUDOERS_DROP_IN: &str = "etc/sudoers.d/10-wheel";

pub fn render_hosts(hostname: &str) -> String {
    format!(
        "127.0.0.1\tlocalhost\n::1\t\tlocalhost\n127.0.1.1\t{0}.localdomain\t{0}\n",
        hostname
    )
}

/// Uncomment `<locale> UTF-8` in `locale.gen`, appending it if absent.
pub fn enable_locale(locale_gen: &str, locale: &str) -> String {
    let charset = locale.split('.').nth(1).unwrap_or("UTF-8");
    let entry = format!("{} {}", locale, charset);
    let mut found = false;

    let mut lines: Vec<String> = locale_gen
        .lines()
        .map(|line| {
            let uncommented = line.trim_start_matches('#').trim();
            if uncommented == entry {
                found = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(entry);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn write_identity(ctx: &DeployContext<'_>, config: &DeploymentConfig) -> Result<()> {
    let exec = ctx.exec;
    exec.write_file(&ctx.target("etc/hostname"), &format!("{}\n", config.hostname), None)?;
    exec.write_file(&ctx.target("etc/hosts"), &render_hosts(&config.hostname), None)?;
    Ok(())
}

fn configure_time(ctx: &DeployContext<'_>, config: &DeploymentConfig) -> Result<()> {
    let root = ctx.target_root();
    execute(
        ctx.exec,
        &CommandSpec::in_chroot(root, "ln").args([
            "-sf".to_string(),
            format!("/usr/share/zoneinfo/{}", config.timezone),
            "/etc/localtime".to_string(),
        ]),
        &format!("Set timezone {}", config.timezone),
        Criticality::Critical,
    )?;
    execute(
        ctx.exec,
        &CommandSpec::in_chroot(root, "hwclock").arg("--systohc"),
        "Sync hardware clock",
        Criticality::NonCritical,
    )?;
    Ok(())
}

fn configure_locale(ctx: &DeployContext<'_>, config: &DeploymentConfig) -> Result<()> {
    let exec = ctx.exec;
    let locale_gen = ctx.target("etc/locale.gen");
    let current = exec.read_file(&locale_gen).unwrap_or_default();
    exec.write_file(&locale_gen, &enable_locale(&current, &config.locale), None)?;

    execute(
        exec,
        &CommandSpec::in_chroot(ctx.target_root(), "locale-gen"),
        "Generate locales",
        Criticality::Critical,
    )?;
    exec.write_file(&ctx.target("etc/locale.conf"), &format!("LANG={}\n", config.locale), None)?;
    exec.write_file(&ctx.target("etc/vconsole.conf"), &format!("KEYMAP={}\n", config.keymap), None)?;
    Ok(())
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let config = ctx.config()?.clone();
    let exec = ctx.exec;

    write_identity(ctx, &config)?;
    configure_time(ctx, &config)?;
    configure_locale(ctx, &config)?;

    execute(
        exec,
        &CommandSpec::in_chroot(ctx.target_root(), "systemctl").args(["enable", "NetworkManager"]),
        "Enable NetworkManager",
        Criticality::Critical,
    )?;

    exec.create_dir_all(&ctx.target("etc/sudoers.d"))?;
    exec.write_file(
        &ctx.target(SUDOERS_DROP_IN),
        "%wheel ALL=(ALL:ALL) ALL\n",
        Some(0o440),
    )?;

    success!("System configured as {}", config.hostname);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_hosts() {
        let hosts = render_hosts("vault");
        assert!(hosts.contains("127.0.1.1\tvault.localdomain\tvault"));
        assert_eq!(hosts.lines().count(), 3);
    }

    #[test]
    fn test_enable_locale_uncomments() {
        let locale_gen = "#en_GB.UTF-8 UTF-8\n#en_US.UTF-8 UTF-8\n#en_US ISO-8859-1\n";
        let out = enable_locale(locale_gen, "en_US.UTF-8");
        assert_eq!(
            out,
            "#en_GB.UTF-8 UTF-8\nen_US.UTF-8 UTF-8\n#en_US ISO-8859-1\n"
        );
    }

    #[test]
    fn test_enable_locale_appends_when_missing() {
        let out = enable_locale("", "de_DE.UTF-8");
        assert_eq!(out, "de_DE.UTF-8 UTF-8\n");
    }
}
