//! Kernel and service hardening.

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::Result;
use crate::executor::{execute, Criticality};
use crate::phases::bootloader::{grub_var, regenerate_config, set_grub_var, GRUB_DEFAULTS};
use crate::success;

pub const SYSCTL_DROP_IN: &str = "etc/sysctl.d/99-hardening.conf";

pub const SYSCTL_SETTINGS: &[(&str, &str)] = &[
    // Kernel
    ("kernel.kptr_restrict", "2"),
    ("kernel.dmesg_restrict", "1"),
    ("kernel.randomize_va_space", "2"),
    ("kernel.kexec_load_disabled", "1"),
    ("kernel.unprivileged_bpf_disabled", "1"),
    ("kernel.yama.ptrace_scope", "2"),
    ("net.core.bpf_jit_harden", "2"),
    // Network
    ("net.ipv4.tcp_syncookies", "1"),
    ("net.ipv4.tcp_rfc1337", "1"),
    ("net.ipv4.conf.all.rp_filter", "1"),
    ("net.ipv4.conf.default.rp_filter", "1"),
    ("net.ipv4.conf.all.accept_redirects", "0"),
    ("net.ipv4.conf.default.accept_redirects", "0"),
    ("net.ipv4.conf.all.secure_redirects", "0"),
    ("net.ipv4.conf.all.send_redirects", "0"),
    ("net.ipv4.conf.all.accept_source_route", "0"),
    ("net.ipv6.conf.all.accept_redirects", "0"),
    ("net.ipv6.conf.default.accept_redirects", "0"),
    ("net.ipv6.conf.all.accept_source_route", "0"),
    ("net.ipv4.icmp_echo_ignore_broadcasts", "1"),
    // Filesystem
    ("fs.protected_symlinks", "1"),
    ("fs.protected_hardlinks", "1"),
    ("fs.protected_fifos", "2"),
    ("fs.protected_regular", "2"),
    ("fs.suid_dumpable", "0"),
];

/// Boot-time mitigations appended to `GRUB_CMDLINE_LINUX`.
pub const KERNEL_FLAGS: &[&str] = &[
    "slab_nomerge",
    "init_on_alloc=1",
    "init_on_free=1",
    "page_alloc.shuffle=1",
    "pti=on",
    "vsyscall=none",
    "debugfs=off",
];

pub const APPARMOR_LSM: &str = "lsm=landlock,lockdown,yama,integrity,apparmor,bpf";

pub fn render_sysctl() -> String {
    let mut out = String::from("# Kernel and network hardening\n");
    for (key, value) in SYSCTL_SETTINGS {
        out.push_str(&format!("{} = {}\n", key, value));
    }
    out
}

/// Append `flags` to a command line, skipping ones already present.
pub fn merge_cmdline(cmdline: &str, flags: &[&str]) -> String {
    let mut parts: Vec<String> = cmdline.split_whitespace().map(str::to_string).collect();
    for flag in flags {
        if !parts.iter().any(|p| p == flag) {
            parts.push(flag.to_string());
        }
    }
    parts.join(" ")
}

/// Set `ENABLED=yes` in `ufw.conf` (unquoted, as ufw writes it).
pub fn enable_ufw_conf(conf: &str) -> String {
    let mut lines: Vec<String> = conf
        .lines()
        .filter(|line| !line.trim_start().starts_with("ENABLED="))
        .map(str::to_string)
        .collect();
    lines.push("ENABLED=yes".to_string());
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn enable_service(ctx: &DeployContext<'_>, unit: &str) -> Result<()> {
    execute(
        ctx.exec,
        &CommandSpec::in_chroot(ctx.target_root(), "systemctl").args(["enable", unit]),
        &format!("Enable {}", unit),
        Criticality::Critical,
    )?;
    Ok(())
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let config = ctx.config()?.clone();
    let exec = ctx.exec;

    exec.create_dir_all(&ctx.target("etc/sysctl.d"))?;
    exec.write_file(&ctx.target(SYSCTL_DROP_IN), &render_sysctl(), Some(0o644))?;
    execute(
        exec,
        &CommandSpec::in_chroot(ctx.target_root(), "sysctl").arg("--system"),
        "Apply sysctl settings",
        Criticality::NonCritical,
    )?;

    let mut flags: Vec<&str> = KERNEL_FLAGS.to_vec();
    if config.enable_apparmor {
        flags.push(APPARMOR_LSM);
    }
    let grub_path = ctx.target(GRUB_DEFAULTS);
    let conf = exec.read_file(&grub_path).unwrap_or_default();
    let cmdline = grub_var(&conf, "GRUB_CMDLINE_LINUX").unwrap_or_default();
    let merged = merge_cmdline(&cmdline, &flags);
    exec.write_file(&grub_path, &set_grub_var(&conf, "GRUB_CMDLINE_LINUX", &merged), None)?;
    regenerate_config(ctx)?;

    if config.enable_apparmor {
        enable_service(ctx, "apparmor.service")?;
    }
    if config.enable_firewall {
        let ufw_conf = ctx.target("etc/ufw/ufw.conf");
        let current = exec.read_file(&ufw_conf).unwrap_or_default();
        exec.write_file(&ufw_conf, &enable_ufw_conf(&current), None)?;
        enable_service(ctx, "ufw.service")?;
    }

    success!(
        "Hardening applied ({} sysctl settings, {} kernel flags)",
        SYSCTL_SETTINGS.len(),
        flags.len()
    );
    Ok(())
}
