//! Base system installation with `pacstrap`.

use std::time::Duration;

use crate::command::{CommandSpec, ToolArgs};
use crate::config::DeploymentConfig;
use crate::context::DeployContext;
use crate::error::Result;
use crate::executor::{execute_with_retry, RetryPolicy};
use crate::success;

/// Mirrors fail transiently; three attempts with a pause in between.
const PACSTRAP_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(10));

/// Packages every deployment gets.
pub const BASE_PACKAGES: &[&str] = &[
    "base",
    "base-devel",
    "linux",
    "linux-firmware",
    "linux-headers",
    "intel-ucode",
    "amd-ucode",
    "btrfs-progs",
    "cryptsetup",
    "dosfstools",
    "grub",
    "efibootmgr",
    "networkmanager",
    "sudo",
    "vim",
    "man-db",
];

/// Base list, then feature packages, the login shell and the extras; no
/// duplicates, first occurrence wins.
pub fn package_list(config: &DeploymentConfig) -> Vec<String> {
    let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();

    if config.enable_apparmor {
        packages.push("apparmor".to_string());
    }
    if config.enable_firewall {
        packages.push("ufw".to_string());
    }
    if config.enable_tpm2 {
        packages.push("tpm2-tss".to_string());
    }

    let shell = config
        .user_shell
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if !shell.is_empty() && shell != "bash" && shell != "sh" {
        packages.push(shell.to_string());
    }

    packages.extend(config.extra_packages.iter().cloned());

    let mut seen = std::collections::HashSet::new();
    packages.retain(|p| seen.insert(p.clone()));
    packages
}

/// `pacstrap -K <target> <packages...>`
#[derive(Debug, Clone)]
pub struct PacstrapArgs<'a> {
    pub target: &'a std::path::Path,
    pub packages: &'a [String],
}

impl ToolArgs for PacstrapArgs<'_> {
    fn program(&self) -> &'static str {
        "pacstrap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-K".to_string(), self.target.display().to_string()];
        args.extend(self.packages.iter().cloned());
        args
    }
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let packages = package_list(ctx.config()?);
    tracing::info!("Installing {} packages: {}", packages.len(), packages.join(" "));

    let cmd: CommandSpec = PacstrapArgs {
        target: ctx.target_root(),
        packages: &packages,
    }
    .to_command();
    execute_with_retry(ctx.exec, &cmd, "Install base system", PACSTRAP_RETRY)?;

    success!("Base system installed into {}", ctx.target_root().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_package_list_features() {
        let mut config = DeploymentConfig::default();
        config.enable_tpm2 = true;
        config.enable_firewall = false;
        config.user_shell = "/usr/bin/zsh".to_string();
        config.extra_packages = vec!["git".to_string(), "sudo".to_string()];

        let packages = package_list(&config);
        assert!(packages.contains(&"apparmor".to_string()));
        assert!(packages.contains(&"tpm2-tss".to_string()));
        assert!(!packages.contains(&"ufw".to_string()));
        assert!(packages.contains(&"zsh".to_string()));
        assert_eq!(packages.last().map(String::as_str), Some("git"));
        assert_eq!(packages.iter().filter(|p| *p == "sudo").count(), 1);
    }

    #[test]
    fn test_default_shell_adds_nothing() {
        let packages = package_list(&DeploymentConfig::default());
        assert!(!packages.contains(&"bash".to_string()));
        assert_eq!(&packages[..4], &["base", "base-devel", "linux", "linux-firmware"]);
    }

    #[test]
    fn test_pacstrap_args() {
        let packages = vec!["base".to_string(), "linux".to_string()];
        let cmd = PacstrapArgs {
            target: Path::new("/mnt"),
            packages: &packages,
        }
        .to_command();
        assert_eq!(cmd.to_string(), "pacstrap -K /mnt base linux");
    }
}
