//! LUKS2 encryption of the root and home partitions.
//!
//! The passphrase is written to a 0600 keyfile for the duration of the phase
//! and handed to `cryptsetup` with `--key-file`; it never appears in argv.
//! The keyfile is wiped when the phase returns, on success or error.

use std::path::Path;

use crate::command::{CommandKind, CommandSpec, ToolArgs};
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::executor::{execute, Criticality, DRY_RUN_MARKER};
use crate::layout::mapper_path;
use crate::prompt::{confirm_typed, prompt_passphrase, PASSPHRASE_ATTEMPTS};
use crate::secret::{Passphrase, SecretFile};
use crate::success;

/// Keyfile path shown in dry-run command lines. Never created.
pub const DRY_RUN_KEY_FILE: &str = "/run/arch-secure-deploy/dry-run.key";

/// `cryptsetup luksFormat` with the LUKS2 / Argon2id profile.
#[derive(Debug, Clone)]
pub struct LuksFormatArgs<'a> {
    pub device: &'a Path,
    pub key_file: &'a Path,
    pub label: &'a str,
}

impl ToolArgs for LuksFormatArgs<'_> {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "luksFormat".to_string(),
            "--type".to_string(),
            "luks2".to_string(),
            "--pbkdf".to_string(),
            "argon2id".to_string(),
            "--cipher".to_string(),
            "aes-xts-plain64".to_string(),
            "--key-size".to_string(),
            "512".to_string(),
            "--hash".to_string(),
            "sha512".to_string(),
            "--label".to_string(),
            self.label.to_string(),
            "--batch-mode".to_string(),
            "--key-file".to_string(),
            self.key_file.display().to_string(),
            self.device.display().to_string(),
        ]
    }
}

/// `cryptsetup open --key-file <key> <device> <name>`
#[derive(Debug, Clone)]
pub struct LuksOpenArgs<'a> {
    pub device: &'a Path,
    pub key_file: &'a Path,
    pub name: &'a str,
}

impl ToolArgs for LuksOpenArgs<'_> {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "open".to_string(),
            "--key-file".to_string(),
            self.key_file.display().to_string(),
            self.device.display().to_string(),
            self.name.to_string(),
        ]
    }
}

/// `cryptsetup isLuks <device>`; exit 0 means a header is present.
#[derive(Debug, Clone)]
pub struct IsLuksArgs<'a> {
    pub device: &'a Path,
}

impl ToolArgs for IsLuksArgs<'_> {
    fn program(&self) -> &'static str {
        "cryptsetup"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["isLuks".to_string(), self.device.display().to_string()]
    }

    fn kind(&self) -> CommandKind {
        CommandKind::Query
    }
}

/// The phase's keyfile. Dry-run writes nothing and returns `None`.
fn keyfile(dry_run: bool, passphrase: &Passphrase) -> Result<Option<SecretFile>> {
    if dry_run {
        tracing::info!("{} Would write keyfile {}", DRY_RUN_MARKER, DRY_RUN_KEY_FILE);
        return Ok(None);
    }
    Ok(Some(SecretFile::new(passphrase)?))
}

/// Erase an existing LUKS header only after a typed confirmation.
fn erase_existing_header(ctx: &mut DeployContext<'_>, device: &Path) -> Result<()> {
    let exec = ctx.exec;
    let header = exec.run(&IsLuksArgs { device }.to_command())?;
    if !header.success {
        return Ok(());
    }

    tracing::warn!("{} already contains a LUKS header", device.display());
    if ctx.dry_run() {
        tracing::info!(
            "{} Skipping LUKS erase confirmation for {}",
            DRY_RUN_MARKER,
            device.display()
        );
    } else if !confirm_typed(
        &mut *ctx.prompter,
        &format!("Destroy the existing LUKS header on {}?", device.display()),
    )? {
        return Err(DeployError::cancelled(format!(
            "LUKS header on {} kept",
            device.display()
        )));
    }

    execute(
        exec,
        &CommandSpec::new("cryptsetup").args(["luksErase", "--batch-mode"]).arg(device.display().to_string()),
        &format!("Erase LUKS header on {}", device.display()),
        Criticality::Critical,
    )?;
    Ok(())
}

fn enroll_tpm2(ctx: &DeployContext<'_>, device: &Path, key_file: &Path) -> Result<()> {
    execute(
        ctx.exec,
        &CommandSpec::new("systemd-cryptenroll").args([
            "--tpm2-device=auto".to_string(),
            "--tpm2-pcrs=7".to_string(),
            format!("--unlock-key-file={}", key_file.display()),
            device.display().to_string(),
        ]),
        &format!("Enroll TPM2 for {}", device.display()),
        Criticality::NonCritical,
    )?;
    Ok(())
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    let layout = ctx.layout()?.clone();
    let config = ctx.config()?.clone();
    let exec = ctx.exec;

    let passphrase = prompt_passphrase(&mut *ctx.prompter, "encryption passphrase", PASSPHRASE_ATTEMPTS)?;

    execute(
        exec,
        &CommandSpec::new("mkfs.fat")
            .args(["-F32", "-n", "EFI"])
            .arg(layout.efi_partition.display().to_string()),
        "Format EFI partition (FAT32)",
        Criticality::Critical,
    )?;

    let key = keyfile(ctx.dry_run(), &passphrase)?;
    let key_path = key
        .as_ref()
        .map_or(Path::new(DRY_RUN_KEY_FILE), |k| k.path());
    let volumes = [
        (&layout.root_partition, config.root_mapper.as_str(), "ROOT"),
        (&layout.home_partition, config.home_mapper.as_str(), "HOME"),
    ];

    for (partition, mapper, label) in volumes {
        erase_existing_header(ctx, partition)?;

        execute(
            exec,
            &LuksFormatArgs {
                device: partition,
                key_file: key_path,
                label,
            }
            .to_command(),
            &format!("Format {} as LUKS2", partition.display()),
            Criticality::Critical,
        )?;
        execute(
            exec,
            &LuksOpenArgs {
                device: partition,
                key_file: key_path,
                name: mapper,
            }
            .to_command(),
            &format!("Open {} as {}", partition.display(), mapper),
            Criticality::Critical,
        )?;
        ctx.ledger.record_mapper(mapper);

        let node = mapper_path(mapper);
        if !exec.block_device_exists(&node) {
            return Err(DeployError::precondition(
                ctx.tracker.current(),
                format!("{} did not appear after opening", node.display()),
            ));
        }

        if config.enable_tpm2 {
            enroll_tpm2(ctx, partition, key_path)?;
        }
    }

    drop(key);
    success!("Encrypted volumes {} and {} open", config.root_mapper, config.home_mapper);
    Ok(())
}
