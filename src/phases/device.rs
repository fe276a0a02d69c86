//! Target disk and partition size selection.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::executor::{execute, Criticality, Executor, DRY_RUN_MARKER};
use crate::layout::DiskLayout;
use crate::prompt::{confirm_typed, prompt_validated, Prompter, PromptError};
use crate::success;
use crate::validation::{
    check_disk_space, compute_partition_sizes, parse_size_gb, validate_device_state,
    PartitionSizes, EFI_SIZE_GB, MIN_HOME_GB, MIN_ROOT_GB,
};

/// A whole disk as reported by `lsblk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub model: String,
}

impl DiskInfo {
    pub fn label(&self) -> String {
        let gb = self.size_bytes / (1024 * 1024 * 1024);
        if self.model.is_empty() {
            format!("{}  {} GB", self.path.display(), gb)
        } else {
            format!("{}  {} GB  {}", self.path.display(), gb, self.model)
        }
    }
}

#[derive(Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Deserialize)]
struct LsblkDevice {
    name: String,
    size: LsblkSize,
    #[serde(rename = "type")]
    kind: String,
    model: Option<String>,
}

/// util-linux prints sizes as numbers in newer releases and strings in older ones.
#[derive(Deserialize)]
#[serde(untagged)]
enum LsblkSize {
    Number(u64),
    Text(String),
}

impl LsblkSize {
    fn bytes(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Parse `lsblk -J -b -d -p -o NAME,SIZE,TYPE,MODEL`, keeping whole disks only.
pub fn parse_lsblk(json: &str) -> Result<Vec<DiskInfo>> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    Ok(output
        .blockdevices
        .into_iter()
        .filter(|d| d.kind == "disk")
        .filter_map(|d| {
            Some(DiskInfo {
                size_bytes: d.size.bytes()?,
                path: PathBuf::from(d.name),
                model: d.model.unwrap_or_default().trim().to_string(),
            })
        })
        .collect())
}

pub fn list_disks(exec: &dyn Executor) -> Result<Vec<DiskInfo>> {
    let cmd = CommandSpec::query("lsblk").args(["-J", "-b", "-d", "-p", "-o", "NAME,SIZE,TYPE,MODEL"]);
    let output = execute(exec, &cmd, "List block devices", Criticality::Critical)?;
    parse_lsblk(&output.stdout)
}

fn suggested_root_gb(available_gb: u64) -> u64 {
    let max_root = available_gb.saturating_sub(EFI_SIZE_GB + MIN_HOME_GB);
    (available_gb * 40 / 100).clamp(MIN_ROOT_GB, max_root.max(MIN_ROOT_GB))
}

/// Ask for the root size until it leaves a valid home partition.
pub fn prompt_partition_size(
    prompter: &mut dyn Prompter,
    available_gb: u64,
) -> std::result::Result<PartitionSizes, PromptError> {
    let max_root = available_gb.saturating_sub(EFI_SIZE_GB + MIN_HOME_GB);
    let message = format!(
        "Root partition size in GB ({}-{}, rest of the {} GB disk goes to home)",
        MIN_ROOT_GB, max_root, available_gb
    );
    let default = suggested_root_gb(available_gb).to_string();
    prompt_validated(prompter, &message, Some(&default), |input| {
        compute_partition_sizes(available_gb, parse_size_gb(input)?)
    })
}

/// Typed `YES` before the disk is wiped. Dry-run skips the prompt.
pub fn confirm_destructive_operation(
    prompter: &mut dyn Prompter,
    dry_run: bool,
    device: &Path,
) -> Result<()> {
    if dry_run {
        tracing::info!(
            "{} Skipping destructive confirmation for {}",
            DRY_RUN_MARKER,
            device.display()
        );
        return Ok(());
    }
    tracing::warn!(
        "ALL DATA ON {} WILL BE PERMANENTLY DESTROYED",
        device.display()
    );
    if confirm_typed(prompter, &format!("Erase {}?", device.display()))? {
        Ok(())
    } else {
        Err(DeployError::cancelled(format!(
            "destructive operation on {} not confirmed",
            device.display()
        )))
    }
}

/// Menu over the disks until one passes validation and the space check.
fn select_disk(ctx: &mut DeployContext<'_>, disks: &[DiskInfo]) -> Result<(DiskInfo, u64)> {
    let exec = ctx.exec;
    let mount_table = exec.read_file(Path::new("/proc/mounts")).unwrap_or_default();
    let labels: Vec<String> = disks.iter().map(DiskInfo::label).collect();

    loop {
        let index = ctx.prompter.select("Select the target disk", &labels)?;
        let disk = &disks[index];
        if let Err(e) = validate_device_state(&disk.path, exec.block_device_exists(&disk.path), &mount_table) {
            tracing::warn!("{}", e);
            continue;
        }
        match check_disk_space(disk.size_bytes) {
            Ok(available_gb) => return Ok((disk.clone(), available_gb)),
            Err(e) => tracing::warn!("{}: {}", disk.path.display(), e),
        }
    }
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    let disks = list_disks(ctx.exec)?;
    if disks.is_empty() {
        return Err(DeployError::precondition(
            ctx.tracker.current(),
            "no disks found",
        ));
    }

    let (disk, available_gb) = select_disk(ctx, &disks)?;
    tracing::info!("{} has {} GB available", disk.path.display(), available_gb);

    let sizes = prompt_partition_size(&mut *ctx.prompter, available_gb)?;
    let layout = DiskLayout::new(&disk.path, available_gb, sizes.root_gb, sizes.home_gb);
    tracing::info!(
        "Layout: EFI {} ({} GB), root {} ({} GB), home {} ({} GB)",
        layout.efi_partition.display(),
        EFI_SIZE_GB,
        layout.root_partition.display(),
        layout.root_gb,
        layout.home_partition.display(),
        layout.home_gb
    );

    let dry_run = ctx.dry_run();
    confirm_destructive_operation(&mut *ctx.prompter, dry_run, &layout.device)?;
    ctx.tracker.confirm_destructive_operations();

    ctx.state.save_state("TARGET_DEVICE", layout.device.display().to_string())?;
    ctx.state.save_state("ROOT_SIZE_GB", layout.root_gb.to_string())?;
    ctx.state.save_state("HOME_SIZE_GB", layout.home_gb.to_string())?;
    ctx.layout = Some(layout);
    success!("Target disk selected: {}", disk.path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{Answer, ScriptedPrompter};

    #[test]
    fn test_parse_lsblk_numbers_and_strings() {
        let json = r#"{"blockdevices":[
            {"name":"/dev/nvme0n1","size":214748364800,"type":"disk","model":"Samsung SSD 980 "},
            {"name":"/dev/sda","size":"128849018880","type":"disk","model":null},
            {"name":"/dev/sr0","size":1073741312,"type":"rom","model":"DVD"},
            {"name":"/dev/loop0","size":800000000,"type":"loop","model":null}
        ]}"#;
        let disks = parse_lsblk(json).unwrap();
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].path, PathBuf::from("/dev/nvme0n1"));
        assert_eq!(disks[0].model, "Samsung SSD 980");
        assert_eq!(disks[0].label(), "/dev/nvme0n1  200 GB  Samsung SSD 980");
        assert_eq!(disks[1].size_bytes, 128849018880);
        assert_eq!(disks[1].label(), "/dev/sda  120 GB");
    }

    #[test]
    fn test_parse_lsblk_rejects_garbage() {
        assert!(parse_lsblk("not json").is_err());
    }

    #[test]
    fn test_prompt_partition_size_enforces_minimums() {
        let mut prompter = ScriptedPrompter::new([
            Answer::Text("40".to_string()),
            Answer::Text("190".to_string()),
            Answer::Text("lots".to_string()),
            Answer::Text("50".to_string()),
        ]);
        let sizes = prompt_partition_size(&mut prompter, 200).unwrap();
        assert_eq!(sizes, PartitionSizes { root_gb: 50, home_gb: 149 });
        assert_eq!(prompter.asked().len(), 4);
    }

    #[test]
    fn test_suggested_root_is_always_valid() {
        for available in [71, 100, 200, 2000] {
            let root = suggested_root_gb(available);
            assert!(compute_partition_sizes(available, root).is_ok(), "{}", available);
        }
    }

    #[test]
    fn test_destructive_confirmation() {
        let mut prompter = ScriptedPrompter::new([Answer::Text("no".to_string())]);
        let err = confirm_destructive_operation(&mut prompter, false, Path::new("/dev/sda"))
            .unwrap_err();
        assert!(err.is_cancelled());

        let mut prompter = ScriptedPrompter::new([Answer::Text("YES".to_string())]);
        assert!(confirm_destructive_operation(&mut prompter, false, Path::new("/dev/sda")).is_ok());
    }

    #[test]
    fn test_dry_run_bypasses_confirmation_prompt() {
        let mut prompter = ScriptedPrompter::new(Vec::new());
        assert!(confirm_destructive_operation(&mut prompter, true, Path::new("/dev/sda")).is_ok());
        assert!(prompter.asked().is_empty());
    }
}
