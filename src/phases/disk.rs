//! Disk preparation: release, wipe, partition, verify.

use std::path::Path;
use std::time::Duration;

use crate::command::{CommandSpec, ToolArgs};
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::executor::{execute, execute_with_retry, retry, Criticality, RetryOutcome, RetryPolicy};
use crate::layout::{mapper_path, DiskLayout, PartitionSpec};
use crate::success;
use crate::validation::device_mounts;

const PARTPROBE_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(2));
const NODE_RETRY: RetryPolicy = RetryPolicy::new(5, Duration::from_secs(1));

/// `parted -s <disk> mkpart <name> <fs> <start> <end>`
#[derive(Debug, Clone)]
pub struct MkpartArgs<'a> {
    pub disk: &'a Path,
    pub partition: &'a PartitionSpec,
}

impl ToolArgs for MkpartArgs<'_> {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            self.disk.display().to_string(),
            "mkpart".to_string(),
            self.partition.name.to_string(),
            self.partition.fs_type.to_string(),
            format!("{}MiB", self.partition.start_mib),
            self.partition.end.to_string(),
        ]
    }
}

/// `sgdisk -t 1:ef00 -t 2:8309 ... <disk>`
pub fn type_code_command(layout: &DiskLayout) -> CommandSpec {
    let mut cmd = CommandSpec::new("sgdisk");
    for part in layout.partition_plan() {
        cmd = cmd.arg("-t").arg(format!("{}:{}", part.number, part.type_code));
    }
    cmd.arg(layout.device.display().to_string())
}

/// Close leftover mappers and unmount anything on the disk.
fn release_stale(ctx: &mut DeployContext<'_>, layout: &DiskLayout) -> Result<()> {
    let exec = ctx.exec;
    let config = ctx.config()?.clone();

    let mount_table = exec.read_file(Path::new("/proc/mounts")).unwrap_or_default();
    let mut stale = device_mounts(&layout.device.display().to_string(), &mount_table);
    // Children first
    stale.sort_by_key(|m| std::cmp::Reverse(m.len()));
    for mountpoint in stale {
        execute(
            exec,
            &CommandSpec::new("umount").arg(&mountpoint),
            &format!("Unmount stale {}", mountpoint),
            Criticality::NonCritical,
        )?;
    }

    for name in [&config.root_mapper, &config.home_mapper] {
        if exec.path_exists(&mapper_path(name)) {
            execute(
                exec,
                &CommandSpec::new("cryptsetup").args(["close", name.as_str()]),
                &format!("Close stale mapper {}", name),
                Criticality::NonCritical,
            )?;
        }
    }
    Ok(())
}

/// Wait for each partition node to appear.
fn verify_partition_nodes(ctx: &DeployContext<'_>, layout: &DiskLayout) -> Result<()> {
    let exec = ctx.exec;
    for partition in layout.partitions() {
        let outcome = retry(NODE_RETRY, exec, |_| {
            if exec.block_device_exists(partition) {
                Ok(())
            } else {
                Err(format!("{} has not appeared", partition.display()))
            }
        });
        match outcome {
            RetryOutcome::Succeeded { attempts, .. } => {
                tracing::debug!("{} present after {} check(s)", partition.display(), attempts);
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                return Err(DeployError::RetriesExhausted {
                    description: format!("Wait for {}", partition.display()),
                    attempts,
                    last_error,
                });
            }
        }
    }
    Ok(())
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    let layout = ctx.layout()?.clone();
    let set_types = ctx.config()?.set_partition_types;
    let exec = ctx.exec;
    let device = layout.device.display().to_string();

    release_stale(ctx, &layout)?;

    execute(
        exec,
        &CommandSpec::new("wipefs").args(["-a", device.as_str()]),
        "Wipe filesystem signatures",
        Criticality::Critical,
    )?;
    execute(
        exec,
        &CommandSpec::new("dd").args([
            "if=/dev/zero".to_string(),
            format!("of={}", device),
            "bs=1M".to_string(),
            "count=10".to_string(),
            "conv=fsync".to_string(),
            "status=none".to_string(),
        ]),
        "Zero the first 10 MiB",
        Criticality::Critical,
    )?;
    execute(
        exec,
        &CommandSpec::new("parted").args(["-s", device.as_str(), "mklabel", "gpt"]),
        "Create GPT label",
        Criticality::Critical,
    )?;

    for partition in layout.partition_plan() {
        let args = MkpartArgs {
            disk: &layout.device,
            partition: &partition,
        };
        execute(
            exec,
            &args.to_command(),
            &format!("Create partition {} ({})", partition.number, partition.name),
            Criticality::Critical,
        )?;
    }
    execute(
        exec,
        &CommandSpec::new("parted").args(["-s", device.as_str(), "set", "1", "esp", "on"]),
        "Flag EFI system partition",
        Criticality::Critical,
    )?;

    execute_with_retry(
        exec,
        &CommandSpec::new("partprobe").arg(device.as_str()),
        "Re-read partition table",
        PARTPROBE_RETRY,
    )?;
    execute(
        exec,
        &CommandSpec::new("udevadm").arg("settle"),
        "Wait for udev",
        Criticality::NonCritical,
    )?;
    verify_partition_nodes(ctx, &layout)?;

    if set_types {
        execute(
            exec,
            &type_code_command(&layout),
            "Set GPT partition type codes",
            Criticality::NonCritical,
        )?;
    }

    success!("Disk {} partitioned", device);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::PartitionEnd;

    #[test]
    fn test_mkpart_args() {
        let layout = DiskLayout::new("/dev/sda", 200, 60, 139);
        let plan = layout.partition_plan();
        let args = MkpartArgs {
            disk: &layout.device,
            partition: &plan[1],
        };
        assert_eq!(
            args.to_command().to_string(),
            "parted -s /dev/sda mkpart cryptroot btrfs 1025MiB 62465MiB"
        );
        assert_eq!(plan[2].end, PartitionEnd::Rest);
    }

    #[test]
    fn test_type_code_command() {
        let layout = DiskLayout::new("/dev/nvme0n1", 200, 50, 149);
        assert_eq!(
            type_code_command(&layout).to_string(),
            "sgdisk -t 1:ef00 -t 2:8309 -t 3:8309 /dev/nvme0n1"
        );
    }
}
