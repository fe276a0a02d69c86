//! BTRFS filesystems, subvolumes and the target mount tree.

use std::path::Path;

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::Result;
use crate::executor::{execute, Criticality};
use crate::layout::{mapper_path, mount_plan, MountSpec, Subvolume, Volume};
use crate::success;

/// `mount -t <fs> -o <options> <device> <target>`
pub fn mount_command(spec: &MountSpec) -> CommandSpec {
    CommandSpec::new("mount").args([
        "-t".to_string(),
        spec.fs_type.to_string(),
        "-o".to_string(),
        spec.options.clone(),
        spec.device.display().to_string(),
        spec.target.display().to_string(),
    ])
}

/// Mount the top level of `device`, create `subvolumes`, unmount again.
fn create_subvolumes(
    ctx: &DeployContext<'_>,
    device: &Path,
    subvolumes: &[Subvolume],
) -> Result<()> {
    let exec = ctx.exec;
    let top = ctx.target_root();
    let top_str = top.display().to_string();

    exec.create_dir_all(top)?;
    execute(
        exec,
        &CommandSpec::new("mount").arg(device.display().to_string()).arg(top_str.as_str()),
        &format!("Mount {} top level", device.display()),
        Criticality::Critical,
    )?;

    for subvolume in subvolumes {
        let created = execute(
            exec,
            &CommandSpec::new("btrfs")
                .args(["subvolume", "create"])
                .arg(top.join(subvolume.to_string()).display().to_string()),
            &format!("Create subvolume {}", subvolume),
            Criticality::Critical,
        );
        if let Err(e) = created {
            // Leave the top level unmounted before bailing out
            execute(
                exec,
                &CommandSpec::new("umount").arg(top_str.as_str()),
                "Unmount top level",
                Criticality::NonCritical,
            )?;
            return Err(e);
        }
    }

    execute(
        exec,
        &CommandSpec::new("umount").arg(top_str.as_str()),
        &format!("Unmount {} top level", device.display()),
        Criticality::Critical,
    )?;
    Ok(())
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    let config = ctx.config()?.clone();
    let layout = ctx.layout()?.clone();
    ctx.require_mapper(&config.root_mapper)?;
    ctx.require_mapper(&config.home_mapper)?;
    let exec = ctx.exec;

    let root_device = mapper_path(&config.root_mapper);
    let home_device = mapper_path(&config.home_mapper);

    for (device, label) in [(&root_device, "ROOT"), (&home_device, "HOME")] {
        execute(
            exec,
            &CommandSpec::new("mkfs.btrfs")
                .args(["-f", "-L", label])
                .arg(device.display().to_string()),
            &format!("Create BTRFS filesystem {} on {}", label, device.display()),
            Criticality::Critical,
        )?;
    }

    let selected = Subvolume::selected(&config);
    let (home_subvolumes, root_subvolumes): (Vec<Subvolume>, Vec<Subvolume>) =
        selected.into_iter().partition(|s| s.volume() == Volume::Home);
    create_subvolumes(ctx, &root_device, &root_subvolumes)?;
    create_subvolumes(ctx, &home_device, &home_subvolumes)?;

    for spec in mount_plan(&config, &layout, ctx.target_root()) {
        exec.create_dir_all(&spec.target)?;
        execute(
            exec,
            &mount_command(&spec),
            &format!("Mount {}", spec.target.display()),
            Criticality::Critical,
        )?;
        ctx.ledger.record_mount(&spec.target);
    }

    // Home lives on its own filesystem, so its snapshots stay there too
    exec.create_dir_all(&ctx.target("home/.snapshots"))?;

    success!(
        "BTRFS layout mounted at {} ({} subvolumes)",
        ctx.target_root().display(),
        root_subvolumes.len() + home_subvolumes.len()
    );
    Ok(())
}
