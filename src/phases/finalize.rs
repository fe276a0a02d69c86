//! Summary, unmount, close.

use crate::context::DeployContext;
use crate::deploy::{close_mappers, unmount_recorded};
use crate::error::Result;
use crate::success;

fn log_summary(ctx: &DeployContext<'_>) -> Result<()> {
    let config = ctx.config()?;
    let layout = ctx.layout()?;
    tracing::info!("Deployment summary:");
    tracing::info!("  Disk:       {}", layout.device.display());
    tracing::info!("  EFI:        {}", layout.efi_partition.display());
    tracing::info!(
        "  Root:       {} -> /dev/mapper/{} ({} GB)",
        layout.root_partition.display(),
        config.root_mapper,
        layout.root_gb
    );
    tracing::info!(
        "  Home:       {} -> /dev/mapper/{} ({} GB)",
        layout.home_partition.display(),
        config.home_mapper,
        layout.home_gb
    );
    for line in config.summary_lines() {
        tracing::info!("  {}", line);
    }
    Ok(())
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    log_summary(ctx)?;

    unmount_recorded(ctx)?;
    close_mappers(ctx)?;

    ctx.state.remove()?;
    success!("Deployment finished; remove the installation media and reboot");
    Ok(())
}
