//! Phase orchestrator and failure cleanup.
//!
//! [`run`] drives the tracker through the working phases in order. The first
//! error stops the run; unless the operator cancelled before the disk was
//! touched, [`handle_failure`] then logs diagnostics and releases every mount
//! and mapper the run is responsible for. Cleanup commands are all
//! non-critical, so calling it twice, or with nothing to release, is safe.

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::executor::{execute, Criticality};
use crate::layout::mapper_path;
use crate::phase::Phase;
use crate::phases::run_phase;
use crate::success;

/// Run every working phase, then mark the deployment complete.
pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    if ctx.dry_run() {
        tracing::info!("Dry-run: no disk, file or package changes will be made");
    }

    for &phase in Phase::working_phases() {
        if let Err(e) = run_step(ctx, phase) {
            handle_failure(ctx, &e);
            return Err(e);
        }
    }

    ctx.tracker.advance()?;
    success!("Deployment complete");
    Ok(())
}

/// Enter `phase`, run it and record it as completed.
fn run_step(ctx: &mut DeployContext<'_>, phase: Phase) -> Result<()> {
    ctx.tracker.transition_to(phase)?;
    tracing::info!(
        "=== Phase {}/{}: {} ===",
        phase.order(),
        Phase::working_phases().len(),
        phase
    );

    run_phase(phase, ctx)?;

    // Finalization removes the state file; do not write it back
    if phase != Phase::Finalize {
        ctx.state.record_phase(phase)?;
    }
    Ok(())
}

/// Failure path: mark the tracker, log diagnostics, release resources.
pub fn handle_failure(ctx: &mut DeployContext<'_>, error: &DeployError) {
    let phase = ctx.tracker.current();

    if error.is_cancelled() && !phase.touches_disk() {
        tracing::warn!("Cancelled during {}: {}", phase, error);
        return;
    }

    if ctx.tracker.fail().is_err() {
        tracing::debug!("Tracker already terminal at {}", phase);
    }
    tracing::error!("Deployment failed during phase {} ({}): {}", phase.order(), phase, error);

    log_diagnostics(ctx);
    release_resources(ctx);
}

/// Disk and memory usage at the time of failure.
fn log_diagnostics(ctx: &DeployContext<'_>) {
    for (program, args) in [("df", ["-h"]), ("free", ["-h"])] {
        let cmd = CommandSpec::query(program).args(args);
        match ctx.exec.run(&cmd) {
            Ok(output) if output.success => {
                tracing::error!("{}:\n{}", cmd, output.stdout.trim_end());
            }
            Ok(output) => tracing::warn!("{} failed: {}", cmd, output.stderr.trim()),
            Err(e) => tracing::warn!("{} unavailable: {}", cmd, e),
        }
    }
}

/// Best-effort release of everything this run mounted or opened.
pub fn release_resources(ctx: &mut DeployContext<'_>) {
    tracing::info!("Releasing mounts and encrypted volumes");

    if let Err(e) = unmount_recorded(ctx) {
        tracing::warn!("Unmount failed: {}", e);
    }

    let target = ctx.target_root().display().to_string();
    if let Err(e) = execute(
        ctx.exec,
        &CommandSpec::new("umount").args(["-R", target.as_str()]),
        &format!("Recursive unmount of {}", target),
        Criticality::NonCritical,
    ) {
        tracing::warn!("Recursive unmount failed: {}", e);
    }

    if let Err(e) = close_mappers(ctx) {
        tracing::warn!("Closing encrypted volumes failed: {}", e);
    }
}

/// Unmount the recorded mounts, newest first. Failures are warnings.
pub fn unmount_recorded(ctx: &mut DeployContext<'_>) -> Result<()> {
    let mounts: Vec<_> = ctx.ledger.mounts().iter().rev().cloned().collect();
    for target in mounts {
        execute(
            ctx.exec,
            &CommandSpec::new("umount").arg(target.display().to_string()),
            &format!("Unmount {}", target.display()),
            Criticality::NonCritical,
        )?;
        ctx.ledger.forget_mount(&target);
    }
    Ok(())
}

/// Close every mapper this run opened, plus configured ones still present.
pub fn close_mappers(ctx: &mut DeployContext<'_>) -> Result<()> {
    let mut names: Vec<String> = ctx.ledger.mappers().iter().rev().cloned().collect();
    if let Some(config) = &ctx.config {
        for name in [&config.home_mapper, &config.root_mapper] {
            if !names.contains(name) && ctx.exec.path_exists(&mapper_path(name)) {
                names.push(name.clone());
            }
        }
    }

    for name in names {
        execute(
            ctx.exec,
            &CommandSpec::new("cryptsetup").args(["close", name.as_str()]),
            &format!("Close {}", name),
            Criticality::NonCritical,
        )?;
        ctx.ledger.forget_mapper(&name);
    }
    Ok(())
}
