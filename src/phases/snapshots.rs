//! Snapshot automation: script, systemd service and weekly timer.
//!
//! Snapshots are named `<prefix>-<YYYYmmdd-HHMMSS>` so lexical order is
//! creation order; pruning keeps the newest `retention` per directory.

use std::path::Path;

use crate::command::CommandSpec;
use crate::context::DeployContext;
use crate::error::Result;
use crate::executor::{execute, Criticality, Executor};
use crate::success;

pub const SCRIPT_PATH: &str = "usr/local/bin/btrfs-snapshot";
pub const SERVICE_PATH: &str = "etc/systemd/system/btrfs-snapshot.service";
pub const TIMER_PATH: &str = "etc/systemd/system/btrfs-snapshot.timer";
pub const TIMER_UNIT: &str = "btrfs-snapshot.timer";

/// Snapshot script installed into the target.
pub fn render_script(retention: u32) -> String {
    format!(
        r#"#!/bin/bash
# Read-only BTRFS snapshots of / and /home, keeping the newest {retention}.
set -euo pipefail

KEEP={retention}
STAMP="$(date +%Y%m%d-%H%M%S)"

snapshot() {{
    local source="$1" dir="$2" prefix="$3"
    mkdir -p "$dir"
    btrfs subvolume snapshot -r "$source" "$dir/$prefix-$STAMP"
    ls -1d "$dir/$prefix"-* 2>/dev/null | sort | head -n -"$KEEP" | while read -r old; do
        btrfs subvolume delete "$old"
    done
}}

snapshot / /.snapshots root
snapshot /home /home/.snapshots home
"#
    )
}

pub fn render_service() -> String {
    format!(
        "[Unit]\nDescription=Read-only BTRFS snapshots of / and /home\n\n[Service]\nType=oneshot\nExecStart=/{}\n",
        SCRIPT_PATH
    )
}

pub fn render_timer() -> String {
    "[Unit]\nDescription=Weekly BTRFS snapshots\n\n[Timer]\nOnCalendar=weekly\nRandomizedDelaySec=1h\nPersistent=true\n\n[Install]\nWantedBy=timers.target\n".to_string()
}

/// Names to delete so that only the newest `keep` remain, oldest first.
pub fn snapshots_to_prune(names: &[String], keep: usize) -> Vec<String> {
    let mut sorted = names.to_vec();
    sorted.sort();
    let excess = sorted.len().saturating_sub(keep);
    sorted.truncate(excess);
    sorted
}

/// Delete the oldest snapshots in `dir` beyond `keep`; returns what was
/// deleted. Deletion failures are warnings.
pub fn prune_snapshots(exec: &dyn Executor, dir: &Path, keep: usize) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    let doomed = snapshots_to_prune(&names, keep);
    if doomed.is_empty() {
        tracing::info!("{} snapshot(s) in {}, nothing to prune", names.len(), dir.display());
        return Ok(doomed);
    }

    for name in &doomed {
        execute(
            exec,
            &CommandSpec::new("btrfs")
                .args(["subvolume", "delete"])
                .arg(dir.join(name).display().to_string()),
            &format!("Delete snapshot {}", name),
            Criticality::NonCritical,
        )?;
    }
    success!("Pruned {} snapshot(s) from {}", doomed.len(), dir.display());
    Ok(doomed)
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    ctx.require_target_mounted()?;
    let retention = ctx.config()?.snapshot_retention;
    let exec = ctx.exec;

    exec.create_dir_all(&ctx.target("usr/local/bin"))?;
    exec.write_file(&ctx.target(SCRIPT_PATH), &render_script(retention), Some(0o755))?;
    exec.create_dir_all(&ctx.target("etc/systemd/system"))?;
    exec.write_file(&ctx.target(SERVICE_PATH), &render_service(), Some(0o644))?;
    exec.write_file(&ctx.target(TIMER_PATH), &render_timer(), Some(0o644))?;

    execute(
        exec,
        &CommandSpec::in_chroot(ctx.target_root(), "systemctl").args(["enable", TIMER_UNIT]),
        "Enable snapshot timer",
        Criticality::Critical,
    )?;

    success!("Weekly snapshots enabled (keeping {})", retention);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;
    use crate::executor::SystemExecutor;

    fn names(range: std::ops::RangeInclusive<u32>) -> Vec<String> {
        range.map(|d| format!("root-202401{:02}-030000", d)).collect()
    }

    #[test]
    fn test_prune_keeps_newest() {
        let mut all = names(1..=10);
        all.reverse();
        let doomed = snapshots_to_prune(&all, 8);
        assert_eq!(doomed, vec!["root-20240101-030000", "root-20240102-030000"]);
    }

    #[test]
    fn test_prune_under_retention() {
        assert!(snapshots_to_prune(&names(1..=3), 8).is_empty());
        assert!(snapshots_to_prune(&[], 8).is_empty());
        assert_eq!(snapshots_to_prune(&names(1..=3), 0).len(), 3);
    }

    #[test]
    fn test_prune_directory_in_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        for name in names(1..=10) {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "not a snapshot").unwrap();

        let exec = DryRunExecutor::new(SystemExecutor::new());
        let doomed = prune_snapshots(&exec, dir.path(), 8).unwrap();
        assert_eq!(doomed.len(), 2);
        // Dry-run leaves the directories in place
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 11);
    }

    #[test]
    fn test_units() {
        let timer = render_timer();
        assert!(timer.contains("OnCalendar=weekly"));
        assert!(timer.contains("RandomizedDelaySec="));
        assert!(timer.contains("Persistent=true"));
        assert!(render_service().contains("ExecStart=/usr/local/bin/btrfs-snapshot"));
        let script = render_script(8);
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("KEEP=8"));
        assert!(script.contains("snapshot -r"));
    }
}
