//! Child process lifetime management
//!
//! A tool killed halfway through (`wipefs`, `cryptsetup luksFormat`,
//! `pacstrap`) must not keep running after the deployer is gone. Every child
//! is spawned as the leader of its own process group with a parent-death
//! signal, and its PID is tracked in a global registry so that a signal or
//! an early drop can take the whole tree down.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Grace period between SIGTERM and SIGKILL on signal-triggered shutdown.
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

/// Set of running child process groups.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    terminating: bool,
}

impl ChildRegistry {
    /// The process-wide registry.
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::trace!("Tracking child process group {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::trace!("Released child process group {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// SIGTERM every tracked group, wait up to `grace`, then SIGKILL the rest.
    /// Runs at most once per registry.
    pub fn terminate_all(&mut self, grace: Duration) {
        if self.terminating {
            return;
        }
        self.terminating = true;

        if self.pids.is_empty() {
            return;
        }

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        tracing::warn!("Terminating {} running command(s)", pids.len());
        for &pid in &pids {
            signal_group_or_process(pid, Signal::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
            tracing::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
            signal_group_or_process(pid, Signal::SIGKILL);
        }
        self.pids.clear();
    }
}

fn signal_group_or_process(pid: u32, sig: Signal) {
    // Negative PID addresses the whole group, reaching grandchildren too
    if signal::kill(Pid::from_raw(-(pid as i32)), sig).is_err() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), sig) {
            tracing::debug!("Failed to send {} to {}: {}", sig, pid, e);
        }
    }
}

/// Alive means the PID exists and is neither a zombie nor dead.
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => {
            // Field 3 is the state; the command name in field 2 may hold spaces
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next());
            !matches!(state, Some("Z") | Some("X"))
        }
        Err(_) => true,
    }
}

/// Terminates every tracked child when dropped.
///
/// Held by `main` for the duration of a deployment.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install the SIGINT/SIGTERM/SIGHUP watcher.
///
/// On a signal the watcher kills the running command tree and exits with
/// `128 + signal`. No unmount or mapper close happens on this path.
pub fn init_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                let name = match sig {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    SIGHUP => "SIGHUP",
                    _ => "signal",
                };
                tracing::error!("Received {}, aborting deployment", name);
                if let Ok(mut registry) = ChildRegistry::global().lock() {
                    registry.terminate_all(SIGNAL_GRACE);
                }
                std::process::exit(128 + sig);
            }
        })?;

    Ok(())
}

/// Spawn a command as the leader of a fresh process group that dies with us.
pub trait CommandProcessGroup {
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        self.process_group(0);
        // SAFETY: prctl is async-signal-safe and touches no shared state.
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(1234);
        registry.register(5678);
        registry.register(1234);
        assert_eq!(registry.count(), 2);
        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_is_one_shot() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::from_millis(10));
        registry.register(1);
        // Second call is a no-op, PID 1 is never signalled
        registry.terminate_all(Duration::from_millis(10));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_kills_process_group() {
        let mut child = Command::new("sleep")
            .arg("30")
            .in_new_process_group()
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        registry.terminate_all(Duration::from_secs(2));

        let status = child.wait().expect("wait");
        assert!(!status.success());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_dead_pid_is_not_alive() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");
        assert!(!is_process_alive(pid));
    }
}
