//! Command execution
//!
//! All side effects of a deployment (external tools, files written into the
//! target, directories, sleeps between retries) go through the [`Executor`]
//! trait. Two implementations exist:
//!
//! - [`SystemExecutor`] does the real work. Children run in their own process
//!   group and are tracked by the [`ChildRegistry`] so a signal takes them
//!   down with us.
//! - [`DryRunExecutor`] wraps another executor. Queries and reads pass
//!   through; every mutation is logged with a `[DRY-RUN]` marker and reported
//!   as successful without running. Dry-run safety is therefore a property of
//!   the executor chosen at startup, not of each call site.
//!
//! On top sit [`execute`] (criticality-aware logging and error mapping) and
//! the generic [`retry`] helper.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::command::CommandSpec;
use crate::error::{DeployError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::success;

/// Marker prefixed to every skipped mutation.
pub const DRY_RUN_MARKER: &str = "[DRY-RUN]";

/// Output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by a signal or never spawned
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    pub fn failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    /// Convert a failed run into `DeployError::CommandFailed`.
    pub fn ensure_success(&self, description: &str, program: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(DeployError::CommandFailed {
                description: description.to_string(),
                program: program.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Side-effect boundary of the deployer.
///
/// `run` returns `Err` only when the program could not be spawned; a
/// non-zero exit is reported through `CommandOutput::success`.
pub trait Executor {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;

    /// Create or truncate `path` with `contents`; `mode` sets permissions.
    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> Result<()>;

    fn append_file(&self, path: &Path, contents: &str) -> Result<()>;

    fn read_file(&self, path: &Path) -> Result<String>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    fn path_exists(&self, path: &Path) -> bool;

    fn block_device_exists(&self, path: &Path) -> bool;

    fn sleep(&self, duration: Duration);

    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Runs everything for real.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SystemExecutor {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("exec: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();

        let mut child = command.spawn().map_err(|source| DeployError::Spawn {
            program: cmd.program.clone(),
            source,
        })?;
        let pid = child.id();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        if let (Some(payload), Some(mut stdin)) = (&cmd.stdin, child.stdin.take()) {
            // Dropping stdin closes the pipe so the child sees EOF
            if let Err(e) = stdin.write_all(payload.as_bytes()) {
                tracing::warn!("Failed to write stdin of {}: {}", cmd.program, e);
            }
        }

        let output = child.wait_with_output();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }
        let output = output?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        for line in stdout.lines().chain(stderr.lines()) {
            tracing::debug!("  {}: {}", cmd.program, line);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: output.status.code(),
            success: output.status.success(),
        })
    }

    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        if let Some(mode) = mode {
            options.mode(mode);
        }
        let mut file = options.open(path)?;
        file.write_all(contents.as_bytes())?;
        // mode() only applies on creation
        if let Some(mode) = mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    fn append_file(&self, path: &Path, contents: &str) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(contents.as_bytes())?;
        tracing::debug!("Appended to {}", path.display());
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        Ok(fs::read_to_string(path)?)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::create_dir_all(path)?)
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn block_device_exists(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Dry-run wrapper: reads and queries pass through, mutations are logged.
#[derive(Debug, Default, Clone)]
pub struct DryRunExecutor<E> {
    inner: E,
}

impl<E: Executor> DryRunExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Executor> Executor for DryRunExecutor<E> {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        if cmd.is_query() {
            return self.inner.run(cmd);
        }
        tracing::info!("{} Would run: {}", DRY_RUN_MARKER, cmd);
        Ok(CommandOutput::ok(""))
    }

    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
        match mode {
            Some(mode) => tracing::info!(
                "{} Would write {} ({} bytes, mode {:o})",
                DRY_RUN_MARKER,
                path.display(),
                contents.len(),
                mode
            ),
            None => tracing::info!(
                "{} Would write {} ({} bytes)",
                DRY_RUN_MARKER,
                path.display(),
                contents.len()
            ),
        }
        Ok(())
    }

    fn append_file(&self, path: &Path, contents: &str) -> Result<()> {
        tracing::info!(
            "{} Would append {} bytes to {}",
            DRY_RUN_MARKER,
            contents.len(),
            path.display()
        );
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        match self.inner.read_file(path) {
            Ok(content) => Ok(content),
            Err(DeployError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} {} does not exist yet, reading as empty", DRY_RUN_MARKER, path.display());
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        tracing::debug!("{} Would create directory {}", DRY_RUN_MARKER, path.display());
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.inner.path_exists(path)
    }

    fn block_device_exists(&self, _path: &Path) -> bool {
        true
    }

    fn sleep(&self, _duration: Duration) {}

    fn is_dry_run(&self) -> bool {
        true
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        (**self).run(cmd)
    }
    fn write_file(&self, path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
        (**self).write_file(path, contents, mode)
    }
    fn append_file(&self, path: &Path, contents: &str) -> Result<()> {
        (**self).append_file(path, contents)
    }
    fn read_file(&self, path: &Path) -> Result<String> {
        (**self).read_file(path)
    }
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        (**self).create_dir_all(path)
    }
    fn path_exists(&self, path: &Path) -> bool {
        (**self).path_exists(path)
    }
    fn block_device_exists(&self, path: &Path) -> bool {
        (**self).block_device_exists(path)
    }
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
}

/// What a failure of a command means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts the phase
    Critical,
    /// Failure is logged as a warning and ignored
    NonCritical,
}

/// Run `cmd`, log the outcome, and apply `criticality` to a failure.
pub fn execute(
    exec: &dyn Executor,
    cmd: &CommandSpec,
    description: &str,
    criticality: Criticality,
) -> Result<CommandOutput> {
    tracing::info!("{}...", description);
    let output = match exec.run(cmd) {
        Ok(output) => output,
        Err(DeployError::Spawn { program, source }) if criticality == Criticality::NonCritical => {
            tracing::warn!("{} skipped: cannot run {}: {}", description, program, source);
            return Ok(CommandOutput::failed(None, source.to_string()));
        }
        Err(e) => {
            tracing::error!("{} failed: {}", description, e);
            return Err(e);
        }
    };

    if output.success {
        success!("{}", description);
        return Ok(output);
    }

    let code = output
        .exit_code
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    match criticality {
        Criticality::Critical => {
            tracing::error!(
                "{} failed (exit code {}): {}",
                description,
                code,
                output.stderr.trim()
            );
            output.ensure_success(description, &cmd.program)?;
            Ok(output)
        }
        Criticality::NonCritical => {
            tracing::warn!(
                "{} failed (exit code {}), continuing: {}",
                description,
                code,
                output.stderr.trim()
            );
            Ok(output)
        }
    }
}

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Result of [`retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Succeeded { attempts: u32, value: T },
    Exhausted { attempts: u32, last_error: String },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Call `op` until it succeeds or `policy.max_attempts` calls have failed,
/// sleeping `policy.delay` through `sleeper` between attempts.
///
/// `op` receives the 1-based attempt number.
pub fn retry<T, E, F>(policy: RetryPolicy, sleeper: &dyn Executor, mut op: F) -> RetryOutcome<T>
where
    E: fmt::Display,
    F: FnMut(u32) -> std::result::Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        match op(attempt) {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    attempts: attempt,
                    value,
                };
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt < max_attempts {
                    tracing::warn!(
                        "Attempt {}/{} failed: {}; retrying in {}s",
                        attempt,
                        max_attempts,
                        last_error,
                        policy.delay.as_secs()
                    );
                    sleeper.sleep(policy.delay);
                }
            }
        }
    }
    RetryOutcome::Exhausted {
        attempts: max_attempts,
        last_error,
    }
}

/// [`execute`] a critical command under `policy`.
pub fn execute_with_retry(
    exec: &dyn Executor,
    cmd: &CommandSpec,
    description: &str,
    policy: RetryPolicy,
) -> Result<CommandOutput> {
    let outcome = retry(policy, exec, |attempt| {
        if attempt > 1 {
            tracing::info!("{} (attempt {}/{})", description, attempt, policy.max_attempts);
        }
        let output = exec.run(cmd)?;
        output.ensure_success(description, &cmd.program)?;
        Ok::<_, DeployError>(output)
    });

    match outcome {
        RetryOutcome::Succeeded { value, .. } => {
            success!("{}", description);
            Ok(value)
        }
        RetryOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            tracing::error!(
                "{} failed after {} attempt(s): {}",
                description,
                attempts,
                last_error
            );
            Err(DeployError::RetriesExhausted {
                description: description.to_string(),
                attempts,
                last_error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records calls and answers every command from a script of outputs.
    #[derive(Default)]
    struct Scripted {
        calls: RefCell<Vec<String>>,
        outputs: RefCell<Vec<CommandOutput>>,
        sleeps: RefCell<u32>,
    }

    impl Executor for Scripted {
        fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
            self.calls.borrow_mut().push(cmd.to_string());
            let mut outputs = self.outputs.borrow_mut();
            Ok(if outputs.is_empty() {
                CommandOutput::ok("")
            } else {
                outputs.remove(0)
            })
        }
        fn write_file(&self, path: &Path, _: &str, _: Option<u32>) -> Result<()> {
            self.calls.borrow_mut().push(format!("write {}", path.display()));
            Ok(())
        }
        fn append_file(&self, path: &Path, _: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("append {}", path.display()));
            Ok(())
        }
        fn read_file(&self, path: &Path) -> Result<String> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, path.display().to_string()).into())
        }
        fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.calls.borrow_mut().push(format!("mkdir {}", path.display()));
            Ok(())
        }
        fn path_exists(&self, _: &Path) -> bool {
            false
        }
        fn block_device_exists(&self, _: &Path) -> bool {
            false
        }
        fn sleep(&self, _: Duration) {
            *self.sleeps.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_system_executor_captures_output() {
        let exec = SystemExecutor::new();
        let out = exec
            .run(&CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.stdout_trimmed(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success);
    }

    #[test]
    fn test_system_executor_feeds_stdin() {
        let exec = SystemExecutor::new();
        let out = exec.run(&CommandSpec::new("cat").stdin("user:pw\n")).unwrap();
        assert_eq!(out.stdout, "user:pw\n");
    }

    #[test]
    fn test_system_executor_spawn_failure() {
        let exec = SystemExecutor::new();
        let err = exec
            .run(&CommandSpec::new("definitely-not-a-real-binary-42"))
            .unwrap_err();
        assert!(matches!(err, DeployError::Spawn { .. }));
    }

    #[test]
    fn test_system_executor_file_ops() {
        let dir = TempDir::new().unwrap();
        let exec = SystemExecutor::new();
        let nested = dir.path().join("etc/sudoers.d");
        exec.create_dir_all(&nested).unwrap();
        let file = nested.join("10-wheel");
        exec.write_file(&file, "%wheel ALL=(ALL:ALL) ALL\n", Some(0o440)).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o440);

        let fstab = dir.path().join("fstab");
        exec.append_file(&fstab, "a\n").unwrap();
        exec.append_file(&fstab, "b\n").unwrap();
        assert_eq!(exec.read_file(&fstab).unwrap(), "a\nb\n");
        assert!(!exec.block_device_exists(&fstab));
    }

    #[test]
    fn test_dry_run_skips_mutations_and_passes_queries() {
        let dry = DryRunExecutor::new(Scripted::default());
        dry.run(&CommandSpec::new("wipefs").args(["-a", "/dev/sda"])).unwrap();
        dry.write_file(Path::new("/mnt/etc/hostname"), "box\n", None).unwrap();
        dry.append_file(Path::new("/mnt/etc/fstab"), "x").unwrap();
        dry.create_dir_all(Path::new("/mnt/boot")).unwrap();
        dry.run(&CommandSpec::query("lsblk")).unwrap();

        assert_eq!(*dry.inner().calls.borrow(), vec!["lsblk".to_string()]);
        assert!(dry.is_dry_run());
        assert!(dry.block_device_exists(Path::new("/dev/sda1")));
        assert_eq!(dry.read_file(Path::new("/mnt/etc/default/grub")).unwrap(), "");
    }

    #[test]
    fn test_execute_critical_failure() {
        let exec = Scripted::default();
        exec.outputs
            .borrow_mut()
            .push(CommandOutput::failed(Some(5), "device busy\n"));
        let err = execute(
            &exec,
            &CommandSpec::new("cryptsetup"),
            "Format root volume",
            Criticality::Critical,
        )
        .unwrap_err();
        match err {
            DeployError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(5));
                assert_eq!(stderr, "device busy");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_execute_non_critical_failure_continues() {
        let exec = Scripted::default();
        exec.outputs.borrow_mut().push(CommandOutput::failed(Some(1), "no tpm"));
        let out = execute(
            &exec,
            &CommandSpec::new("systemd-cryptenroll"),
            "Enroll TPM2",
            Criticality::NonCritical,
        )
        .unwrap();
        assert!(!out.success);
    }

    #[test]
    fn test_execute_non_critical_spawn_failure_continues() {
        let exec = SystemExecutor::new();
        let out = execute(
            &exec,
            &CommandSpec::new("definitely-not-a-real-binary-42"),
            "Optional step",
            Criticality::NonCritical,
        )
        .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, None);
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let exec = Scripted::default();
        let outcome = retry(RetryPolicy::new(3, Duration::from_secs(1)), &exec, |attempt| {
            if attempt < 3 { Err("not yet") } else { Ok(attempt * 10) }
        });
        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                attempts: 3,
                value: 30
            }
        );
        assert_eq!(*exec.sleeps.borrow(), 2);
    }

    #[test]
    fn test_retry_short_circuits_on_success() {
        let exec = Scripted::default();
        let mut calls = 0;
        let outcome = retry(RetryPolicy::default(), &exec, |_| {
            calls += 1;
            Ok::<_, String>(())
        });
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls, 1);
        assert_eq!(*exec.sleeps.borrow(), 0);
    }

    #[test]
    fn test_retry_exhausted_keeps_last_error() {
        let exec = Scripted::default();
        let outcome: RetryOutcome<()> =
            retry(RetryPolicy::new(2, Duration::ZERO), &exec, |attempt| {
                Err(format!("failure {}", attempt))
            });
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 2,
                last_error: "failure 2".to_string()
            }
        );
    }

    #[test]
    fn test_execute_with_retry_maps_exhaustion() {
        let exec = Scripted::default();
        for _ in 0..3 {
            exec.outputs
                .borrow_mut()
                .push(CommandOutput::failed(Some(1), "mirror unreachable"));
        }
        let err = execute_with_retry(
            &exec,
            &CommandSpec::new("pacstrap"),
            "Install base system",
            RetryPolicy::new(3, Duration::from_secs(5)),
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(exec.calls.borrow().len(), 3);
    }

    #[test]
    fn test_execute_with_retry_in_dry_run_succeeds_immediately() {
        let dry = DryRunExecutor::new(Scripted::default());
        execute_with_retry(
            &dry,
            &CommandSpec::new("partprobe").arg("/dev/sda"),
            "Re-read partition table",
            RetryPolicy::default(),
        )
        .unwrap();
        assert!(dry.inner().calls.borrow().is_empty());
    }
}
