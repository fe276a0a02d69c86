//! Typed external commands.
//!
//! Every tool invocation is described by a `CommandSpec` before it reaches an
//! [`Executor`](crate::executor::Executor). The kind decides what dry-run may
//! do with it: `Query` commands are read-only and still run, `Mutation`
//! commands (the default) never reach the system in dry-run.
//!
//! Secrets travel only on stdin or in a keyfile. The stdin payload is never
//! printed by `Display` or `Debug`.

use std::fmt;
use std::path::Path;

/// Whether a command may change system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Read-only (`lsblk`, `blkid`, `cryptsetup isLuks`, ...)
    Query,
    #[default]
    Mutation,
}

/// A fully-specified external command.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub kind: CommandKind,
}

impl CommandSpec {
    /// A mutation with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            kind: CommandKind::Mutation,
        }
    }

    /// A read-only command.
    pub fn query(program: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Query,
            ..Self::new(program)
        }
    }

    /// `arch-chroot <target> <program> ...`
    pub fn in_chroot(target: &Path, program: impl Into<String>) -> Self {
        Self::new("arch-chroot")
            .arg(target.display().to_string())
            .arg(program)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed `payload` on stdin. Used for secrets such as `chpasswd` input.
    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    #[inline]
    pub fn is_query(&self) -> bool {
        self.kind == CommandKind::Query
    }

    /// The first argument that is not an option, e.g. `mkpart` for parted.
    pub fn subcommand(&self) -> Option<&str> {
        self.args
            .iter()
            .map(String::as_str)
            .find(|a| !a.starts_with('-') && !a.starts_with('/'))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        if self.stdin.is_some() {
            write!(f, " <stdin redacted>")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("kind", &self.kind)
            .finish()
    }
}

/// Typed argument contract for a tool invocation.
///
/// Implementors map struct fields to the exact flags a tool expects, so a
/// misspelled flag is a compile error rather than a runtime failure.
pub trait ToolArgs {
    /// Program name as found on `PATH`.
    fn program(&self) -> &'static str;

    /// Arguments exactly as the tool parses them.
    fn to_cli_args(&self) -> Vec<String>;

    fn kind(&self) -> CommandKind {
        CommandKind::Mutation
    }

    fn to_command(&self) -> CommandSpec {
        CommandSpec {
            kind: self.kind(),
            ..CommandSpec::new(self.program()).args(self.to_cli_args())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kind_is_mutation() {
        assert_eq!(CommandSpec::new("wipefs").kind, CommandKind::Mutation);
        assert!(CommandSpec::query("lsblk").is_query());
    }

    #[test]
    fn test_display_quotes_and_redacts() {
        let cmd = CommandSpec::new("chpasswd").stdin("root:hunter2");
        assert_eq!(cmd.to_string(), "chpasswd <stdin redacted>");
        assert!(!format!("{:?}", cmd).contains("hunter2"));

        let cmd = CommandSpec::new("parted")
            .args(["-s", "/dev/sda", "mkpart", "ESP", "fat32", "1MiB", "1025MiB"]);
        assert_eq!(cmd.to_string(), "parted -s /dev/sda mkpart ESP fat32 1MiB 1025MiB");
        assert_eq!(cmd.subcommand(), Some("mkpart"));

        let cmd = CommandSpec::new("sed").arg("s/a b/c/");
        assert_eq!(cmd.to_string(), "sed 's/a b/c/'");
    }

    #[test]
    fn test_in_chroot() {
        let cmd = CommandSpec::in_chroot(Path::new("/mnt"), "mkinitcpio").arg("-P");
        assert_eq!(cmd.program, "arch-chroot");
        assert_eq!(cmd.args, vec!["/mnt", "mkinitcpio", "-P"]);
    }

    struct Probe;

    impl ToolArgs for Probe {
        fn program(&self) -> &'static str {
            "blkid"
        }
        fn to_cli_args(&self) -> Vec<String> {
            vec!["-s".into(), "PARTUUID".into()]
        }
        fn kind(&self) -> CommandKind {
            CommandKind::Query
        }
    }

    #[test]
    fn test_tool_args_to_command() {
        let cmd = Probe.to_command();
        assert_eq!(cmd.program, "blkid");
        assert_eq!(cmd.args, vec!["-s", "PARTUUID"]);
        assert!(cmd.is_query());
    }
}
