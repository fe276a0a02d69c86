//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arch_secure_deploy::command::CommandSpec;
use arch_secure_deploy::error::Result;
use arch_secure_deploy::executor::{CommandOutput, Executor};
use arch_secure_deploy::prompt::Answer;

/// 200 GiB NVMe disk as `lsblk -J -b` reports it.
pub const LSBLK_NVME_200G: &str = r#"{"blockdevices":[
    {"name":"/dev/nvme0n1","size":214748364800,"type":"disk","model":"Test NVMe"}
]}"#;

/// Executor that records every command and file operation and answers
/// with canned output instead of touching the system.
#[derive(Default)]
pub struct Recorder {
    pub commands: RefCell<Vec<CommandSpec>>,
    pub files: RefCell<BTreeMap<PathBuf, String>>,
    pub dirs: RefCell<Vec<PathBuf>>,
    /// program (or "program subcommand") -> exit code to fail with
    pub failures: BTreeMap<String, i32>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, key: &str, code: i32) -> Self {
        self.failures.insert(key.to_string(), code);
        self
    }

    /// Every recorded command line.
    pub fn lines(&self) -> Vec<String> {
        self.commands.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }

    /// Program as seen through `arch-chroot <target> <program>`.
    fn effective_program(cmd: &CommandSpec) -> &str {
        if cmd.program == "arch-chroot" {
            cmd.args.get(1).map(String::as_str).unwrap_or("arch-chroot")
        } else {
            &cmd.program
        }
    }

    fn canned(cmd: &CommandSpec) -> CommandOutput {
        match (cmd.program.as_str(), cmd.subcommand()) {
            ("lsblk", _) => CommandOutput::ok(LSBLK_NVME_200G),
            ("blkid", _) => CommandOutput::ok("0c6b1d52-partuuid\n"),
            ("cryptsetup", Some("isLuks")) => CommandOutput::failed(Some(1), ""),
            ("cryptsetup", Some("luksUUID")) => CommandOutput::ok("5f0e-luks-uuid\n"),
            ("genfstab", _) => CommandOutput::ok("UUID=abcd / btrfs rw,subvol=/@ 0 0\n"),
            _ => CommandOutput::ok(""),
        }
    }
}

impl Executor for Recorder {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        self.commands.borrow_mut().push(cmd.clone());

        let program = Self::effective_program(cmd);
        let keyed = cmd
            .subcommand()
            .map(|sub| format!("{} {}", program, sub));
        let failure = keyed
            .as_ref()
            .and_then(|k| self.failures.get(k))
            .or_else(|| self.failures.get(program));
        if let Some(code) = failure {
            return Ok(CommandOutput::failed(Some(*code), format!("{} failed", program)));
        }
        Ok(Self::canned(cmd))
    }

    fn write_file(&self, path: &Path, contents: &str, _mode: Option<u32>) -> Result<()> {
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn append_file(&self, path: &Path, contents: &str) -> Result<()> {
        self.files
            .borrow_mut()
            .entry(path.to_path_buf())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Result<String> {
        match self.files.borrow().get(path) {
            Some(content) => Ok(content.clone()),
            None => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "not recorded").into()),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.dirs.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        path == Path::new("/sys/firmware/efi") || self.files.borrow().contains_key(path)
    }

    fn block_device_exists(&self, _path: &Path) -> bool {
        true
    }

    fn sleep(&self, _duration: Duration) {}
}

/// Answers for a full interactive run on the 200 GiB disk with every
/// configuration default, root 50 GB and the given passphrases.
pub fn full_run_answers(confirm_disk: bool) -> Vec<Answer> {
    let mut answers = Vec::new();
    // Configuration: 8 validated texts, 3 feature confirms, extra packages
    answers.extend(std::iter::repeat_n(Answer::Default, 12));
    answers.push(Answer::Text("YES".to_string()));
    // Device selection
    answers.push(Answer::Select(0));
    answers.push(Answer::Text("50".to_string()));
    if confirm_disk {
        answers.push(Answer::Text("YES".to_string()));
    }
    // Encryption passphrase, user password, root password
    for secret in ["correct horse", "user pw", "root pw"] {
        answers.push(Answer::Secret(secret.to_string()));
        answers.push(Answer::Secret(secret.to_string()));
    }
    answers
}
