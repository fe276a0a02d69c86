//! Operator-level scenarios: disk layout, passphrase entry, snapshot
//! retention, dry-run confirmation.

mod common;

use std::path::{Path, PathBuf};

use arch_secure_deploy::executor::{DryRunExecutor, SystemExecutor};
use arch_secure_deploy::layout::DiskLayout;
use arch_secure_deploy::phases::device::{confirm_destructive_operation, prompt_partition_size};
use arch_secure_deploy::phases::snapshots::{prune_snapshots, snapshots_to_prune};
use arch_secure_deploy::prompt::{prompt_passphrase, Answer, PromptError, ScriptedPrompter};
use arch_secure_deploy::validation::{check_disk_space, PartitionSizes};

use common::Recorder;

#[test]
fn nvme_disk_with_minimum_root() {
    let available = check_disk_space(200 * 1024 * 1024 * 1024).unwrap();
    assert_eq!(available, 200);

    let mut prompter = ScriptedPrompter::new([Answer::Text("50".to_string())]);
    let sizes = prompt_partition_size(&mut prompter, available).unwrap();
    assert_eq!(sizes, PartitionSizes { root_gb: 50, home_gb: 149 });

    let layout = DiskLayout::new("/dev/nvme0n1", available, sizes.root_gb, sizes.home_gb);
    assert_eq!(layout.efi_partition, PathBuf::from("/dev/nvme0n1p1"));
    assert_eq!(layout.root_partition, PathBuf::from("/dev/nvme0n1p2"));
    assert_eq!(layout.home_partition, PathBuf::from("/dev/nvme0n1p3"));
}

#[test]
fn matching_passphrase_is_returned() {
    let mut prompter = ScriptedPrompter::new([
        Answer::Secret("hunter2 hunter2".to_string()),
        Answer::Secret("hunter2 hunter2".to_string()),
    ]);
    let passphrase = prompt_passphrase(&mut prompter, "encryption passphrase", 3).unwrap();
    assert_eq!(passphrase.expose(), "hunter2 hunter2");
}

#[test]
fn three_mismatches_fail() {
    let mut answers = Vec::new();
    for i in 0..3 {
        answers.push(Answer::Secret(format!("first-{}", i)));
        answers.push(Answer::Secret(format!("second-{}", i)));
    }
    let mut prompter = ScriptedPrompter::new(answers);
    let err = prompt_passphrase(&mut prompter, "encryption passphrase", 3).unwrap_err();
    assert_eq!(err, PromptError::PassphraseMismatch(3));
    assert_eq!(prompter.remaining(), 0);
}

#[test]
fn retention_of_eight_prunes_two_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let mut names = Vec::new();
    for day in 1..=10 {
        let name = format!("root-2024-03-{:02}", day);
        std::fs::create_dir(dir.path().join(&name)).unwrap();
        names.push(name);
    }

    assert_eq!(
        snapshots_to_prune(&names, 8),
        vec!["root-2024-03-01".to_string(), "root-2024-03-02".to_string()]
    );

    let recorder = Recorder::new();
    let deleted = prune_snapshots(&recorder, dir.path(), 8).unwrap();
    assert_eq!(deleted.len(), 2);
    let expected: Vec<String> = ["root-2024-03-01", "root-2024-03-02"]
        .iter()
        .map(|n| format!("btrfs subvolume delete {}", dir.path().join(n).display()))
        .collect();
    assert_eq!(recorder.lines(), expected);
}

#[test]
fn prune_in_dry_run_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    for day in 1..=3 {
        std::fs::create_dir(dir.path().join(format!("home-2024-03-{:02}", day))).unwrap();
    }
    let exec = DryRunExecutor::new(SystemExecutor::new());
    let deleted = prune_snapshots(&exec, dir.path(), 1).unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
}

#[test]
fn dry_run_bypasses_destructive_confirmation() {
    let mut prompter = ScriptedPrompter::new(Vec::new());
    confirm_destructive_operation(&mut prompter, true, Path::new("/dev/nvme0n1")).unwrap();
    assert!(prompter.asked().is_empty());

    let mut prompter = ScriptedPrompter::new([Answer::Text("yes".to_string())]);
    let err = confirm_destructive_operation(&mut prompter, false, Path::new("/dev/nvme0n1"))
        .unwrap_err();
    assert!(err.is_cancelled());
}
