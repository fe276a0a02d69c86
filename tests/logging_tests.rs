//! Routing of records between the general and errors log files.

mod common;

use std::fs;

use arch_secure_deploy::command::CommandSpec;
use arch_secure_deploy::executor::{execute, Criticality};
use arch_secure_deploy::logging::{open_log_files, subscriber};
use arch_secure_deploy::success;
use tracing_subscriber::EnvFilter;

use common::Recorder;

#[test]
fn errors_log_only_receives_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, general, errors, fallback) = open_log_files(dir.path(), "routing").unwrap();
    assert!(fallback.is_none());

    let recorder = Recorder::new().failing("mkfs.btrfs", 42);
    let sub = subscriber(std::io::sink, EnvFilter::new("info"), false, general, errors);

    let result = tracing::subscriber::with_default(sub, || {
        tracing::info!("Starting routing check");
        success!("Partition table written");
        tracing::debug!("lsblk output parsed");
        execute(
            &recorder,
            &CommandSpec::new("mkfs.btrfs").args(["-f", "/dev/mapper/cryptroot"]),
            "Format root filesystem",
            Criticality::Critical,
        )
    });
    assert!(result.is_err());

    let general = fs::read_to_string(&paths.general).unwrap();
    assert!(general.contains("[INFO] Starting routing check"));
    assert!(general.contains("[SUCCESS] Partition table written"));
    assert!(general.contains("[DEBUG] lsblk output parsed"));
    assert!(general.contains("[ERROR] Format root filesystem failed (exit code 42)"));

    let errors = fs::read_to_string(&paths.errors).unwrap();
    let lines: Vec<&str> = errors.lines().collect();
    assert_eq!(lines.len(), 1, "{}", errors);
    assert!(lines[0].contains("[ERROR] Format root filesystem failed (exit code 42)"));
    assert!(!errors.contains("[INFO]"));
    assert!(!errors.contains("[SUCCESS]"));
}
