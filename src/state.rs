//! Persistent deployment state.
//!
//! A small JSON document written next to the run so that configuration
//! gathered interactively survives a restart. Single writer, no locking:
//! the last write wins. Secrets are never stored here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::config::DeploymentConfig;
use crate::error::{DeployError, Result};
use crate::phase::Phase;

const STATE_VERSION: u32 = 1;

/// On-disk shape of the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub config: Option<DeploymentConfig>,
    pub entries: BTreeMap<String, String>,
    pub completed_phases: Vec<Phase>,
}

/// Key/value and configuration persistence for a run.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: StateFile,
    persist: bool,
}

impl StateStore {
    /// Default location: `$TMPDIR/arch-secure-deploy-<pid>.json`.
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(format!("arch-secure-deploy-{}.json", std::process::id()))
    }

    /// Open the store at `path`, loading and validating it if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            Self::load_state_file(&path)?
        } else {
            StateFile {
                version: STATE_VERSION,
                ..StateFile::default()
            }
        };
        Ok(Self {
            path,
            state,
            persist: true,
        })
    }

    /// Like [`open`](Self::open), but never writes or deletes the file
    /// (dry-run).
    pub fn open_volatile(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::open(path)?;
        store.persist = false;
        Ok(store)
    }

    fn load_state_file(path: &Path) -> Result<StateFile> {
        let content = fs::read_to_string(path)?;
        let state: StateFile = serde_json::from_str(&content)?;
        if state.version != STATE_VERSION {
            return Err(DeployError::config(format!(
                "State file {} has version {}, expected {}",
                path.display(),
                state.version,
                STATE_VERSION
            )));
        }
        if let Some(config) = &state.config {
            config.validate()?;
        }
        tracing::debug!("Loaded state from {}", path.display());
        Ok(state)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set `key` to `value` and persist immediately.
    pub fn save_state(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.state.entries.insert(key.to_string(), value.into());
        self.flush()
    }

    /// All saved key/value entries.
    pub fn load_state(&self) -> &BTreeMap<String, String> {
        &self.state.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.state.entries.get(key).map(String::as_str)
    }

    pub fn save_config(&mut self, config: &DeploymentConfig) -> Result<()> {
        self.state.config = Some(config.clone());
        self.flush()
    }

    pub fn config(&self) -> Option<&DeploymentConfig> {
        self.state.config.as_ref()
    }

    pub fn record_phase(&mut self, phase: Phase) -> Result<()> {
        if !self.state.completed_phases.contains(&phase) {
            self.state.completed_phases.push(phase);
        }
        self.flush()
    }

    pub fn completed_phases(&self) -> &[Phase] {
        &self.state.completed_phases
    }

    /// Delete the state file (after a successful run).
    pub fn remove(&self) -> Result<()> {
        if self.persist && self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Write to a sibling temp file with mode 0600, then rename over the target.
    fn flush(&self) -> Result<()> {
        if !self.persist {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_reload_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::open(&path).unwrap();
        store.save_state("TARGET_DEVICE", "/dev/sda").unwrap();
        store.save_state("TARGET_DEVICE", "/dev/nvme0n1").unwrap();
        store.save_state("ROOT_SIZE_GB", "60").unwrap();

        let reopened = StateStore::open(&path).unwrap();
        assert_eq!(reopened.get("TARGET_DEVICE"), Some("/dev/nvme0n1"));
        assert_eq!(reopened.load_state().len(), 2);
    }

    #[test]
    fn test_state_file_is_private() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path).unwrap();
        store.save_state("k", "v").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_config_and_phases_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut config = DeploymentConfig::default();
        config.hostname = "vault".to_string();

        let mut store = StateStore::open(&path).unwrap();
        store.save_config(&config).unwrap();
        store.record_phase(Phase::Preflight).unwrap();
        store.record_phase(Phase::Configuration).unwrap();
        store.record_phase(Phase::Configuration).unwrap();

        let reopened = StateStore::open(&path).unwrap();
        assert_eq!(reopened.config(), Some(&config));
        assert_eq!(
            reopened.completed_phases(),
            &[Phase::Preflight, Phase::Configuration]
        );

        reopened.remove().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_stored_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"version":1,"config":{"hostname":"bad host"},"entries":{},"completed_phases":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            StateStore::open(&path),
            Err(DeployError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version":9,"config":null,"entries":{},"completed_phases":[]}"#)
            .unwrap();
        assert!(matches!(StateStore::open(&path), Err(DeployError::Config(_))));
    }

    #[test]
    fn test_volatile_store_never_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open_volatile(&path).unwrap();
        store.save_state("k", "v").unwrap();
        assert_eq!(store.get("k"), Some("v"));
        assert!(!path.exists());
    }

    #[test]
    fn test_volatile_store_reads_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        StateStore::open(&path).unwrap().save_state("k", "v").unwrap();

        let mut store = StateStore::open_volatile(&path).unwrap();
        assert_eq!(store.get("k"), Some("v"));
        store.save_state("k", "changed").unwrap();
        store.remove().unwrap();
        assert!(path.exists());
        assert_eq!(StateStore::open(&path).unwrap().get("k"), Some("v"));
    }
}
