//! Deployment configuration.
//!
//! Gathered once (interactively, from a JSON file, or from a previous run's
//! state file) and immutable for the rest of the run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::validation::{
    validate_hostname, validate_keymap, validate_timezone, validate_username, validate_volume_name,
    ValidationError,
};

/// Installation configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    // Identity
    pub hostname: String,
    pub username: String,
    pub user_shell: String,

    // Locale & Time
    pub timezone: String,
    pub locale: String,
    pub keymap: String,

    // Encrypted volumes
    pub root_mapper: String,
    pub home_mapper: String,

    // Btrfs
    pub snapshot_retention: u32,
    pub log_subvolume: bool,

    // Disk
    pub set_partition_types: bool,

    // Packages
    pub extra_packages: Vec<String>,

    // Feature flags
    pub enable_tpm2: bool,
    pub enable_apparmor: bool,
    pub enable_firewall: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            hostname: "archlinux".to_string(),
            username: "user".to_string(),
            user_shell: "/bin/bash".to_string(),
            timezone: "UTC".to_string(),
            locale: "en_US.UTF-8".to_string(),
            keymap: "us".to_string(),
            root_mapper: "cryptroot".to_string(),
            home_mapper: "crypthome".to_string(),
            snapshot_retention: 8,
            log_subvolume: true,
            set_partition_types: true,
            extra_packages: Vec::new(),
            enable_tpm2: false,
            enable_apparmor: true,
            enable_firewall: true,
        }
    }
}

/// Feature-flag overrides from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureOverrides {
    pub enable_tpm2: bool,
    pub disable_apparmor: bool,
    pub disable_firewall: bool,
}

impl DeploymentConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Load and validate configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;
        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Validate every field an operator could have typed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_hostname(&self.hostname)?;
        validate_username(&self.username)?;
        validate_volume_name(&self.root_mapper)?;
        validate_volume_name(&self.home_mapper)?;
        if self.root_mapper == self.home_mapper {
            return Err(ValidationError::InvalidCharacters {
                field: "Home volume name",
                value: self.home_mapper.clone(),
                allowed: "a name different from the root volume",
            });
        }
        validate_timezone(&self.timezone)?;
        validate_keymap(&self.keymap)?;
        if !self.user_shell.starts_with('/') {
            return Err(ValidationError::InvalidCharacters {
                field: "Shell",
                value: self.user_shell.clone(),
                allowed: "an absolute path",
            });
        }
        if self.snapshot_retention == 0 {
            return Err(ValidationError::Empty {
                field: "Snapshot retention",
            });
        }
        Ok(())
    }

    /// Apply `--enable-tpm2`, `--disable-apparmor`, `--disable-firewall`.
    pub fn apply_overrides(&mut self, overrides: FeatureOverrides) {
        if overrides.enable_tpm2 {
            self.enable_tpm2 = true;
        }
        if overrides.disable_apparmor {
            self.enable_apparmor = false;
        }
        if overrides.disable_firewall {
            self.enable_firewall = false;
        }
    }

    /// Human-readable summary shown before confirmation and at the end.
    pub fn summary_lines(&self) -> Vec<String> {
        let on_off = |b: bool| if b { "enabled" } else { "disabled" };
        vec![
            format!("Hostname:           {}", self.hostname),
            format!("Username:           {} ({})", self.username, self.user_shell),
            format!("Timezone:           {}", self.timezone),
            format!("Locale / keymap:    {} / {}", self.locale, self.keymap),
            format!("Root volume:        /dev/mapper/{}", self.root_mapper),
            format!("Home volume:        /dev/mapper/{}", self.home_mapper),
            format!("Snapshot retention: {}", self.snapshot_retention),
            format!("TPM2 enrollment:    {}", on_off(self.enable_tpm2)),
            format!("AppArmor:           {}", on_off(self.enable_apparmor)),
            format!("Firewall:           {}", on_off(self.enable_firewall)),
        ]
    }
}
