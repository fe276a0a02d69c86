//! Deployment context threaded through every phase.

use std::path::{Path, PathBuf};

use crate::config::{DeploymentConfig, FeatureOverrides};
use crate::error::{DeployError, Result};
use crate::executor::Executor;
use crate::layout::{join_target, DiskLayout};
use crate::phase::PhaseTracker;
use crate::prompt::Prompter;
use crate::state::StateStore;

/// Hosts tried, in order, by the network check.
pub const DEFAULT_NETWORK_HOSTS: &[&str] = &[
    "archlinux.org:443",
    "geo.mirror.pkgbuild.com:443",
    "1.1.1.1:53",
    "8.8.8.8:53",
];

/// Run-wide options fixed at startup.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub dry_run: bool,
    /// Where the new system is mounted (`/mnt`)
    pub target_root: PathBuf,
    pub overrides: FeatureOverrides,
    /// Configuration from `--config`, offered for reuse in the configuration phase
    pub preset: Option<DeploymentConfig>,
    pub network_hosts: Vec<String>,
    pub skip_root_check: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            target_root: PathBuf::from("/mnt"),
            overrides: FeatureOverrides::default(),
            preset: None,
            network_hosts: DEFAULT_NETWORK_HOSTS.iter().map(|h| h.to_string()).collect(),
            skip_root_check: false,
        }
    }
}

/// Mapper devices opened and filesystems mounted by this run, in order.
///
/// Finalization and failure cleanup release them in reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLedger {
    mappers: Vec<String>,
    mounts: Vec<PathBuf>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_mapper(&mut self, name: &str) {
        if !self.has_mapper(name) {
            self.mappers.push(name.to_string());
        }
    }

    pub fn record_mount(&mut self, target: &Path) {
        if !self.is_mounted(target) {
            self.mounts.push(target.to_path_buf());
        }
    }

    pub fn forget_mapper(&mut self, name: &str) {
        self.mappers.retain(|m| m != name);
    }

    pub fn forget_mount(&mut self, target: &Path) {
        self.mounts.retain(|m| m != target);
    }

    pub fn has_mapper(&self, name: &str) -> bool {
        self.mappers.iter().any(|m| m == name)
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.mounts.iter().any(|m| m == target)
    }

    pub fn mappers(&self) -> &[String] {
        &self.mappers
    }

    pub fn mounts(&self) -> &[PathBuf] {
        &self.mounts
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty() && self.mounts.is_empty()
    }
}

/// Everything a phase may read or change.
pub struct DeployContext<'a> {
    pub exec: &'a dyn Executor,
    pub prompter: &'a mut dyn Prompter,
    pub options: DeployOptions,
    /// Set by the configuration phase
    pub config: Option<DeploymentConfig>,
    /// Set by the device selection phase
    pub layout: Option<DiskLayout>,
    pub ledger: ResourceLedger,
    pub state: StateStore,
    pub tracker: PhaseTracker,
}

impl<'a> DeployContext<'a> {
    pub fn new(
        exec: &'a dyn Executor,
        prompter: &'a mut dyn Prompter,
        options: DeployOptions,
        state: StateStore,
    ) -> Self {
        Self {
            exec,
            prompter,
            options,
            config: None,
            layout: None,
            ledger: ResourceLedger::new(),
            state,
            tracker: PhaseTracker::new(),
        }
    }

    #[inline]
    pub fn dry_run(&self) -> bool {
        self.options.dry_run || self.exec.is_dry_run()
    }

    pub fn target_root(&self) -> &Path {
        &self.options.target_root
    }

    /// Path inside the target system, e.g. `target("etc/fstab")`.
    pub fn target(&self, relative: &str) -> PathBuf {
        join_target(&self.options.target_root, relative)
    }

    pub fn config(&self) -> Result<&DeploymentConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| DeployError::precondition(self.tracker.current(), "configuration not gathered"))
    }

    pub fn layout(&self) -> Result<&DiskLayout> {
        self.layout
            .as_ref()
            .ok_or_else(|| DeployError::precondition(self.tracker.current(), "target disk not selected"))
    }

    pub fn require_mapper(&self, name: &str) -> Result<()> {
        if self.ledger.has_mapper(name) {
            Ok(())
        } else {
            Err(DeployError::precondition(
                self.tracker.current(),
                format!("encrypted volume {} is not open", name),
            ))
        }
    }

    pub fn require_target_mounted(&self) -> Result<()> {
        if self.ledger.is_mounted(&self.options.target_root) {
            Ok(())
        } else {
            Err(DeployError::precondition(
                self.tracker.current(),
                format!("{} is not mounted", self.options.target_root.display()),
            ))
        }
    }
}
