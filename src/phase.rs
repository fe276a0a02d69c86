//! Deployment phase state machine
//!
//! The `PhaseTracker` is the single source of truth for deployment progress.
//! It enforces the canonical phase order and makes it impossible to skip a
//! phase or to enter a destructive phase without recorded confirmation.
//!
//! # Phase Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! Preflight → Configuration → DeviceSelection
//!     ↓
//! DiskPreparation (destructive) → Encryption (destructive) → BtrfsLayout
//!     ↓
//! BaseInstall → FilesystemTables → Initramfs → Bootloader
//!     ↓
//! SystemConfig → UserSetup → SnapshotAutomation → Hardening → Finalize
//!     ↓
//! Completed
//!
//! (Any non-terminal phase can transition to Failed)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Deployment phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    NotStarted = 0,
    /// Privileges, tools, firmware and network
    Preflight = 1,
    /// Hostname, user, volume names, feature flags
    Configuration = 2,
    /// Target disk and partition sizing
    DeviceSelection = 3,
    /// Wipe and partition the target disk
    DiskPreparation = 4,
    /// LUKS2 format and open
    Encryption = 5,
    /// BTRFS filesystems, subvolumes and mounts
    BtrfsLayout = 6,
    /// pacstrap of the base system
    BaseInstall = 7,
    /// fstab and crypttab
    FilesystemTables = 8,
    /// mkinitcpio hooks and image
    Initramfs = 9,
    /// GRUB install and kernel command line
    Bootloader = 10,
    /// Hostname, locale, time, network, sudo
    SystemConfig = 11,
    /// Primary user and passwords
    UserSetup = 12,
    /// Snapshot script, service and timer
    SnapshotAutomation = 13,
    /// sysctl, kernel flags, AppArmor, firewall
    Hardening = 14,
    /// Summary, unmount, close
    Finalize = 15,
    Completed = 16,
    Failed = 255,
}

impl Phase {
    /// Returns the numeric order of this phase (0-16, 255 for Failed)
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true if this is a terminal state (Completed or Failed)
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if this phase rewrites the target disk
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::DiskPreparation | Self::Encryption)
    }

    /// Returns true once the phase may have changed on-disk state.
    #[inline]
    pub const fn touches_disk(self) -> bool {
        self.order() >= Self::DiskPreparation.order() && !matches!(self, Self::Failed)
    }

    /// Returns the next phase in the sequence, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Preflight),
            Self::Preflight => Some(Self::Configuration),
            Self::Configuration => Some(Self::DeviceSelection),
            Self::DeviceSelection => Some(Self::DiskPreparation),
            Self::DiskPreparation => Some(Self::Encryption),
            Self::Encryption => Some(Self::BtrfsLayout),
            Self::BtrfsLayout => Some(Self::BaseInstall),
            Self::BaseInstall => Some(Self::FilesystemTables),
            Self::FilesystemTables => Some(Self::Initramfs),
            Self::Initramfs => Some(Self::Bootloader),
            Self::Bootloader => Some(Self::SystemConfig),
            Self::SystemConfig => Some(Self::UserSetup),
            Self::UserSetup => Some(Self::SnapshotAutomation),
            Self::SnapshotAutomation => Some(Self::Hardening),
            Self::Hardening => Some(Self::Finalize),
            Self::Finalize => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Returns a human-readable description of this phase
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Preflight => "Pre-flight checks",
            Self::Configuration => "Interactive configuration",
            Self::DeviceSelection => "Device and partition selection",
            Self::DiskPreparation => "Disk preparation",
            Self::Encryption => "LUKS encryption",
            Self::BtrfsLayout => "BTRFS layout",
            Self::BaseInstall => "Base installation",
            Self::FilesystemTables => "fstab and crypttab generation",
            Self::Initramfs => "Initramfs generation",
            Self::Bootloader => "Bootloader installation",
            Self::SystemConfig => "System configuration",
            Self::UserSetup => "User setup",
            Self::SnapshotAutomation => "Snapshot automation",
            Self::Hardening => "Security hardening",
            Self::Finalize => "Finalization",
            Self::Completed => "Deployment complete",
            Self::Failed => "Deployment failed",
        }
    }

    /// The fifteen working phases, in execution order
    pub const fn working_phases() -> &'static [Self] {
        &[
            Self::Preflight,
            Self::Configuration,
            Self::DeviceSelection,
            Self::DiskPreparation,
            Self::Encryption,
            Self::BtrfsLayout,
            Self::BaseInstall,
            Self::FilesystemTables,
            Self::Initramfs,
            Self::Bootloader,
            Self::SystemConfig,
            Self::UserSetup,
            Self::SnapshotAutomation,
            Self::Hardening,
            Self::Finalize,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during phase transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransitionError {
    #[error("Cannot skip from {from} to {to} (phases run strictly in order)")]
    SkippedPhase { from: Phase, to: Phase },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: Phase, to: Phase },

    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: Phase },

    #[error("Phase {phase} requires explicit confirmation (destructive operation)")]
    MissingConfirmation { phase: Phase },

    #[error("Already at phase {phase}")]
    AlreadyAtPhase { phase: Phase },
}

/// Tracks the current phase and validates every transition.
///
/// ```
/// use arch_secure_deploy::phase::{Phase, PhaseTracker};
///
/// let mut tracker = PhaseTracker::new();
/// tracker.advance().unwrap();
/// assert_eq!(tracker.current(), Phase::Preflight);
/// assert!(tracker.transition_to(Phase::DiskPreparation).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: Phase,
    failed_at: Option<Phase>,
    /// (phase, unix timestamp) for every transition
    history: Vec<(Phase, u64)>,
    destructive_confirmed: bool,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: Phase::NotStarted,
            failed_at: None,
            history: Vec::with_capacity(Phase::working_phases().len() + 2),
            destructive_confirmed: false,
        }
    }

    #[inline]
    pub fn current(&self) -> Phase {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<Phase> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == Phase::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == Phase::Failed
    }

    pub fn history(&self) -> &[(Phase, u64)] {
        &self.history
    }

    /// Record that the operator typed the destructive confirmation.
    /// One-way; it cannot be revoked.
    pub fn confirm_destructive_operations(&mut self) {
        self.destructive_confirmed = true;
    }

    #[inline]
    pub fn is_destructive_confirmed(&self) -> bool {
        self.destructive_confirmed
    }

    /// Advance to the next phase in sequence.
    pub fn advance(&mut self) -> Result<Phase, PhaseTransitionError> {
        let Some(next) = self.current.next() else {
            return Err(PhaseTransitionError::FromTerminalState { from: self.current });
        };
        self.transition_to(next)
    }

    /// Transition to `target`, which must be exactly the next phase.
    pub fn transition_to(&mut self, target: Phase) -> Result<Phase, PhaseTransitionError> {
        if self.current.is_terminal() {
            return Err(PhaseTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(PhaseTransitionError::AlreadyAtPhase { phase: target });
        }
        if target == Phase::Failed {
            return Err(PhaseTransitionError::SkippedPhase {
                from: self.current,
                to: target,
            });
        }
        if target.order() < self.current.order() {
            return Err(PhaseTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(PhaseTransitionError::SkippedPhase {
                from: self.current,
                to: target,
            });
        }
        if target.is_destructive() && !self.destructive_confirmed {
            return Err(PhaseTransitionError::MissingConfirmation { phase: target });
        }

        self.record(target);
        self.current = target;
        Ok(target)
    }

    /// Mark the run as failed, remembering the phase that failed.
    pub fn fail(&mut self) -> Result<(), PhaseTransitionError> {
        if self.current.is_terminal() {
            return Err(PhaseTransitionError::FromTerminalState { from: self.current });
        }
        self.failed_at = Some(self.current);
        self.record(Phase::Failed);
        self.current = Phase::Failed;
        Ok(())
    }

    fn record(&mut self, phase: Phase) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.history.push((phase, timestamp));
    }
}
