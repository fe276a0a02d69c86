//! arch-secure-deploy library
//!
//! Phased installer for an encrypted, hardened Arch Linux workstation
//! (LUKS2 + BTRFS + GRUB on UEFI). The binary wires these modules to the
//! real system; tests drive the same code through scripted prompts and a
//! recording executor.

pub mod cli;
pub mod command;
pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod layout;
pub mod logging;
pub mod phase;
pub mod phases;
pub mod process_guard;
pub mod prompt;
pub mod secret;
pub mod state;
pub mod validation;

// Re-export main types for convenience
pub use command::{CommandKind, CommandSpec, ToolArgs};
pub use config::{DeploymentConfig, FeatureOverrides};
pub use context::{DeployContext, DeployOptions, ResourceLedger};
pub use error::{DeployError, Result};
pub use executor::{
    execute, execute_with_retry, retry, CommandOutput, Criticality, DryRunExecutor, Executor,
    RetryOutcome, RetryPolicy, SystemExecutor,
};
pub use layout::{DiskLayout, MountSpec, Subvolume};
pub use phase::{Phase, PhaseTracker, PhaseTransitionError};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use prompt::{Answer, InquirePrompter, Prompter, ScriptedPrompter};
pub use secret::{Passphrase, SecretFile};
pub use state::StateStore;
pub use validation::ValidationError;
