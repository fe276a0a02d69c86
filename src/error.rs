//! Error handling module for arch-secure-deploy
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every phase returns `Result<T, DeployError>`; the orchestrator maps the
//! first unrecovered error to a process exit code.

use thiserror::Error;

use crate::phase::{Phase, PhaseTransitionError};
use crate::prompt::PromptError;
use crate::validation::ValidationError;

/// Main error type for a deployment run
#[derive(Error, Debug)]
pub enum DeployError {
    /// IO errors (state file, config files, target artifacts)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input that failed validation and could not be recovered by reprompting
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Prompt could not be shown or was aborted
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    /// A command marked critical exited non-zero
    #[error("{description} failed (exit code {}): {stderr}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    CommandFailed {
        description: String,
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A command could not be spawned at all
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The retry helper gave up
    #[error("{description} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        description: String,
        attempts: u32,
        last_error: String,
    },

    /// A phase started without the post-conditions of the phases before it
    #[error("Precondition for {phase} not met: {what}")]
    Precondition { phase: Phase, what: String },

    /// Phase state machine violation
    #[error("Phase transition error: {0}")]
    Transition(#[from] PhaseTransitionError),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operator declined a confirmation
    #[error("Cancelled by user: {0}")]
    Cancelled(String),
}

/// Result type alias for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a precondition error for `phase`
    pub fn precondition(phase: Phase, what: impl Into<String>) -> Self {
        Self::Precondition {
            phase,
            what: what.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Returns true if the operator cancelled the run
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Prompt(PromptError::Cancelled))
    }

    /// Process exit code for this error.
    ///
    /// Cancellation exits 0. A failed critical command exits with its own
    /// status when it has a non-zero one. Everything else exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            _ if self.is_cancelled() => 0,
            Self::CommandFailed {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}
