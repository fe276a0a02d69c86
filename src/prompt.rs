//! Operator interaction
//!
//! Phases never talk to the terminal directly; they ask a [`Prompter`].
//! [`InquirePrompter`] is the interactive implementation and
//! [`ScriptedPrompter`] replays canned answers for tests and automation.

use std::collections::VecDeque;
use thiserror::Error;

use crate::secret::Passphrase;
use crate::validation::ValidationError;

/// Passphrase entry attempts before giving up.
pub const PASSPHRASE_ATTEMPTS: u32 = 3;

/// The literal an operator types to approve a destructive step.
pub const CONFIRMATION_WORD: &str = "YES";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// Esc or Ctrl+C at a prompt
    #[error("prompt cancelled")]
    Cancelled,

    #[error("no more scripted answers for '{0}'")]
    NoInput(String),

    #[error("{0}")]
    Terminal(String),

    #[error("passphrases did not match after {0} attempts")]
    PassphraseMismatch(u32),
}

/// Source of operator answers.
pub trait Prompter {
    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String, PromptError>;

    /// Hidden input, no confirmation.
    fn secret(&mut self, message: &str) -> Result<Passphrase, PromptError>;

    /// Returns the index of the chosen option.
    fn select(&mut self, message: &str, options: &[String]) -> Result<usize, PromptError>;

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool, PromptError>;
}

/// Terminal prompts backed by `inquire`.
#[derive(Debug, Default)]
pub struct InquirePrompter;

impl InquirePrompter {
    pub fn new() -> Self {
        Self
    }
}

fn map_inquire(err: inquire::InquireError) -> PromptError {
    match err {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            PromptError::Cancelled
        }
        other => PromptError::Terminal(other.to_string()),
    }
}

impl Prompter for InquirePrompter {
    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String, PromptError> {
        let mut prompt = inquire::Text::new(message);
        if let Some(default) = default {
            prompt = prompt.with_default(default);
        }
        prompt.prompt().map_err(map_inquire)
    }

    fn secret(&mut self, message: &str) -> Result<Passphrase, PromptError> {
        inquire::Password::new(message)
            .without_confirmation()
            .prompt()
            .map(Passphrase::new)
            .map_err(map_inquire)
    }

    fn select(&mut self, message: &str, options: &[String]) -> Result<usize, PromptError> {
        inquire::Select::new(message, options.to_vec())
            .with_page_size(10)
            .without_filtering()
            .raw_prompt()
            .map(|choice| choice.index)
            .map_err(map_inquire)
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool, PromptError> {
        inquire::Confirm::new(message)
            .with_default(default)
            .prompt()
            .map_err(map_inquire)
    }
}

/// One canned answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    /// Accept the prompt's default
    Default,
    Secret(String),
    Select(usize),
    Confirm(bool),
    Cancel,
}

/// Replays answers in order. Running out is an error, so a test that asks
/// more questions than expected fails instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<Answer>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }

    /// Messages of every prompt shown so far.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, message: &str) -> Result<Answer, PromptError> {
        self.asked.push(message.to_string());
        match self.answers.pop_front() {
            Some(Answer::Cancel) => Err(PromptError::Cancelled),
            Some(answer) => Ok(answer),
            None => Err(PromptError::NoInput(message.to_string())),
        }
    }

    fn mismatch(message: &str, answer: &Answer) -> PromptError {
        PromptError::Terminal(format!("scripted answer {:?} does not fit '{}'", answer, message))
    }
}

impl Prompter for ScriptedPrompter {
    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String, PromptError> {
        match self.next(message)? {
            Answer::Text(text) => Ok(text),
            Answer::Default => Ok(default.unwrap_or_default().to_string()),
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn secret(&mut self, message: &str) -> Result<Passphrase, PromptError> {
        match self.next(message)? {
            Answer::Secret(secret) | Answer::Text(secret) => Ok(Passphrase::new(secret)),
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn select(&mut self, message: &str, options: &[String]) -> Result<usize, PromptError> {
        match self.next(message)? {
            Answer::Select(index) if index < options.len() => Ok(index),
            Answer::Default if !options.is_empty() => Ok(0),
            other => Err(Self::mismatch(message, &other)),
        }
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool, PromptError> {
        match self.next(message)? {
            Answer::Confirm(value) => Ok(value),
            Answer::Default => Ok(default),
            other => Err(Self::mismatch(message, &other)),
        }
    }
}

/// Ask until `validate` accepts the answer. Each rejection is shown as a
/// warning before asking again.
pub fn prompt_validated<T>(
    prompter: &mut dyn Prompter,
    message: &str,
    default: Option<&str>,
    mut validate: impl FnMut(&str) -> Result<T, ValidationError>,
) -> Result<T, PromptError> {
    loop {
        let answer = prompter.text(message, default)?;
        match validate(answer.trim()) {
            Ok(value) => return Ok(value),
            Err(e) => tracing::warn!("{}", e),
        }
    }
}

/// Require the operator to type `YES` exactly. Anything else is a refusal.
pub fn confirm_typed(prompter: &mut dyn Prompter, message: &str) -> Result<bool, PromptError> {
    let answer = prompter.text(&format!("{} Type {} to continue", message, CONFIRMATION_WORD), None)?;
    Ok(answer.trim() == CONFIRMATION_WORD)
}

/// Read a passphrase twice. Empty or mismatched entries are retried up to
/// `attempts` times in total.
pub fn prompt_passphrase(
    prompter: &mut dyn Prompter,
    label: &str,
    attempts: u32,
) -> Result<Passphrase, PromptError> {
    for attempt in 1..=attempts {
        let first = prompter.secret(&format!("Enter {}", label))?;
        if first.is_empty() {
            tracing::warn!("{} must not be empty ({}/{})", label, attempt, attempts);
            continue;
        }
        let second = prompter.secret(&format!("Confirm {}", label))?;
        if first == second {
            return Ok(first);
        }
        tracing::warn!("{}s do not match ({}/{})", label, attempt, attempts);
    }
    tracing::error!("Failed to set {} after {} attempts", label, attempts);
    Err(PromptError::PassphraseMismatch(attempts))
}
