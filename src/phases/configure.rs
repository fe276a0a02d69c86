//! Interactive configuration.
//!
//! A configuration loaded from `--config` or from a previous run's state
//! file is offered for reuse first. Otherwise every field is prompted with a
//! default and validated, the summary is shown, and the operator must type
//! `YES` before anything is persisted.

use crate::config::DeploymentConfig;
use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::prompt::{confirm_typed, prompt_validated, Prompter, PromptError};
use crate::success;
use crate::validation::{
    validate_hostname, validate_keymap, validate_timezone, validate_username, validate_volume_name,
    ValidationError,
};

fn show_summary(config: &DeploymentConfig) {
    tracing::info!("Deployment configuration:");
    for line in config.summary_lines() {
        tracing::info!("  {}", line);
    }
    if !config.extra_packages.is_empty() {
        tracing::info!("  Extra packages:     {}", config.extra_packages.join(" "));
    }
}

fn validated_string(
    validate: fn(&str) -> std::result::Result<(), ValidationError>,
) -> impl FnMut(&str) -> std::result::Result<String, ValidationError> {
    move |s| validate(s).map(|_| s.to_string())
}

/// Prompt for every field, starting from `defaults`.
pub fn gather(
    prompter: &mut dyn Prompter,
    defaults: &DeploymentConfig,
) -> std::result::Result<DeploymentConfig, PromptError> {
    let mut config = defaults.clone();

    config.hostname = prompt_validated(
        prompter,
        "Hostname",
        Some(&defaults.hostname),
        validated_string(validate_hostname),
    )?;
    config.username = prompt_validated(
        prompter,
        "Primary username",
        Some(&defaults.username),
        validated_string(validate_username),
    )?;
    config.timezone = prompt_validated(
        prompter,
        "Timezone (e.g. Europe/Berlin)",
        Some(&defaults.timezone),
        validated_string(validate_timezone),
    )?;
    config.locale = prompt_validated(prompter, "Locale", Some(&defaults.locale), |s| {
        if s.is_empty() || s.contains(char::is_whitespace) {
            Err(ValidationError::Empty { field: "Locale" })
        } else {
            Ok(s.to_string())
        }
    })?;
    config.keymap = prompt_validated(
        prompter,
        "Console keymap",
        Some(&defaults.keymap),
        validated_string(validate_keymap),
    )?;
    config.root_mapper = prompt_validated(
        prompter,
        "Root volume name",
        Some(&defaults.root_mapper),
        validated_string(validate_volume_name),
    )?;
    let root_mapper = config.root_mapper.clone();
    config.home_mapper = prompt_validated(
        prompter,
        "Home volume name",
        Some(&defaults.home_mapper),
        |s| {
            validate_volume_name(s)?;
            if s == root_mapper {
                return Err(ValidationError::InvalidCharacters {
                    field: "Home volume name",
                    value: s.to_string(),
                    allowed: "a name different from the root volume",
                });
            }
            Ok(s.to_string())
        },
    )?;
    config.snapshot_retention = prompt_validated(
        prompter,
        "Snapshots to keep",
        Some(&defaults.snapshot_retention.to_string()),
        |s| match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ValidationError::NotANumber(s.to_string())),
        },
    )?;

    config.enable_tpm2 = prompter.confirm("Enroll TPM2 for automatic unlock?", defaults.enable_tpm2)?;
    config.enable_apparmor = prompter.confirm("Enable AppArmor?", defaults.enable_apparmor)?;
    config.enable_firewall = prompter.confirm("Enable the firewall (ufw)?", defaults.enable_firewall)?;

    let extra = prompter.text(
        "Extra packages (space separated, empty for none)",
        Some(&defaults.extra_packages.join(" ")),
    )?;
    config.extra_packages = extra.split_whitespace().map(str::to_string).collect();

    Ok(config)
}

pub fn run(ctx: &mut DeployContext<'_>) -> Result<()> {
    let loaded = ctx
        .options
        .preset
        .clone()
        .or_else(|| ctx.state.config().cloned());

    if let Some(mut config) = loaded {
        config.apply_overrides(ctx.options.overrides);
        show_summary(&config);
        if ctx.prompter.confirm("Use this configuration?", true)? {
            config.validate()?;
            ctx.state.save_config(&config)?;
            ctx.config = Some(config);
            success!("Using saved configuration");
            return Ok(());
        }
    }

    let mut defaults = DeploymentConfig::default();
    defaults.apply_overrides(ctx.options.overrides);
    let config = gather(&mut *ctx.prompter, &defaults)?;
    config.validate()?;

    show_summary(&config);
    if !confirm_typed(&mut *ctx.prompter, "Proceed with this configuration?")? {
        return Err(DeployError::cancelled("configuration not confirmed"));
    }

    ctx.state.save_config(&config)?;
    ctx.config = Some(config);
    success!("Configuration saved");
    Ok(())
}
