//! arch-secure-deploy - Main entry point

use anyhow::{Context, Result};
use std::process::ExitCode;

use arch_secure_deploy::cli::{Cli, Commands};
use arch_secure_deploy::config::DeploymentConfig;
use arch_secure_deploy::context::{DeployContext, DeployOptions};
use arch_secure_deploy::error::DeployError;
use arch_secure_deploy::executor::{DryRunExecutor, Executor, SystemExecutor};
use arch_secure_deploy::logging::{self, LogPaths};
use arch_secure_deploy::phase::Phase;
use arch_secure_deploy::phases::snapshots::prune_snapshots;
use arch_secure_deploy::process_guard::{self, ProcessGuard};
use arch_secure_deploy::prompt::InquirePrompter;
use arch_secure_deploy::state::StateStore;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match &cli.command {
        Some(Commands::Validate { file }) => validate(file),
        Some(Commands::Phases) => {
            list_phases();
            ExitCode::SUCCESS
        }
        Some(Commands::PruneSnapshots { dir, keep }) => {
            let paths = match init_logging(&cli) {
                Ok(paths) => paths,
                Err(code) => return code,
            };
            let exec = executor(cli.dry_run);
            match prune_snapshots(exec.as_ref(), dir, *keep) {
                Ok(_) => ExitCode::SUCCESS,
                Err(e) => report_failure(&e, &paths),
            }
        }
        Some(Commands::Deploy) | None => deploy(&cli),
    }
}

fn validate(file: &std::path::Path) -> ExitCode {
    match DeploymentConfig::load_from_file(file) {
        Ok(config) => {
            println!("✓ Configuration file is valid: {}", file.display());
            for line in config.summary_lines() {
                println!("  {}", line);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn list_phases() {
    for phase in Phase::working_phases() {
        let marker = if phase.is_destructive() { " (destructive)" } else { "" };
        println!("{:>2}. {}{}", phase.order(), phase, marker);
    }
}

fn init_logging(cli: &Cli) -> std::result::Result<LogPaths, ExitCode> {
    logging::init(&cli.log_dir, cli.verbose).map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        ExitCode::FAILURE
    })
}

fn executor(dry_run: bool) -> Box<dyn Executor> {
    if dry_run {
        Box::new(DryRunExecutor::new(SystemExecutor::new()))
    } else {
        Box::new(SystemExecutor::new())
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn report_failure(error: &DeployError, paths: &LogPaths) -> ExitCode {
    if error.is_cancelled() {
        tracing::warn!("{}", error);
    } else {
        eprintln!("✗ {}", error);
        eprintln!("  Full log:   {}", paths.general.display());
        eprintln!("  Error log:  {}", paths.errors.display());
    }
    exit_code(error.exit_code())
}

fn deploy(cli: &Cli) -> ExitCode {
    let paths = match init_logging(cli) {
        Ok(paths) => paths,
        Err(code) => return code,
    };
    tracing::info!("arch-secure-deploy {} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Logging to {}", paths.general.display());

    if let Err(e) = process_guard::init_signal_handlers() {
        tracing::warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let options = match build_options(cli) {
        Ok(options) => options,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let state_path = cli.state_file.clone().unwrap_or_else(StateStore::default_path);
    let state = if cli.dry_run {
        StateStore::open_volatile(&state_path)
    } else {
        StateStore::open(&state_path)
    };
    let state = match state {
        Ok(state) => state,
        Err(e) => return report_failure(&e, &paths),
    };
    tracing::debug!("State file: {}", state.path().display());

    let exec = executor(cli.dry_run);
    let mut prompter = InquirePrompter::new();
    let mut ctx = DeployContext::new(exec.as_ref(), &mut prompter, options, state);

    match arch_secure_deploy::deploy::run(&mut ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(&e, &paths),
    }
}

fn build_options(cli: &Cli) -> Result<DeployOptions> {
    let preset = cli
        .config
        .as_ref()
        .map(|path| {
            DeploymentConfig::load_from_file(path)
                .with_context(|| format!("Cannot use --config {}", path.display()))
        })
        .transpose()?;

    Ok(DeployOptions {
        dry_run: cli.dry_run,
        target_root: cli.target.clone(),
        overrides: cli.overrides(),
        preset,
        ..DeployOptions::default()
    })
}
