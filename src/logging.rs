//! Logging setup.
//!
//! Three sinks share one line format, `[timestamp] [SEVERITY] message`:
//!
//! - console: INFO (DEBUG with `-v`, `RUST_LOG` overrides), coloured only on
//!   a terminal
//! - general log file: everything from DEBUG up
//! - errors log file: ERROR only
//!
//! SUCCESS is not a tracing level. It is an INFO event on [`SUCCESS_TARGET`],
//! emitted with the [`success!`](crate::success) macro.

use chrono::Local;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use strum::{Display, EnumString};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Default log directory on the live system.
pub const DEFAULT_LOG_DIR: &str = "/var/log/arch-secure-deploy";

/// Target that marks an INFO event as SUCCESS.
pub const SUCCESS_TARGET: &str = "arch_secure_deploy::success";

/// Log a SUCCESS record.
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => {
        ::tracing::info!(target: $crate::logging::SUCCESS_TARGET, $($arg)+)
    };
}

/// Severity as printed in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Debug,
    Error,
    Success,
}

impl Severity {
    pub fn of(level: &Level, target: &str) -> Self {
        match *level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warn,
            Level::INFO if target == SUCCESS_TARGET => Self::Success,
            Level::INFO => Self::Info,
            _ => Self::Debug,
        }
    }

    fn ansi_color(self) -> &'static str {
        match self {
            Self::Info => "\x1b[34m",
            Self::Warn => "\x1b[33m",
            Self::Debug => "\x1b[36m",
            Self::Error => "\x1b[31m",
            Self::Success => "\x1b[32m",
        }
    }
}

/// Render a record the way every sink prints it.
pub fn format_line(timestamp: &str, severity: Severity, message: &str) -> String {
    format!("[{}] [{}] {}", timestamp, severity, message)
}

/// `[timestamp] [SEVERITY] message` event formatter.
#[derive(Debug, Clone, Copy)]
pub struct DeployFormatter {
    ansi: bool,
}

impl DeployFormatter {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }
}

impl<S, N> FormatEvent<S, N> for DeployFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let severity = Severity::of(meta.level(), meta.target());
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut message = String::new();
        ctx.field_format()
            .format_fields(Writer::new(&mut message), event)?;
        if self.ansi {
            writeln!(
                writer,
                "[{}] {}[{}]\x1b[0m {}",
                timestamp,
                severity.ansi_color(),
                severity,
                message
            )
        } else {
            writeln!(writer, "{}", format_line(&timestamp, severity, &message))
        }
    }
}

/// Where this run's log files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub general: PathBuf,
    pub errors: PathBuf,
}

impl LogPaths {
    /// `deploy-<stamp>.log` and `deploy-<stamp>-errors.log` under `dir`.
    pub fn for_stamp(dir: &Path, stamp: &str) -> Self {
        Self {
            general: dir.join(format!("deploy-{}.log", stamp)),
            errors: dir.join(format!("deploy-{}-errors.log", stamp)),
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Create the log directory (falling back to the temp directory) and open
/// both log files for appending.
///
/// Returns the paths, the two files, and the fallback reason if the
/// requested directory could not be used.
pub fn open_log_files(
    dir: &Path,
    stamp: &str,
) -> std::io::Result<(LogPaths, File, File, Option<String>)> {
    let attempt = |dir: &Path| -> std::io::Result<(LogPaths, File, File)> {
        fs::create_dir_all(dir)?;
        let paths = LogPaths::for_stamp(dir, stamp);
        let general = open_append(&paths.general)?;
        let errors = open_append(&paths.errors)?;
        Ok((paths, general, errors))
    };

    match attempt(dir) {
        Ok((paths, general, errors)) => Ok((paths, general, errors, None)),
        Err(e) => {
            let fallback = std::env::temp_dir().join("arch-secure-deploy");
            let (paths, general, errors) = attempt(&fallback)?;
            let reason = format!(
                "Cannot write logs to {} ({}), using {}",
                dir.display(),
                e,
                fallback.display()
            );
            Ok((paths, general, errors, Some(reason)))
        }
    }
}

/// Console, general-log and errors-log layers on one registry.
///
/// The general log takes DEBUG and up, the errors log ERROR only.
pub fn subscriber<W>(
    console: W,
    console_filter: EnvFilter,
    ansi: bool,
    general: File,
    errors: File,
) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let console = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .event_format(DeployFormatter::new(ansi))
        .with_writer(console)
        .with_filter(console_filter);
    let general_file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(DeployFormatter::new(false))
        .with_writer(Mutex::new(general))
        .with_filter(LevelFilter::DEBUG);
    let errors_file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(DeployFormatter::new(false))
        .with_writer(Mutex::new(errors))
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(console)
        .with(general_file)
        .with(errors_file)
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(dir: &Path, verbose: bool) -> std::io::Result<LogPaths> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let (paths, general, errors, fallback) = open_log_files(dir, &stamp)?;

    let ansi = std::io::stdout().is_terminal();
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(if verbose { "debug" } else { "info" }))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing::subscriber::set_global_default(subscriber(
        std::io::stdout,
        console_filter,
        ansi,
        general,
        errors,
    ))
    .map_err(|e| std::io::Error::other(e.to_string()))?;

    if let Some(reason) = fallback {
        tracing::warn!("{}", reason);
    }
    tracing::debug!("Logging to {}", paths.general.display());
    Ok(paths)
}
