//! Structured logging using tracing.
//!
//! Two outputs:
//! - Console, human-readable, filtered by `RUST_LOG` when set
//! - The configured log file, JSON, never rotated

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Used when the configured log path has no file name.
const DEFAULT_LOG_FILE_NAME: &str = "downloader.log";

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log file written alongside the console.
    pub log_file: PathBuf,
    /// Maximum log level for console output.
    pub console_level: Level,
    /// Maximum log level for file output.
    pub file_level: Level,
    /// Whether to include ANSI color codes in console output.
    pub console_ansi: bool,
}

impl LoggingConfig {
    /// Info on the console, debug in the file.
    pub fn new(log_file: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            console_ansi: true,
        }
    }

    /// Raise the console to debug when `verbose` is set.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.console_level = Level::DEBUG;
        }
        self
    }

    /// Directory holding the log file.
    pub fn log_directory(&self) -> PathBuf {
        match self.log_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// File name of the log file.
    pub fn log_file_name(&self) -> String {
        self.log_file
            .file_name()
            .map_or_else(|| DEFAULT_LOG_FILE_NAME.to_string(), |name| {
                name.to_string_lossy().into_owned()
            })
    }
}

/// Guard that keeps file logging active. Drop this to flush and close the log file.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize logging.
///
/// Returns a guard that must be kept alive for the duration of the program.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let directory = config.log_directory();
    ensure_directory(&directory)?;

    let file_appender = tracing_appender::rolling::never(&directory, config.log_file_name());
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins for the console; otherwise only our crates log below warn.
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(crate_directives(config.console_level)));
    let file_filter = EnvFilter::new(crate_directives(config.file_level));

    let console_layer = fmt::layer()
        .with_ansi(config.console_ansi)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn ensure_directory(path: &Path) -> Result<(), LoggingError> {
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Filter directives: dependencies at warn, our crates at `level`.
fn crate_directives(level: Level) -> String {
    let level = level_to_directive(level);
    format!("warn,watchlater={level},watchlater_core={level}")
}

/// Convert a tracing Level to a filter directive string.
const fn level_to_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// The path that could not be created.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// A global subscriber was already set.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
