//! Logging setup
//!
//! Filter configuration comes from `RUST_LOG`, falling back to the level in
//! `LoggingConfig`. Human-readable logs go to stderr; with a log file set,
//! JSON records are appended to it as well.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::core::{RuntimeError, RuntimeResult};

/// Where and how much to log
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `shadow_session_runtime=debug`
    pub default_filter: String,
    /// Write human-readable logs to stderr
    pub stderr: bool,
    /// Append JSON logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            stderr: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Set the fallback filter
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    /// Enable or disable the stderr layer
    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.stderr = enabled;
        self
    }

    /// Also write JSON logs to `path`
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped; hold it for the
/// life of the program. Fails if a global subscriber is already set.
pub fn init_logging(config: LoggingConfig) -> RuntimeResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| RuntimeError::invalid_config(format!("invalid log filter: {}", e)))?;

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
    });

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let file_name = path
                .file_name()
                .ok_or_else(|| RuntimeError::invalid_config("log file path has no file name"))?;
            std::fs::create_dir_all(&dir)?;

            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| RuntimeError::other(format!("failed to install subscriber: {}", e)))?;

    tracing::debug!(file = ?config.file, "Logging initialized");
    Ok(guard)
}
