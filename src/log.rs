//! Diagnostic logging for mimi.
//!
//! Log levels:
//! - ERROR: Critical failures that prevent a run from completing
//! - WARN: Unexpected conditions that are recoverable (task failures, recoveries)
//! - INFO: Run, wave and task lifecycle
//! - DEBUG: Detailed traces (config loading, backend requests)
//! - TRACE: Very detailed traces
//!
//! Debug mode can be enabled with the `--debug` flag or `MIMI_DEBUG=1`.
//! `RUST_LOG` overrides the level entirely.
//!
//! Execution log entries (see [`crate::orchestration::journal`]) are a
//! separate product stream; they are mirrored here as tracing events.

use std::path::PathBuf;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Whether debug mode was requested through the environment.
pub fn debug_from_env() -> bool {
    std::env::var("MIMI_DEBUG")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Path of the log file, `~/.mimi/mimi.log`.
pub fn log_path() -> Option<PathBuf> {
    Config::mimi_dir().ok().map(|dir| dir.join("mimi.log"))
}

/// Initialize logging to `~/.mimi/mimi.log`, truncated on startup.
///
/// Falls back to stderr when the home directory is unavailable. Calling
/// this more than once is harmless.
pub fn init_with_debug(debug: bool) {
    let debug = debug || debug_from_env();

    let Some(path) = log_path() else {
        init_stderr(debug);
        return;
    };
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        init_stderr(debug);
        return;
    };
    if std::fs::create_dir_all(dir).is_err() || std::fs::write(&path, "").is_err() {
        init_stderr(debug);
        return;
    }

    let appender = tracing_appender::rolling::never(dir, file_name);
    let _ = tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_writer(appender).with_ansi(false))
        .try_init();
}

/// Initialize compact logging to stderr.
pub fn init_stderr(debug: bool) {
    let _ = tracing_subscriber::registry()
        .with(filter(debug || debug_from_env()))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
