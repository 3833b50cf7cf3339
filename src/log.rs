//! Logging setup.
//!
//! Log levels:
//! - ERROR: failures that stop the coordinator from doing its job
//! - WARN: rejected operations, listener failures, timeouts, stale peers
//! - INFO: lifecycle (start/stop, submissions, terminal task outcomes)
//! - DEBUG: per-tick detail (assignments, skipped tasks)
//! - TRACE: very detailed traces
//!
//! Debug mode can be enabled with the `--debug` flag or `TASKMESH_DEBUG=1`.
//! `RUST_LOG` overrides both when set.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const DEBUG_ENV: &str = "TASKMESH_DEBUG";

/// Initialize logging at INFO level.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Logs go to `~/.taskmesh/taskmesh.log` (truncated on startup) when a home
/// directory is available, to stderr otherwise. Calling this more than once
/// is harmless; only the first subscriber is installed.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || env_debug();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match log_file() {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(debug = debug_enabled, "logging initialized");
    }
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "taskmesh=debug"
    } else {
        "taskmesh=info"
    }
}

/// Path of the log file, if a home directory exists.
pub fn log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".taskmesh").join("taskmesh.log"))
}

fn log_file() -> Option<File> {
    let path = log_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok()?;
    }
    File::create(path).ok()
}
