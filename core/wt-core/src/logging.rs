//! Tracing setup shared by the binaries.
//!
//! `WT_DEBUG_LOG=1` forces debug level; otherwise `WT_LOG` is read as an
//! `EnvFilter` directive. File logs default to `info`, stderr to `warn` so
//! interactive output stays clean.

use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::config;

pub const LOG_ENV: &str = "WT_LOG";
pub const DEBUG_LOG_ENV: &str = "WT_DEBUG_LOG";

fn filter(default_level: &str) -> EnvFilter {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
    }
}

/// Appends to `<data_dir>/logs/<file_name>`. Returns `None` (and installs
/// nothing) when the log file cannot be opened; callers carry on without
/// diagnostics.
///
/// Keep the guard alive for the life of the process or buffered lines are
/// lost.
pub fn init_file(file_name: &str) -> Option<WorkerGuard> {
    let dir = config::log_dir().ok()?;
    fs_err::create_dir_all(&dir).ok()?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(&dir)
        .ok()?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter("info"))
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}

/// Logs to stderr, for interactive commands.
pub fn init_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("warn"))
        .with_writer(std::io::stderr)
        .try_init();
}
