//! File logging for hook invocations.
//!
//! Hook processes run inside someone else's terminal, so output goes to
//! daily-rolling files under `~/.beckon/logs/` instead of stderr. Logging is
//! strictly optional: if the log directory cannot be created, events are
//! still handled, just silently.

use beckon_core::paths;
use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "beckon-hook.log";

/// Installs the file subscriber and returns the flush guard. The guard must
/// stay alive for the whole process or buffered lines are lost on exit.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = paths::log_dir().ok()?;
    fs::create_dir_all(&log_dir).ok()?;

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let debug_enabled = std::env::var("BECKON_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}
