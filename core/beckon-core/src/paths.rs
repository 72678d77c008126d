//! Filesystem layout under `~/.beckon`.
//!
//! Everything the daemon, the hook, and any CLI invocation share lives in one
//! directory so a user can reset the whole installation by deleting it.

use std::path::{Path, PathBuf};

use crate::error::{BeckonError, Result};

pub const STATE_FILE_NAME: &str = "sessions.json";
pub const SOCKET_NAME: &str = "daemon.sock";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LOG_DIR_NAME: &str = "logs";

/// Overrides the daemon socket location, mainly for tests.
pub const SOCKET_ENV_VAR: &str = "BECKON_SOCKET";

pub fn beckon_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".beckon"))
        .ok_or(BeckonError::HomeDirNotFound)
}

pub fn state_file_path() -> Result<PathBuf> {
    beckon_dir().map(|dir| dir.join(STATE_FILE_NAME))
}

pub fn socket_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(SOCKET_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    beckon_dir().map(|dir| dir.join(SOCKET_NAME))
}

pub fn config_file_path() -> Result<PathBuf> {
    beckon_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

pub fn log_dir() -> Result<PathBuf> {
    beckon_dir().map(|dir| dir.join(LOG_DIR_NAME))
}

/// Sidecar advisory-lock path for a state file. Kept separate from the state
/// file itself so the atomic rename of a save never replaces the locked fd.
pub fn lock_path_for(state_path: &Path) -> PathBuf {
    let mut raw = state_path.as_os_str().to_os_string();
    raw.push(".lock");
    PathBuf::from(raw)
}
