//! Configuration loading and saving.
//!
//! `~/.beckon/config.json`, read once at daemon startup. Missing or corrupt
//! files fall back to defaults so a bad edit never blocks the daemon.

use fs_err as fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeckonConfig {
    /// Automatically focus the window of a session that starts waiting.
    pub autofocus_enabled: bool,
    /// Per-session quiet period after any autofocus attempt.
    pub autofocus_cooldown_secs: u64,
    /// Interval between codex reconciliation passes.
    pub codex_poll_interval_ms: u64,
    /// Overrides the daemon socket path; `None` uses `~/.beckon/daemon.sock`.
    pub socket_path: Option<String>,
}

impl Default for BeckonConfig {
    fn default() -> Self {
        BeckonConfig {
            autofocus_enabled: true,
            autofocus_cooldown_secs: 30,
            codex_poll_interval_ms: 2000,
            socket_path: None,
        }
    }
}

/// Loads the configuration, returning defaults if the file doesn't exist.
pub fn load_config() -> BeckonConfig {
    paths::config_file_path()
        .ok()
        .map(|path| load_config_from(&path))
        .unwrap_or_default()
}

/// Loads configuration from an explicit path; defaults on any failure.
pub fn load_config_from(path: &Path) -> BeckonConfig {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

/// Saves the configuration to disk.
pub fn save_config(config: &BeckonConfig) -> Result<(), String> {
    let path = paths::config_file_path().map_err(|err| err.to_string())?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create config directory: {}", err))?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|err| format!("Failed to serialize config: {}", err))?;
    fs::write(&path, content).map_err(|err| format!("Failed to write config: {}", err))
}
