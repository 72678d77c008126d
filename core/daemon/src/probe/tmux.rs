//! Thin tmux subprocess adapter.
//!
//! Queries treat every failure mode (tmux missing, server down, bad socket)
//! as "no information" and collapse to empty output. Side-effecting commands
//! surface their failures so the dispatcher can report partial outcomes.

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use walkdir::WalkDir;

pub const PANE_FORMAT: &str =
    "#{pane_tty}\t#{session_name}\t#{window_index}\t#{pane_index}\t#{window_name}\t#{pane_id}";
pub const CLIENT_FORMAT: &str = "#{client_pid}\t#{client_tty}\t#{session_name}";
pub const SESSION_FORMAT: &str = "#{session_name}\t#{session_attached}";

pub trait TmuxAdapter: Send + Sync {
    /// Read-only query; any failure yields empty output.
    fn query(&self, socket: Option<&Path>, args: &[&str]) -> String;
    /// Side-effecting command.
    fn command(&self, socket: Option<&Path>, args: &[&str]) -> Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct CommandTmuxAdapter;

impl TmuxAdapter for CommandTmuxAdapter {
    fn query(&self, socket: Option<&Path>, args: &[&str]) -> String {
        let mut command = Command::new("tmux");
        if let Some(socket) = socket {
            command.arg("-S").arg(socket);
        }
        match command.args(args).output() {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).to_string()
            }
            Ok(_) => String::new(),
            Err(_) => String::new(),
        }
    }

    fn command(&self, socket: Option<&Path>, args: &[&str]) -> Result<(), String> {
        let mut command = Command::new("tmux");
        if let Some(socket) = socket {
            command.arg("-S").arg(socket);
        }
        let output = command
            .args(args)
            .output()
            .map_err(|err| format!("failed to spawn tmux: {}", err))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr.trim()
            ))
        }
    }
}

/// One pane row from `list-panes -a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub tty: String,
    pub session_name: String,
    pub window_index: u32,
    pub pane_index: u32,
    pub window_name: String,
    pub pane_id: String,
    /// Socket the hosting server answers on; `None` for the default server.
    pub socket: Option<PathBuf>,
}

impl PaneInfo {
    /// Target usable with `-t` for window-level commands.
    pub fn window_target(&self) -> String {
        format!("{}:{}", self.session_name, self.window_index)
    }
}

/// One client row from `list-clients`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub pid: u32,
    pub tty: String,
    pub session_name: String,
    pub socket: Option<PathBuf>,
}

pub fn parse_panes(output: &str, socket: Option<&Path>) -> Vec<PaneInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let tty = parts.next()?.trim();
            let session_name = parts.next()?.trim();
            let window_index = parts.next()?.trim().parse::<u32>().ok()?;
            let pane_index = parts.next()?.trim().parse::<u32>().ok()?;
            let window_name = parts.next()?.trim();
            let pane_id = parts.next()?.trim();
            if tty.is_empty() || session_name.is_empty() || pane_id.is_empty() {
                return None;
            }
            Some(PaneInfo {
                tty: tty.to_string(),
                session_name: session_name.to_string(),
                window_index,
                pane_index,
                window_name: window_name.to_string(),
                pane_id: pane_id.to_string(),
                socket: socket.map(Path::to_path_buf),
            })
        })
        .collect()
}

pub fn parse_clients(output: &str, socket: Option<&Path>) -> Vec<ClientInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let pid = parts.next()?.trim().parse::<u32>().ok()?;
            let tty = parts.next()?.trim();
            let session_name = parts.next()?.trim();
            if tty.is_empty() || session_name.is_empty() {
                return None;
            }
            Some(ClientInfo {
                pid,
                tty: tty.to_string(),
                session_name: session_name.to_string(),
                socket: socket.map(Path::to_path_buf),
            })
        })
        .collect()
}

/// Maps session name to whether any client is attached to it.
pub fn parse_attach_states(output: &str) -> Vec<(String, bool)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let session_name = parts.next()?.trim();
            let attached = parts.next()?.trim().parse::<u32>().ok()?;
            if session_name.is_empty() {
                return None;
            }
            Some((session_name.to_string(), attached > 0))
        })
        .collect()
}

/// Finds extra tmux server sockets beyond the default one.
///
/// tmux keeps per-user sockets under `$TMUX_TMPDIR` (or `/tmp`) in a
/// `tmux-<uid>` directory. The default socket (`default`) is reachable
/// without `-S`, so it is excluded here.
pub fn discover_sockets() -> Vec<PathBuf> {
    let base = std::env::var_os("TMUX_TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    let uid = unsafe { libc::getuid() };
    discover_sockets_in(&base, uid)
}

pub fn discover_sockets_in(base: &Path, uid: u32) -> Vec<PathBuf> {
    let socket_dir = base.join(format!("tmux-{}", uid));
    let mut sockets = Vec::new();
    for entry in WalkDir::new(&socket_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .flatten()
    {
        let is_socket = entry
            .metadata()
            .map(|meta| meta.file_type().is_socket())
            .unwrap_or(false);
        if !is_socket {
            continue;
        }
        if entry.file_name() == "default" {
            continue;
        }
        sockets.push(entry.path().to_path_buf());
    }
    sockets.sort();
    if !sockets.is_empty() {
        debug!(count = sockets.len(), "Discovered non-default tmux sockets");
    }
    sockets
}
