//! Event intake for the hook binary's three wire shapes.
//!
//! `handle` reads the raw Claude Code hook payload from stdin, keeps the
//! fields Beckon cares about, and enriches them with what only this process
//! can see: the hosting TERM_PROGRAM, the controlling tty, and the parent
//! pid. `ccsb` forwards sidecar events unchanged. Both write the session
//! store directly when the daemon is unreachable. `codex-notify` has no
//! fallback; waiting classification needs the daemon's pane probe.

use std::env;
use std::io::{self, Read};
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;

use beckon_core::paths;
use beckon_core::session::{SessionHints, SessionStore};
use beckon_protocol::{
    decode_ccsb, decode_hook, parse_ccsb_event, parse_codex_notify, HookEnvelope, HookEventName,
    SessionEvent,
};

/// Raw stdin payload from the hosting agent. Tolerant on purpose: the agent
/// adds fields across releases and the hook must not start rejecting them.
#[derive(Debug, Deserialize)]
struct HookStdin {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    hook_event_name: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    notification_type: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
}

/// What only the hook process itself can observe.
struct Enrichment {
    term_program: Option<String>,
    tty: Option<String>,
    hook_pid: Option<u32>,
}

impl Enrichment {
    fn detect() -> Self {
        Self {
            term_program: env::var("TERM_PROGRAM").ok().filter(|v| !v.is_empty()),
            tty: detect_tty(),
            hook_pid: get_ppid(),
        }
    }
}

pub fn run_hook() -> Result<(), String> {
    let input = read_stdin()?;
    if input.trim().is_empty() {
        return Ok(());
    }

    let payload: HookStdin =
        serde_json::from_str(&input).map_err(|e| format!("Failed to parse hook input: {}", e))?;

    let envelope = match build_envelope(payload, Enrichment::detect()) {
        Some(envelope) => envelope,
        None => return Ok(()),
    };

    if let Err(err) = envelope.validate() {
        tracing::debug!(
            event = ?envelope.hook_event_name,
            code = %err.code,
            "Skipping invalid hook event"
        );
        return Ok(());
    }

    match crate::daemon_client::send_hook_event(&envelope) {
        Ok(()) => {
            tracing::debug!(
                event = ?envelope.hook_event_name,
                session = %envelope.session_id,
                "Daemon accepted event"
            );
            Ok(())
        }
        Err(send_err) => {
            tracing::warn!(error = %send_err, "Daemon unreachable, writing store directly");
            ingest_directly(&decode_hook(&envelope))
        }
    }
}

pub fn run_ccsb() -> Result<(), String> {
    let input = read_stdin()?;
    if input.trim().is_empty() {
        return Ok(());
    }

    let raw: serde_json::Value =
        serde_json::from_str(&input).map_err(|e| format!("Failed to parse ccsb input: {}", e))?;
    let envelope = parse_ccsb_event(raw).map_err(|err| format!("{}: {}", err.code, err.message))?;

    match crate::daemon_client::send_ccsb_event(&envelope) {
        Ok(()) => Ok(()),
        Err(send_err) => {
            tracing::warn!(error = %send_err, "Daemon unreachable, writing store directly");
            ingest_directly(&decode_ccsb(&envelope))
        }
    }
}

pub fn run_codex_notify(payload: Option<&str>) -> Result<(), String> {
    let input = match payload {
        Some(arg) => arg.to_string(),
        None => read_stdin()?,
    };
    if input.trim().is_empty() {
        return Ok(());
    }

    let raw: serde_json::Value = serde_json::from_str(&input)
        .map_err(|e| format!("Failed to parse codex notification: {}", e))?;
    let envelope = match parse_codex_notify(raw) {
        Ok(envelope) => envelope,
        // Codex routes every notification type through the same hook; only
        // turn completions concern us.
        Err(err) if err.code == "unsupported_notify" => {
            tracing::debug!("Ignoring codex notification type");
            return Ok(());
        }
        Err(err) => return Err(format!("{}: {}", err.code, err.message)),
    };

    crate::daemon_client::send_codex_notify(&envelope)
}

fn read_stdin() -> Result<String, String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;
    Ok(input)
}

fn build_envelope(payload: HookStdin, enrichment: Enrichment) -> Option<HookEnvelope> {
    let session_id = match payload.session_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            tracing::debug!(
                event = ?payload.hook_event_name,
                "Skipping event (missing session_id)"
            );
            return None;
        }
    };

    let name = payload.hook_event_name.unwrap_or_default();
    let hook_event_name = parse_event_name(&name);
    if hook_event_name == HookEventName::Unknown {
        tracing::debug!(event_name = %name, "Unhandled event");
        return None;
    }

    Some(HookEnvelope {
        session_id,
        hook_event_name,
        cwd: payload.cwd,
        tty: enrichment.tty,
        notification_type: payload.notification_type,
        tool_name: payload.tool_name,
        term_program: enrichment.term_program,
        hook_pid: enrichment.hook_pid,
    })
}

fn parse_event_name(name: &str) -> HookEventName {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .unwrap_or(HookEventName::Unknown)
}

/// Direct store write for when the daemon is unreachable. This is the second
/// writer the store's advisory lock exists for. Probe-derived hints are not
/// available here, so the session carries only what the event itself knows.
fn ingest_directly(event: &SessionEvent) -> Result<(), String> {
    let state_path = paths::state_file_path().map_err(|e| e.to_string())?;
    ingest_directly_at(&state_path, event)
}

fn ingest_directly_at(state_path: &Path, event: &SessionEvent) -> Result<(), String> {
    let mut store = SessionStore::load(state_path);
    store.ingest(event, &SessionHints::default(), Utc::now());
    Ok(())
}

/// The controlling terminal's device path, from whichever standard fd is
/// still a tty. Stdin usually carries the piped payload, so the output fds
/// are checked as well.
fn detect_tty() -> Option<String> {
    #[cfg(unix)]
    {
        [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO]
            .into_iter()
            .find_map(tty_for_fd)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(unix)]
fn tty_for_fd(fd: libc::c_int) -> Option<String> {
    // SAFETY: isatty and ttyname only inspect the descriptor. ttyname returns
    // a pointer into static storage; the bytes are copied out immediately.
    #[allow(unsafe_code)]
    unsafe {
        if libc::isatty(fd) != 1 {
            return None;
        }
        let name = libc::ttyname(fd);
        if name.is_null() {
            return None;
        }
        Some(std::ffi::CStr::from_ptr(name).to_string_lossy().into_owned())
    }
}

fn get_ppid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() is a simple syscall that returns the parent process ID.
        // It has no failure modes and always returns a valid PID (1 if parent exited).
        #[allow(unsafe_code)]
        Some(unsafe { libc::getppid() } as u32)
    }
    #[cfg(not(unix))]
    {
        None
    }
}
