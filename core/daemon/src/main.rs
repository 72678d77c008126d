//! Beckon daemon entrypoint.
//!
//! A small, single-writer service: it owns the session registry, infers
//! codex session state from the process table, and dispatches focus.
//! Clients talk to it over a newline-framed JSON Unix socket.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beckon_core::config::{load_config, BeckonConfig};
use beckon_core::paths;
use beckon_core::session::SessionStore;
use beckon_protocol::{
    decode_codex_notify, parse_ccsb_event, parse_codex_notify, parse_hook_event, ErrorInfo,
    Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde_json::Value;

mod autofocus;
mod backends;
mod codex;
mod dispatch;
mod probe;
mod resolver;
mod state;

use state::SharedState;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const AUTOFOCUS_TICK_MS: u64 = 100;

fn main() {
    init_logging();

    let config = load_config();

    let socket_path = match daemon_socket_path(&config) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let state_path = match paths::state_file_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve session store path");
            std::process::exit(1);
        }
    };

    let store = SessionStore::load(&state_path);
    let shared_state = Arc::new(SharedState::new(store, &config));

    info!(
        path = %socket_path.display(),
        autofocus_enabled = config.autofocus_enabled,
        codex_poll_interval_ms = config.codex_poll_interval_ms,
        "Beckon daemon started"
    );

    spawn_codex_reconciler(Arc::clone(&shared_state), config.codex_poll_interval_ms);
    spawn_autofocus_ticker(Arc::clone(&shared_state));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_codex_reconciler(state: Arc<SharedState>, interval_ms: u64) {
    // Floor keeps a bad config value from turning the poll into a busy loop.
    let interval = Duration::from_millis(interval_ms.max(250));
    thread::spawn(move || loop {
        thread::sleep(interval);
        state.reconcile_codex();
    });
}

fn spawn_autofocus_ticker(state: Arc<SharedState>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(AUTOFOCUS_TICK_MS));
        state.autofocus_tick();
    });
}

fn init_logging() {
    let debug_enabled = env::var("BECKON_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Environment override first, then the config file, then the default
/// under `~/.beckon`.
fn daemon_socket_path(config: &BeckonConfig) -> Result<PathBuf, String> {
    if let Ok(value) = env::var(paths::SOCKET_ENV_VAR) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    if let Some(path) = config.socket_path.as_deref() {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    paths::socket_path().map_err(|err| err.to_string())
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: Arc<SharedState>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "session_count": state.session_count(),
            }),
        ),
        Method::HookEvent => handle_hook_event(request, state),
        Method::CcsbEvent => handle_ccsb_event(request, state),
        Method::CodexNotify => handle_codex_notify(request, state),
        Method::ListSessions => {
            let filtered = request
                .params
                .as_ref()
                .and_then(|params| params.get("filtered"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let sessions = state.list_sessions(filtered);
            let count = sessions.len();
            match serde_json::to_value(&sessions) {
                Ok(value) => {
                    tracing::debug!(sessions = count, filtered, "Sessions snapshot");
                    Response::ok(request.id, value)
                }
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize sessions: {}", err),
                ),
            }
        }
        Method::Focus => handle_focus(request, state),
        Method::Acknowledge => handle_acknowledge(request, state, true),
        Method::ClearAcknowledge => handle_acknowledge(request, state, false),
        Method::ClearSessions => {
            let cleared = state.clear_sessions();
            info!(cleared, "Sessions cleared");
            Response::ok(request.id, serde_json::json!({ "cleared": cleared }))
        }
    }
}

fn handle_hook_event(request: Request, state: Arc<SharedState>) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };
    let envelope = match parse_hook_event(params) {
        Ok(envelope) => envelope,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    info!(
        event = ?envelope.hook_event_name,
        session_id = %envelope.session_id,
        cwd = ?envelope.cwd,
        tty = ?envelope.tty,
        term_program = ?envelope.term_program,
        hook_pid = ?envelope.hook_pid,
        "Hook event received"
    );

    let session = state.ingest_hook(&envelope);
    match serde_json::to_value(&session) {
        Ok(value) => Response::ok(
            request.id,
            serde_json::json!({ "accepted": true, "session": value }),
        ),
        Err(err) => Response::error(
            request.id,
            "serialization_error",
            format!("Failed to serialize session: {}", err),
        ),
    }
}

fn handle_ccsb_event(request: Request, state: Arc<SharedState>) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };
    let envelope = match parse_ccsb_event(params) {
        Ok(envelope) => envelope,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    info!(
        event = ?envelope.event,
        session_id = %envelope.session_id,
        tool = %envelope.tool.name,
        cwd = ?envelope.cwd,
        "Sidecar event received"
    );

    let session = state.ingest_ccsb(&envelope);
    match serde_json::to_value(&session) {
        Ok(value) => Response::ok(
            request.id,
            serde_json::json!({ "accepted": true, "session": value }),
        ),
        Err(err) => Response::error(
            request.id,
            "serialization_error",
            format!("Failed to serialize session: {}", err),
        ),
    }
}

fn handle_codex_notify(request: Request, state: Arc<SharedState>) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "notify payload is required"),
    };
    let envelope = match parse_codex_notify(params) {
        Ok(envelope) => envelope,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    let event = decode_codex_notify(&envelope);
    let key = state.codex_notify(&event);
    info!(cwd = %event.cwd, key = %key, "Codex notify received");
    Response::ok(
        request.id,
        serde_json::json!({ "accepted": true, "session_id": key }),
    )
}

fn handle_focus(request: Request, state: Arc<SharedState>) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => {
            return Response::error(request.id, "invalid_params", "target or index is required")
        }
    };

    let result = if let Some(target) = params.get("target").and_then(Value::as_str) {
        state.focus_target(target)
    } else if let Some(index) = params.get("index").and_then(Value::as_u64) {
        state.focus_index(index as usize)
    } else {
        return Response::error(request.id, "invalid_params", "target or index is required");
    };

    info!(result = ?result, "Focus request handled");
    match serde_json::to_value(&result) {
        Ok(value) => Response::ok(request.id, value),
        Err(err) => Response::error(
            request.id,
            "serialization_error",
            format!("Failed to serialize focus result: {}", err),
        ),
    }
}

fn handle_acknowledge(request: Request, state: Arc<SharedState>, acknowledged: bool) -> Response {
    let target = match request
        .params
        .as_ref()
        .and_then(|params| params.get("target"))
        .and_then(Value::as_str)
    {
        Some(target) if !target.trim().is_empty() => target.to_string(),
        _ => return Response::error(request.id, "invalid_params", "target is required"),
    };

    let updated = if acknowledged {
        state.acknowledge(&target)
    } else {
        state.clear_acknowledge(&target)
    };
    tracing::debug!(target = %target, acknowledged, updated, "Acknowledge request");
    Response::ok(request.id, serde_json::json!({ "updated": updated }))
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
