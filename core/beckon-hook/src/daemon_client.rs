//! Client for the beckon daemon socket.
//!
//! Requests are newline-framed JSON over the Unix socket, sent with one
//! retry. The retry reuses the same request id so the daemon sees a resend,
//! not a second event.

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use serde_json::{json, Value};

use beckon_core::{load_config, paths};
use beckon_protocol::{
    CcsbEnvelope, CodexNotifyEnvelope, HookEnvelope, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

const ENABLE_ENV: &str = "BECKON_DAEMON_ENABLED";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

pub fn send_hook_event(envelope: &HookEnvelope) -> Result<(), String> {
    let params = serde_json::to_value(envelope)
        .map_err(|e| format!("Failed to serialize hook event: {}", e))?;
    send_event(Method::HookEvent, params, "hook event").map(|_| ())
}

pub fn send_ccsb_event(envelope: &CcsbEnvelope) -> Result<(), String> {
    let params = serde_json::to_value(envelope)
        .map_err(|e| format!("Failed to serialize ccsb event: {}", e))?;
    send_event(Method::CcsbEvent, params, "ccsb event").map(|_| ())
}

pub fn send_codex_notify(envelope: &CodexNotifyEnvelope) -> Result<(), String> {
    let params = serde_json::to_value(envelope)
        .map_err(|e| format!("Failed to serialize codex notification: {}", e))?;
    send_event(Method::CodexNotify, params, "codex notification").map(|_| ())
}

pub fn list_sessions(filtered: bool) -> Result<Value, String> {
    send_query(
        Method::ListSessions,
        json!({ "filtered": filtered }),
        "session list",
    )
}

/// A numeric target means the display index shown by `list`; anything else
/// is matched against session ids and identity keys.
pub fn focus(target: &str) -> Result<Value, String> {
    let params = match target.parse::<u64>() {
        Ok(index) => json!({ "index": index }),
        Err(_) => json!({ "target": target }),
    };
    send_query(Method::Focus, params, "focus request")
}

pub fn acknowledge(target: &str, clear: bool) -> Result<Value, String> {
    let method = if clear {
        Method::ClearAcknowledge
    } else {
        Method::Acknowledge
    };
    send_query(method, json!({ "target": target }), "acknowledge request")
}

pub fn daemon_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => true,
    }
}

/// Environment override first, then the config file, then the default under
/// `~/.beckon`. Must resolve to the same path the daemon binds.
fn socket_path() -> Result<PathBuf, String> {
    if let Ok(value) = env::var(paths::SOCKET_ENV_VAR) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    let config = load_config();
    if let Some(path) = config.socket_path.as_deref() {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    paths::socket_path().map_err(|e| e.to_string())
}

fn send_event(method: Method, params: Value, label: &str) -> Result<Response, String> {
    if !daemon_enabled() {
        return Err("Daemon disabled".to_string());
    }

    let request_id = make_request_id();
    send_with_retry(
        || Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some(request_id.clone()),
            params: Some(params.clone()),
        },
        label,
    )
}

fn send_query(method: Method, params: Value, label: &str) -> Result<Value, String> {
    let response = send_event(method, params, label)?;
    Ok(response.data.unwrap_or(Value::Null))
}

fn send_with_retry<F>(mut build: F, label: &str) -> Result<Response, String>
where
    F: FnMut() -> Request,
{
    match send_checked(build()) {
        Ok(response) => Ok(response),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send {} to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_checked(build()).map_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    "Retry failed sending {} to daemon",
                    label
                );
                retry_err
            })
        }
    }
}

fn send_checked(request: Request) -> Result<Response, String> {
    let response = send_request(request)?;
    if response.ok {
        Ok(response)
    } else {
        let message = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string());
        Err(message)
    }
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    let rand = random.next_u64();
    format!(
        "req-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        rand
    )
}
