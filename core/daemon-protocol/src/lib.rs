//! IPC protocol types and validation for beckon-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod events;

pub use events::{
    classify_notification, decode_ccsb, decode_codex_notify, decode_hook, parse_ccsb_event,
    parse_codex_notify, parse_hook_event, Attention, AttentionLevel, CcsbEnvelope, CcsbEventType,
    CodexNotifyEnvelope, CodexTurnComplete, EventKind, HookEnvelope, HookEventName, SessionEvent,
    ToolIdentity, CCSB_PROTO,
};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    HookEvent,
    CcsbEvent,
    CodexNotify,
    ListSessions,
    Focus,
    Acknowledge,
    ClearAcknowledge,
    ClearSessions,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_snake_case() {
        let json = serde_json::to_string(&Method::ClearAcknowledge).expect("serialize");
        assert_eq!(json, "\"clear_acknowledge\"");
        let back: Method = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, Method::ClearAcknowledge);
    }

    #[test]
    fn response_ok_omits_error_field() {
        let response = Response::ok(Some("r1".to_string()), serde_json::json!({"n": 1}));
        let json = serde_json::to_string(&response).expect("serialize");
        assert!(!json.contains("error"));
        assert!(json.contains("\"ok\":true"));
    }

    #[test]
    fn request_rejects_unknown_fields() {
        let raw = r#"{"protocol_version":1,"method":"get_health","extra":true}"#;
        assert!(serde_json::from_str::<Request>(raw).is_err());
    }
}
