//! Wire event shapes and the normalized form both decoders produce.
//!
//! Two push protocols feed the session engine: the legacy hook protocol
//! (one `hook_event_name` per call, as configured in Claude Code settings)
//! and the versioned `ccsb.v1` protocol with an explicit event enum and an
//! attention triple. Both decode into [`SessionEvent`], so the status
//! transition logic downstream has a single input shape. Codex turn-complete
//! notifications are a third, simpler shape handled by the reconciliation
//! engine rather than the store.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ErrorInfo;

pub const CCSB_PROTO: &str = "ccsb.v1";
pub const CODEX_TURN_COMPLETE: &str = "agent-turn-complete";

const MAX_ID_CHARS: usize = 128;

// ─────────────────────────────────────────────────────────────────────
// Legacy hook protocol
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookEventName {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    Notification,
    Stop,
    SessionEnd,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookEnvelope {
    pub session_id: String,
    pub hook_event_name: HookEventName,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tty: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub term_program: Option<String>,
    #[serde(default)]
    pub hook_pid: Option<u32>,
}

impl HookEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.session_id)?;

        // SessionEnd may arrive without a cwd (the hook loses it when the
        // terminal is already tearing down); unknown events change nothing
        // and are allowed through bare.
        match self.hook_event_name {
            HookEventName::SessionEnd | HookEventName::Unknown => {}
            _ => require_string(&self.cwd, "cwd")?,
        }

        Ok(())
    }
}

/// Returns true when a notification payload classifies as a permission or
/// choice prompt (the red-attention case). Anything else leaves the session
/// status untouched.
pub fn classify_notification(notification_type: Option<&str>) -> bool {
    match notification_type {
        Some("permission_prompt") | Some("elicitation_dialog") => true,
        Some(other) => other.contains("permission"),
        None => false,
    }
}

// ─────────────────────────────────────────────────────────────────────
// CCSB v1 protocol
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcsbEventType {
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.stop")]
    SessionStop,
    #[serde(rename = "session.waiting")]
    SessionWaiting,
    #[serde(rename = "session.running")]
    SessionRunning,
    #[serde(rename = "artifact.link")]
    ArtifactLink,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolIdentity {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionLevel {
    None,
    Yellow,
    Red,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attention {
    pub level: AttentionLevel,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CcsbEnvelope {
    pub proto: String,
    pub event: CcsbEventType,
    pub session_id: String,
    pub timestamp: String,
    pub tool: ToolIdentity,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tty: Option<String>,
    #[serde(default)]
    pub attention: Option<Attention>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub artifact: Option<String>,
}

impl CcsbEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.proto != CCSB_PROTO {
            return Err(ErrorInfo::new(
                "unsupported_proto",
                format!("expected proto {}, got {}", CCSB_PROTO, self.proto),
            ));
        }
        require_id(&self.session_id)?;
        if DateTime::parse_from_rfc3339(&self.timestamp).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "timestamp must be RFC3339",
            ));
        }
        if self.tool.name.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "tool.name is required"));
        }
        if self.event == CcsbEventType::ArtifactLink {
            require_string(&self.artifact, "artifact")?;
        }
        Ok(())
    }

    fn waiting_is_permission(&self) -> bool {
        match &self.attention {
            Some(attention) => {
                attention.level == AttentionLevel::Red
                    || classify_notification(attention.reason.as_deref())
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Codex notify protocol
// ─────────────────────────────────────────────────────────────────────

// External producer; extra fields (turn-id, last-assistant-message, ...) are
// tolerated rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexNotifyEnvelope {
    #[serde(rename = "type")]
    pub notify_type: String,
    pub cwd: String,
    #[serde(rename = "thread-id", default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub notification_type: Option<String>,
}

impl CodexNotifyEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.notify_type != CODEX_TURN_COMPLETE {
            return Err(ErrorInfo::new(
                "unsupported_notify",
                format!("expected type {}, got {}", CODEX_TURN_COMPLETE, self.notify_type),
            ));
        }
        if self.cwd.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "cwd is required"));
        }
        Ok(())
    }
}

/// Normalized codex push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexTurnComplete {
    pub cwd: String,
    pub thread_id: Option<String>,
    /// True only when the notify payload explicitly marks a prompt; pane
    /// signature matching happens downstream.
    pub explicit_permission: bool,
}

// ─────────────────────────────────────────────────────────────────────
// Normalized session event
// ─────────────────────────────────────────────────────────────────────

/// What an event means for session status, independent of which wire shape
/// carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SessionStart,
    PromptSubmit,
    ToolStarted,
    ToolFinished,
    /// Session is waiting for input; `permission` distinguishes the red
    /// permission/choice prompt from the yellow turn-finished case.
    Waiting { permission: bool },
    /// Notification that did not classify as a prompt.
    NotificationIgnored,
    /// Explicit running signal (ccsb only; the legacy protocol implies it).
    Running,
    ArtifactLink,
    SessionEnd,
    /// Event the decoders do not recognize; status must stay unchanged.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: String,
    pub kind: EventKind,
    pub cwd: Option<String>,
    pub tty: Option<String>,
    pub term_program: Option<String>,
    pub hook_pid: Option<u32>,
    pub tool: Option<String>,
    pub artifact: Option<String>,
    pub summary: Option<String>,
}

pub fn decode_hook(envelope: &HookEnvelope) -> SessionEvent {
    let kind = match envelope.hook_event_name {
        HookEventName::SessionStart => EventKind::SessionStart,
        HookEventName::UserPromptSubmit => EventKind::PromptSubmit,
        HookEventName::PreToolUse => EventKind::ToolStarted,
        HookEventName::PostToolUse => EventKind::ToolFinished,
        HookEventName::Notification => {
            if classify_notification(envelope.notification_type.as_deref()) {
                EventKind::Waiting { permission: true }
            } else {
                EventKind::NotificationIgnored
            }
        }
        HookEventName::Stop => EventKind::Waiting { permission: false },
        HookEventName::SessionEnd => EventKind::SessionEnd,
        HookEventName::Unknown => EventKind::Ignored,
    };

    SessionEvent {
        session_id: envelope.session_id.clone(),
        kind,
        cwd: non_empty(envelope.cwd.as_deref()),
        tty: non_empty(envelope.tty.as_deref()),
        term_program: non_empty(envelope.term_program.as_deref()),
        hook_pid: envelope.hook_pid,
        tool: non_empty(envelope.tool_name.as_deref()),
        artifact: None,
        summary: None,
    }
}

pub fn decode_ccsb(envelope: &CcsbEnvelope) -> SessionEvent {
    let kind = match envelope.event {
        CcsbEventType::SessionStart => EventKind::SessionStart,
        CcsbEventType::SessionStop => EventKind::SessionEnd,
        CcsbEventType::SessionWaiting => EventKind::Waiting {
            permission: envelope.waiting_is_permission(),
        },
        CcsbEventType::SessionRunning => EventKind::Running,
        CcsbEventType::ArtifactLink => EventKind::ArtifactLink,
        CcsbEventType::Unknown => EventKind::Ignored,
    };

    SessionEvent {
        session_id: envelope.session_id.clone(),
        kind,
        cwd: non_empty(envelope.cwd.as_deref()),
        tty: non_empty(envelope.tty.as_deref()),
        term_program: None,
        hook_pid: None,
        tool: non_empty(Some(envelope.tool.name.as_str())),
        artifact: non_empty(envelope.artifact.as_deref()),
        summary: non_empty(envelope.summary.as_deref()),
    }
}

pub fn decode_codex_notify(envelope: &CodexNotifyEnvelope) -> CodexTurnComplete {
    CodexTurnComplete {
        cwd: envelope.cwd.clone(),
        thread_id: non_empty(envelope.thread_id.as_deref()),
        explicit_permission: classify_notification(envelope.notification_type.as_deref()),
    }
}

pub fn parse_hook_event(params: Value) -> Result<HookEnvelope, ErrorInfo> {
    let envelope: HookEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("hook payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

pub fn parse_ccsb_event(params: Value) -> Result<CcsbEnvelope, ErrorInfo> {
    let envelope: CcsbEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("ccsb payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

pub fn parse_codex_notify(params: Value) -> Result<CodexNotifyEnvelope, ErrorInfo> {
    let envelope: CodexNotifyEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("codex notify payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(str::to_string)
}

fn require_id(session_id: &str) -> Result<(), ErrorInfo> {
    if session_id.trim().is_empty() {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            "session_id is required",
        ));
    }
    if session_id.len() > MAX_ID_CHARS {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            format!("session_id must be {} characters or fewer", MAX_ID_CHARS),
        ));
    }
    Ok(())
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}
