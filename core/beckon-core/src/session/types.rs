//! Session records and the identity-key scheme.
//!
//! A session is keyed by `sessionId:tty` when it has a device path and by
//! `sessionId` alone when it does not (editor-embedded or detached hosts).
//! At most one active session may occupy a device path; the store enforces
//! that by evicting the prior claimant when a new session arrives on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    WaitingInput,
    Stopped,
}

/// Why a session is waiting. Only meaningful while status is `WaitingInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitingReason {
    /// Permission or choice prompt; the red, urgent case.
    PermissionPrompt,
    /// Turn finished and the agent is idle; the yellow case.
    Stop,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    #[default]
    Claude,
    Codex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub tty: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub waiting_reason: Option<WaitingReason>,
    #[serde(default)]
    pub is_tool_running: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Assigned once and inherited across device-path replacement so UI
    /// positions stay stable when a pane is reused.
    #[serde(default)]
    pub display_order: u64,
    #[serde(default)]
    pub is_acknowledged: bool,
    /// Sticky: set when another session shares this cwd basename, never
    /// cleared afterwards so labels don't flip back once a name collided.
    #[serde(default)]
    pub is_disambiguated: bool,
    #[serde(default)]
    pub term_program: Option<String>,
    /// Terminal actually hosting the multiplexer client, which can differ
    /// from `term_program` captured inside the pane.
    #[serde(default)]
    pub actual_term_program: Option<String>,
    #[serde(default)]
    pub editor_bundle_id: Option<String>,
    #[serde(default)]
    pub editor_pid: Option<u32>,
    #[serde(default)]
    pub ghostty_tab_index: Option<u32>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub artifact_url: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub source: SessionSource,
}

impl Session {
    pub fn new(
        session_id: &str,
        cwd: &str,
        tty: Option<&str>,
        display_order: u64,
        now: DateTime<Utc>,
    ) -> Session {
        Session {
            session_id: session_id.to_string(),
            cwd: cwd.to_string(),
            tty: tty.map(str::to_string),
            status: SessionStatus::Running,
            waiting_reason: None,
            is_tool_running: false,
            created_at: now,
            updated_at: now,
            display_order,
            is_acknowledged: false,
            is_disambiguated: false,
            term_program: None,
            actual_term_program: None,
            editor_bundle_id: None,
            editor_pid: None,
            ghostty_tab_index: None,
            tool: None,
            artifact_url: None,
            summary: None,
            source: SessionSource::Claude,
        }
    }

    pub fn key(&self) -> String {
        identity_key(&self.session_id, self.tty.as_deref())
    }

    /// Display label before disambiguation kicks in.
    pub fn project_name(&self) -> &str {
        path_basename(&self.cwd)
    }

    pub fn is_waiting(&self) -> bool {
        self.status == SessionStatus::WaitingInput
    }

    /// Merges environment hints, first value wins. Later events must not
    /// overwrite an already-resolved hint.
    pub fn merge_hints(&mut self, hints: &SessionHints) {
        if self.term_program.is_none() {
            self.term_program = hints.term_program.clone();
        }
        if self.actual_term_program.is_none() {
            self.actual_term_program = hints.actual_term_program.clone();
        }
        if self.editor_bundle_id.is_none() {
            self.editor_bundle_id = hints.editor_bundle_id.clone();
        }
        if self.editor_pid.is_none() {
            self.editor_pid = hints.editor_pid;
        }
        if self.tool.is_none() {
            self.tool = hints.tool.clone();
        }
    }
}

/// Environment hints resolved outside the store (hook environment capture,
/// parent-process inspection). All optional; merged first-value-wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionHints {
    pub term_program: Option<String>,
    pub actual_term_program: Option<String>,
    pub editor_bundle_id: Option<String>,
    pub editor_pid: Option<u32>,
    pub tool: Option<String>,
}

pub fn identity_key(session_id: &str, tty: Option<&str>) -> String {
    match tty {
        Some(tty) if !tty.is_empty() => format!("{}:{}", session_id, tty),
        _ => session_id.to_string(),
    }
}

/// Final path component, with "/" for the root path.
pub fn path_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn key_includes_tty_when_present() {
        assert_eq!(identity_key("s1", Some("/dev/ttys001")), "s1:/dev/ttys001");
        assert_eq!(identity_key("s1", None), "s1");
        assert_eq!(identity_key("s1", Some("")), "s1");
    }

    #[test]
    fn session_key_matches_free_function() {
        let session = Session::new("s1", "/repo", Some("/dev/ttys002"), 0, at("2026-03-02T09:00:00Z"));
        assert_eq!(session.key(), "s1:/dev/ttys002");
    }

    #[test]
    fn project_name_is_cwd_basename() {
        let session = Session::new("s1", "/home/dev/widgets/", None, 0, at("2026-03-02T09:00:00Z"));
        assert_eq!(session.project_name(), "widgets");
    }

    #[test]
    fn path_basename_handles_root() {
        assert_eq!(path_basename("/"), "/");
        assert_eq!(path_basename("///"), "/");
        assert_eq!(path_basename("/one"), "one");
    }

    #[test]
    fn merge_hints_first_value_wins() {
        let now = at("2026-03-02T09:00:00Z");
        let mut session = Session::new("s1", "/repo", None, 0, now);

        session.merge_hints(&SessionHints {
            term_program: Some("ghostty".to_string()),
            editor_pid: Some(301),
            ..SessionHints::default()
        });
        session.merge_hints(&SessionHints {
            term_program: Some("iTerm.app".to_string()),
            actual_term_program: Some("WezTerm".to_string()),
            editor_pid: Some(999),
            ..SessionHints::default()
        });

        assert_eq!(session.term_program.as_deref(), Some("ghostty"));
        assert_eq!(session.actual_term_program.as_deref(), Some("WezTerm"));
        assert_eq!(session.editor_pid, Some(301));
    }

    #[test]
    fn status_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::WaitingInput).unwrap(),
            "\"waitingInput\""
        );
        assert_eq!(
            serde_json::to_string(&WaitingReason::PermissionPrompt).unwrap(),
            "\"permissionPrompt\""
        );
        assert_eq!(
            serde_json::to_string(&SessionSource::Codex).unwrap(),
            "\"codex\""
        );
    }
}
