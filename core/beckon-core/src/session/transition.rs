//! The status transition rule shared by both event protocols.
//!
//! Both decoders normalize into [`EventKind`]; this module maps each kind
//! onto a [`StatusChange`] and applies it to a record. The mapping is total:
//! an unrecognized event leaves status unchanged rather than erroring.

use beckon_protocol::EventKind;

use super::types::{Session, SessionStatus, WaitingReason};

/// What an event does to a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Delete the record entirely, not merely mark it stopped.
    Remove,
    /// Status becomes running; `tool_running` drives the busy indicator.
    Run { tool_running: bool },
    /// Clear the busy indicator, leave status as previously set.
    ClearTool,
    /// Status becomes waitingInput with the given reason.
    Wait(WaitingReason),
    /// No status effect; association fields may still update.
    Unchanged,
}

impl StatusChange {
    /// True for changes that materialize a record when the key is unknown.
    /// Flag-only and association-only events on unknown keys are dropped.
    pub fn creates_record(&self) -> bool {
        matches!(self, StatusChange::Run { .. } | StatusChange::Wait(_))
    }
}

pub fn change_for(kind: &EventKind) -> StatusChange {
    match kind {
        EventKind::SessionStart => StatusChange::Run { tool_running: false },
        EventKind::PromptSubmit => StatusChange::Run { tool_running: false },
        EventKind::ToolStarted => StatusChange::Run { tool_running: true },
        EventKind::ToolFinished => StatusChange::ClearTool,
        EventKind::Waiting { permission: true } => {
            StatusChange::Wait(WaitingReason::PermissionPrompt)
        }
        EventKind::Waiting { permission: false } => StatusChange::Wait(WaitingReason::Stop),
        EventKind::Running => StatusChange::Run { tool_running: false },
        EventKind::SessionEnd => StatusChange::Remove,
        EventKind::NotificationIgnored | EventKind::ArtifactLink | EventKind::Ignored => {
            StatusChange::Unchanged
        }
    }
}

/// Applies a non-removing change to a record. `Remove` is handled by the
/// store (the record is deleted, not mutated) and is a no-op here.
pub fn apply(session: &mut Session, change: StatusChange) {
    match change {
        StatusChange::Remove => {}
        StatusChange::Run { tool_running } => {
            session.status = SessionStatus::Running;
            session.waiting_reason = None;
            session.is_tool_running = tool_running;
        }
        StatusChange::ClearTool => {
            session.is_tool_running = false;
        }
        StatusChange::Wait(reason) => {
            session.status = SessionStatus::WaitingInput;
            session.waiting_reason = Some(reason);
            session.is_tool_running = false;
        }
        StatusChange::Unchanged => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn session() -> Session {
        let now: DateTime<Utc> = "2026-03-02T09:00:00Z".parse().unwrap();
        Session::new("s1", "/repo", None, 0, now)
    }

    #[test]
    fn mapping_matches_transition_rule() {
        assert_eq!(
            change_for(&EventKind::SessionStart),
            StatusChange::Run { tool_running: false }
        );
        assert_eq!(
            change_for(&EventKind::PromptSubmit),
            StatusChange::Run { tool_running: false }
        );
        assert_eq!(
            change_for(&EventKind::ToolStarted),
            StatusChange::Run { tool_running: true }
        );
        assert_eq!(change_for(&EventKind::ToolFinished), StatusChange::ClearTool);
        assert_eq!(
            change_for(&EventKind::Waiting { permission: true }),
            StatusChange::Wait(WaitingReason::PermissionPrompt)
        );
        assert_eq!(
            change_for(&EventKind::Waiting { permission: false }),
            StatusChange::Wait(WaitingReason::Stop)
        );
        assert_eq!(
            change_for(&EventKind::Running),
            StatusChange::Run { tool_running: false }
        );
        assert_eq!(change_for(&EventKind::SessionEnd), StatusChange::Remove);
        assert_eq!(
            change_for(&EventKind::NotificationIgnored),
            StatusChange::Unchanged
        );
        assert_eq!(change_for(&EventKind::ArtifactLink), StatusChange::Unchanged);
        assert_eq!(change_for(&EventKind::Ignored), StatusChange::Unchanged);
    }

    #[test]
    fn run_clears_waiting_reason() {
        let mut s = session();
        apply(&mut s, StatusChange::Wait(WaitingReason::PermissionPrompt));
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert_eq!(s.waiting_reason, Some(WaitingReason::PermissionPrompt));

        apply(&mut s, StatusChange::Run { tool_running: false });
        assert_eq!(s.status, SessionStatus::Running);
        assert!(s.waiting_reason.is_none());
    }

    #[test]
    fn clear_tool_leaves_status_as_previously_set() {
        let mut s = session();
        apply(&mut s, StatusChange::Wait(WaitingReason::Stop));
        apply(&mut s, StatusChange::ClearTool);
        assert_eq!(s.status, SessionStatus::WaitingInput);
        assert!(!s.is_tool_running);
    }

    #[test]
    fn wait_stops_tool_indicator() {
        let mut s = session();
        apply(&mut s, StatusChange::Run { tool_running: true });
        assert!(s.is_tool_running);
        apply(&mut s, StatusChange::Wait(WaitingReason::Stop));
        assert!(!s.is_tool_running);
    }

    #[test]
    fn only_run_and_wait_create_records() {
        assert!(StatusChange::Run { tool_running: false }.creates_record());
        assert!(StatusChange::Wait(WaitingReason::Stop).creates_record());
        assert!(!StatusChange::ClearTool.creates_record());
        assert!(!StatusChange::Unchanged.creates_record());
        assert!(!StatusChange::Remove.creates_record());
    }
}
