//! Codex session inference.
//!
//! Codex only announces turn completion, so everything else (running,
//! stopped, revived) is inferred by correlating notify events with the
//! live process table and pane contents. Entries are keyed by working
//! directory; a thread id, when present, names the session for clients.
//!
//! The pane-tail hash is a heuristic: a redraw that repaints identical
//! bytes is indistinguishable from silence, and any repaint that changes
//! the trailing lines reads as activity. Both misreads self-correct on
//! the next notify event.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use beckon_core::session::{Session, SessionSource, SessionStatus, WaitingReason};
use beckon_protocol::CodexTurnComplete;

/// How long a process may be absent before the session is considered over.
/// Process scans can transiently miss a live process, so one missed pass
/// is never enough.
pub const ABSENCE_GRACE_SECS: i64 = 3;
/// How long a synthetically stopped entry stays visible before pruning.
pub const STOPPED_RETENTION_SECS: i64 = 90;
/// How many trailing pane lines feed the change-detection hash.
pub const PANE_TAIL_LINES: usize = 10;

const PLAN_PROMPT: &str = "Would you like to proceed?";
const PLAN_YES: &str = "Yes, proceed";
const PLAN_NO: &str = "No, keep planning";

/// A live codex process observed in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexLiveSession {
    pub pid: u32,
    pub cwd: String,
    pub tty: Option<String>,
}

/// Captures pane contents by tty during reconciliation.
pub trait PaneTailCapture {
    fn tail(&mut self, tty: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct CodexEntry {
    pub cwd: String,
    pub thread_id: Option<String>,
    pub status: SessionStatus,
    pub waiting_reason: Option<WaitingReason>,
    pub tty: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub missing_since: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub is_synthetic_stopped: bool,
    pub is_acknowledged: bool,
    pub pane_tail_hash: Option<String>,
}

impl CodexEntry {
    fn new(cwd: String, now: DateTime<Utc>) -> Self {
        Self {
            cwd,
            thread_id: None,
            status: SessionStatus::Running,
            waiting_reason: None,
            tty: None,
            first_seen_at: now,
            last_event_at: None,
            last_seen_at: now,
            missing_since: None,
            stopped_at: None,
            is_synthetic_stopped: false,
            is_acknowledged: false,
            pane_tail_hash: None,
        }
    }

    /// Stable key clients can address this entry by.
    pub fn session_id(&self) -> String {
        self.thread_id
            .clone()
            .unwrap_or_else(|| format!("codex:{}", self.cwd))
    }
}

/// What one reconciliation pass changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub revived: Vec<String>,
    pub inferred_running: Vec<String>,
    pub synthetic_stopped: Vec<String>,
    pub pruned: Vec<String>,
}

impl ReconcileOutcome {
    pub fn is_quiet(&self) -> bool {
        self.revived.is_empty()
            && self.inferred_running.is_empty()
            && self.synthetic_stopped.is_empty()
            && self.pruned.is_empty()
    }
}

/// The three-option plan confirmation is the one waiting state codex
/// renders that demands an answer, so it maps to a permission prompt.
pub fn matches_plan_prompt(tail: &str) -> bool {
    tail.contains(PLAN_PROMPT) && tail.contains(PLAN_YES) && tail.contains(PLAN_NO)
}

/// Hash of the trailing pane lines, whitespace-trimmed so cursor jitter
/// and padding do not read as output changes.
pub fn tail_hash(tail: &str) -> String {
    let trimmed: Vec<&str> = tail
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = trimmed.len().saturating_sub(PANE_TAIL_LINES);
    format!("{:x}", md5::compute(trimmed[start..].join("\n")))
}

#[derive(Debug, Default)]
pub struct CodexEngine {
    entries: HashMap<String, CodexEntry>,
}

impl CodexEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, cwd: &str) -> Option<&CodexEntry> {
        self.entries.get(cwd)
    }

    /// Pins the device path observed for a cwd's live process, so focus can
    /// reach the pane before the next reconciliation pass runs.
    pub fn record_tty(&mut self, cwd: &str, tty: &str) {
        if let Some(entry) = self.entries.get_mut(cwd) {
            entry.tty = Some(tty.to_string());
        }
    }

    /// A turn-complete notify: the session is now waiting for input. The
    /// pane tail decides whether that wait is a permission-style prompt,
    /// and its hash becomes the baseline for change detection.
    pub fn on_turn_complete(
        &mut self,
        event: &CodexTurnComplete,
        pane_tail: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let entry = self
            .entries
            .entry(event.cwd.clone())
            .or_insert_with(|| CodexEntry::new(event.cwd.clone(), now));
        if event.thread_id.is_some() {
            entry.thread_id = event.thread_id.clone();
        }
        let permission = event.explicit_permission
            || pane_tail.map(matches_plan_prompt).unwrap_or(false);
        entry.status = SessionStatus::WaitingInput;
        entry.waiting_reason = Some(if permission {
            WaitingReason::PermissionPrompt
        } else {
            WaitingReason::Stop
        });
        entry.pane_tail_hash = pane_tail.map(tail_hash);
        entry.is_acknowledged = false;
        entry.last_event_at = Some(now);
        entry.last_seen_at = now;
        entry.missing_since = None;
        entry.is_synthetic_stopped = false;
        entry.stopped_at = None;
        info!(
            cwd = %entry.cwd,
            waiting_reason = ?entry.waiting_reason,
            "Codex turn complete"
        );
        entry.session_id()
    }

    /// One reconciliation pass against the live process table.
    ///
    /// Absent processes get a grace period before turning into synthetic
    /// stops; stopped entries are pruned after the retention window; a
    /// waiting entry whose pane tail drifted from its recorded hash is
    /// inferred to be running again. Running with no prior entry (daemon
    /// restart, missed events) rebuilds a Running entry from nothing.
    pub fn reconcile(
        &mut self,
        alive: &[CodexLiveSession],
        capture: &mut dyn PaneTailCapture,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let alive_by_cwd: HashMap<&str, &CodexLiveSession> = alive
            .iter()
            .map(|live| (live.cwd.as_str(), live))
            .collect();

        for live in alive {
            if !self.entries.contains_key(&live.cwd) {
                debug!(cwd = %live.cwd, pid = live.pid, "Codex process without entry; rebuilding");
                self.entries
                    .insert(live.cwd.clone(), CodexEntry::new(live.cwd.clone(), now));
            }
        }

        for (cwd, entry) in self.entries.iter_mut() {
            match alive_by_cwd.get(cwd.as_str()) {
                Some(live) => {
                    entry.last_seen_at = now;
                    entry.missing_since = None;
                    if live.tty.is_some() {
                        entry.tty = live.tty.clone();
                    }
                    if entry.is_synthetic_stopped {
                        entry.is_synthetic_stopped = false;
                        entry.stopped_at = None;
                        entry.status = SessionStatus::Running;
                        entry.waiting_reason = None;
                        entry.pane_tail_hash = None;
                        entry.is_acknowledged = false;
                        outcome.revived.push(cwd.clone());
                        continue;
                    }
                    if entry.status == SessionStatus::WaitingInput {
                        let drifted = match (&entry.pane_tail_hash, entry.tty.as_deref()) {
                            (Some(recorded), Some(tty)) => capture
                                .tail(tty)
                                .map(|tail| tail_hash(&tail) != *recorded)
                                .unwrap_or(false),
                            _ => false,
                        };
                        if drifted {
                            entry.status = SessionStatus::Running;
                            entry.waiting_reason = None;
                            entry.pane_tail_hash = None;
                            outcome.inferred_running.push(cwd.clone());
                        }
                    }
                }
                None => {
                    let missing_since = *entry.missing_since.get_or_insert(now);
                    let absent_for = now.signed_duration_since(missing_since).num_seconds();
                    if !entry.is_synthetic_stopped && absent_for > ABSENCE_GRACE_SECS {
                        entry.status = SessionStatus::Stopped;
                        entry.waiting_reason = None;
                        entry.is_synthetic_stopped = true;
                        entry.stopped_at = Some(now);
                        outcome.synthetic_stopped.push(cwd.clone());
                    }
                }
            }
        }

        self.entries.retain(|cwd, entry| {
            let expired = entry.is_synthetic_stopped
                && entry
                    .stopped_at
                    .map(|stopped_at| {
                        now.signed_duration_since(stopped_at).num_seconds()
                            > STOPPED_RETENTION_SECS
                    })
                    .unwrap_or(false);
            if expired {
                outcome.pruned.push(cwd.clone());
            }
            !expired
        });

        if !outcome.is_quiet() {
            info!(
                revived = outcome.revived.len(),
                inferred_running = outcome.inferred_running.len(),
                synthetic_stopped = outcome.synthetic_stopped.len(),
                pruned = outcome.pruned.len(),
                "Codex reconciliation"
            );
        }
        outcome
    }

    pub fn acknowledge(&mut self, target: &str) -> bool {
        match self.find_mut(target) {
            Some(entry) => {
                entry.is_acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_acknowledge(&mut self, target: &str) -> bool {
        match self.find_mut(target) {
            Some(entry) => {
                entry.is_acknowledged = false;
                true
            }
            None => false,
        }
    }

    pub fn find(&self, target: &str) -> Option<&CodexEntry> {
        self.entries
            .values()
            .find(|entry| entry.session_id() == target || entry.cwd == target)
    }

    fn find_mut(&mut self, target: &str) -> Option<&mut CodexEntry> {
        self.entries
            .values_mut()
            .find(|entry| entry.session_id() == target || entry.cwd == target)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Session-shaped views of every entry, stopped placeholders included,
    /// so clients render codex work next to hook-fed sessions.
    pub fn placeholders(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .entries
            .values()
            .map(|entry| {
                let mut session = Session::new(
                    &entry.session_id(),
                    &entry.cwd,
                    entry.tty.as_deref(),
                    0,
                    entry.first_seen_at,
                );
                session.status = entry.status;
                session.waiting_reason = entry.waiting_reason;
                session.updated_at = entry.last_event_at.unwrap_or(entry.last_seen_at);
                session.is_acknowledged = entry.is_acknowledged;
                session.source = SessionSource::Codex;
                session
            })
            .collect();
        sessions.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.session_id.cmp(&right.session_id))
        });
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn turn_complete(cwd: &str) -> CodexTurnComplete {
        CodexTurnComplete {
            cwd: cwd.to_string(),
            thread_id: None,
            explicit_permission: false,
        }
    }

    fn live(cwd: &str, tty: Option<&str>) -> CodexLiveSession {
        CodexLiveSession {
            pid: 4000,
            cwd: cwd.to_string(),
            tty: tty.map(str::to_string),
        }
    }

    struct NoPanes;

    impl PaneTailCapture for NoPanes {
        fn tail(&mut self, _tty: &str) -> Option<String> {
            None
        }
    }

    struct FixedPane(String);

    impl PaneTailCapture for FixedPane {
        fn tail(&mut self, _tty: &str) -> Option<String> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn turn_complete_without_signals_waits_on_stop() {
        let mut engine = CodexEngine::new();
        let now = at("2026-03-01T10:00:00Z");
        engine.on_turn_complete(&turn_complete("/work/app"), Some("done.\n"), now);

        let entry = engine.get("/work/app").expect("entry");
        assert_eq!(entry.status, SessionStatus::WaitingInput);
        assert_eq!(entry.waiting_reason, Some(WaitingReason::Stop));
        assert!(entry.pane_tail_hash.is_some());
    }

    #[test]
    fn explicit_permission_marker_wins_over_pane_contents() {
        let mut engine = CodexEngine::new();
        let mut event = turn_complete("/work/app");
        event.explicit_permission = true;
        engine.on_turn_complete(&event, Some("anything\n"), at("2026-03-01T10:00:00Z"));

        let entry = engine.get("/work/app").expect("entry");
        assert_eq!(
            entry.waiting_reason,
            Some(WaitingReason::PermissionPrompt)
        );
    }

    #[test]
    fn plan_prompt_signature_reads_as_permission() {
        let tail = "plan summary\nWould you like to proceed?\n> 1. Yes, proceed\n  2. No, keep planning\n";
        assert!(matches_plan_prompt(tail));

        let mut engine = CodexEngine::new();
        engine.on_turn_complete(&turn_complete("/work/app"), Some(tail), at("2026-03-01T10:00:00Z"));
        assert_eq!(
            engine.get("/work/app").expect("entry").waiting_reason,
            Some(WaitingReason::PermissionPrompt)
        );
    }

    #[test]
    fn thread_id_becomes_session_id() {
        let mut engine = CodexEngine::new();
        let mut event = turn_complete("/work/app");
        event.thread_id = Some("thread-9".to_string());
        let id = engine.on_turn_complete(&event, None, at("2026-03-01T10:00:00Z"));
        assert_eq!(id, "thread-9");

        // a later event without thread id keeps the known one
        let id = engine.on_turn_complete(&turn_complete("/work/app"), None, at("2026-03-01T10:01:00Z"));
        assert_eq!(id, "thread-9");
    }

    #[test]
    fn absence_needs_grace_before_synthetic_stop() {
        let mut engine = CodexEngine::new();
        let start = at("2026-03-01T10:00:00Z");
        engine.on_turn_complete(&turn_complete("/work/app"), None, start);

        let first = engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(1));
        assert!(first.synthetic_stopped.is_empty());
        assert_eq!(
            engine.get("/work/app").expect("entry").status,
            SessionStatus::WaitingInput
        );

        let second = engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(5));
        assert_eq!(second.synthetic_stopped, vec!["/work/app".to_string()]);
        let entry = engine.get("/work/app").expect("entry");
        assert_eq!(entry.status, SessionStatus::Stopped);
        assert!(entry.is_synthetic_stopped);
        assert!(entry.waiting_reason.is_none());
    }

    #[test]
    fn brief_absence_within_grace_is_forgiven() {
        let mut engine = CodexEngine::new();
        let start = at("2026-03-01T10:00:00Z");
        engine.on_turn_complete(&turn_complete("/work/app"), None, start);

        engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(1));
        engine.reconcile(
            &[live("/work/app", None)],
            &mut NoPanes,
            start + Duration::seconds(2),
        );
        // process came back; a later pass with it still alive stays waiting
        let outcome = engine.reconcile(
            &[live("/work/app", None)],
            &mut NoPanes,
            start + Duration::seconds(10),
        );
        assert!(outcome.is_quiet());
        assert_eq!(
            engine.get("/work/app").expect("entry").status,
            SessionStatus::WaitingInput
        );
    }

    #[test]
    fn stopped_entries_are_pruned_after_retention() {
        let mut engine = CodexEngine::new();
        let start = at("2026-03-01T10:00:00Z");
        engine.on_turn_complete(&turn_complete("/work/app"), None, start);

        engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(1));
        engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(5));
        assert_eq!(engine.len(), 1);

        let outcome = engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(100));
        assert_eq!(outcome.pruned, vec!["/work/app".to_string()]);
        assert!(engine.is_empty());
    }

    #[test]
    fn revival_clears_synthetic_stop() {
        let mut engine = CodexEngine::new();
        let start = at("2026-03-01T10:00:00Z");
        engine.on_turn_complete(&turn_complete("/work/app"), None, start);
        engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(1));
        engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(5));

        let outcome = engine.reconcile(
            &[live("/work/app", Some("/dev/ttys004"))],
            &mut NoPanes,
            start + Duration::seconds(8),
        );
        assert_eq!(outcome.revived, vec!["/work/app".to_string()]);
        let entry = engine.get("/work/app").expect("entry");
        assert_eq!(entry.status, SessionStatus::Running);
        assert!(!entry.is_synthetic_stopped);
        assert!(entry.stopped_at.is_none());
    }

    #[test]
    fn rebuilds_running_entries_from_nothing() {
        let mut engine = CodexEngine::new();
        let now = at("2026-03-01T10:00:00Z");
        let outcome = engine.reconcile(
            &[
                live("/work/app", Some("/dev/ttys004")),
                live("/work/other", None),
            ],
            &mut NoPanes,
            now,
        );
        assert!(outcome.is_quiet());
        assert_eq!(engine.len(), 2);
        let entry = engine.get("/work/app").expect("entry");
        assert_eq!(entry.status, SessionStatus::Running);
        assert_eq!(entry.tty.as_deref(), Some("/dev/ttys004"));
    }

    #[test]
    fn pane_drift_infers_running() {
        let mut engine = CodexEngine::new();
        let start = at("2026-03-01T10:00:00Z");
        engine.on_turn_complete(
            &turn_complete("/work/app"),
            Some("$ waiting for input\n"),
            start,
        );

        // same contents: still waiting
        let quiet = engine.reconcile(
            &[live("/work/app", Some("/dev/ttys004"))],
            &mut FixedPane("$ waiting for input\n".to_string()),
            start + Duration::seconds(2),
        );
        assert!(quiet.inferred_running.is_empty());

        let outcome = engine.reconcile(
            &[live("/work/app", Some("/dev/ttys004"))],
            &mut FixedPane("$ compiling...\nnew output\n".to_string()),
            start + Duration::seconds(4),
        );
        assert_eq!(outcome.inferred_running, vec!["/work/app".to_string()]);
        let entry = engine.get("/work/app").expect("entry");
        assert_eq!(entry.status, SessionStatus::Running);
        assert!(entry.waiting_reason.is_none());
        assert!(entry.pane_tail_hash.is_none());
    }

    #[test]
    fn tail_hash_ignores_surrounding_whitespace() {
        let left = tail_hash("  line one  \n\n line two \n");
        let right = tail_hash("line one\nline two");
        assert_eq!(left, right);
        assert_ne!(tail_hash("line one\nline two"), tail_hash("line one\nline three"));
    }

    #[test]
    fn tail_hash_uses_only_trailing_lines() {
        let mut long = String::new();
        for n in 0..30 {
            long.push_str(&format!("line {}\n", n));
        }
        let mut different_head = String::from("changed header\n");
        different_head.push_str(&long[long.find("line 20").expect("line 20")..]);
        assert_eq!(tail_hash(&long), tail_hash(&different_head));
    }

    #[test]
    fn placeholders_carry_codex_source_and_stopped_state() {
        let mut engine = CodexEngine::new();
        let start = at("2026-03-01T10:00:00Z");
        engine.on_turn_complete(&turn_complete("/work/app"), None, start);
        engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(1));
        engine.reconcile(&[], &mut NoPanes, start + Duration::seconds(5));

        let sessions = engine.placeholders();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].source, SessionSource::Codex);
        assert_eq!(sessions[0].status, SessionStatus::Stopped);
        assert_eq!(sessions[0].session_id, "codex:/work/app");
    }

    #[test]
    fn acknowledge_round_trip_by_cwd_or_id() {
        let mut engine = CodexEngine::new();
        let mut event = turn_complete("/work/app");
        event.thread_id = Some("thread-1".to_string());
        engine.on_turn_complete(&event, None, at("2026-03-01T10:00:00Z"));

        assert!(engine.acknowledge("thread-1"));
        assert!(engine.get("/work/app").expect("entry").is_acknowledged);
        assert!(engine.clear_acknowledge("/work/app"));
        assert!(!engine.get("/work/app").expect("entry").is_acknowledged);
        assert!(!engine.acknowledge("unknown"));
    }

    #[test]
    fn new_event_clears_acknowledgement() {
        let mut engine = CodexEngine::new();
        engine.on_turn_complete(&turn_complete("/work/app"), None, at("2026-03-01T10:00:00Z"));
        engine.acknowledge("/work/app");
        engine.on_turn_complete(&turn_complete("/work/app"), None, at("2026-03-01T10:05:00Z"));
        assert!(!engine.get("/work/app").expect("entry").is_acknowledged);
    }
}
