//! Shared daemon state: every IPC method and background pass goes through
//! here.
//!
//! Two mutexes with a strict order: the probe is locked first and released
//! before the engine is taken, never nested the other way. Passes that need
//! both (codex reconciliation) pre-capture probe observations, then apply
//! them under the engine lock, so a slow subprocess call can never block
//! event ingestion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use beckon_core::config::BeckonConfig;
use beckon_core::session::{identity_key, Session, SessionHints, SessionStore};
use beckon_core::team::{collapse_teams, PaneLocation};
use beckon_protocol::{
    decode_ccsb, decode_hook, CcsbEnvelope, CodexTurnComplete, HookEnvelope, SessionEvent,
};

use crate::autofocus::{AutofocusController, NoTypingSignal, TypingActivity};
use crate::backends::{BackendRegistry, FocusBackends};
use crate::codex::{CodexEngine, CodexEntry, CodexLiveSession, PaneTailCapture};
use crate::dispatch::{focus_session, Delay, FocusResult, ThreadDelay};
use crate::probe::ProcessProbe;
use crate::resolver::editor_bundle_for_process_name;

/// Everything that mutates together: the hook-fed store, the inferred codex
/// registry, and the autofocus schedule that watches both.
struct Engine {
    store: SessionStore,
    codex: CodexEngine,
    autofocus: AutofocusController,
}

pub struct SharedState {
    engine: Mutex<Engine>,
    probe: Mutex<ProcessProbe>,
    backends: Box<dyn FocusBackends + Send + Sync>,
    delay: Box<dyn Delay>,
    typing: Box<dyn TypingActivity + Send + Sync>,
}

impl SharedState {
    pub fn new(store: SessionStore, config: &BeckonConfig) -> Self {
        Self::with_parts(
            store,
            config,
            ProcessProbe::system(),
            Box::new(BackendRegistry::system()),
            Box::new(ThreadDelay),
            Box::new(NoTypingSignal),
        )
    }

    fn with_parts(
        store: SessionStore,
        config: &BeckonConfig,
        probe: ProcessProbe,
        backends: Box<dyn FocusBackends + Send + Sync>,
        delay: Box<dyn Delay>,
        typing: Box<dyn TypingActivity + Send + Sync>,
    ) -> Self {
        Self {
            engine: Mutex::new(Engine {
                store,
                codex: CodexEngine::new(),
                autofocus: AutofocusController::new(
                    config.autofocus_enabled,
                    config.autofocus_cooldown_secs,
                ),
            }),
            probe: Mutex::new(probe),
            backends,
            delay,
            typing,
        }
    }

    pub fn ingest_hook(&self, envelope: &HookEnvelope) -> Option<Session> {
        self.ingest_event(decode_hook(envelope))
    }

    pub fn ingest_ccsb(&self, envelope: &CcsbEnvelope) -> Option<Session> {
        self.ingest_event(decode_ccsb(envelope))
    }

    fn ingest_event(&self, event: SessionEvent) -> Option<Session> {
        let hints = self.collect_hints(&event);
        let key = identity_key(&event.session_id, event.tty.as_deref());

        let (session, layout_changed) = match self.engine.lock() {
            Ok(mut guard) => {
                let engine = &mut *guard;
                let now = Utc::now();
                let existed = engine.store.get(&key).is_some();
                let was_waiting = engine
                    .store
                    .get(&key)
                    .map(Session::is_waiting)
                    .unwrap_or(false);

                let session = engine.store.ingest(&event, &hints, now);

                match &session {
                    Some(session) if session.is_waiting() && !was_waiting => {
                        engine.autofocus.note_waiting(&key, now);
                    }
                    Some(session) if !session.is_waiting() => {
                        engine.autofocus.cancel(&key);
                    }
                    Some(_) => {}
                    None => engine.autofocus.cancel(&key),
                }

                let created = !existed && session.is_some();
                let removed = existed && session.is_none();
                (session, created || removed)
            }
            Err(_) => (None, false),
        };

        // A record appearing or disappearing usually means a pane did too.
        if layout_changed {
            if let Ok(mut probe) = self.probe.lock() {
                probe.invalidate();
            }
        }
        session
    }

    /// Environment hints that need live probing: the hook process's editor
    /// ancestry and the terminal actually hosting the multiplexer client.
    /// Best-effort; an unavailable probe just yields fewer hints.
    fn collect_hints(&self, event: &SessionEvent) -> SessionHints {
        let mut hints = SessionHints::default();
        if let Ok(mut probe) = self.probe.lock() {
            let now = Instant::now();

            if let Some(pid) = event.hook_pid {
                for ancestor in probe.parent_chain(pid) {
                    if let Some(bundle) = editor_bundle_for_process_name(&ancestor.name) {
                        hints.editor_bundle_id = Some(bundle.to_string());
                        hints.editor_pid = Some(ancestor.pid);
                        break;
                    }
                }
            }

            if let Some(tty) = event.tty.as_deref() {
                if let Some(pane) = probe.pane_for_tty(tty, now) {
                    if let Some(client) = probe.client_for_session(&pane.session_name, now) {
                        if let Some(kind) = probe.terminal_for_client(client.pid, now) {
                            hints.actual_term_program =
                                Some(kind.term_program_value().to_string());
                        }
                    }
                }
            }
        }
        hints
    }

    /// A codex turn-complete push. The pane tail is captured up front so the
    /// waiting classification can check for the plan prompt, and the live
    /// process's device path is pinned for focus.
    pub fn codex_notify(&self, event: &CodexTurnComplete) -> String {
        let (tty, tail) = match self.probe.lock() {
            Ok(mut probe) => {
                let now = Instant::now();
                let tty = probe
                    .codex_processes()
                    .into_iter()
                    .find(|process| process.cwd == event.cwd)
                    .and_then(|process| process.tty);
                let tail = tty
                    .as_deref()
                    .and_then(|tty| probe.capture_pane_tail(tty, now));
                (tty, tail)
            }
            Err(_) => (None, None),
        };

        match self.engine.lock() {
            Ok(mut guard) => {
                let engine = &mut *guard;
                let now = Utc::now();
                let key = engine.codex.on_turn_complete(event, tail.as_deref(), now);
                if let Some(tty) = &tty {
                    engine.codex.record_tty(&event.cwd, tty);
                }
                engine.autofocus.note_waiting(&key, now);
                key
            }
            Err(_) => String::new(),
        }
    }

    /// One codex reconciliation pass. Process table and pane tails are read
    /// first under the probe lock; the engine lock is taken only afterwards,
    /// with everything it needs already in hand.
    pub fn reconcile_codex(&self) {
        let (alive, tails) = match self.probe.lock() {
            Ok(mut probe) => {
                let now = Instant::now();
                let alive: Vec<CodexLiveSession> = probe
                    .codex_processes()
                    .into_iter()
                    .map(|process| CodexLiveSession {
                        pid: process.pid,
                        cwd: process.cwd,
                        tty: process.tty,
                    })
                    .collect();
                let mut tails = HashMap::new();
                for live in &alive {
                    if let Some(tty) = &live.tty {
                        if let Some(tail) = probe.capture_pane_tail(tty, now) {
                            tails.insert(tty.clone(), tail);
                        }
                    }
                }
                (alive, tails)
            }
            Err(_) => return,
        };

        if let Ok(mut guard) = self.engine.lock() {
            let engine = &mut *guard;
            let now = Utc::now();
            let outcome = engine
                .codex
                .reconcile(&alive, &mut PreparedTails(tails), now);
            for cwd in &outcome.revived {
                if let Some(id) = engine.codex.get(cwd).map(CodexEntry::session_id) {
                    engine.autofocus.clear_cooldown(&id);
                }
            }
            for cwd in outcome
                .synthetic_stopped
                .iter()
                .chain(&outcome.inferred_running)
            {
                if let Some(id) = engine.codex.get(cwd).map(CodexEntry::session_id) {
                    engine.autofocus.cancel(&id);
                }
            }
        }
    }

    pub fn autofocus_tick(&self) {
        self.autofocus_tick_inner(Utc::now(), Instant::now());
    }

    fn autofocus_tick_inner(&self, now: DateTime<Utc>, probe_now: Instant) -> Option<FocusResult> {
        let (key, session) = {
            let mut guard = self.engine.lock().ok()?;
            let engine = &mut *guard;
            let key = engine.autofocus.tick(self.typing.as_ref(), now)?;
            let session = match session_for_key(engine, &key) {
                Some(session) if session.is_waiting() && !session.is_acknowledged => session,
                _ => {
                    debug!(key = %key, "Autofocus target no longer waiting; dropped");
                    return None;
                }
            };
            (key, session)
        };

        info!(
            key = %key,
            project = %session.project_name(),
            "Autofocus dispatch"
        );
        let result = focus_session(
            &session,
            &self.probe,
            self.backends.as_ref(),
            self.delay.as_ref(),
            probe_now,
        );
        let acted = result.acted();
        if let Ok(mut guard) = self.engine.lock() {
            guard.autofocus.note_result(&key, acted, now);
        }
        if !acted {
            warn!(key = %key, result = ?result, "Autofocus attempt did not land");
        }
        Some(result)
    }

    /// Snapshot for clients. `filtered` collapses agent teams to their
    /// leaders; codex placeholders are appended either way since they never
    /// group.
    pub fn list_sessions(&self, filtered: bool) -> Vec<Session> {
        let (mut sessions, codex) = self
            .engine
            .lock()
            .map(|guard| (guard.store.list(), guard.codex.placeholders()))
            .unwrap_or_default();

        if filtered {
            let panes = self.pane_locations(&sessions);
            sessions = collapse_teams(sessions, &panes);
        }
        sessions.extend(codex);
        sessions
    }

    fn pane_locations(&self, sessions: &[Session]) -> HashMap<String, PaneLocation> {
        let mut locations = HashMap::new();
        if let Ok(mut probe) = self.probe.lock() {
            let now = Instant::now();
            for tty in sessions.iter().filter_map(|session| session.tty.as_deref()) {
                if locations.contains_key(tty) {
                    continue;
                }
                if let Some(pane) = probe.pane_for_tty(tty, now) {
                    locations.insert(
                        tty.to_string(),
                        PaneLocation {
                            session_name: pane.session_name,
                            window_index: pane.window_index,
                        },
                    );
                }
            }
        }
        locations
    }

    /// Focuses the session matching `target`: an identity key, a session id,
    /// or a codex working directory.
    pub fn focus_target(&self, target: &str) -> FocusResult {
        let session = self
            .engine
            .lock()
            .ok()
            .and_then(|guard| find_target(&guard, target));
        match session {
            Some(session) => self.dispatch_focus(&session),
            None => FocusResult::NotFound {
                hint: format!("no session matching {}", target),
            },
        }
    }

    /// Focuses by position in the displayed (team-filtered) list.
    pub fn focus_index(&self, index: usize) -> FocusResult {
        match self.list_sessions(true).into_iter().nth(index) {
            Some(session) => self.dispatch_focus(&session),
            None => FocusResult::NotFound {
                hint: format!("no session at index {}", index),
            },
        }
    }

    fn dispatch_focus(&self, session: &Session) -> FocusResult {
        focus_session(
            session,
            &self.probe,
            self.backends.as_ref(),
            self.delay.as_ref(),
            Instant::now(),
        )
    }

    pub fn acknowledge(&self, target: &str) -> bool {
        self.set_acknowledged(target, true)
    }

    pub fn clear_acknowledge(&self, target: &str) -> bool {
        self.set_acknowledged(target, false)
    }

    fn set_acknowledged(&self, target: &str, acknowledged: bool) -> bool {
        if let Ok(mut guard) = self.engine.lock() {
            let engine = &mut *guard;
            if let Some(key) = engine.store.find(target).map(Session::key) {
                let updated = if acknowledged {
                    engine.store.acknowledge(&key)
                } else {
                    engine.store.clear_acknowledge(&key)
                };
                if updated && acknowledged {
                    engine.autofocus.cancel(&key);
                }
                return updated;
            }
            if let Some(id) = engine.codex.find(target).map(CodexEntry::session_id) {
                let updated = if acknowledged {
                    engine.codex.acknowledge(target)
                } else {
                    engine.codex.clear_acknowledge(target)
                };
                if updated && acknowledged {
                    engine.autofocus.cancel(&id);
                }
                return updated;
            }
        }
        false
    }

    /// Wholesale reset of both registries. Returns how many records dropped.
    pub fn clear_sessions(&self) -> usize {
        match self.engine.lock() {
            Ok(mut guard) => {
                let engine = &mut *guard;
                let count = engine.store.len() + engine.codex.len();
                engine.store.clear();
                engine.codex.clear();
                count
            }
            Err(_) => 0,
        }
    }

    pub fn session_count(&self) -> usize {
        self.engine
            .lock()
            .map(|guard| guard.store.len() + guard.codex.len())
            .unwrap_or(0)
    }
}

/// Pane tails captured before the engine lock was taken.
struct PreparedTails(HashMap<String, String>);

impl PaneTailCapture for PreparedTails {
    fn tail(&mut self, tty: &str) -> Option<String> {
        self.0.get(tty).cloned()
    }
}

fn session_for_key(engine: &Engine, key: &str) -> Option<Session> {
    if let Some(session) = engine.store.get(key) {
        return Some(session.clone());
    }
    engine
        .codex
        .placeholders()
        .into_iter()
        .find(|session| session.session_id == key)
}

fn find_target(engine: &Engine, target: &str) -> Option<Session> {
    if let Some(session) = engine.store.find(target) {
        return Some(session.clone());
    }
    engine
        .codex
        .placeholders()
        .into_iter()
        .find(|session| session.session_id == target || session.cwd == target)
}
