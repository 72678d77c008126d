//! Focus dispatch: turns a session record into window and pane activation.
//!
//! Dispatch is stateless and idempotent. Every call re-resolves the hosting
//! environment, re-runs the strategy ladder, and reports one of four
//! outcomes. Repeating a dispatch that succeeded re-asserts the same focus.
//!
//! The probe lock is taken per touch and never held across settle delays,
//! so a dispatch mid-wait cannot stall event ingestion that needs the probe.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use beckon_core::session::Session;

use crate::backends::{FocusBackend, FocusBackends};
use crate::probe::tmux::PaneInfo;
use crate::probe::ProcessProbe;
use crate::resolver::{resolve, FocusEnvironment, TerminalKind};

/// How long the injected pane title gets to propagate into the hosting
/// window's title before searching for it.
pub const TITLE_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum FocusResult {
    Success,
    PartialSuccess { reason: String },
    NotFound { hint: String },
    NotRunning,
}

impl FocusResult {
    /// Whether the dispatch changed anything on screen. Cooldowns key off
    /// this: a dispatch that moved focus should not immediately repeat.
    pub fn acted(&self) -> bool {
        matches!(
            self,
            FocusResult::Success | FocusResult::PartialSuccess { .. }
        )
    }
}

/// Injectable sleep so settle delays are instant under test.
pub trait Delay: Send + Sync {
    fn wait(&self, duration: Duration);
}

pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn wait(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

fn with_probe<T>(probe: &Mutex<ProcessProbe>, f: impl FnOnce(&mut ProcessProbe) -> T) -> Option<T> {
    probe.lock().ok().map(|mut guard| f(&mut guard))
}

/// Marker written into the pane title so the hosting window can be found
/// by title search regardless of what the user named things.
fn title_token(session: &Session) -> String {
    let digest = format!("{:x}", md5::compute(session.key()));
    format!("bkn-{}", &digest[..8])
}

pub fn focus_session(
    session: &Session,
    probe: &Mutex<ProcessProbe>,
    backends: &dyn FocusBackends,
    delay: &dyn Delay,
    now: Instant,
) -> FocusResult {
    let environment = match with_probe(probe, |probe| resolve(session, probe, backends, now)) {
        Some(environment) => environment,
        None => FocusEnvironment::Unknown,
    };
    debug!(key = %session.key(), environment = ?environment, "Focus dispatch");

    let touched_layout = !matches!(environment, FocusEnvironment::Unknown);
    let result = match environment {
        FocusEnvironment::Unknown => FocusResult::NotFound {
            hint: format!(
                "no application found hosting {}",
                session.project_name()
            ),
        },
        FocusEnvironment::TmuxOnly { pane } => {
            let selected = with_probe(probe, |p| p.select_pane(&pane, now))
                .unwrap_or_else(|| Err("probe unavailable".to_string()));
            match selected {
                Ok(()) => FocusResult::PartialSuccess {
                    reason: "pane selected; host terminal unknown".to_string(),
                },
                Err(err) => FocusResult::NotFound {
                    hint: format!("pane selection failed: {}", err),
                },
            }
        }
        FocusEnvironment::Terminal {
            kind,
            pane,
            tab_index,
        } => focus_terminal(session, probe, backends, delay, kind, pane, tab_index, now),
        FocusEnvironment::Editor {
            bundle_id,
            pid,
            pane,
        } => focus_editor(session, probe, backends, &bundle_id, pid, pane, now),
    };

    if touched_layout && !matches!(result, FocusResult::NotRunning) {
        with_probe(probe, |p| p.invalidate());
    }
    result
}

fn select_pane(probe: &Mutex<ProcessProbe>, pane: &PaneInfo, now: Instant) -> bool {
    match with_probe(probe, |p| p.select_pane(pane, now)) {
        Some(Ok(())) => true,
        Some(Err(err)) => {
            debug!(error = %err, pane = %pane.pane_id, "Pane selection failed");
            false
        }
        None => false,
    }
}

#[allow(clippy::too_many_arguments)]
fn focus_terminal(
    session: &Session,
    probe: &Mutex<ProcessProbe>,
    backends: &dyn FocusBackends,
    delay: &dyn Delay,
    kind: TerminalKind,
    pane: Option<PaneInfo>,
    tab_index: Option<u32>,
    now: Instant,
) -> FocusResult {
    let backend = backends.terminal(kind);
    if !backend.is_running() {
        return FocusResult::NotRunning;
    }

    // Pane first: window activation lands on whatever pane is current, so
    // the right pane has to be selected before the window comes forward.
    let pane_selected = pane
        .as_ref()
        .map(|pane| select_pane(probe, pane, now))
        .unwrap_or(false);

    let activated = backend.activate();
    let window_focused = focus_window(
        probe,
        backend.as_ref(),
        delay,
        session,
        pane.as_ref(),
        tab_index,
    );

    match (pane.is_some(), pane_selected, window_focused) {
        (true, true, true) => FocusResult::Success,
        (true, true, false) => FocusResult::PartialSuccess {
            reason: "pane selected, tab not found".to_string(),
        },
        (true, false, true) => FocusResult::PartialSuccess {
            reason: "window focused, pane selection failed".to_string(),
        },
        (true, false, false) => FocusResult::NotFound {
            hint: format!(
                "no {} window hosting {}",
                kind.display_name(),
                session.project_name()
            ),
        },
        (false, _, true) => FocusResult::Success,
        (false, _, false) => {
            if activated {
                FocusResult::PartialSuccess {
                    reason: format!("{} activated, window not located", kind.display_name()),
                }
            } else {
                FocusResult::NotFound {
                    hint: format!(
                        "no {} window hosting {}",
                        kind.display_name(),
                        session.project_name()
                    ),
                }
            }
        }
    }
}

/// Strategy ladder: stable tab index, then title-token injection, then
/// plain name search.
fn focus_window(
    probe: &Mutex<ProcessProbe>,
    backend: &dyn FocusBackend,
    delay: &dyn Delay,
    session: &Session,
    pane: Option<&PaneInfo>,
    tab_index: Option<u32>,
) -> bool {
    if let Some(index) = tab_index {
        if backend.focus_by_stable_index(index) {
            return true;
        }
    }

    if let Some(pane) = pane {
        let token = title_token(session);
        let injected = with_probe(probe, |p| p.set_pane_title(pane, &token).is_ok())
            .unwrap_or(false);
        if injected {
            delay.wait(TITLE_SETTLE);
            if backend.focus_by_title_token(&token) {
                return true;
            }
        }
        if backend.focus_by_name_search(&pane.session_name) {
            return true;
        }
    }

    backend.focus_by_name_search(&session.project_name())
}

fn focus_editor(
    session: &Session,
    probe: &Mutex<ProcessProbe>,
    backends: &dyn FocusBackends,
    bundle_id: &str,
    pid: Option<u32>,
    pane: Option<PaneInfo>,
    now: Instant,
) -> FocusResult {
    // A dead pid must not pin activation to a vanished process.
    let live_pid = pid.filter(|pid| {
        with_probe(probe, |p| p.is_pid_alive(*pid)).unwrap_or(false)
    });
    let backend = backends.editor(bundle_id, live_pid);
    if !backend.is_running() {
        return FocusResult::NotRunning;
    }

    let pane_failed = pane
        .as_ref()
        .map(|pane| !select_pane(probe, pane, now))
        .unwrap_or(false);

    let activated = backend.activate();
    let window_focused = if live_pid.is_some() {
        activated
    } else if activated {
        backend.focus_by_title_token(&session.project_name())
    } else {
        backend.focus_by_name_search(&session.project_name())
    };

    if window_focused {
        if pane_failed {
            FocusResult::PartialSuccess {
                reason: "window focused, pane selection failed".to_string(),
            }
        } else {
            FocusResult::Success
        }
    } else if activated {
        FocusResult::PartialSuccess {
            reason: "editor activated, window title not matched".to_string(),
        }
    } else {
        FocusResult::PartialSuccess {
            reason: "editor running, activation failed".to_string(),
        }
    }
}
