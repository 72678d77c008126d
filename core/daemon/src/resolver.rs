//! Decides which application hosts a session before any focus attempt.
//!
//! Hints on the session record are preferred over live probing, but every
//! resolution runs fresh: window layout changes between dispatches, so a
//! cached answer would focus the wrong window exactly when it matters.

use std::time::Instant;

use beckon_core::session::Session;

use crate::probe::tmux::PaneInfo;
use crate::probe::ProcessProbe;

/// Terminal applications with a focus backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalKind {
    Ghostty,
    AppleTerminal,
    Iterm,
    WezTerm,
}

impl TerminalKind {
    pub const ALL: [TerminalKind; 4] = [
        TerminalKind::Ghostty,
        TerminalKind::AppleTerminal,
        TerminalKind::Iterm,
        TerminalKind::WezTerm,
    ];

    /// Maps a `TERM_PROGRAM` value to a backend.
    pub fn from_term_program(value: &str) -> Option<TerminalKind> {
        match value {
            "ghostty" => Some(TerminalKind::Ghostty),
            "Apple_Terminal" => Some(TerminalKind::AppleTerminal),
            "iTerm.app" => Some(TerminalKind::Iterm),
            "WezTerm" => Some(TerminalKind::WezTerm),
            _ => None,
        }
    }

    /// Maps a process name seen in an ancestry walk to a backend.
    pub fn from_process_name(name: &str) -> Option<TerminalKind> {
        let name = name.to_ascii_lowercase();
        if name.starts_with("ghostty") {
            Some(TerminalKind::Ghostty)
        } else if name.starts_with("iterm") {
            Some(TerminalKind::Iterm)
        } else if name.starts_with("wezterm") {
            Some(TerminalKind::WezTerm)
        } else if name == "terminal" {
            Some(TerminalKind::AppleTerminal)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TerminalKind::Ghostty => "Ghostty",
            TerminalKind::AppleTerminal => "Terminal",
            TerminalKind::Iterm => "iTerm2",
            TerminalKind::WezTerm => "WezTerm",
        }
    }

    /// Inverse of [`TerminalKind::from_term_program`], used when a probe
    /// identifies the host app and the result is stored as a hint.
    pub fn term_program_value(&self) -> &'static str {
        match self {
            TerminalKind::Ghostty => "ghostty",
            TerminalKind::AppleTerminal => "Apple_Terminal",
            TerminalKind::Iterm => "iTerm.app",
            TerminalKind::WezTerm => "WezTerm",
        }
    }
}

/// Maps a process name from a hook's ancestry to an editor bundle identity.
pub fn editor_bundle_for_process_name(name: &str) -> Option<&'static str> {
    let name = name.to_ascii_lowercase();
    if name.starts_with("cursor") {
        Some("com.todesktop.230313mzl4w4u92")
    } else if name.starts_with("code") || name.starts_with("electron") {
        Some("com.microsoft.VSCode")
    } else if name.starts_with("zed") {
        Some("dev.zed.Zed")
    } else if name.starts_with("windsurf") {
        Some("com.exafunction.windsurf")
    } else {
        None
    }
}

/// Window-level questions the resolver can ask a terminal backend without
/// focusing anything.
pub trait WindowProbe {
    fn is_running(&self, kind: TerminalKind) -> bool;
    fn has_window_titled(&self, kind: TerminalKind, token: &str) -> bool;
    fn resolves_tty(&self, kind: TerminalKind, tty: &str) -> bool;
}

/// Where a session lives, as far as focus is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusEnvironment {
    Editor {
        bundle_id: String,
        pid: Option<u32>,
        pane: Option<PaneInfo>,
    },
    Terminal {
        kind: TerminalKind,
        pane: Option<PaneInfo>,
        tab_index: Option<u32>,
    },
    /// A pane exists but no host application could be identified.
    TmuxOnly { pane: PaneInfo },
    Unknown,
}

pub fn resolve<W: WindowProbe + ?Sized>(
    session: &Session,
    probe: &mut ProcessProbe,
    windows: &W,
    now: Instant,
) -> FocusEnvironment {
    let pane = session
        .tty
        .as_deref()
        .and_then(|tty| probe.pane_for_tty(tty, now));

    if let Some(bundle_id) = session.editor_bundle_id.clone() {
        return FocusEnvironment::Editor {
            bundle_id,
            pid: session.editor_pid,
            pane,
        };
    }

    // Observed host beats the session's own TERM_PROGRAM; an unrecognized
    // value falls through rather than ending resolution.
    for hint in [
        session.actual_term_program.as_deref(),
        session.term_program.as_deref(),
    ] {
        if let Some(kind) = hint.and_then(TerminalKind::from_term_program) {
            return FocusEnvironment::Terminal {
                kind,
                pane,
                tab_index: session.ghostty_tab_index,
            };
        }
    }

    if let Some(pane) = pane {
        for kind in TerminalKind::ALL {
            if windows.is_running(kind) && windows.has_window_titled(kind, &pane.session_name) {
                return FocusEnvironment::Terminal {
                    kind,
                    pane: Some(pane),
                    tab_index: session.ghostty_tab_index,
                };
            }
        }
        return FocusEnvironment::TmuxOnly { pane };
    }

    if let Some(tty) = session.tty.as_deref() {
        for kind in TerminalKind::ALL {
            if windows.is_running(kind) && windows.resolves_tty(kind, tty) {
                return FocusEnvironment::Terminal {
                    kind,
                    pane: None,
                    tab_index: session.ghostty_tab_index,
                };
            }
        }
    }

    FocusEnvironment::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::process::{CodexProcess, ProcessInfo, ProcessQuery};
    use crate::probe::tmux::TmuxAdapter;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::path::Path;

    struct StaticTmux {
        panes: String,
    }

    impl TmuxAdapter for StaticTmux {
        fn query(&self, _socket: Option<&Path>, args: &[&str]) -> String {
            if args[0] == "list-panes" {
                self.panes.clone()
            } else {
                String::new()
            }
        }

        fn command(&self, _socket: Option<&Path>, _args: &[&str]) -> Result<(), String> {
            Ok(())
        }
    }

    struct NoProcess;

    impl ProcessQuery for NoProcess {
        fn parent_chain(&mut self, _pid: u32) -> Vec<ProcessInfo> {
            Vec::new()
        }
        fn is_alive(&mut self, _pid: u32) -> bool {
            false
        }
        fn codex_processes(&mut self) -> Vec<CodexProcess> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct FakeWindows {
        running: HashSet<TerminalKind>,
        titled: HashSet<(TerminalKind, String)>,
        ttys: HashSet<(TerminalKind, String)>,
    }

    impl WindowProbe for FakeWindows {
        fn is_running(&self, kind: TerminalKind) -> bool {
            self.running.contains(&kind)
        }
        fn has_window_titled(&self, kind: TerminalKind, token: &str) -> bool {
            self.titled.contains(&(kind, token.to_string()))
        }
        fn resolves_tty(&self, kind: TerminalKind, tty: &str) -> bool {
            self.ttys.contains(&(kind, tty.to_string()))
        }
    }

    fn probe_with_panes(panes: &str) -> ProcessProbe {
        ProcessProbe::new(
            Box::new(StaticTmux {
                panes: panes.to_string(),
            }),
            Box::new(NoProcess),
        )
        .with_discovery(Box::new(Vec::new))
    }

    fn session(tty: Option<&str>) -> Session {
        Session::new("sess-1", "/Users/dev/project", tty, 0, Utc::now())
    }

    #[test]
    fn editor_hint_wins_over_terminal_hints() {
        let mut s = session(Some("/dev/ttys001"));
        s.editor_bundle_id = Some("dev.zed.Zed".to_string());
        s.editor_pid = Some(4321);
        s.actual_term_program = Some("ghostty".to_string());

        let mut probe = probe_with_panes("");
        let env = resolve(&s, &mut probe, &FakeWindows::default(), Instant::now());
        assert_eq!(
            env,
            FocusEnvironment::Editor {
                bundle_id: "dev.zed.Zed".to_string(),
                pid: Some(4321),
                pane: None,
            }
        );
    }

    #[test]
    fn observed_host_beats_self_reported_term_program() {
        let mut s = session(None);
        s.actual_term_program = Some("iTerm.app".to_string());
        s.term_program = Some("ghostty".to_string());

        let mut probe = probe_with_panes("");
        let env = resolve(&s, &mut probe, &FakeWindows::default(), Instant::now());
        match env {
            FocusEnvironment::Terminal { kind, .. } => assert_eq!(kind, TerminalKind::Iterm),
            other => panic!("unexpected environment: {:?}", other),
        }
    }

    #[test]
    fn unrecognized_term_program_falls_through_to_title_probe() {
        let mut s = session(Some("/dev/ttys001"));
        s.term_program = Some("tmux".to_string());

        let mut probe =
            probe_with_panes("/dev/ttys001\twork\t0\t0\tagent\t%1\n");
        let mut windows = FakeWindows::default();
        windows.running.insert(TerminalKind::WezTerm);
        windows
            .titled
            .insert((TerminalKind::WezTerm, "work".to_string()));

        let env = resolve(&s, &mut probe, &windows, Instant::now());
        match env {
            FocusEnvironment::Terminal { kind, pane, .. } => {
                assert_eq!(kind, TerminalKind::WezTerm);
                assert_eq!(pane.map(|p| p.session_name), Some("work".to_string()));
            }
            other => panic!("unexpected environment: {:?}", other),
        }
    }

    #[test]
    fn pane_without_identified_host_is_tmux_only() {
        let s = session(Some("/dev/ttys001"));
        let mut probe =
            probe_with_panes("/dev/ttys001\twork\t0\t0\tagent\t%1\n");

        let env = resolve(&s, &mut probe, &FakeWindows::default(), Instant::now());
        match env {
            FocusEnvironment::TmuxOnly { pane } => assert_eq!(pane.pane_id, "%1"),
            other => panic!("unexpected environment: {:?}", other),
        }
    }

    #[test]
    fn bare_tty_is_resolved_by_backend_ownership() {
        let s = session(Some("/dev/ttys007"));
        let mut probe = probe_with_panes("");
        let mut windows = FakeWindows::default();
        windows.running.insert(TerminalKind::AppleTerminal);
        windows
            .ttys
            .insert((TerminalKind::AppleTerminal, "/dev/ttys007".to_string()));

        let env = resolve(&s, &mut probe, &windows, Instant::now());
        match env {
            FocusEnvironment::Terminal { kind, pane, .. } => {
                assert_eq!(kind, TerminalKind::AppleTerminal);
                assert!(pane.is_none());
            }
            other => panic!("unexpected environment: {:?}", other),
        }
    }

    #[test]
    fn no_signals_resolves_unknown() {
        let s = session(None);
        let mut probe = probe_with_panes("");
        let env = resolve(&s, &mut probe, &FakeWindows::default(), Instant::now());
        assert_eq!(env, FocusEnvironment::Unknown);
    }

    #[test]
    fn term_program_table_covers_known_values() {
        assert_eq!(
            TerminalKind::from_term_program("ghostty"),
            Some(TerminalKind::Ghostty)
        );
        assert_eq!(
            TerminalKind::from_term_program("Apple_Terminal"),
            Some(TerminalKind::AppleTerminal)
        );
        assert_eq!(TerminalKind::from_term_program("alacritty"), None);
    }

    #[test]
    fn editor_table_prefers_cursor_over_generic_code() {
        assert_eq!(
            editor_bundle_for_process_name("Cursor Helper (Renderer)"),
            Some("com.todesktop.230313mzl4w4u92")
        );
        assert_eq!(
            editor_bundle_for_process_name("Code Helper"),
            Some("com.microsoft.VSCode")
        );
        assert_eq!(editor_bundle_for_process_name("zsh"), None);
    }
}
