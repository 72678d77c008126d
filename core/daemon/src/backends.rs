//! Focus capability contracts and their scripted implementations.
//!
//! Backends never launch applications and never return errors: each call
//! answers "did this focus action land" as a bool, and any automation
//! failure (app gone, scripting denied, no such window) reads as `false`.
//! The dispatcher decides what a failure means.

use std::process::Command;
use std::sync::Arc;

use crate::resolver::{TerminalKind, WindowProbe};

pub trait FocusBackend {
    fn is_running(&self) -> bool;
    /// Brings the application frontmost. Callers check `is_running` first
    /// so this never doubles as a launcher.
    fn activate(&self) -> bool;
    fn has_window_titled(&self, token: &str) -> bool;
    fn resolves_tty(&self, tty: &str) -> bool;
    fn focus_by_stable_index(&self, index: u32) -> bool;
    fn focus_by_title_token(&self, token: &str) -> bool;
    fn focus_by_name_search(&self, name: &str) -> bool;
}

/// Executes automation scripts; `None` means the tool itself failed.
pub trait ScriptRunner: Send + Sync {
    fn run(&self, script: &str) -> Option<String>;
}

pub struct OsaScriptRunner;

impl ScriptRunner for OsaScriptRunner {
    fn run(&self, script: &str) -> Option<String> {
        match Command::new("osascript").arg("-e").arg(script).output() {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            _ => None,
        }
    }
}

/// Quotes a value as an AppleScript string literal.
fn script_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

fn is_true(output: Option<String>) -> bool {
    output.as_deref() == Some("true")
}

pub struct TerminalBackend {
    kind: TerminalKind,
    runner: Arc<dyn ScriptRunner>,
}

impl TerminalBackend {
    pub fn new(kind: TerminalKind, runner: Arc<dyn ScriptRunner>) -> Self {
        Self { kind, runner }
    }

    fn bundle_id(&self) -> &'static str {
        match self.kind {
            TerminalKind::Ghostty => "com.mitchellh.ghostty",
            TerminalKind::AppleTerminal => "com.apple.Terminal",
            TerminalKind::Iterm => "com.googlecode.iterm2",
            TerminalKind::WezTerm => "com.github.wez.wezterm",
        }
    }

    fn process_name(&self) -> &'static str {
        self.kind.display_name()
    }

    fn raise_window_containing(&self, needle: &str) -> bool {
        let script = format!(
            "tell application \"System Events\" to tell process {process}\n\
             perform action \"AXRaise\" of (first window whose name contains {needle})\n\
             set frontmost to true\n\
             end tell",
            process = script_quote(self.process_name()),
            needle = script_quote(needle),
        );
        self.runner.run(&script).is_some()
    }
}

impl FocusBackend for TerminalBackend {
    fn is_running(&self) -> bool {
        let script = format!("application id {} is running", script_quote(self.bundle_id()));
        is_true(self.runner.run(&script))
    }

    fn activate(&self) -> bool {
        let script = format!("tell application id {} to activate", script_quote(self.bundle_id()));
        self.runner.run(&script).is_some()
    }

    fn has_window_titled(&self, token: &str) -> bool {
        let script = format!(
            "tell application \"System Events\" to tell process {process} to exists \
             (first window whose name contains {token})",
            process = script_quote(self.process_name()),
            token = script_quote(token),
        );
        is_true(self.runner.run(&script))
    }

    fn resolves_tty(&self, tty: &str) -> bool {
        let script = match self.kind {
            TerminalKind::AppleTerminal => format!(
                "tell application \"Terminal\"\n\
                 repeat with w in windows\n\
                 repeat with t in tabs of w\n\
                 if tty of t is {tty} then return \"true\"\n\
                 end repeat\n\
                 end repeat\n\
                 return \"false\"\n\
                 end tell",
                tty = script_quote(tty),
            ),
            TerminalKind::Iterm => format!(
                "tell application \"iTerm2\"\n\
                 repeat with w in windows\n\
                 repeat with t in tabs of w\n\
                 repeat with s in sessions of t\n\
                 if tty of s is {tty} then return \"true\"\n\
                 end repeat\n\
                 end repeat\n\
                 end repeat\n\
                 return \"false\"\n\
                 end tell",
                tty = script_quote(tty),
            ),
            // No scripting dictionary exposes ttys in these.
            TerminalKind::Ghostty | TerminalKind::WezTerm => return false,
        };
        is_true(self.runner.run(&script))
    }

    fn focus_by_stable_index(&self, index: u32) -> bool {
        // Standard cmd+digit tab selection; only the first nine tabs have one.
        if self.kind != TerminalKind::Ghostty || index >= 9 {
            return false;
        }
        let script = format!(
            "tell application \"System Events\" to tell process {process} to \
             keystroke \"{digit}\" using {{command down}}",
            process = script_quote(self.process_name()),
            digit = index + 1,
        );
        self.runner.run(&script).is_some()
    }

    fn focus_by_title_token(&self, token: &str) -> bool {
        self.raise_window_containing(token)
    }

    fn focus_by_name_search(&self, name: &str) -> bool {
        self.raise_window_containing(name)
    }
}

pub struct EditorBackend {
    bundle_id: String,
    pid: Option<u32>,
    runner: Arc<dyn ScriptRunner>,
}

impl EditorBackend {
    pub fn new(bundle_id: &str, pid: Option<u32>, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            bundle_id: bundle_id.to_string(),
            pid,
            runner,
        }
    }

    fn raise_window_containing(&self, needle: &str) -> bool {
        let script = format!(
            "tell application \"System Events\" to tell \
             (first process whose bundle identifier is {bundle})\n\
             perform action \"AXRaise\" of (first window whose name contains {needle})\n\
             set frontmost to true\n\
             end tell",
            bundle = script_quote(&self.bundle_id),
            needle = script_quote(needle),
        );
        self.runner.run(&script).is_some()
    }
}

impl FocusBackend for EditorBackend {
    fn is_running(&self) -> bool {
        if let Some(pid) = self.pid {
            let script = format!(
                "tell application \"System Events\" to exists (first process whose unix id is {})",
                pid
            );
            if is_true(self.runner.run(&script)) {
                return true;
            }
        }
        let script = format!("application id {} is running", script_quote(&self.bundle_id));
        is_true(self.runner.run(&script))
    }

    fn activate(&self) -> bool {
        // pid pins the exact editor instance; bundle activation is the
        // fallback when the recorded pid has died or was never known.
        if let Some(pid) = self.pid {
            let script = format!(
                "tell application \"System Events\" to set frontmost of \
                 (first process whose unix id is {}) to true",
                pid
            );
            if self.runner.run(&script).is_some() {
                return true;
            }
        }
        let script = format!(
            "tell application id {} to activate",
            script_quote(&self.bundle_id)
        );
        self.runner.run(&script).is_some()
    }

    fn has_window_titled(&self, token: &str) -> bool {
        let script = format!(
            "tell application \"System Events\" to tell \
             (first process whose bundle identifier is {bundle}) to exists \
             (first window whose name contains {token})",
            bundle = script_quote(&self.bundle_id),
            token = script_quote(token),
        );
        is_true(self.runner.run(&script))
    }

    fn resolves_tty(&self, _tty: &str) -> bool {
        false
    }

    fn focus_by_stable_index(&self, _index: u32) -> bool {
        false
    }

    fn focus_by_title_token(&self, token: &str) -> bool {
        self.raise_window_containing(token)
    }

    fn focus_by_name_search(&self, name: &str) -> bool {
        self.raise_window_containing(name)
    }
}

/// Hands out backends for whatever the resolver identified.
pub trait FocusBackends: WindowProbe {
    fn terminal(&self, kind: TerminalKind) -> Box<dyn FocusBackend>;
    fn editor(&self, bundle_id: &str, pid: Option<u32>) -> Box<dyn FocusBackend>;
}

pub struct BackendRegistry {
    runner: Arc<dyn ScriptRunner>,
}

impl BackendRegistry {
    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        Self { runner }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(OsaScriptRunner))
    }
}

impl FocusBackends for BackendRegistry {
    fn terminal(&self, kind: TerminalKind) -> Box<dyn FocusBackend> {
        Box::new(TerminalBackend::new(kind, Arc::clone(&self.runner)))
    }

    fn editor(&self, bundle_id: &str, pid: Option<u32>) -> Box<dyn FocusBackend> {
        Box::new(EditorBackend::new(bundle_id, pid, Arc::clone(&self.runner)))
    }
}

impl WindowProbe for BackendRegistry {
    fn is_running(&self, kind: TerminalKind) -> bool {
        self.terminal(kind).is_running()
    }

    fn has_window_titled(&self, kind: TerminalKind, token: &str) -> bool {
        self.terminal(kind).has_window_titled(token)
    }

    fn resolves_tty(&self, kind: TerminalKind, tty: &str) -> bool {
        self.terminal(kind).resolves_tty(tty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeRunner {
        scripts: Mutex<Vec<String>>,
        response: Option<String>,
    }

    impl FakeRunner {
        fn returning(response: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(Vec::new()),
                response: response.map(str::to_string),
            })
        }

        fn last_script(&self) -> String {
            self.scripts
                .lock()
                .expect("lock")
                .last()
                .cloned()
                .unwrap_or_default()
        }
    }

    impl ScriptRunner for FakeRunner {
        fn run(&self, script: &str) -> Option<String> {
            self.scripts.lock().expect("lock").push(script.to_string());
            self.response.clone()
        }
    }

    #[test]
    fn terminal_is_running_parses_boolean_output() {
        let runner = FakeRunner::returning(Some("true"));
        let backend = TerminalBackend::new(TerminalKind::Ghostty, runner.clone());
        assert!(backend.is_running());
        assert!(runner.last_script().contains("com.mitchellh.ghostty"));

        let runner = FakeRunner::returning(Some("false"));
        let backend = TerminalBackend::new(TerminalKind::Ghostty, runner);
        assert!(!backend.is_running());
    }

    #[test]
    fn script_failure_reads_as_false() {
        let runner = FakeRunner::returning(None);
        let backend = TerminalBackend::new(TerminalKind::Iterm, runner);
        assert!(!backend.has_window_titled("work"));
        assert!(!backend.activate());
    }

    #[test]
    fn title_tokens_are_quoted_into_scripts() {
        let runner = FakeRunner::returning(Some(""));
        let backend = TerminalBackend::new(TerminalKind::WezTerm, runner.clone());
        backend.focus_by_title_token("my \"quoted\" session");
        assert!(runner.last_script().contains("my \\\"quoted\\\" session"));
    }

    #[test]
    fn stable_index_is_ghostty_only_and_bounded() {
        let runner = FakeRunner::returning(Some(""));
        let ghostty = TerminalBackend::new(TerminalKind::Ghostty, runner.clone());
        assert!(ghostty.focus_by_stable_index(2));
        assert!(runner.last_script().contains("keystroke \"3\""));
        assert!(!ghostty.focus_by_stable_index(9));

        let wezterm = TerminalBackend::new(TerminalKind::WezTerm, FakeRunner::returning(Some("")));
        assert!(!wezterm.focus_by_stable_index(0));
    }

    #[test]
    fn tty_resolution_limited_to_scriptable_terminals() {
        let runner = FakeRunner::returning(Some("true"));
        assert!(TerminalBackend::new(TerminalKind::AppleTerminal, runner.clone())
            .resolves_tty("/dev/ttys003"));
        assert!(TerminalBackend::new(TerminalKind::Iterm, runner.clone())
            .resolves_tty("/dev/ttys003"));
        assert!(!TerminalBackend::new(TerminalKind::Ghostty, runner.clone())
            .resolves_tty("/dev/ttys003"));
        assert!(!TerminalBackend::new(TerminalKind::WezTerm, runner).resolves_tty("/dev/ttys003"));
    }

    #[test]
    fn editor_activation_prefers_pid() {
        let runner = FakeRunner::returning(Some(""));
        let backend = EditorBackend::new("com.microsoft.VSCode", Some(5150), runner.clone());
        assert!(backend.activate());
        assert!(runner.last_script().contains("unix id is 5150"));
    }

    #[test]
    fn editor_without_pid_activates_by_bundle() {
        let runner = FakeRunner::returning(Some(""));
        let backend = EditorBackend::new("dev.zed.Zed", None, runner.clone());
        assert!(backend.activate());
        assert!(runner.last_script().contains("application id \"dev.zed.Zed\""));
    }
}
