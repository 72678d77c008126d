//! External process probing with explicit TTL caches.
//!
//! Everything here is an observation of mutable system state: tmux pane
//! geometry, attach state, client host applications, extra server sockets.
//! Results are cached for short, per-concern TTLs so hot paths (list
//! requests, autofocus ticks) do not fork subprocesses on every call.
//! Anything that changes window or pane layout must call [`ProcessProbe::invalidate`]
//! afterwards so the next read observes the new layout.

pub mod cache;
pub mod process;
pub mod tmux;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::resolver::TerminalKind;
use cache::{TtlCell, TtlMap};
use process::{CodexProcess, ProcessInfo, ProcessQuery, SysinfoProcessQuery};
use tmux::{ClientInfo, CommandTmuxAdapter, PaneInfo, TmuxAdapter};

pub const PANE_TTL: Duration = Duration::from_secs(5);
pub const CLIENT_APP_TTL: Duration = Duration::from_secs(60);
pub const ATTACH_TTL: Duration = Duration::from_secs(5);
pub const SOCKET_TTL: Duration = Duration::from_secs(30);

pub struct ProcessProbe {
    tmux: Box<dyn TmuxAdapter>,
    process: Box<dyn ProcessQuery>,
    discover: Box<dyn Fn() -> Vec<PathBuf> + Send>,
    panes: TtlCell<Vec<PaneInfo>>,
    attach: TtlCell<HashMap<String, bool>>,
    client_apps: TtlMap<u32, Option<TerminalKind>>,
    sockets: TtlCell<Vec<PathBuf>>,
}

impl ProcessProbe {
    pub fn new(tmux: Box<dyn TmuxAdapter>, process: Box<dyn ProcessQuery>) -> Self {
        Self {
            tmux,
            process,
            discover: Box::new(tmux::discover_sockets),
            panes: TtlCell::new(PANE_TTL),
            attach: TtlCell::new(ATTACH_TTL),
            client_apps: TtlMap::new(CLIENT_APP_TTL),
            sockets: TtlCell::new(SOCKET_TTL),
        }
    }

    /// Probe backed by real tmux and the live process table.
    pub fn system() -> Self {
        Self::new(
            Box::new(CommandTmuxAdapter),
            Box::new(SysinfoProcessQuery::new()),
        )
    }

    #[cfg(test)]
    pub fn with_discovery(mut self, discover: Box<dyn Fn() -> Vec<PathBuf> + Send>) -> Self {
        self.discover = discover;
        self
    }

    /// Drops every cached observation. Called after any action that could
    /// have changed window, pane, or client layout.
    pub fn invalidate(&mut self) {
        self.panes.invalidate();
        self.attach.invalidate();
        self.client_apps.invalidate();
        self.sockets.invalidate();
        debug!("Probe caches invalidated");
    }

    /// All panes across the default server and any discovered extra sockets.
    pub fn panes(&mut self, now: Instant) -> Vec<PaneInfo> {
        if let Some(panes) = self.panes.get(now) {
            return panes;
        }
        let mut panes = Vec::new();
        for socket in self.socket_targets(now) {
            let output = self
                .tmux
                .query(socket.as_deref(), &["list-panes", "-a", "-F", tmux::PANE_FORMAT]);
            panes.extend(tmux::parse_panes(&output, socket.as_deref()));
        }
        self.panes.put(panes.clone(), now);
        panes
    }

    pub fn pane_for_tty(&mut self, tty: &str, now: Instant) -> Option<PaneInfo> {
        self.panes(now).into_iter().find(|pane| pane.tty == tty)
    }

    /// Whether any client is attached to the named session; `None` when the
    /// session is unknown to every reachable server.
    pub fn attach_state(&mut self, session_name: &str, now: Instant) -> Option<bool> {
        if let Some(states) = self.attach.get(now) {
            return states.get(session_name).copied();
        }
        let mut states = HashMap::new();
        for socket in self.socket_targets(now) {
            let output = self.tmux.query(
                socket.as_deref(),
                &["list-sessions", "-F", tmux::SESSION_FORMAT],
            );
            states.extend(tmux::parse_attach_states(&output));
        }
        let state = states.get(session_name).copied();
        self.attach.put(states, now);
        state
    }

    /// First client attached to the named session, searched across sockets.
    pub fn client_for_session(&mut self, session_name: &str, now: Instant) -> Option<ClientInfo> {
        for socket in self.socket_targets(now) {
            let output = self
                .tmux
                .query(socket.as_deref(), &["list-clients", "-F", tmux::CLIENT_FORMAT]);
            if let Some(client) = tmux::parse_clients(&output, socket.as_deref())
                .into_iter()
                .find(|client| client.session_name == session_name)
            {
                return Some(client);
            }
        }
        None
    }

    /// The terminal application hosting a tmux client, identified by walking
    /// the client process's ancestry. Negative results are cached too so a
    /// client inside an unknown host does not trigger repeated walks.
    pub fn terminal_for_client(&mut self, client_pid: u32, now: Instant) -> Option<TerminalKind> {
        if let Some(cached) = self.client_apps.get(&client_pid, now) {
            return cached;
        }
        let kind = self
            .process
            .parent_chain(client_pid)
            .iter()
            .find_map(|ancestor| TerminalKind::from_process_name(&ancestor.name));
        self.client_apps.put(client_pid, kind, now);
        kind
    }

    /// Visible contents of the pane on `tty`; `None` when no pane matches.
    pub fn capture_pane_tail(&mut self, tty: &str, now: Instant) -> Option<String> {
        let pane = self.pane_for_tty(tty, now)?;
        let output = self.tmux.query(
            pane.socket.as_deref(),
            &["capture-pane", "-p", "-t", &pane.pane_id],
        );
        if output.is_empty() {
            None
        } else {
            Some(output)
        }
    }

    /// Makes the pane the active one: moves any attached client to the
    /// session, selects its window, then the pane itself.
    pub fn select_pane(&mut self, pane: &PaneInfo, now: Instant) -> Result<(), String> {
        let socket = pane.socket.clone();
        if let Some(client) = self.client_for_session(&pane.session_name, now) {
            let _ = self.tmux.command(
                socket.as_deref(),
                &["switch-client", "-c", &client.tty, "-t", &pane.session_name],
            );
        }
        self.tmux
            .command(socket.as_deref(), &["select-window", "-t", &pane.window_target()])?;
        self.tmux
            .command(socket.as_deref(), &["select-pane", "-t", &pane.pane_id])
    }

    /// Writes a marker into the pane title so the hosting window can be
    /// found by title search.
    pub fn set_pane_title(&mut self, pane: &PaneInfo, title: &str) -> Result<(), String> {
        self.tmux.command(
            pane.socket.as_deref(),
            &["select-pane", "-t", &pane.pane_id, "-T", title],
        )
    }

    pub fn parent_chain(&mut self, pid: u32) -> Vec<ProcessInfo> {
        self.process.parent_chain(pid)
    }

    pub fn is_pid_alive(&mut self, pid: u32) -> bool {
        self.process.is_alive(pid)
    }

    pub fn codex_processes(&mut self) -> Vec<CodexProcess> {
        self.process.codex_processes()
    }

    fn socket_targets(&mut self, now: Instant) -> Vec<Option<PathBuf>> {
        let extra = match self.sockets.get(now) {
            Some(sockets) => sockets,
            None => {
                let sockets = (self.discover)();
                self.sockets.put(sockets.clone(), now);
                sockets
            }
        };
        let mut targets = vec![None];
        targets.extend(extra.into_iter().map(Some));
        targets
    }
}
