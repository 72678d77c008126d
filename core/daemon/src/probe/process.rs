//! Process-table inspection via sysinfo.
//!
//! The process table is the ground truth for Codex discovery and for
//! walking hook processes up to their hosting editor or terminal. tty
//! names come from `ps` because the process table does not expose them.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::process::Command;
use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

/// Matches an argv[0] that is the codex CLI, with or without a path prefix.
static CODEX_ARGV0: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|/)codex$").unwrap());

const MAX_PARENT_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// A live codex CLI process and where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexProcess {
    pub pid: u32,
    pub cwd: String,
    pub tty: Option<String>,
}

pub trait ProcessQuery: Send {
    /// Ancestors of `pid`, nearest first, excluding `pid` itself.
    fn parent_chain(&mut self, pid: u32) -> Vec<ProcessInfo>;
    fn is_alive(&mut self, pid: u32) -> bool;
    fn codex_processes(&mut self) -> Vec<CodexProcess>;
}

pub struct SysinfoProcessQuery {
    system: System,
}

impl SysinfoProcessQuery {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProcessQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessQuery for SysinfoProcessQuery {
    fn parent_chain(&mut self, pid: u32) -> Vec<ProcessInfo> {
        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new());
        let mut chain = Vec::new();
        let mut current = Pid::from(pid as usize);
        for _ in 0..MAX_PARENT_DEPTH {
            let Some(process) = self.system.process(current) else {
                break;
            };
            let Some(parent) = process.parent() else {
                break;
            };
            let Some(parent_process) = self.system.process(parent) else {
                break;
            };
            chain.push(ProcessInfo {
                pid: parent.as_u32(),
                name: parent_process.name().to_string(),
            });
            current = parent;
        }
        chain
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from(pid as usize);
        self.system
            .refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
        self.system.process(sys_pid).is_some()
    }

    fn codex_processes(&mut self) -> Vec<CodexProcess> {
        self.system.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cmd(UpdateKind::Always)
                .with_cwd(UpdateKind::Always),
        );
        let ttys = tty_by_pid();
        let mut found = Vec::new();
        for (pid, process) in self.system.processes() {
            let argv0 = process
                .cmd()
                .first()
                .map(String::as_str)
                .unwrap_or_else(|| process.name());
            if !CODEX_ARGV0.is_match(argv0) {
                continue;
            }
            let Some(cwd) = process.cwd() else {
                continue;
            };
            let pid = pid.as_u32();
            found.push(CodexProcess {
                pid,
                cwd: cwd.to_string_lossy().to_string(),
                tty: ttys.get(&pid).cloned(),
            });
        }
        found.sort_by(|left, right| left.pid.cmp(&right.pid));
        found
    }
}

/// Reads controlling ttys from `ps`; empty map when `ps` is unavailable.
fn tty_by_pid() -> HashMap<u32, String> {
    let output = match Command::new("ps").args(["-axo", "pid=,tty="]).output() {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).to_string()
        }
        _ => return HashMap::new(),
    };
    parse_ps_ttys(&output)
}

fn parse_ps_ttys(output: &str) -> HashMap<u32, String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse::<u32>().ok()?;
            let tty = parts.next()?;
            if tty == "??" || tty == "?" {
                return None;
            }
            Some((pid, format!("/dev/{}", tty)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codex_argv0_matches_bare_and_pathed() {
        assert!(CODEX_ARGV0.is_match("codex"));
        assert!(CODEX_ARGV0.is_match("/usr/local/bin/codex"));
        assert!(CODEX_ARGV0.is_match("/Users/dev/.cargo/bin/codex"));
        assert!(!CODEX_ARGV0.is_match("codex-helper"));
        assert!(!CODEX_ARGV0.is_match("not-codex"));
        assert!(!CODEX_ARGV0.is_match("/bin/codexd"));
    }

    #[test]
    fn parse_ps_ttys_skips_detached_processes() {
        let raw = "  101 ttys001\n  102 ??\n  bad ttys002\n  103 ttys003\n";
        let ttys = parse_ps_ttys(raw);
        assert_eq!(ttys.get(&101).map(String::as_str), Some("/dev/ttys001"));
        assert_eq!(ttys.get(&102), None);
        assert_eq!(ttys.get(&103).map(String::as_str), Some("/dev/ttys003"));
        assert_eq!(ttys.len(), 2);
    }

    #[test]
    fn sysinfo_query_sees_current_process() {
        let mut query = SysinfoProcessQuery::new();
        assert!(query.is_alive(std::process::id()));
    }
}
