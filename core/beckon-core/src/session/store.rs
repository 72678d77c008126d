//! Durable session registry.
//!
//! The source of truth for tracked sessions, keyed by identity key. Owns the
//! transition rule application, device-path eviction, duplicate-name
//! disambiguation, and display-order bookkeeping.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "updated_at": "2026-03-02T09:00:00Z",
//!   "sessions": {
//!     "session-abc:/dev/ttys001": { ... Session fields ... }
//!   }
//! }
//! ```
//!
//! Pretty-printed with sorted keys so diffs of the file stay readable.
//!
//! # Defensive Design
//!
//! Reads tolerate a missing file, an empty file, corrupt JSON, and an
//! unsupported version; all produce an empty store with a warning instead of
//! an error. Writes go through a temp file + rename under an exclusive
//! advisory lock, and the byte count on disk is verified after the rename.
//! A persistence failure is logged once per process lifetime and the store
//! keeps operating in memory so the running process stays consistent with
//! itself even when durability is lost.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use beckon_protocol::SessionEvent;

use crate::error::{BeckonError, Result};

use super::lockfile::StoreLock;
use super::transition::{self, change_for, StatusChange};
use super::types::{
    identity_key, path_basename, Session, SessionHints, SessionStatus,
};

pub const STORE_VERSION: u32 = 1;

// A failing disk fails on every ingest; one log line per process is enough.
static PERSIST_FAILURE_LOGGED: AtomicBool = AtomicBool::new(false);

/// The on-disk JSON structure for the state file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    updated_at: DateTime<Utc>,
    sessions: BTreeMap<String, Session>,
}

/// In-memory registry of session records, optionally backed by a file.
///
/// Create with [`SessionStore::load`] to read from the state file, or
/// [`SessionStore::new_in_memory`] for tests. Mutating operations persist
/// automatically when a file path is attached.
pub struct SessionStore {
    sessions: BTreeMap<String, Session>,
    file_path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new_in_memory() -> Self {
        SessionStore {
            sessions: BTreeMap::new(),
            file_path: None,
        }
    }

    pub fn new(file_path: &Path) -> Self {
        SessionStore {
            sessions: BTreeMap::new(),
            file_path: Some(file_path.to_path_buf()),
        }
    }

    /// Loads the registry from disk. Never fails: a missing, empty, corrupt,
    /// or incompatible file yields an empty store.
    pub fn load(file_path: &Path) -> Self {
        if !file_path.exists() {
            return SessionStore::new(file_path);
        }

        let content = match fs::read_to_string(file_path) {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "Failed to read session state file; starting empty");
                return SessionStore::new(file_path);
            }
        };

        if content.trim().is_empty() {
            warn!("Empty session state file; starting empty");
            return SessionStore::new(file_path);
        }

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(store_file) if store_file.version == STORE_VERSION => SessionStore {
                sessions: store_file.sessions,
                file_path: Some(file_path.to_path_buf()),
            },
            Ok(store_file) => {
                warn!(
                    version = store_file.version,
                    expected = STORE_VERSION,
                    "Unsupported session state file version; starting empty"
                );
                SessionStore::new(file_path)
            }
            Err(err) => {
                warn!(error = %err, "Failed to parse session state file; starting empty");
                SessionStore::new(file_path)
            }
        }
    }

    /// Writes the registry atomically under an exclusive advisory lock.
    /// No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let file_path = match &self.file_path {
            Some(path) => path,
            None => return Ok(()),
        };

        let store_file = StoreFile {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            sessions: self.sessions.clone(),
        };
        let content =
            serde_json::to_string_pretty(&store_file).map_err(|source| BeckonError::Json {
                context: "serialize session state".to_string(),
                source,
            })?;

        let parent_dir = file_path
            .parent()
            .ok_or_else(|| BeckonError::NoParentDir(file_path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|err| BeckonError::Io {
            context: "create state directory".to_string(),
            source: err.into(),
        })?;

        let _lock = StoreLock::acquire(file_path)?;

        let mut temp_file =
            NamedTempFile::new_in(parent_dir).map_err(|source| BeckonError::Io {
                context: "create temp state file".to_string(),
                source,
            })?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|source| BeckonError::Io {
                context: "write temp state file".to_string(),
                source,
            })?;
        temp_file.flush().map_err(|source| BeckonError::Io {
            context: "flush temp state file".to_string(),
            source,
        })?;
        temp_file
            .persist(file_path)
            .map_err(|err| BeckonError::Io {
                context: "persist state file".to_string(),
                source: err.error,
            })?;

        let found = fs::metadata(file_path)
            .map_err(|err| BeckonError::Io {
                context: "stat state file".to_string(),
                source: err.into(),
            })?
            .len();
        let expected = content.len() as u64;
        if found != expected {
            return Err(BeckonError::ShortWrite {
                path: file_path.clone(),
                expected,
                found,
            });
        }

        Ok(())
    }

    /// Applies one normalized event. Returns the resulting record, or `None`
    /// when the event removed the session or was dropped (flag-only event on
    /// an unknown key).
    pub fn ingest(
        &mut self,
        event: &SessionEvent,
        hints: &SessionHints,
        now: DateTime<Utc>,
    ) -> Option<Session> {
        let change = change_for(&event.kind);
        let key = identity_key(&event.session_id, event.tty.as_deref());

        if change == StatusChange::Remove {
            self.remove_for_end(&event.session_id, event.tty.as_deref());
            self.persist_after_change();
            return None;
        }

        if !self.sessions.contains_key(&key) && !change.creates_record() {
            return None;
        }

        let inherited_order = self.evict_tty_claimants(&key, event.tty.as_deref());

        if !self.sessions.contains_key(&key) {
            let display_order = inherited_order.unwrap_or_else(|| self.next_display_order());
            let cwd = event.cwd.as_deref().unwrap_or_default();
            self.sessions.insert(
                key.clone(),
                Session::new(&event.session_id, cwd, event.tty.as_deref(), display_order, now),
            );
        }

        let Some(session) = self.sessions.get_mut(&key) else {
            return None;
        };

        let was_running = session.status == SessionStatus::Running;
        transition::apply(session, change);
        if !was_running && session.status == SessionStatus::Running {
            session.is_acknowledged = false;
        }

        if let Some(cwd) = &event.cwd {
            if !cwd.is_empty() {
                session.cwd = cwd.clone();
            }
        }
        if session.term_program.is_none() {
            session.term_program = event.term_program.clone();
        }
        if session.tool.is_none() {
            session.tool = event.tool.clone();
        }
        session.merge_hints(hints);

        // Associations track the latest value, unlike hints.
        if let Some(artifact) = &event.artifact {
            session.artifact_url = Some(artifact.clone());
        }
        if let Some(summary) = &event.summary {
            session.summary = Some(summary.clone());
        }

        session.updated_at = now;

        self.apply_disambiguation();
        let snapshot = self.sessions.get(&key).cloned();
        self.persist_after_change();
        snapshot
    }

    pub fn acknowledge(&mut self, key: &str) -> bool {
        let Some(session) = self.sessions.get_mut(key) else {
            return false;
        };
        session.is_acknowledged = true;
        self.persist_after_change();
        true
    }

    pub fn clear_acknowledge(&mut self, key: &str) -> bool {
        let Some(session) = self.sessions.get_mut(key) else {
            return false;
        };
        session.is_acknowledged = false;
        self.persist_after_change();
        true
    }

    /// Stale-device-path cleanup. Distinct from deletion: the record is
    /// retained so a removal policy owned by a collaborator can still act.
    pub fn mark_stopped(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        let Some(session) = self.sessions.get_mut(key) else {
            return false;
        };
        session.status = SessionStatus::Stopped;
        session.waiting_reason = None;
        session.is_tool_running = false;
        session.updated_at = now;
        self.persist_after_change();
        true
    }

    pub fn update_tab_index(&mut self, key: &str, index: u32) -> bool {
        let Some(session) = self.sessions.get_mut(key) else {
            return false;
        };
        session.ghostty_tab_index = Some(index);
        self.persist_after_change();
        true
    }

    /// All records, ordered by display order for positional stability.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.key().cmp(&b.key()))
        });
        sessions
    }

    pub fn get(&self, key: &str) -> Option<&Session> {
        self.sessions.get(key)
    }

    /// Exact identity-key match first, then first record with a matching
    /// session id (for callers that don't know the device path).
    pub fn find(&self, target: &str) -> Option<&Session> {
        if let Some(session) = self.sessions.get(target) {
            return Some(session);
        }
        self.sessions
            .values()
            .find(|session| session.session_id == target)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Explicit reset; the only wholesale deletion.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.persist_after_change();
    }

    fn remove_for_end(&mut self, session_id: &str, tty: Option<&str>) {
        match tty {
            Some(tty) if !tty.is_empty() => {
                let key = identity_key(session_id, Some(tty));
                self.sessions.remove(&key);
            }
            // Without a device path the end event covers every record the
            // session id produced.
            _ => {
                self.sessions
                    .retain(|_, session| session.session_id != session_id);
            }
        }
    }

    /// Enforces the one-active-session-per-device-path invariant. Returns the
    /// display order to inherit when other claimants were evicted.
    fn evict_tty_claimants(&mut self, key: &str, tty: Option<&str>) -> Option<u64> {
        let tty = tty?;
        if tty.is_empty() {
            return None;
        }

        let evicted: Vec<String> = self
            .sessions
            .iter()
            .filter(|(existing_key, session)| {
                existing_key.as_str() != key && session.tty.as_deref() == Some(tty)
            })
            .map(|(existing_key, _)| existing_key.clone())
            .collect();

        let mut inherited: Option<u64> = None;
        for existing_key in evicted {
            if let Some(evicted_session) = self.sessions.remove(&existing_key) {
                debug!(key = %existing_key, tty = %tty, "Evicted prior session on device path");
                inherited = Some(match inherited {
                    None => evicted_session.display_order,
                    Some(order) => order.min(evicted_session.display_order),
                });
            }
        }
        inherited
    }

    fn next_display_order(&self) -> u64 {
        self.sessions
            .values()
            .map(|session| session.display_order)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Any basename shared by two or more sessions marks every member,
    /// permanently. Removal of a sibling does not clear the flag.
    fn apply_disambiguation(&mut self) {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for session in self.sessions.values() {
            *counts.entry(path_basename(&session.cwd)).or_insert(0) += 1;
        }
        let colliding: HashSet<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .map(|(name, _)| name.to_string())
            .collect();

        for session in self.sessions.values_mut() {
            if colliding.contains(path_basename(&session.cwd)) {
                session.is_disambiguated = true;
            }
        }
    }

    fn persist_after_change(&self) {
        if let Err(err) = self.save() {
            if !PERSIST_FAILURE_LOGGED.swap(true, Ordering::Relaxed) {
                warn!(error = %err, "Failed to persist session state; continuing in memory");
            }
        }
    }
}
