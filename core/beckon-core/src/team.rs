//! Agent-team collapsing.
//!
//! Multi-agent runs spawn sibling sessions in the same multiplexer window
//! and working directory. For display and counting only the leader (the
//! earliest-created sibling) matters; the rest are filtered out. This is a
//! pre-filter over a snapshot, never a mutation of the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::session::types::Session;

/// Pane coordinates for a device path that resolves to a live multiplexer
/// pane. Sessions without one pass through the filter ungrouped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneLocation {
    pub session_name: String,
    pub window_index: u32,
}

type GroupKey = (String, u32, String);

/// Collapses each (multiplexer session, window, cwd) group to its leader.
/// `panes` maps device paths to resolved pane coordinates; sessions without
/// a device path or without a resolvable pane are kept as-is.
pub fn collapse_teams(
    sessions: Vec<Session>,
    panes: &HashMap<String, PaneLocation>,
) -> Vec<Session> {
    let mut leaders: HashMap<GroupKey, (DateTime<Utc>, String)> = HashMap::new();

    for session in &sessions {
        if let Some(group) = group_key(session, panes) {
            let candidate = (session.created_at, session.key());
            leaders
                .entry(group)
                .and_modify(|leader| {
                    if candidate < *leader {
                        *leader = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }
    }

    sessions
        .into_iter()
        .filter(|session| match group_key(session, panes) {
            Some(group) => leaders
                .get(&group)
                .map(|(_, leader_key)| *leader_key == session.key())
                .unwrap_or(true),
            None => true,
        })
        .collect()
}

fn group_key(session: &Session, panes: &HashMap<String, PaneLocation>) -> Option<GroupKey> {
    let tty = session.tty.as_deref()?;
    let pane = panes.get(tty)?;
    Some((
        pane.session_name.clone(),
        pane.window_index,
        session.cwd.clone(),
    ))
}
