//! Autofocus scheduling: debounce, cooldown, and typing suppression.
//!
//! The controller only decides *when* a focus may fire; dispatching is the
//! caller's job. All timing flows through explicit `now` arguments so every
//! rule is testable without sleeping.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

pub const DEBOUNCE_MS: i64 = 500;
pub const TYPING_GUARD_SECS: f64 = 5.0;
pub const TYPING_GUARD_TEXT_FIELD_SECS: f64 = 10.0;
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY_MS: i64 = 1500;

/// Recent-keystroke signal used to avoid stealing focus mid-thought.
/// `None` means no information, which never suppresses.
pub trait TypingActivity {
    fn seconds_since_last_keystroke(&self) -> Option<f64>;
    fn is_text_field_focused(&self) -> bool;
}

/// Used where no keystroke observation is available.
pub struct NoTypingSignal;

impl TypingActivity for NoTypingSignal {
    fn seconds_since_last_keystroke(&self) -> Option<f64> {
        None
    }

    fn is_text_field_focused(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
struct PendingFocus {
    key: String,
    due_at: DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug)]
pub struct AutofocusController {
    enabled: bool,
    cooldown: Duration,
    pending: Option<PendingFocus>,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl AutofocusController {
    pub fn new(enabled: bool, cooldown_secs: u64) -> Self {
        Self {
            enabled,
            cooldown: Duration::seconds(cooldown_secs as i64),
            pending: None,
            cooldowns: HashMap::new(),
        }
    }

    /// A session entered a waiting state. The newest request replaces any
    /// pending one, collapsing bursts into a single focus of the latest
    /// waiter.
    pub fn note_waiting(&mut self, key: &str, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        let due_at = now + Duration::milliseconds(DEBOUNCE_MS);
        debug!(key = %key, "Autofocus scheduled");
        self.pending = Some(PendingFocus {
            key: key.to_string(),
            due_at,
            attempts: 0,
        });
    }

    /// Drops a pending focus for a session that no longer exists.
    pub fn cancel(&mut self, key: &str) {
        if self
            .pending
            .as_ref()
            .map(|pending| pending.key == key)
            .unwrap_or(false)
        {
            self.pending = None;
        }
    }

    /// Returns the session key to dispatch now, if any.
    pub fn tick(&mut self, typing: &dyn TypingActivity, now: DateTime<Utc>) -> Option<String> {
        let pending = self.pending.as_ref()?;
        if now < pending.due_at {
            return None;
        }

        if let Some(until) = self.cooldowns.get(&pending.key) {
            if now < *until {
                debug!(key = %pending.key, "Autofocus dropped by cooldown");
                self.pending = None;
                return None;
            }
        }

        if is_typing(typing) {
            let mut pending = self.pending.take()?;
            pending.attempts += 1;
            if pending.attempts >= MAX_ATTEMPTS {
                debug!(key = %pending.key, "Autofocus abandoned; user kept typing");
                return None;
            }
            pending.due_at = now + Duration::milliseconds(RETRY_DELAY_MS);
            self.pending = Some(pending);
            return None;
        }

        self.pending.take().map(|pending| pending.key)
    }

    /// Records the dispatch outcome. Only a dispatch that acted starts the
    /// per-session cooldown; a miss may retry as soon as the session waits
    /// again.
    pub fn note_result(&mut self, key: &str, acted: bool, now: DateTime<Utc>) {
        self.cooldowns.retain(|_, until| *until > now);
        if acted {
            self.cooldowns.insert(key.to_string(), now + self.cooldown);
        }
    }

    /// Forgets the cooldown for a session, letting the next waiting
    /// transition focus immediately. Used when a stopped session revives.
    pub fn clear_cooldown(&mut self, key: &str) {
        self.cooldowns.remove(key);
    }
}

fn is_typing(typing: &dyn TypingActivity) -> bool {
    let Some(age) = typing.seconds_since_last_keystroke() else {
        return false;
    };
    let guard = if typing.is_text_field_focused() {
        TYPING_GUARD_TEXT_FIELD_SECS
    } else {
        TYPING_GUARD_SECS
    };
    age < guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    struct Typing {
        age: Option<f64>,
        text_field: bool,
    }

    impl TypingActivity for Typing {
        fn seconds_since_last_keystroke(&self) -> Option<f64> {
            self.age
        }
        fn is_text_field_focused(&self) -> bool {
            self.text_field
        }
    }

    #[test]
    fn fires_only_after_debounce() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);

        assert_eq!(controller.tick(&NoTypingSignal, start + Duration::milliseconds(100)), None);
        assert_eq!(
            controller.tick(&NoTypingSignal, start + Duration::milliseconds(600)),
            Some("a".to_string())
        );
        // consumed
        assert_eq!(controller.tick(&NoTypingSignal, start + Duration::seconds(2)), None);
    }

    #[test]
    fn newer_request_replaces_pending() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);
        controller.note_waiting("b", start + Duration::milliseconds(200));

        // a's original due time passes without firing
        assert_eq!(controller.tick(&NoTypingSignal, start + Duration::milliseconds(600)), None);
        assert_eq!(
            controller.tick(&NoTypingSignal, start + Duration::milliseconds(800)),
            Some("b".to_string())
        );
    }

    #[test]
    fn acted_dispatch_starts_cooldown() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);
        let fired = controller.tick(&NoTypingSignal, start + Duration::seconds(1));
        assert_eq!(fired, Some("a".to_string()));
        controller.note_result("a", true, start + Duration::seconds(1));

        controller.note_waiting("a", start + Duration::seconds(2));
        assert_eq!(controller.tick(&NoTypingSignal, start + Duration::seconds(3)), None);

        controller.note_waiting("a", start + Duration::seconds(40));
        assert_eq!(
            controller.tick(&NoTypingSignal, start + Duration::seconds(41)),
            Some("a".to_string())
        );
    }

    #[test]
    fn missed_dispatch_skips_cooldown() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);
        controller.tick(&NoTypingSignal, start + Duration::seconds(1));
        controller.note_result("a", false, start + Duration::seconds(1));

        controller.note_waiting("a", start + Duration::seconds(2));
        assert_eq!(
            controller.tick(&NoTypingSignal, start + Duration::seconds(3)),
            Some("a".to_string())
        );
    }

    #[test]
    fn cooldown_is_per_session() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);
        controller.tick(&NoTypingSignal, start + Duration::seconds(1));
        controller.note_result("a", true, start + Duration::seconds(1));

        controller.note_waiting("b", start + Duration::seconds(2));
        assert_eq!(
            controller.tick(&NoTypingSignal, start + Duration::seconds(3)),
            Some("b".to_string())
        );
    }

    #[test]
    fn typing_reschedules_then_fires() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);

        let typing = Typing {
            age: Some(1.0),
            text_field: false,
        };
        assert_eq!(controller.tick(&typing, start + Duration::seconds(1)), None);

        let idle = Typing {
            age: Some(20.0),
            text_field: false,
        };
        assert_eq!(
            controller.tick(&idle, start + Duration::seconds(3)),
            Some("a".to_string())
        );
    }

    #[test]
    fn persistent_typing_abandons_after_max_attempts() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);

        let typing = Typing {
            age: Some(0.5),
            text_field: false,
        };
        let mut now = start + Duration::seconds(1);
        for _ in 0..MAX_ATTEMPTS {
            assert_eq!(controller.tick(&typing, now), None);
            now = now + Duration::seconds(2);
        }
        // abandoned: even an idle tick finds nothing pending
        assert_eq!(controller.tick(&NoTypingSignal, now + Duration::seconds(5)), None);
    }

    #[test]
    fn text_field_focus_widens_the_guard() {
        let in_field = Typing {
            age: Some(7.0),
            text_field: true,
        };
        let elsewhere = Typing {
            age: Some(7.0),
            text_field: false,
        };
        assert!(is_typing(&in_field));
        assert!(!is_typing(&elsewhere));
    }

    #[test]
    fn no_keystroke_signal_never_suppresses() {
        assert!(!is_typing(&NoTypingSignal));
    }

    #[test]
    fn clear_cooldown_permits_immediate_refire() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);
        controller.tick(&NoTypingSignal, start + Duration::seconds(1));
        controller.note_result("a", true, start + Duration::seconds(1));

        controller.clear_cooldown("a");
        controller.note_waiting("a", start + Duration::seconds(2));
        assert_eq!(
            controller.tick(&NoTypingSignal, start + Duration::seconds(3)),
            Some("a".to_string())
        );
    }

    #[test]
    fn disabled_controller_schedules_nothing() {
        let mut controller = AutofocusController::new(false, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);
        assert_eq!(controller.tick(&NoTypingSignal, start + Duration::seconds(1)), None);
    }

    #[test]
    fn cancel_drops_only_matching_pending() {
        let mut controller = AutofocusController::new(true, 30);
        let start = at("2026-03-01T10:00:00Z");
        controller.note_waiting("a", start);
        controller.cancel("b");
        assert_eq!(
            controller.tick(&NoTypingSignal, start + Duration::seconds(1)),
            Some("a".to_string())
        );

        controller.note_waiting("a", start + Duration::seconds(2));
        controller.cancel("a");
        assert_eq!(controller.tick(&NoTypingSignal, start + Duration::seconds(3)), None);
    }
}
