//! [`StateHistory`] – per-machine record of state entry and exit times.
//!
//! Used by the cooldown queries and by the time-in-state conditions. The
//! "time active in current state" clock pauses while the owning machine is
//! interrupted and picks up where it left off when the same state resumes.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use arbiter_runtime::history::StateHistory;
//!
//! let mut history = StateHistory::new();
//! let s = Duration::from_secs;
//!
//! history.enter("Pounce", s(0));
//! history.pause("Pounce", s(4));   // machine interrupted
//! history.resume("Pounce", s(10)); // machine resumed
//!
//! assert_eq!(history.time_in_current_state(s(11)), Some(s(5)));
//! assert!(!history.cooldown_expired("Pounce", s(30), s(11), true));
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StateRecord {
    last_entered: Option<Duration>,
    last_exited: Option<Duration>,
}

/// Entry/exit bookkeeping for one state machine.
#[derive(Debug, Clone, Default)]
pub struct StateHistory {
    records: BTreeMap<String, StateRecord>,
    current: Option<String>,
    /// Start of the current state's active time, shifted forward by every
    /// paused interval.
    active_since: Option<Duration>,
    paused_at: Option<Duration>,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh entry into `state`.
    pub fn enter(&mut self, state: &str, now: Duration) {
        self.records.entry(state.to_string()).or_default().last_entered = Some(now);
        self.current = Some(state.to_string());
        self.active_since = Some(now);
        self.paused_at = None;
    }

    /// Leave `state` for good.
    pub fn exit(&mut self, state: &str, now: Duration) {
        self.records.entry(state.to_string()).or_default().last_exited = Some(now);
        if self.current.as_deref() == Some(state) {
            self.current = None;
            self.active_since = None;
            self.paused_at = None;
        }
    }

    /// Leave `state` because the owning machine was deactivated. The active
    /// clock stops but is kept for a later [`resume`][Self::resume].
    pub fn pause(&mut self, state: &str, now: Duration) {
        self.records.entry(state.to_string()).or_default().last_exited = Some(now);
        if self.current.as_deref() == Some(state) {
            self.paused_at = Some(now);
        }
    }

    /// Re-enter `state` after a pause. Falls back to a fresh entry when the
    /// machine was paused in a different state.
    pub fn resume(&mut self, state: &str, now: Duration) {
        match (self.current.as_deref(), self.active_since, self.paused_at) {
            (Some(current), Some(since), Some(paused)) if current == state => {
                self.records.entry(state.to_string()).or_default().last_entered = Some(now);
                self.active_since = Some(since + now.saturating_sub(paused));
                self.paused_at = None;
            }
            _ => self.enter(state, now),
        }
    }

    pub fn current_state(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn last_entered(&self, state: &str) -> Option<Duration> {
        self.records.get(state).and_then(|r| r.last_entered)
    }

    pub fn last_exited(&self, state: &str) -> Option<Duration> {
        self.records.get(state).and_then(|r| r.last_exited)
    }

    /// Time since `state` was last left; `None` if it never was.
    pub fn time_since_exited(&self, state: &str, now: Duration) -> Option<Duration> {
        self.last_exited(state).map(|t| now.saturating_sub(t))
    }

    /// `true` once at least `threshold` has elapsed since `state` was last
    /// exited. A state never exited reports `value_if_never_run`.
    pub fn cooldown_expired(
        &self,
        state: &str,
        threshold: Duration,
        now: Duration,
        value_if_never_run: bool,
    ) -> bool {
        match self.time_since_exited(state, now) {
            Some(elapsed) => elapsed >= threshold,
            None => value_if_never_run,
        }
    }

    /// Pause-adjusted time the current state has been active.
    pub fn time_in_current_state(&self, now: Duration) -> Option<Duration> {
        let since = self.active_since?;
        let until = self.paused_at.unwrap_or(now);
        Some(until.saturating_sub(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn never_exited_uses_fallback() {
        let history = StateHistory::new();
        assert!(history.cooldown_expired("Pounce", s(5), s(100), true));
        assert!(!history.cooldown_expired("Pounce", s(5), s(100), false));
        assert_eq!(history.time_since_exited("Pounce", s(100)), None);
    }

    #[test]
    fn cooldown_counts_from_last_exit() {
        let mut history = StateHistory::new();
        history.enter("Pounce", s(0));
        history.exit("Pounce", s(10));

        assert!(!history.cooldown_expired("Pounce", s(5), s(14), true));
        assert!(history.cooldown_expired("Pounce", s(5), s(15), true));
        assert_eq!(history.time_since_exited("Pounce", s(18)), Some(s(8)));
    }

    #[test]
    fn zero_threshold_expires_immediately() {
        let mut history = StateHistory::new();
        history.enter("A", s(0));
        history.exit("A", s(3));
        assert!(history.cooldown_expired("A", Duration::ZERO, s(3), false));
    }

    #[test]
    fn paused_clock_does_not_advance() {
        let mut history = StateHistory::new();
        history.enter("Search", s(0));
        history.pause("Search", s(2));
        assert_eq!(history.time_in_current_state(s(50)), Some(s(2)));
        history.resume("Search", s(50));
        assert_eq!(history.time_in_current_state(s(51)), Some(s(3)));
        assert_eq!(history.last_entered("Search"), Some(s(50)));
    }

    #[test]
    fn resume_into_other_state_is_fresh() {
        let mut history = StateHistory::new();
        history.enter("Search", s(0));
        history.pause("Search", s(2));
        history.resume("GiveUp", s(7));
        assert_eq!(history.current_state(), Some("GiveUp"));
        assert_eq!(history.time_in_current_state(s(8)), Some(s(1)));
    }

    #[test]
    fn exit_clears_active_clock() {
        let mut history = StateHistory::new();
        history.enter("A", s(1));
        history.exit("A", s(2));
        assert_eq!(history.current_state(), None);
        assert_eq!(history.time_in_current_state(s(3)), None);
        assert_eq!(history.last_entered("A"), Some(s(1)));
        assert_eq!(history.last_exited("A"), Some(s(2)));
    }
}
