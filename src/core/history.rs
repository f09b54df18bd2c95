//! Transition log kept by the kernel.
//!
//! Every completed transition in a machine tree is appended to its tree's
//! log as a flat, serializable record. The log is diagnostics only: it is
//! never read back into a machine, and `reset` does not clear it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a recorded transition was triggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Ordinary event-driven transition to a fixed destination.
    External,
    /// Inner self-transition; no states were exited or entered.
    Inner,
    /// Event-driven transition whose destination came from a selector.
    Dynamic,
    /// Forced transition commanded from outside the event map.
    Forced,
}

/// Record of a single completed transition.
///
/// `from` is the deepest active state before the transition and `to` the
/// destination state; nested entry/exit steps in between are not recorded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub event: String,
    pub kind: TransitionKind,
    pub timestamp: DateTime<Utc>,
}

/// Ordered log of completed transitions for one machine tree.
///
/// # Example
///
/// ```rust
/// use substate::{Machine, TransitionKind};
///
/// let machine = Machine::new("door");
/// let closed = machine.create_initial_state("closed")?;
/// let open = machine.create_state("open");
/// let toggle = machine.create_event("toggle");
/// closed.transition_on(&toggle).to(&open)?;
///
/// toggle.fire()?;
///
/// let history = machine.history();
/// assert_eq!(history.len(), 1);
/// let record = history.last().unwrap();
/// assert_eq!(record.from, "closed");
/// assert_eq!(record.to, "open");
/// assert_eq!(record.kind, TransitionKind::External);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransitionLog {
    records: Vec<TransitionRecord>,
}

impl TransitionLog {
    /// Create a new empty log.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, record: TransitionRecord) {
        self.records.push(record);
    }

    /// All recorded transitions in completion order.
    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    /// The most recently completed transition.
    pub fn last(&self) -> Option<&TransitionRecord> {
        self.records.last()
    }

    /// Elapsed time between the first and last recorded transition.
    ///
    /// Returns `None` while the log is empty.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.records.first(), self.records.last()) {
            let duration = last.timestamp.signed_duration_since(first.timestamp);
            duration.to_std().ok()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::machine::Machine;

    fn two_state_machine() -> (Machine, crate::core::event::Event) {
        let machine = Machine::new("m");
        let a = machine.create_initial_state("a").unwrap();
        let b = machine.create_state("b");
        let go = machine.create_event("go");
        a.transition_on(&go).to(&b).unwrap();
        b.transition_on(&go).to(&a).unwrap();
        (machine, go)
    }

    #[test]
    fn new_log_is_empty() {
        let (machine, _go) = two_state_machine();
        let history = machine.history();
        assert!(history.is_empty());
        assert!(history.last().is_none());
        assert!(history.duration().is_none());
    }

    #[test]
    fn completed_transitions_are_recorded_in_order() {
        let (machine, go) = two_state_machine();
        go.fire().unwrap();
        go.fire().unwrap();

        let history = machine.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history.records()[0].from, "a");
        assert_eq!(history.records()[0].to, "b");
        assert_eq!(history.records()[1].from, "b");
        assert_eq!(history.records()[1].to, "a");
        assert_eq!(history.last().unwrap().event, "go");
    }

    #[test]
    fn unmatched_fire_is_not_recorded() {
        let machine = Machine::new("m");
        let _a = machine.create_initial_state("a").unwrap();
        let go = machine.create_event("go");

        assert!(!go.try_fire().unwrap());
        assert!(machine.history().is_empty());
    }

    #[test]
    fn duration_spans_first_to_last_record() {
        let (machine, go) = two_state_machine();
        go.fire().unwrap();
        assert_eq!(machine.history().duration(), Some(Duration::from_secs(0)));
        go.fire().unwrap();
        assert!(machine.history().duration().is_some());
    }

    #[test]
    fn log_serializes_correctly() {
        let (machine, go) = two_state_machine();
        go.fire().unwrap();

        let history = machine.history();
        let json = serde_json::to_string(&history).unwrap();
        let deserialized: TransitionLog = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.len(), history.len());
        assert_eq!(deserialized.records()[0].kind, TransitionKind::External);
    }
}
