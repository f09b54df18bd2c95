//! Dispatch errors and the fault record.

use std::rc::Rc;

use thiserror::Error;

/// Error type returned by entry/exit/transition handlers, fallible guards
/// and fallible selectors. Any value becomes the `inner` of a [`Fault`].
pub type HandlerError = Box<dyn std::error::Error>;

/// Which component of a transition raised the captured error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultSource {
    Entry,
    Exit,
    Transition,
    Guard,
    Selector,
}

impl std::fmt::Display for FaultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultSource::Entry => "entry",
            FaultSource::Exit => "exit",
            FaultSource::Transition => "transition",
            FaultSource::Guard => "guard",
            FaultSource::Selector => "selector",
        };
        f.write_str(name)
    }
}

/// A captured handler error.
///
/// The kernel stores the first fault and refuses every operation except
/// `reset` from then on. `machine` names the machine owning the state whose
/// handler failed; `from`/`to` are the endpoints of the transition that was
/// executing.
#[derive(Clone, Debug)]
pub struct Fault {
    pub machine: String,
    pub source: FaultSource,
    pub from: Option<String>,
    pub to: Option<String>,
    pub event: String,
    pub inner: Rc<dyn std::error::Error>,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} handler failed during '{}' in machine '{}'",
            self.source, self.event, self.machine
        )?;
        if let (Some(from), Some(to)) = (&self.from, &self.to) {
            write!(f, " ({from} -> {to})")?;
        }
        write!(f, ": {}", self.inner)
    }
}

/// Errors raised when firing events or forcing transitions.
#[derive(Debug, Error)]
pub enum FireError {
    /// `fire` found no transition for the event at any level of the active
    /// hierarchy. Recoverable; `try_fire` reports the same outcome as
    /// `Ok(false)`.
    #[error("No transition for event '{event}' from state '{from}' in machine '{machine}'")]
    TransitionNotFound {
        event: String,
        from: String,
        machine: String,
    },

    /// A handler raised during this fire; the fault is now latched.
    #[error("Transition failed: {0}")]
    TransitionFailed(Fault),

    /// The machine tree is faulted; only `reset` can recover it.
    #[error("Machine tree is faulted: {0}")]
    MachineFaulted(Fault),

    /// The machine has no current state (initial state missing, or an
    /// inactive child machine was targeted).
    #[error("Machine '{machine}' has no current state")]
    InvalidState { machine: String },
}
