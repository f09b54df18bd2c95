//! Build errors for the machine construction surface.

use thiserror::Error;

/// Errors that can occur while declaring states, machines and transitions.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Initial state already set for machine '{machine}'")]
    AlreadyInitialized { machine: String },

    #[error("State '{state}' already has a transition for event '{event}'")]
    DuplicateTransition { state: String, event: String },

    #[error("State '{state}' already owns a child machine")]
    ChildMachineExists { state: String },

    #[error("Target state '{state}' does not belong to machine '{machine}'")]
    TargetNotInMachine { state: String, machine: String },

    #[error("Event '{event}' belongs to a different machine tree")]
    ForeignEvent { event: String },

    #[error("State '{state}' belongs to a different machine tree")]
    ForeignState { state: String },
}
