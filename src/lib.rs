//! substate: hierarchical state machines with run-to-completion dispatch.
//!
//! A machine is a tree of nested sub-machines. States may own child
//! machines, events bubble from the deepest active state to its ancestors,
//! and a transition runs its exit chain, transition handler and entry chain
//! across the least common ancestor of its endpoints. Fires issued from
//! inside handlers are queued and run strictly after the current transition
//! completes; a handler error latches the whole tree into a fault that only
//! `reset` clears.
//!
//! # Core Concepts
//!
//! - **Machine**: an ordered collection of states with an initial state and
//!   a current-state pointer; the root of a tree, or nested under a state
//! - **State**: a named node with optional entry/exit handlers and at most
//!   one child machine
//! - **Event**: an externally fired trigger, optionally typed with a payload
//! - **Guard**: a pure predicate deciding whether a transition may fire
//!
//! # Example
//!
//! ```rust
//! use substate::Machine;
//!
//! let machine = Machine::new("door");
//! let closed = machine.create_initial_state("closed")?;
//! let open = machine.create_state("open");
//! let toggle = machine.create_event("toggle");
//!
//! closed.transition_on(&toggle).to(&open)?;
//! open.transition_on(&toggle).to(&closed)?;
//!
//! toggle.fire()?;
//! assert_eq!(machine.current_state(), Some(open.clone()));
//! toggle.fire()?;
//! assert!(closed.is_current());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod core;
pub mod runtime;

// Re-export commonly used types
pub use self::core::{
    Event, Guard, State, StateHandlerInfo, TransitionInfo, TransitionKind, TransitionLog,
    TransitionRecord,
};
pub use builder::{BuildError, Transition, TransitionBuilder};
pub use runtime::{
    DispatchAction, Fault, FaultSource, FireError, FireMethod, HandlerError, Machine,
    MachineStatus, ResetAction, Synchronizer,
};
