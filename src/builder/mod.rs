//! Fluent declaration of transitions.
//!
//! States and machines are created on [`Machine`](crate::Machine) and
//! [`State`](crate::State) directly; this module holds the transition
//! builder returned by `state.transition_on(&event)` and the errors the
//! construction surface can raise.

pub(crate) mod error;
pub(crate) mod transition;

pub use error::BuildError;
pub use transition::{Transition, TransitionBuilder};
