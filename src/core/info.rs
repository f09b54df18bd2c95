//! Descriptors passed to handlers.
//!
//! Handlers never receive a live machine pointer. They get small immutable
//! records describing the transition in flight; the `State` handles inside
//! them are read-only views that can be compared and named.

use crate::core::state::State;

/// View of the transition handed to guards and transition handlers.
///
/// `from` is the deepest active state before the transition, `to` the
/// destination named (or selected) by the transition. `data` carries the
/// typed payload of the fired event, and is `None` for forced transitions.
#[derive(Debug)]
pub struct TransitionInfo<'a, T = ()> {
    pub from: State,
    pub to: State,
    pub event: String,
    pub is_inner: bool,
    pub data: Option<&'a T>,
}

/// View of the transition handed to entry and exit handlers.
///
/// For an exit handler `from` is the state being exited; for an entry
/// handler `from` is the state the whole transition started from and `to`
/// the state being entered. Entry/exit handlers are untyped: a state cannot
/// know which event's payload type reached it.
#[derive(Clone, Debug)]
pub struct StateHandlerInfo {
    pub from: State,
    pub to: State,
    pub event: String,
}
