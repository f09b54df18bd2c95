//! Stored transition entries and the erased closures inside them.
//!
//! The per-state transition table is untyped; the typed payload of an event
//! is erased to `dyn Any` at the fire boundary and recovered inside closures
//! created at registration time, which know the event's payload type.

use std::any::Any;
use std::rc::Rc;

use crate::core::arena::StateId;
use crate::core::info::{StateHandlerInfo, TransitionInfo};
use crate::core::state::State;
use crate::runtime::error::HandlerError;

pub(crate) type StateHandler = Rc<dyn Fn(&StateHandlerInfo) -> Result<(), HandlerError>>;

pub(crate) type ErasedGuard = Rc<dyn Fn(&EventContext<'_>) -> Result<bool, HandlerError>>;

pub(crate) type ErasedAction = Rc<dyn Fn(&EventContext<'_>) -> Result<(), HandlerError>>;

pub(crate) type ErasedSelector =
    Rc<dyn Fn(Option<&dyn Any>) -> Result<Option<State>, HandlerError>>;

/// Erased view of one dispatch, handed to stored guard/action closures.
pub(crate) struct EventContext<'a> {
    pub(crate) from: State,
    pub(crate) to: State,
    pub(crate) event: String,
    pub(crate) is_inner: bool,
    pub(crate) payload: Option<&'a dyn Any>,
}

impl<'a> EventContext<'a> {
    /// Recover the typed view. The downcast only misses when the context
    /// carries no payload (forced transitions) or a foreign one.
    pub(crate) fn info<T: 'static>(&self) -> TransitionInfo<'a, T> {
        TransitionInfo {
            from: self.from.clone(),
            to: self.to.clone(),
            event: self.event.clone(),
            is_inner: self.is_inner,
            data: self.payload.and_then(|payload| payload.downcast_ref::<T>()),
        }
    }
}

/// Destination of a stored transition.
pub(crate) enum TargetKind {
    /// Ordinary transition to a fixed sibling state.
    State(StateId),
    /// Self-transition that suppresses the exit/entry sequence.
    InnerSelf,
    /// Destination computed at fire time; `None` means "no match here" and
    /// the search continues at the next ancestor.
    Dynamic(ErasedSelector),
}

pub(crate) struct TransitionEntry {
    pub(crate) target: TargetKind,
    pub(crate) guard: Option<ErasedGuard>,
    pub(crate) action: Option<ErasedAction>,
}
