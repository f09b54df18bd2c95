//! Event handles.
//!
//! An event is bound to one machine tree at creation and carries no state
//! between fires. Typed events (`Event<T>`) deliver a payload to guards,
//! selectors and transition handlers; the payload is erased at the fire
//! boundary and recovered by the typed closures registered for this event.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::core::arena::{EventId, Tree};
use crate::runtime::error::FireError;
use crate::runtime::kernel;
use crate::runtime::sync::FireMethod;

/// An externally fired trigger, optionally carrying a payload of type `T`.
///
/// Fires issued while a transition is executing (from inside any handler or
/// guard) are queued and reported as successful optimistically; the actual
/// outcome is decided after the current transition completes and cannot be
/// observed by the enqueuing caller.
pub struct Event<T = ()> {
    pub(crate) tree: Rc<Tree>,
    pub(crate) id: EventId,
    _payload: PhantomData<fn(T)>,
}

impl<T: 'static> Event<T> {
    pub(crate) fn new(tree: Rc<Tree>, id: EventId) -> Self {
        Event {
            tree,
            id,
            _payload: PhantomData,
        }
    }

    /// Display name of this event.
    pub fn name(&self) -> String {
        self.tree.arena.borrow().event(self.id).name.clone()
    }

    /// Fire with a payload, reporting whether any active state accepted it.
    ///
    /// Returns `Ok(false)` when no transition matched at any level of the
    /// active hierarchy. Fails with [`FireError::MachineFaulted`] on a
    /// faulted tree and [`FireError::InvalidState`] when the root machine
    /// has no current state.
    pub fn try_fire_with(&self, data: T) -> Result<bool, FireError> {
        kernel::fire(&self.tree, self.id, Rc::new(data), FireMethod::TryFire)
    }

    /// Fire with a payload, failing when no transition matches.
    ///
    /// Identical to [`try_fire_with`](Self::try_fire_with) except that a
    /// no-match outcome is [`FireError::TransitionNotFound`].
    pub fn fire_with(&self, data: T) -> Result<(), FireError> {
        kernel::fire_strict(&self.tree, self.id, Rc::new(data))
    }
}

impl Event<()> {
    /// Fire without a payload. See [`try_fire_with`](Self::try_fire_with).
    pub fn try_fire(&self) -> Result<bool, FireError> {
        self.try_fire_with(())
    }

    /// Fire without a payload, failing when no transition matches.
    pub fn fire(&self) -> Result<(), FireError> {
        self.fire_with(())
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Event {
            tree: Rc::clone(&self.tree),
            id: self.id,
            _payload: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.tree.arena.borrow().event(self.id).name.clone();
        f.debug_tuple("Event").field(&name).finish()
    }
}
