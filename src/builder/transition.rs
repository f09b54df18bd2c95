//! Builder for declaring transitions on a state.
//!
//! `state.transition_on(&event)` opens the declaration; `.to`, `.to_self`,
//! `.inner` or `.to_dynamic` registers it and returns a [`Transition`]
//! handle that accepts the optional guard and transition handler.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::builder::error::BuildError;
use crate::core::arena::{EventId, StateId, Tree};
use crate::core::event::Event;
use crate::core::guard::Guard;
use crate::core::info::TransitionInfo;
use crate::core::state::State;
use crate::core::transition::{
    ErasedAction, ErasedGuard, ErasedSelector, TargetKind, TransitionEntry,
};
use crate::runtime::error::HandlerError;

/// Pending transition declaration for one `(state, event)` pair.
pub struct TransitionBuilder<T = ()> {
    tree: Rc<Tree>,
    from: StateId,
    event: EventId,
    event_tree: Rc<Tree>,
    event_name: String,
    _payload: PhantomData<fn(T)>,
}

impl<T: 'static> TransitionBuilder<T> {
    pub(crate) fn new(state: &State, event: &Event<T>) -> Self {
        TransitionBuilder {
            tree: Rc::clone(&state.tree),
            from: state.id,
            event: event.id,
            event_tree: Rc::clone(&event.tree),
            event_name: event.name(),
            _payload: PhantomData,
        }
    }

    /// Transition to `target`, which must belong to the same machine.
    pub fn to(self, target: &State) -> Result<Transition<T>, BuildError> {
        if !Rc::ptr_eq(&self.tree, &target.tree) {
            return Err(BuildError::ForeignState {
                state: target.name(),
            });
        }
        {
            let arena = self.tree.arena.borrow();
            if arena.state(target.id).machine != arena.state(self.from).machine {
                return Err(BuildError::TargetNotInMachine {
                    state: arena.state(target.id).name.clone(),
                    machine: arena
                        .machine(arena.state(self.from).machine)
                        .name
                        .clone(),
                });
            }
        }
        self.register(TargetKind::State(target.id))
    }

    /// Self-transition: the state is exited and re-entered.
    pub fn to_self(self) -> Result<Transition<T>, BuildError> {
        let from = self.from;
        self.register(TargetKind::State(from))
    }

    /// Inner self-transition: no exit or entry handlers run.
    pub fn inner(self) -> Result<Transition<T>, BuildError> {
        self.register(TargetKind::InnerSelf)
    }

    /// Transition whose destination is computed at fire time.
    ///
    /// The selector receives the event payload; returning `None` means the
    /// transition does not match and the search continues at the next
    /// ancestor.
    pub fn to_dynamic<F>(self, selector: F) -> Result<Transition<T>, BuildError>
    where
        F: Fn(Option<&T>) -> Option<State> + 'static,
    {
        self.to_dynamic_fallible(move |data| Ok(selector(data)))
    }

    /// Like [`to_dynamic`](Self::to_dynamic), for selectors that may fail.
    /// A selector error is captured as a fault.
    pub fn to_dynamic_fallible<F>(self, selector: F) -> Result<Transition<T>, BuildError>
    where
        F: Fn(Option<&T>) -> Result<Option<State>, HandlerError> + 'static,
    {
        let erased: ErasedSelector =
            Rc::new(move |payload| selector(payload.and_then(|data| data.downcast_ref::<T>())));
        self.register(TargetKind::Dynamic(erased))
    }

    fn register(self, target: TargetKind) -> Result<Transition<T>, BuildError> {
        if !Rc::ptr_eq(&self.tree, &self.event_tree) {
            return Err(BuildError::ForeignEvent {
                event: self.event_name,
            });
        }
        let mut arena = self.tree.arena.borrow_mut();
        let node = arena.state_mut(self.from);
        if node.transitions.contains_key(&self.event) {
            return Err(BuildError::DuplicateTransition {
                state: node.name.clone(),
                event: self.event_name,
            });
        }
        node.transitions.insert(
            self.event,
            TransitionEntry {
                target,
                guard: None,
                action: None,
            },
        );
        drop(arena);
        Ok(Transition {
            tree: self.tree,
            from: self.from,
            event: self.event,
            _payload: PhantomData,
        })
    }
}

/// A registered transition; accepts the optional guard and handler.
pub struct Transition<T = ()> {
    tree: Rc<Tree>,
    from: StateId,
    event: EventId,
    _payload: PhantomData<fn(T)>,
}

impl<T: 'static> Transition<T> {
    /// Attach a guard, replacing any previous one.
    pub fn guard(self, guard: Guard<T>) -> Self {
        let erased: ErasedGuard = Rc::new(move |context| guard.check(&context.info::<T>()));
        self.update(|entry| entry.guard = Some(erased));
        self
    }

    /// Attach a guard from a plain predicate.
    pub fn when<F>(self, predicate: F) -> Self
    where
        F: Fn(&TransitionInfo<'_, T>) -> bool + 'static,
    {
        self.guard(Guard::new(predicate))
    }

    /// Attach the transition handler, replacing any previous one. It runs
    /// after the exit chain and before the entry chain.
    pub fn action<F>(self, handler: F) -> Self
    where
        F: Fn(&TransitionInfo<'_, T>) -> Result<(), HandlerError> + 'static,
    {
        let erased: ErasedAction = Rc::new(move |context| handler(&context.info::<T>()));
        self.update(|entry| entry.action = Some(erased));
        self
    }

    fn update(&self, apply: impl FnOnce(&mut TransitionEntry)) {
        let mut arena = self.tree.arena.borrow_mut();
        if let Some(entry) = arena.state_mut(self.from).transitions.get_mut(&self.event) {
            apply(entry);
        }
    }
}
