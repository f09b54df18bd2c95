//! State handles.
//!
//! A `State` is a cheap handle into its tree's arena: it can be cloned,
//! compared, captured by handlers, and used to declare transitions. States
//! are created by their owning machine and live as long as the tree.

use std::cell::Cell;
use std::rc::Rc;

use crate::builder::error::BuildError;
use crate::builder::transition::TransitionBuilder;
use crate::core::arena::{MachineId, MachineNode, StateId, Tree};
use crate::core::event::Event;
use crate::core::info::StateHandlerInfo;
use crate::runtime::error::HandlerError;
use crate::runtime::machine::Machine;

/// A named node in the machine hierarchy.
///
/// A state belongs to exactly one machine and may exclusively own a child
/// machine, which is active exactly while this state is its machine's
/// current state.
#[derive(Clone)]
pub struct State {
    pub(crate) tree: Rc<Tree>,
    pub(crate) id: StateId,
}

impl State {
    pub(crate) fn new(tree: Rc<Tree>, id: StateId) -> Self {
        State { tree, id }
    }

    /// Display name of this state.
    pub fn name(&self) -> String {
        self.tree.arena.borrow().state(self.id).name.clone()
    }

    /// The machine this state belongs to.
    pub fn machine(&self) -> Machine {
        let machine = self.tree.arena.borrow().state(self.id).machine;
        Machine::from_parts(Rc::clone(&self.tree), machine)
    }

    /// The child machine owned by this state, if one was created.
    pub fn child_machine(&self) -> Option<Machine> {
        let child = self.tree.arena.borrow().state(self.id).child?;
        Some(Machine::from_parts(Rc::clone(&self.tree), child))
    }

    /// Create the child machine owned by this state.
    ///
    /// A state owns at most one child machine; a second call fails with
    /// [`BuildError::ChildMachineExists`].
    pub fn create_child_machine(&self, name: &str) -> Result<Machine, BuildError> {
        let mut arena = self.tree.arena.borrow_mut();
        if arena.state(self.id).child.is_some() {
            return Err(BuildError::ChildMachineExists {
                state: arena.state(self.id).name.clone(),
            });
        }
        let id = MachineId(arena.machines.len());
        arena.machines.push(MachineNode {
            name: name.to_string(),
            parent: Some(self.id),
            initial: None,
            current: Cell::new(None),
            states: Vec::new(),
        });
        arena.state_mut(self.id).child = Some(id);
        Ok(Machine::from_parts(Rc::clone(&self.tree), id))
    }

    /// Assign the entry handler, replacing any previous one.
    ///
    /// Entry handlers run top-down after the current-state pointers have
    /// been moved, so the handler already observes the new configuration.
    pub fn on_entry<F>(&self, handler: F) -> &Self
    where
        F: Fn(&StateHandlerInfo) -> Result<(), HandlerError> + 'static,
    {
        self.tree.arena.borrow_mut().state_mut(self.id).entry = Some(Rc::new(handler));
        self
    }

    /// Assign the exit handler, replacing any previous one.
    pub fn on_exit<F>(&self, handler: F) -> &Self
    where
        F: Fn(&StateHandlerInfo) -> Result<(), HandlerError> + 'static,
    {
        self.tree.arena.borrow_mut().state_mut(self.id).exit = Some(Rc::new(handler));
        self
    }

    /// Begin declaring the outbound transition keyed on `event`.
    ///
    /// Each state holds at most one transition per event.
    pub fn transition_on<T: 'static>(&self, event: &Event<T>) -> TransitionBuilder<T> {
        TransitionBuilder::new(self, event)
    }

    /// Whether this state is its machine's current state.
    pub fn is_current(&self) -> bool {
        let arena = self.tree.arena.borrow();
        let machine = arena.state(self.id).machine;
        arena.machine(machine).current.get() == Some(self.id)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree) && self.id == other.id
    }
}

impl Eq for State {}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("State").field(&self.name()).finish()
    }
}
