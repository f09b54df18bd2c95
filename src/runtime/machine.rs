//! Machine handles.
//!
//! A `Machine` is a handle onto one machine of a tree: the root created by
//! [`Machine::new`], or a child machine owned by a state. All machines of a
//! tree share one kernel; firing any of the tree's events dispatches over
//! the whole hierarchy.

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::builder::error::BuildError;
use crate::core::arena::{EventId, EventNode, MachineId, StateId, StateNode, Tree, ROOT};
use crate::core::event::Event;
use crate::core::history::TransitionLog;
use crate::core::state::State;
use crate::runtime::error::FireError;
use crate::runtime::kernel;
use crate::runtime::sync::Synchronizer;

/// Lifecycle of a single machine within its tree.
///
/// A machine is `Uninitialized` until its initial state is created,
/// `Active` while it has a current state, and `Inactive` in between (its
/// parent state is not its parent machine's current state).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineStatus {
    Uninitialized,
    Inactive,
    Active,
}

/// An ordered collection of states with a designated initial state and a
/// current-state pointer; possibly nested as the child of a state.
#[derive(Clone)]
pub struct Machine {
    pub(crate) tree: Rc<Tree>,
    pub(crate) id: MachineId,
}

impl Machine {
    /// Create the root machine of a fresh tree.
    ///
    /// # Example
    ///
    /// ```rust
    /// use substate::{Machine, MachineStatus};
    ///
    /// let machine = Machine::new("door");
    /// assert_eq!(machine.status(), MachineStatus::Uninitialized);
    ///
    /// let closed = machine.create_initial_state("closed")?;
    /// assert_eq!(machine.status(), MachineStatus::Active);
    /// assert_eq!(machine.current_state(), Some(closed));
    /// # Ok::<(), substate::BuildError>(())
    /// ```
    pub fn new(name: &str) -> Machine {
        Machine {
            tree: Tree::new(name),
            id: ROOT,
        }
    }

    pub(crate) fn from_parts(tree: Rc<Tree>, id: MachineId) -> Machine {
        Machine { tree, id }
    }

    /// Display name of this machine.
    pub fn name(&self) -> String {
        self.tree.arena.borrow().machine(self.id).name.clone()
    }

    /// Add a state to this machine.
    pub fn create_state(&self, name: &str) -> State {
        let mut arena = self.tree.arena.borrow_mut();
        let id = StateId(arena.states.len());
        arena.states.push(StateNode {
            name: name.to_string(),
            machine: self.id,
            child: None,
            entry: None,
            exit: None,
            transitions: HashMap::new(),
        });
        arena.machine_mut(self.id).states.push(id);
        State::new(Rc::clone(&self.tree), id)
    }

    /// Add the initial state of this machine. Exactly one per machine.
    ///
    /// If this machine is the root, or its parent state is currently
    /// active, the machine activates immediately; entry handlers do not run
    /// for activation-by-initialization.
    pub fn create_initial_state(&self, name: &str) -> Result<State, BuildError> {
        {
            let arena = self.tree.arena.borrow();
            if arena.machine(self.id).initial.is_some() {
                return Err(BuildError::AlreadyInitialized {
                    machine: arena.machine(self.id).name.clone(),
                });
            }
        }
        let state = self.create_state(name);
        let mut arena = self.tree.arena.borrow_mut();
        let active = match arena.machine(self.id).parent {
            None => true,
            Some(parent) => {
                let owner = arena.state(parent).machine;
                arena.machine(owner).current.get() == Some(parent)
            }
        };
        let node = arena.machine_mut(self.id);
        node.initial = Some(state.id);
        if active {
            node.current.set(Some(state.id));
        }
        Ok(state)
    }

    /// Create an event without a payload, bound to this machine's tree.
    pub fn create_event(&self, name: &str) -> Event {
        self.create_data_event::<()>(name)
    }

    /// Create an event carrying a payload of type `T`, bound to this
    /// machine's tree.
    pub fn create_data_event<T: 'static>(&self, name: &str) -> Event<T> {
        let mut arena = self.tree.arena.borrow_mut();
        let id = EventId(arena.events.len());
        arena.events.push(EventNode {
            name: name.to_string(),
        });
        Event::new(Rc::clone(&self.tree), id)
    }

    /// The states owned by this machine, in creation order.
    pub fn states(&self) -> Vec<State> {
        let arena = self.tree.arena.borrow();
        arena
            .machine(self.id)
            .states
            .iter()
            .map(|&id| State::new(Rc::clone(&self.tree), id))
            .collect()
    }

    /// This machine's current state, or `None` while inactive.
    pub fn current_state(&self) -> Option<State> {
        let current = self.tree.arena.borrow().machine(self.id).current.get()?;
        Some(State::new(Rc::clone(&self.tree), current))
    }

    /// The deepest active state at or below this machine.
    pub fn current_state_recursive(&self) -> Option<State> {
        let arena = self.tree.arena.borrow();
        let mut machine = self.id;
        let mut leaf = None;
        while let Some(current) = arena.machine(machine).current.get() {
            leaf = Some(current);
            match arena.state(current).child {
                Some(child) => machine = child,
                None => break,
            }
        }
        drop(arena);
        leaf.map(|id| State::new(Rc::clone(&self.tree), id))
    }

    /// Whether this machine has a current state.
    pub fn is_active(&self) -> bool {
        self.tree
            .arena
            .borrow()
            .machine(self.id)
            .current
            .get()
            .is_some()
    }

    /// Lifecycle status of this machine.
    pub fn status(&self) -> MachineStatus {
        let arena = self.tree.arena.borrow();
        let node = arena.machine(self.id);
        if node.current.get().is_some() {
            MachineStatus::Active
        } else if node.initial.is_some() {
            MachineStatus::Inactive
        } else {
            MachineStatus::Uninitialized
        }
    }

    /// The state owning this machine, or `None` for the root.
    pub fn parent_state(&self) -> Option<State> {
        let parent = self.tree.arena.borrow().machine(self.id).parent?;
        Some(State::new(Rc::clone(&self.tree), parent))
    }

    /// Whether this machine is nested (at any depth) under `other`.
    pub fn is_child_of(&self, other: &Machine) -> bool {
        if !Rc::ptr_eq(&self.tree, &other.tree) {
            return false;
        }
        let arena = self.tree.arena.borrow();
        let mut machine = self.id;
        while let Some(parent) = arena.machine(machine).parent {
            machine = arena.state(parent).machine;
            if machine == other.id {
                return true;
            }
        }
        false
    }

    /// The root machine of this tree.
    pub fn topmost_machine(&self) -> Machine {
        Machine::from_parts(Rc::clone(&self.tree), ROOT)
    }

    /// Drive the tree to `target`, bypassing the event map and any guards.
    ///
    /// The full exit/entry sequence across the least common ancestor runs;
    /// `event` is used only to populate the handler descriptors. The target
    /// may sit anywhere in the tree. Forcing while a transition executes
    /// queues the command like any other fire.
    pub fn force_transition<T: 'static>(
        &self,
        target: &State,
        event: &Event<T>,
    ) -> Result<(), FireError> {
        if !Rc::ptr_eq(&self.tree, &target.tree) || !Rc::ptr_eq(&self.tree, &event.tree) {
            return Err(FireError::InvalidState {
                machine: self.name(),
            });
        }
        kernel::force(&self.tree, target.id, event.id)
    }

    /// Clear any fault and pending fires, then reactivate the tree.
    ///
    /// Every machine's current state becomes its initial state iff it is
    /// the root or its parent state is its parent machine's current state,
    /// and `None` otherwise. No entry or exit handlers run. This is the
    /// only operation accepted on a faulted tree.
    pub fn reset(&self) {
        kernel::reset(&self.tree);
    }

    /// Install the serialization hook wrapping dispatch and reset.
    pub fn set_synchronizer(&self, synchronizer: Rc<dyn Synchronizer>) {
        *self.tree.kernel.synchronizer.borrow_mut() = Some(synchronizer);
    }

    /// Snapshot of the tree's transition log.
    pub fn history(&self) -> TransitionLog {
        self.tree.kernel.log.borrow().clone()
    }
}

impl PartialEq for Machine {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree) && self.id == other.id
    }
}

impl Eq for Machine {}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Machine").field(&self.name()).finish()
    }
}
