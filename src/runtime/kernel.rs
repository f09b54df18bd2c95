//! Per-tree kernel: fault latch, reentrancy queue, run-to-completion drain.
//!
//! Exactly one kernel exists per machine tree and is shared by identity
//! across every machine in it. Dispatch is single-threaded and cooperative;
//! the kernel takes no locks and callers serialize external access (or
//! install a [`Synchronizer`](crate::runtime::sync::Synchronizer)).

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::core::arena::{EventId, StateId, Tree, ROOT};
use crate::core::history::TransitionLog;
use crate::runtime::dispatcher;
use crate::runtime::error::{Fault, FireError};
use crate::runtime::sync::{FireMethod, Synchronizer};

/// A dispatch request, either running now or waiting in the queue.
pub(crate) enum Queued {
    Fire {
        event: EventId,
        payload: Rc<dyn Any>,
        method: FireMethod,
    },
    Forced {
        target: StateId,
        event: EventId,
    },
}

#[derive(Default)]
pub(crate) struct KernelState {
    /// True while a transition executes. Only the outermost dispatch drains
    /// the queue, so a boolean is enough.
    pub(crate) executing: bool,
    pub(crate) fault: Option<Fault>,
    pub(crate) queue: VecDeque<Queued>,
}

pub(crate) struct Kernel {
    pub(crate) state: RefCell<KernelState>,
    pub(crate) synchronizer: RefCell<Option<Rc<dyn Synchronizer>>>,
    pub(crate) log: RefCell<TransitionLog>,
}

impl Kernel {
    pub(crate) fn new() -> Self {
        Kernel {
            state: RefCell::new(KernelState::default()),
            synchronizer: RefCell::new(None),
            log: RefCell::new(TransitionLog::new()),
        }
    }
}

/// Fire an event on the tree. `Ok(true)` means a transition was found, or
/// that the fire was queued behind an executing transition (optimistic).
pub(crate) fn fire(
    tree: &Rc<Tree>,
    event: EventId,
    payload: Rc<dyn Any>,
    method: FireMethod,
) -> Result<bool, FireError> {
    submit(
        tree,
        Queued::Fire {
            event,
            payload,
            method,
        },
    )
}

/// `fire` semantics: a no-match outcome becomes `TransitionNotFound`.
pub(crate) fn fire_strict(
    tree: &Rc<Tree>,
    event: EventId,
    payload: Rc<dyn Any>,
) -> Result<(), FireError> {
    if fire(tree, event, payload, FireMethod::Fire)? {
        return Ok(());
    }
    let arena = tree.arena.borrow();
    let event = arena.event(event).name.clone();
    Err(match arena.active_chain().last().copied() {
        Some(leaf) => FireError::TransitionNotFound {
            event,
            from: arena.state(leaf).name.clone(),
            machine: arena.machine(arena.state(leaf).machine).name.clone(),
        },
        None => FireError::InvalidState {
            machine: arena.machine(ROOT).name.clone(),
        },
    })
}

/// Force a transition to `target`, bypassing the event map and guards.
pub(crate) fn force(tree: &Rc<Tree>, target: StateId, event: EventId) -> Result<(), FireError> {
    submit(tree, Queued::Forced { target, event }).map(|_| ())
}

fn submit(tree: &Rc<Tree>, entry: Queued) -> Result<bool, FireError> {
    {
        let mut kernel = tree.kernel.state.borrow_mut();
        if let Some(fault) = &kernel.fault {
            return Err(FireError::MachineFaulted(fault.clone()));
        }
        if kernel.executing {
            tracing::debug!("dispatch queued behind executing transition");
            kernel.queue.push_back(entry);
            return Ok(true);
        }
    }
    {
        let arena = tree.arena.borrow();
        let root = arena.machine(ROOT);
        if root.current.get().is_none() {
            return Err(FireError::InvalidState {
                machine: root.name.clone(),
            });
        }
    }

    let method = match &entry {
        Queued::Fire { method, .. } => *method,
        Queued::Forced { .. } => FireMethod::Fire,
    };
    let synchronizer = tree.kernel.synchronizer.borrow().clone();
    let result = match synchronizer {
        Some(synchronizer) => {
            let tree = Rc::clone(tree);
            let dispatch = Box::new(move || run_to_completion(&tree, entry).unwrap_or(false));
            Ok(synchronizer.fire_event(dispatch, method))
        }
        None => run_to_completion(tree, entry),
    };

    // A fault set anywhere in the dispatch or its drain belongs to this call.
    if let Some(fault) = tree.kernel.state.borrow().fault.clone() {
        return Err(FireError::TransitionFailed(fault));
    }
    result
}

fn run_to_completion(tree: &Rc<Tree>, first: Queued) -> Result<bool, FireError> {
    tree.kernel.state.borrow_mut().executing = true;
    let result = execute(tree, first, false);
    drain(tree);
    tree.kernel.state.borrow_mut().executing = false;
    result
}

fn drain(tree: &Rc<Tree>) {
    loop {
        let next = {
            let mut kernel = tree.kernel.state.borrow_mut();
            if kernel.fault.is_some() {
                None
            } else {
                kernel.queue.pop_front()
            }
        };
        let Some(entry) = next else { break };
        if let Err(error) = execute(tree, entry, true) {
            if tree.kernel.state.borrow().fault.is_some() {
                break;
            }
            tracing::warn!(%error, "queued dispatch failed");
        }
    }
}

fn execute(tree: &Rc<Tree>, entry: Queued, drained: bool) -> Result<bool, FireError> {
    match entry {
        Queued::Fire {
            event,
            payload,
            method,
        } => {
            let found = dispatcher::dispatch_event(tree, event, Some(&*payload))?;
            if drained && !found && method == FireMethod::Fire {
                let event = tree.arena.borrow().event(event).name.clone();
                tracing::warn!(%event, "queued fire found no transition");
            }
            Ok(found)
        }
        Queued::Forced { target, event } => {
            dispatcher::dispatch_forced(tree, target, event)?;
            Ok(true)
        }
    }
}

/// Clear the fault and queue, then reactivate the tree: top-down, each
/// machine's current becomes its initial iff it is the root or its parent
/// state is its parent machine's current, else `None`. No handlers run.
pub(crate) fn reset(tree: &Rc<Tree>) {
    let synchronizer = tree.kernel.synchronizer.borrow().clone();
    match synchronizer {
        Some(synchronizer) => {
            let tree = Rc::clone(tree);
            synchronizer.reset(Box::new(move || apply_reset(&tree)));
        }
        None => apply_reset(tree),
    }
}

fn apply_reset(tree: &Rc<Tree>) {
    {
        let mut kernel = tree.kernel.state.borrow_mut();
        kernel.fault = None;
        kernel.queue.clear();
    }
    let arena = tree.arena.borrow();
    // Machines are stored parent-before-child, so one pass settles the tree.
    for machine in &arena.machines {
        let active = match machine.parent {
            None => true,
            Some(parent) => {
                let owner = arena.state(parent).machine;
                arena.machine(owner).current.get() == Some(parent)
            }
        };
        machine.current.set(if active { machine.initial } else { None });
    }
    tracing::debug!("machine tree reset");
}
