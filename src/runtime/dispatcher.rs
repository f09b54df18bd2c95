//! Transition selection and handler sequencing.
//!
//! Dispatch works in two phases. The selection phase walks the active chain
//! under a shared arena borrow: it descends to the deepest active state once,
//! then checks each state's transition table deepest-first until a guard
//! accepts, and resolves the destination into a `Plan` of fully cloned
//! handler steps. The execution phase runs with no borrow held, so handlers
//! are free to queue further fires or inspect the tree.
//!
//! Handler order for a non-inner transition: exit chain bottom-up, the
//! transition handler, current-state pointer moves from the least common
//! ancestor down (activating child machines onto their initial chains), then
//! the entry chain top-down.

use std::any::Any;
use std::rc::Rc;

use chrono::Utc;

use crate::core::arena::{Arena, EventId, MachineId, StateId, Tree, ROOT};
use crate::core::history::{TransitionKind, TransitionRecord};
use crate::core::info::StateHandlerInfo;
use crate::core::state::State;
use crate::core::transition::{ErasedAction, EventContext, StateHandler, TargetKind};
use crate::runtime::error::{Fault, FaultSource, FireError, HandlerError};

/// One entry or exit handler invocation, resolved before any user code runs.
struct HandlerStep {
    handler: StateHandler,
    info: StateHandlerInfo,
    /// Owning machine of the handler's state, for fault attribution.
    machine: String,
}

struct Plan {
    from: StateId,
    to: StateId,
    from_name: String,
    to_name: String,
    event: String,
    is_inner: bool,
    kind: TransitionKind,
    exits: Vec<HandlerStep>,
    action: Option<ErasedAction>,
    /// Machine owning the transition's source state.
    action_machine: String,
    updates: Vec<(MachineId, Option<StateId>)>,
    entries: Vec<HandlerStep>,
}

/// Fire `event` against the active hierarchy. `Ok(false)` means no state
/// accepted it.
pub(crate) fn dispatch_event(
    tree: &Rc<Tree>,
    event: EventId,
    payload: Option<&dyn Any>,
) -> Result<bool, FireError> {
    let plan = {
        let arena = tree.arena.borrow();
        let chain = arena.active_chain();
        let Some(&leaf) = chain.last() else {
            return Err(FireError::InvalidState {
                machine: arena.machine(ROOT).name.clone(),
            });
        };
        let event_name = arena.event(event).name.clone();

        let mut selected = None;
        for &state in chain.iter().rev() {
            let Some(entry) = arena.state(state).transitions.get(&event) else {
                continue;
            };
            let (target, is_inner, kind) = match &entry.target {
                TargetKind::State(to) => (*to, false, TransitionKind::External),
                TargetKind::InnerSelf => (state, true, TransitionKind::Inner),
                TargetKind::Dynamic(selector) => match selector(payload) {
                    Ok(Some(to)) => {
                        if !Rc::ptr_eq(&to.tree, tree) {
                            let fault = transition_fault(
                                &arena,
                                FaultSource::Selector,
                                state,
                                leaf,
                                None,
                                &event_name,
                                "selector returned a state from another machine tree".into(),
                            );
                            return Err(capture(tree, fault));
                        }
                        (to.id, false, TransitionKind::Dynamic)
                    }
                    // A null selection is not a match at this level.
                    Ok(None) => continue,
                    Err(inner) => {
                        let fault = transition_fault(
                            &arena,
                            FaultSource::Selector,
                            state,
                            leaf,
                            None,
                            &event_name,
                            inner,
                        );
                        return Err(capture(tree, fault));
                    }
                },
            };
            if let Some(guard) = &entry.guard {
                let context = EventContext {
                    from: State::new(Rc::clone(tree), leaf),
                    to: State::new(Rc::clone(tree), target),
                    event: event_name.clone(),
                    is_inner,
                    payload,
                };
                match guard(&context) {
                    Ok(true) => {}
                    // A rejected guard bubbles the event to the ancestor.
                    Ok(false) => continue,
                    Err(inner) => {
                        let fault = transition_fault(
                            &arena,
                            FaultSource::Guard,
                            state,
                            leaf,
                            Some(target),
                            &event_name,
                            inner,
                        );
                        return Err(capture(tree, fault));
                    }
                }
            }
            selected = Some((state, target, is_inner, kind, entry.action.clone()));
            break;
        }

        let Some((owner, target, is_inner, kind, action)) = selected else {
            return Ok(false);
        };
        tracing::debug!(
            event = %event_name,
            from = %arena.state(leaf).name,
            to = %arena.state(target).name,
            "transition selected"
        );
        build_plan(
            tree, &arena, leaf, target, owner, is_inner, kind, action, &event_name,
        )?
    };
    execute_plan(tree, plan, payload)?;
    Ok(true)
}

/// Force a transition to `target`, bypassing the event map and guards. The
/// event is used only to populate handler descriptors.
pub(crate) fn dispatch_forced(
    tree: &Rc<Tree>,
    target: StateId,
    event: EventId,
) -> Result<(), FireError> {
    let plan = {
        let arena = tree.arena.borrow();
        let Some(&leaf) = arena.active_chain().last() else {
            return Err(FireError::InvalidState {
                machine: arena.machine(ROOT).name.clone(),
            });
        };
        let event_name = arena.event(event).name.clone();
        build_plan(
            tree,
            &arena,
            leaf,
            target,
            target,
            false,
            TransitionKind::Forced,
            None,
            &event_name,
        )?
    };
    execute_plan(tree, plan, None)
}

#[allow(clippy::too_many_arguments)]
fn build_plan(
    tree: &Rc<Tree>,
    arena: &Arena,
    from: StateId,
    to: StateId,
    owner: StateId,
    is_inner: bool,
    kind: TransitionKind,
    action: Option<ErasedAction>,
    event: &str,
) -> Result<Plan, FireError> {
    let from_name = arena.state(from).name.clone();
    let to_name = arena.state(to).name.clone();
    let action_machine = arena.machine(arena.state(owner).machine).name.clone();

    if is_inner {
        return Ok(Plan {
            from,
            to,
            from_name,
            to_name,
            event: event.to_string(),
            is_inner,
            kind,
            exits: Vec::new(),
            action,
            action_machine,
            updates: Vec::new(),
            entries: Vec::new(),
        });
    }

    let from_spine = arena.spine(from);
    let to_spine = arena.spine(to);

    // Deepest state on both spines, excluding the endpoints themselves so a
    // self-transition exits and re-enters its state. None means the spines
    // only meet at the root machine.
    let lca = from_spine
        .iter()
        .copied()
        .find(|&candidate| candidate != from && candidate != to && to_spine.contains(&candidate));
    let cut = |spine: &[StateId]| {
        spine
            .iter()
            .position(|&state| Some(state) == lca)
            .unwrap_or(spine.len())
    };

    // Bottom-up from the leaf, stopping below the LCA.
    let exit_states: Vec<StateId> = from_spine[..cut(&from_spine)].to_vec();
    // Top-down from just below the LCA to the destination...
    let mut entry_states: Vec<StateId> = to_spine[..cut(&to_spine)].to_vec();
    entry_states.reverse();
    // ...then on through the destination's child machines, which reactivate
    // onto their initial chains.
    let mut child = arena.state(to).child;
    while let Some(machine) = child {
        let Some(initial) = arena.machine(machine).initial else {
            return Err(FireError::InvalidState {
                machine: arena.machine(machine).name.clone(),
            });
        };
        entry_states.push(initial);
        child = arena.state(initial).child;
    }

    let mut updates: Vec<(MachineId, Option<StateId>)> = exit_states
        .iter()
        .map(|&state| (arena.state(state).machine, None))
        .collect();
    updates.extend(
        entry_states
            .iter()
            .map(|&state| (arena.state(state).machine, Some(state))),
    );

    let exits = exit_states
        .iter()
        .filter_map(|&state| {
            let node = arena.state(state);
            let handler = node.exit.clone()?;
            Some(HandlerStep {
                handler,
                info: StateHandlerInfo {
                    from: State::new(Rc::clone(tree), state),
                    to: State::new(Rc::clone(tree), to),
                    event: event.to_string(),
                },
                machine: arena.machine(node.machine).name.clone(),
            })
        })
        .collect();
    let entries = entry_states
        .iter()
        .filter_map(|&state| {
            let node = arena.state(state);
            let handler = node.entry.clone()?;
            Some(HandlerStep {
                handler,
                info: StateHandlerInfo {
                    from: State::new(Rc::clone(tree), from),
                    to: State::new(Rc::clone(tree), state),
                    event: event.to_string(),
                },
                machine: arena.machine(node.machine).name.clone(),
            })
        })
        .collect();

    Ok(Plan {
        from,
        to,
        from_name,
        to_name,
        event: event.to_string(),
        is_inner,
        kind,
        exits,
        action,
        action_machine,
        updates,
        entries,
    })
}

fn execute_plan(tree: &Rc<Tree>, plan: Plan, payload: Option<&dyn Any>) -> Result<(), FireError> {
    for step in &plan.exits {
        if let Err(inner) = (step.handler)(&step.info) {
            let fault = plan_fault(&plan, FaultSource::Exit, &step.machine, inner);
            return Err(capture(tree, fault));
        }
    }

    if let Some(action) = &plan.action {
        let context = EventContext {
            from: State::new(Rc::clone(tree), plan.from),
            to: State::new(Rc::clone(tree), plan.to),
            event: plan.event.clone(),
            is_inner: plan.is_inner,
            payload,
        };
        if let Err(inner) = action(&context) {
            let fault = plan_fault(&plan, FaultSource::Transition, &plan.action_machine, inner);
            return Err(capture(tree, fault));
        }
    }

    if !plan.updates.is_empty() {
        let arena = tree.arena.borrow();
        for &(machine, current) in &plan.updates {
            arena.machine(machine).current.set(current);
        }
    }

    for step in &plan.entries {
        if let Err(inner) = (step.handler)(&step.info) {
            let fault = plan_fault(&plan, FaultSource::Entry, &step.machine, inner);
            return Err(capture(tree, fault));
        }
    }

    tree.kernel.log.borrow_mut().record(TransitionRecord {
        from: plan.from_name,
        to: plan.to_name,
        event: plan.event,
        kind: plan.kind,
        timestamp: Utc::now(),
    });
    Ok(())
}

/// Latch `fault` into the kernel and hand it back to the triggering call.
fn capture(tree: &Rc<Tree>, fault: Fault) -> FireError {
    tracing::error!(%fault, "handler fault captured");
    tree.kernel.state.borrow_mut().fault = Some(fault.clone());
    FireError::TransitionFailed(fault)
}

fn plan_fault(plan: &Plan, source: FaultSource, machine: &str, inner: HandlerError) -> Fault {
    Fault {
        machine: machine.to_string(),
        source,
        from: Some(plan.from_name.clone()),
        to: Some(plan.to_name.clone()),
        event: plan.event.clone(),
        inner: Rc::from(inner),
    }
}

fn transition_fault(
    arena: &Arena,
    source: FaultSource,
    owner: StateId,
    from: StateId,
    to: Option<StateId>,
    event: &str,
    inner: HandlerError,
) -> Fault {
    Fault {
        machine: arena.machine(arena.state(owner).machine).name.clone(),
        source,
        from: Some(arena.state(from).name.clone()),
        to: to.map(|to| arena.state(to).name.clone()),
        event: event.to_string(),
        inner: Rc::from(inner),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::core::state::State;
    use crate::runtime::error::FireError;
    use crate::runtime::machine::Machine;

    type Log = Rc<RefCell<Vec<String>>>;

    fn track(log: &Log, state: &State, name: &str) {
        let entry_log = log.clone();
        let entry_name = format!("{name}.entry");
        state.on_entry(move |_| {
            entry_log.borrow_mut().push(entry_name.clone());
            Ok(())
        });
        let exit_log = log.clone();
        let exit_name = format!("{name}.exit");
        state.on_exit(move |_| {
            exit_log.borrow_mut().push(exit_name.clone());
            Ok(())
        });
    }

    fn log_action(
        log: &Log,
        label: &str,
    ) -> impl Fn(&crate::core::info::TransitionInfo<'_>) -> Result<(), crate::runtime::error::HandlerError>
           + 'static {
        let log = log.clone();
        let label = label.to_string();
        move |_| {
            log.borrow_mut().push(label.clone());
            Ok(())
        }
    }

    /// Root with P1 (initial) and P2; P2 owns a child machine with C1
    /// (initial) and C2.
    struct Nested {
        root: Machine,
        child: Machine,
        p1: State,
        p2: State,
        c1: State,
        c2: State,
    }

    fn nested() -> Nested {
        let root = Machine::new("root");
        let p1 = root.create_initial_state("P1").unwrap();
        let p2 = root.create_state("P2");
        let child = p2.create_child_machine("inner").unwrap();
        let c1 = child.create_initial_state("C1").unwrap();
        let c2 = child.create_state("C2");
        Nested {
            root,
            child,
            p1,
            p2,
            c1,
            c2,
        }
    }

    #[test]
    fn simple_transition_order() {
        let machine = Machine::new("m");
        let a = machine.create_initial_state("A").unwrap();
        let b = machine.create_state("B");
        let e = machine.create_event("e");
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        track(&log, &a, "A");
        track(&log, &b, "B");
        a.transition_on(&e).to(&b).unwrap().action(log_action(&log, "trans"));

        e.fire().unwrap();

        assert_eq!(*log.borrow(), ["A.exit", "trans", "B.entry"]);
        assert_eq!(machine.current_state(), Some(b));
    }

    #[test]
    fn inner_self_runs_only_the_transition_handler() {
        let machine = Machine::new("m");
        let a = machine.create_initial_state("A").unwrap();
        let e = machine.create_event("e");
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        track(&log, &a, "A");

        let inner_log = log.clone();
        a.transition_on(&e).inner().unwrap().action(move |info| {
            assert!(info.is_inner);
            assert_eq!(info.from, info.to);
            inner_log.borrow_mut().push("trans".to_string());
            Ok(())
        });

        e.fire().unwrap();

        assert_eq!(*log.borrow(), ["trans"]);
        assert_eq!(machine.current_state(), Some(a));
    }

    #[test]
    fn normal_self_transition_exits_and_reenters() {
        let machine = Machine::new("m");
        let a = machine.create_initial_state("A").unwrap();
        let e = machine.create_event("e");
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        track(&log, &a, "A");
        a.transition_on(&e).to_self().unwrap().action(log_action(&log, "trans"));

        e.fire().unwrap();

        assert_eq!(*log.borrow(), ["A.exit", "trans", "A.entry"]);
        assert_eq!(machine.current_state(), Some(a));
    }

    #[test]
    fn entering_a_parent_activates_its_child_chain() {
        let fixture = nested();
        let e = fixture.root.create_event("e");
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        track(&log, &fixture.p2, "P2");

        let child_log = log.clone();
        fixture.c1.on_entry(move |info| {
            assert_eq!(info.from.name(), "P1");
            assert_eq!(info.to.name(), "C1");
            assert_eq!(info.event, "e");
            child_log.borrow_mut().push("C1.entry".to_string());
            Ok(())
        });
        fixture.p1.transition_on(&e).to(&fixture.p2).unwrap();

        e.fire().unwrap();

        assert_eq!(*log.borrow(), ["P2.entry", "C1.entry"]);
        assert_eq!(fixture.root.current_state(), Some(fixture.p2.clone()));
        assert_eq!(fixture.child.current_state(), Some(fixture.c1.clone()));
        assert_eq!(
            fixture.root.current_state_recursive(),
            Some(fixture.c1.clone())
        );
    }

    #[test]
    fn ancestor_transition_exits_the_descendant_chain() {
        let fixture = nested();
        let e = fixture.root.create_event("e");
        let e_child = fixture.root.create_event("e'");
        let e_up = fixture.root.create_event("e''");
        fixture.p1.transition_on(&e).to(&fixture.p2).unwrap();
        fixture
            .c1
            .transition_on(&e_child)
            .to(&fixture.c2)
            .unwrap();

        let log: Log = Rc::new(RefCell::new(Vec::new()));
        track(&log, &fixture.p1, "P1");
        track(&log, &fixture.p2, "P2");
        let exit_log = log.clone();
        fixture.c2.on_exit(move |info| {
            assert_eq!(info.to.name(), "P1");
            exit_log.borrow_mut().push("C2.exit".to_string());
            Ok(())
        });
        fixture
            .p2
            .transition_on(&e_up)
            .to(&fixture.p1)
            .unwrap()
            .action(log_action(&log, "trans"));

        e.fire().unwrap();
        e_child.fire().unwrap();
        log.borrow_mut().clear();

        e_up.fire().unwrap();

        assert_eq!(*log.borrow(), ["C2.exit", "P2.exit", "trans", "P1.entry"]);
        assert!(!fixture.child.is_active());
        assert_eq!(fixture.child.current_state(), None);
        assert_eq!(fixture.root.current_state(), Some(fixture.p1.clone()));
    }

    #[test]
    fn deepest_state_claims_the_event_first() {
        let fixture = nested();
        let e = fixture.root.create_event("e");
        let shared = fixture.root.create_event("shared");
        fixture.p1.transition_on(&e).to(&fixture.p2).unwrap();
        fixture
            .c1
            .transition_on(&shared)
            .to(&fixture.c2)
            .unwrap();
        fixture
            .p2
            .transition_on(&shared)
            .to(&fixture.p1)
            .unwrap();

        e.fire().unwrap();
        shared.fire().unwrap();

        // C1 claimed the event; P2 never saw it.
        assert_eq!(fixture.root.current_state(), Some(fixture.p2.clone()));
        assert_eq!(fixture.child.current_state(), Some(fixture.c2.clone()));
    }

    #[test]
    fn rejected_guard_bubbles_the_event_to_the_ancestor() {
        let fixture = nested();
        let e = fixture.root.create_event("e");
        let shared = fixture.root.create_event("shared");
        fixture.p1.transition_on(&e).to(&fixture.p2).unwrap();
        fixture
            .c1
            .transition_on(&shared)
            .to(&fixture.c2)
            .unwrap()
            .when(|_| false);
        fixture
            .p2
            .transition_on(&shared)
            .to(&fixture.p1)
            .unwrap();

        e.fire().unwrap();
        shared.fire().unwrap();

        assert_eq!(fixture.root.current_state(), Some(fixture.p1));
        assert!(!fixture.child.is_active());
    }

    #[test]
    fn dynamic_selector_picks_the_destination() {
        let machine = Machine::new("m");
        let a = machine.create_initial_state("A").unwrap();
        let b = machine.create_state("B");
        let c = machine.create_state("C");
        let route = machine.create_data_event::<u8>("route");

        let to_b = b.clone();
        let to_c = c.clone();
        a.transition_on(&route)
            .to_dynamic(move |data| match data.copied() {
                Some(1) => Some(to_b.clone()),
                Some(2) => Some(to_c.clone()),
                _ => None,
            })
            .unwrap();

        // A null selection reads as not-found.
        assert!(!route.try_fire_with(9).unwrap());
        assert_eq!(machine.current_state(), Some(a.clone()));

        assert!(route.try_fire_with(2).unwrap());
        assert_eq!(machine.current_state(), Some(c));
    }

    #[test]
    fn selector_returning_a_foreign_state_is_captured_as_a_fault() {
        let machine = Machine::new("m");
        let a = machine.create_initial_state("A").unwrap();
        let other_tree = Machine::new("other");
        let foreign = other_tree.create_state("X");
        let route = machine.create_event("route");

        let target = foreign.clone();
        a.transition_on(&route)
            .to_dynamic(move |_| Some(target.clone()))
            .unwrap();

        let error = route.fire().unwrap_err();
        match error {
            FireError::TransitionFailed(fault) => {
                assert_eq!(fault.source, crate::runtime::error::FaultSource::Selector);
                assert_eq!(fault.machine, "m");
                assert_eq!(fault.from.as_deref(), Some("A"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The fault latches like any other handler failure; nothing moved.
        assert!(matches!(
            route.try_fire(),
            Err(FireError::MachineFaulted(_))
        ));
        assert!(a.is_current());
    }

    #[test]
    fn forced_transition_reaches_an_unrelated_branch() {
        // Two sibling subtrees; the target shares no ancestor with the
        // active chain short of the root.
        let root = Machine::new("root");
        let p1 = root.create_initial_state("P1").unwrap();
        let p2 = root.create_state("P2");
        let left = p1.create_child_machine("left").unwrap();
        let l1 = left.create_initial_state("L1").unwrap();
        let right = p2.create_child_machine("right").unwrap();
        let _r1 = right.create_initial_state("R1").unwrap();
        let r2 = right.create_state("R2");
        let cmd = root.create_event("cmd");

        let log: Log = Rc::new(RefCell::new(Vec::new()));
        track(&log, &p1, "P1");
        track(&log, &p2, "P2");
        track(&log, &l1, "L1");
        track(&log, &r2, "R2");

        root.force_transition(&r2, &cmd).unwrap();

        assert_eq!(*log.borrow(), ["L1.exit", "P1.exit", "P2.entry", "R2.entry"]);
        assert_eq!(root.current_state(), Some(p2.clone()));
        assert_eq!(right.current_state(), Some(r2.clone()));
        assert!(!left.is_active());
        assert_eq!(root.current_state_recursive(), Some(r2));
    }

    #[test]
    fn forced_transition_onto_an_active_ancestor_reenters_it() {
        let fixture = nested();
        let e = fixture.root.create_event("e");
        let e_child = fixture.root.create_event("e'");
        let cmd = fixture.root.create_event("cmd");
        fixture.p1.transition_on(&e).to(&fixture.p2).unwrap();
        fixture
            .c1
            .transition_on(&e_child)
            .to(&fixture.c2)
            .unwrap();
        e.fire().unwrap();
        e_child.fire().unwrap();

        let log: Log = Rc::new(RefCell::new(Vec::new()));
        track(&log, &fixture.p2, "P2");
        track(&log, &fixture.c1, "C1");
        track(&log, &fixture.c2, "C2");

        fixture.root.force_transition(&fixture.p2, &cmd).unwrap();

        // The whole chain exits, P2 re-enters, and the child machine
        // restarts on its initial state.
        assert_eq!(
            *log.borrow(),
            ["C2.exit", "P2.exit", "P2.entry", "C1.entry"]
        );
        assert_eq!(fixture.child.current_state(), Some(fixture.c1.clone()));
    }

    #[test]
    fn forced_transition_into_a_descendant() {
        let fixture = nested();
        let e = fixture.root.create_event("e");
        let cmd = fixture.root.create_event("cmd");
        fixture.p1.transition_on(&e).to(&fixture.p2).unwrap();
        e.fire().unwrap();

        fixture.root.force_transition(&fixture.c2, &cmd).unwrap();

        assert_eq!(fixture.child.current_state(), Some(fixture.c2.clone()));
        assert_eq!(fixture.root.current_state(), Some(fixture.p2.clone()));
    }

    #[test]
    fn entering_an_uninitialized_child_machine_is_invalid() {
        let root = Machine::new("root");
        let p1 = root.create_initial_state("P1").unwrap();
        let p2 = root.create_state("P2");
        let child = p2.create_child_machine("inner").unwrap();
        let e = root.create_event("e");
        p1.transition_on(&e).to(&p2).unwrap();

        match e.fire() {
            Err(FireError::InvalidState { machine }) => assert_eq!(machine, "inner"),
            other => panic!("unexpected result: {other:?}"),
        }
        // Precondition failure, not a fault: nothing moved, nothing latched.
        assert_eq!(root.current_state(), Some(p1.clone()));
        assert!(matches!(
            e.try_fire(),
            Err(FireError::InvalidState { .. })
        ));
        let _ = child;
    }

    #[test]
    fn transition_handler_fault_reports_its_component() {
        let machine = Machine::new("m");
        let a = machine.create_initial_state("A").unwrap();
        let b = machine.create_state("B");
        let e = machine.create_event("e");
        a.transition_on(&e)
            .to(&b)
            .unwrap()
            .action(|_| Err("broken action".into()));

        let error = e.fire().unwrap_err();
        match error {
            FireError::TransitionFailed(fault) => {
                assert_eq!(
                    fault.source,
                    crate::runtime::error::FaultSource::Transition
                );
                assert_eq!(fault.from.as_deref(), Some("A"));
                assert_eq!(fault.to.as_deref(), Some("B"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
