//! Guard predicates for controlling transitions.
//!
//! Guards are pure boolean functions evaluated during the hierarchy search.
//! A failing guard does not consume the event: the search continues at the
//! next ancestor state.

use crate::core::info::TransitionInfo;
use crate::runtime::error::HandlerError;

/// Pure predicate that decides whether a transition may fire.
///
/// Guards receive the same [`TransitionInfo`] view the transition handler
/// would get. They must not fire events; dispatching from inside a guard is
/// not checked and leaves the outcome unspecified.
///
/// # Example
///
/// ```rust
/// use substate::{Guard, Machine};
///
/// let machine = Machine::new("turnstile");
/// let locked = machine.create_initial_state("locked")?;
/// let unlocked = machine.create_state("unlocked");
/// let coin = machine.create_data_event::<u32>("coin");
///
/// locked
///     .transition_on(&coin)
///     .to(&unlocked)?
///     .guard(Guard::new(|info| info.data.is_some_and(|value| *value >= 50)));
///
/// assert!(!coin.try_fire_with(10)?);
/// assert!(coin.try_fire_with(50)?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Guard<T = ()> {
    predicate: Box<dyn Fn(&TransitionInfo<'_, T>) -> Result<bool, HandlerError>>,
}

impl<T> Guard<T> {
    /// Create a guard from a pure predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&TransitionInfo<'_, T>) -> bool + 'static,
    {
        Guard {
            predicate: Box::new(move |info| Ok(predicate(info))),
        }
    }

    /// Create a guard whose predicate may fail.
    ///
    /// An `Err` is not a "no": it is captured as a fault and latches the
    /// machine tree until `reset`.
    pub fn fallible<F>(predicate: F) -> Self
    where
        F: Fn(&TransitionInfo<'_, T>) -> Result<bool, HandlerError> + 'static,
    {
        Guard {
            predicate: Box::new(predicate),
        }
    }

    /// Evaluate the guard for the transition described by `info`.
    pub fn check(&self, info: &TransitionInfo<'_, T>) -> Result<bool, HandlerError> {
        (self.predicate)(info)
    }
}

impl<T> std::fmt::Debug for Guard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").finish_non_exhaustive()
    }
}
