//! Optional external serialization hook.

/// How a fire was requested, for synchronizers that care about the
/// difference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireMethod {
    /// `fire` semantics: the caller needs the real outcome to decide
    /// whether to raise `TransitionNotFound`.
    Fire,
    /// `try_fire` semantics: an optimistic `true` for deferred execution is
    /// acceptable.
    TryFire,
}

/// A single top-level dispatch, ready to run. Captures its machine tree,
/// so it may outlive the call that created it.
pub type DispatchAction = Box<dyn FnOnce() -> bool>;

/// A pending `reset`, ready to run.
pub type ResetAction = Box<dyn FnOnce()>;

/// External serialization point for a machine tree.
///
/// When installed on a kernel, every top-level dispatch and every reset is
/// handed to the synchronizer instead of running directly, letting callers
/// marshal execution onto a chosen thread or executor. The library takes no
/// locks; this hook is the supported way to adapt a tree to a particular
/// execution context.
///
/// A synchronizer may defer a [`FireMethod::TryFire`] dispatch and return an
/// optimistic `true`. Deferring a [`FireMethod::Fire`] dispatch is
/// incompatible with `fire`'s contract, which needs the real outcome to know
/// whether to raise.
pub trait Synchronizer {
    /// Run (or schedule) one top-level dispatch and report whether a
    /// transition was found.
    fn fire_event(&self, dispatch: DispatchAction, method: FireMethod) -> bool;

    /// Run (or schedule) a reset.
    fn reset(&self, action: ResetAction);
}
