//! Execution layer: the kernel, the dispatcher and the machine surface.
//!
//! One kernel exists per machine tree. It owns the fault latch, the
//! reentrancy queue and the transition log, and enforces run-to-completion:
//! a transition's whole handler chain finishes before any other begins.

pub(crate) mod dispatcher;
pub(crate) mod error;
pub(crate) mod kernel;
pub(crate) mod machine;
pub(crate) mod sync;

pub use error::{Fault, FaultSource, FireError, HandlerError};
pub use machine::{Machine, MachineStatus};
pub use sync::{DispatchAction, FireMethod, ResetAction, Synchronizer};
