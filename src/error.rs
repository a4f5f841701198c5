// Error types for the fiber runtime's external interfaces.
//
// Internal control flow (the interpreter loop, cause algebra, state
// machines) never uses these — it always resolves to an `Exit`. These types
// are the surface a caller sees when an operation can fail *before* an effect
// even starts running (spawning, sending on a closed channel, joining a
// fiber that was never spawned).

use thiserror::Error;

use crate::fiber::FiberId;

/// The executor (or one of the channels it backs) has been shut down and can
/// no longer accept new work.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("runtime is shut down")]
pub struct Closed(pub(crate) ());

/// Failure to spawn a fiber onto an [`Executor`](crate::executor::Executor).
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executor is shut down")]
    Closed,
}

impl From<Closed> for SpawnError {
    fn from(_: Closed) -> Self {
        Self::Closed
    }
}

/// Failure to complete a [`Promise`](crate::sync::Promise) that was already
/// completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("promise was already completed")]
pub struct AlreadyCompleted;

/// Failure to offer onto a queue that has been shut down.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("queue fiber {0:?} observed shutdown")]
pub struct QueueShutdown(pub(crate) Option<FiberId>);
