//! A fiber's read-only self-description, returned by the `Descriptor` effect
//! node (¤3 "Fiber Descriptor").

use std::sync::Arc;

use crate::fiber::id::FiberId;
use crate::fiber::state::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptStatus {
    Interruptible,
    Uninterruptible,
}

impl InterruptStatus {
    pub fn is_interruptible(self) -> bool {
        matches!(self, InterruptStatus::Interruptible)
    }

    pub fn from_bool(interruptible: bool) -> Self {
        if interruptible {
            InterruptStatus::Interruptible
        } else {
            InterruptStatus::Uninterruptible
        }
    }
}

/// A snapshot of a fiber's identity, status, and supervision state at the
/// moment it was requested. Not kept live — re-request via `Descriptor` to
/// see a fresher view.
#[derive(Clone, Debug)]
pub struct Descriptor {
    pub id: FiberId,
    pub status: Status,
    pub interruptors: Vec<FiberId>,
    pub interrupt_status: InterruptStatus,
    pub children: Vec<FiberId>,
    pub executor: Arc<str>,
}
