//! Component H: `Promise`, a single-assignment, many-awaiter cell.
//!
//! Grounded on the same completion-cell shape as
//! [`crate::fiber::state::FiberState`]'s observer list (itself grounded on
//! examples/JonasKruckenberg-k23/libs/kasync/src/sync/wait_cell.rs's
//! single-assignment wait cell) — a `Promise` is in fact *just* that shape
//! with the fiber machinery stripped away: a `OnceLock<Exit<E, A>>` for the
//! completed value and a `Mutex<Vec<Waiter>>` for everyone currently
//! blocked on it.

use std::sync::{Mutex, OnceLock};

use crate::cause::{Cause, Defect};
use crate::exit::Exit;
use crate::fiber::FiberId;

type Waiter<E, A> = Box<dyn FnOnce(Exit<E, A>) + Send>;

/// A one-shot cell: created empty, completed exactly once, permanently
/// readable thereafter. `await`ing it is modeled downstream as
/// `EffectAsync(register = k -> register k; if already done call k
/// immediately)` (¤4.H) — this type supplies exactly that `register`.
pub struct Promise<E, A> {
    exit: OnceLock<Exit<E, A>>,
    waiters: Mutex<Vec<Waiter<E, A>>>,
}

impl<E, A> Promise<E, A> {
    pub fn new() -> Self {
        Self {
            exit: OnceLock::new(),
            waiters: Mutex::new(Vec::new()),
        }
    }

    pub fn poll(&self) -> Option<&Exit<E, A>> {
        self.exit.get()
    }

    pub fn is_done(&self) -> bool {
        self.exit.get().is_some()
    }

    /// Register a callback to be invoked with the final `Exit`. If the
    /// promise is already complete, invokes it immediately (synchronously,
    /// from the caller's own turn — matching `FiberState::observe`'s late
    /// path, which is the same guarantee one level up).
    pub fn await_with(&self, waiter: Waiter<E, A>)
    where
        E: Clone,
        A: Clone,
    {
        if let Some(exit) = self.exit.get() {
            waiter(exit.clone());
            return;
        }
        let mut waiters = self.waiters.lock().unwrap();
        if let Some(exit) = self.exit.get() {
            drop(waiters);
            waiter(exit.clone());
            return;
        }
        waiters.push(waiter);
    }

    /// Complete the promise with `exit`. Returns `true` if this call is the
    /// one that completed it; later calls are no-ops, matching TESTABLE
    /// PROPERTIES #7 ("only the first completion takes effect").
    pub fn done(&self, exit: Exit<E, A>) -> bool
    where
        E: Clone,
        A: Clone,
    {
        if self.exit.set(exit).is_err() {
            return false;
        }
        let waiters = std::mem::take(&mut *self.waiters.lock().unwrap());
        let exit = self.exit.get().unwrap();
        for waiter in waiters {
            waiter(exit.clone());
        }
        true
    }

    pub fn succeed(&self, value: A) -> bool
    where
        E: Clone,
        A: Clone,
    {
        self.done(Exit::succeed(value))
    }

    pub fn fail(&self, error: E) -> bool
    where
        E: Clone,
        A: Clone,
    {
        self.done(Exit::fail(Cause::fail(error)))
    }

    pub fn die(&self, defect: Defect) -> bool
    where
        E: Clone,
        A: Clone,
    {
        self.done(Exit::fail(Cause::die(defect)))
    }

    pub fn halt(&self, cause: Cause<E>) -> bool
    where
        E: Clone,
        A: Clone,
    {
        self.done(Exit::fail(cause))
    }

    pub fn interrupt(&self, by: FiberId) -> bool
    where
        E: Clone,
        A: Clone,
    {
        self.done(Exit::fail(Cause::interrupt(by)))
    }
}

impl<E, A> Default for Promise<E, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn second_completion_is_a_no_op() {
        let p: Promise<&str, i32> = Promise::new();
        assert!(p.succeed(1));
        assert!(!p.succeed(2));
        assert!(matches!(p.poll(), Some(Exit::Success(1))));
    }

    #[test]
    fn awaiter_registered_before_completion_is_woken() {
        let p: Promise<&str, i32> = Promise::new();
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = seen.clone();
        p.await_with(Box::new(move |exit| {
            if let Exit::Success(v) = exit {
                seen2.store(v, Ordering::SeqCst);
            }
        }));
        p.succeed(42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn awaiter_registered_after_completion_runs_immediately() {
        let p: Promise<&str, i32> = Promise::new();
        p.succeed(7);
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = seen.clone();
        p.await_with(Box::new(move |exit| {
            if let Exit::Success(v) = exit {
                seen2.store(v, Ordering::SeqCst);
            }
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
