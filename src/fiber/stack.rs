//! Component D: the interpreter's explicit stacks.
//!
//! spec.md's Design Notes are explicit: "do not use the host call stack for
//! trampolining" — continuations, interrupt masks, the environment, and the
//! current executor are all maintained as plain `Vec`s owned by the fiber,
//! exactly the trampoline-stack discipline the teacher's own poll loop uses
//! to avoid recursive `Future::poll` stack growth
//! (examples/JonasKruckenberg-k23/libs/kasync/src/task.rs's `PollResult`
//! handling never recurses through user code either). Each stack starts
//! with a small pre-allocated capacity and grows geometrically via `Vec`'s
//! own amortized-doubling, satisfying "pre-allocate a small backing buffer
//! and grow geometrically" without writing a custom growth policy.

use std::sync::Arc;

use crate::cause::Cause;
use crate::effect::node::{Erased, FlatMapCont, FoldOnFailure, FoldOnSuccess, Node};
use crate::env::Env;

const INITIAL_CAPACITY: usize = 16;

/// An element on the continuation stack. `FlatMap`/`Fold` are user
/// continuations; the `Pop*` variants are sentinels pushed to restore a
/// mask/env/executor frame when the bracketing region is exited, either
/// normally or by unwinding through a `Fail`. Sentinels are structurally
/// distinguishable from user continuations (¤4.F: "unwinding ... drops
/// sentinels but does NOT treat them as error handlers").
pub(crate) enum Frame<E> {
    FlatMap(FlatMapCont<E>),
    Fold(FoldOnFailure<E>, FoldOnSuccess<E>),
    PopInterruptMask,
    PopDaemonMask,
    PopExecutor,
    PopEnv,
}

/// What the interpreter should do after a pop: either run `Node<E>` (the
/// continuation invoked with the unwound value/cause), or the stack is
/// exhausted and the fiber is done, carrying the final success value or
/// failure cause.
pub(crate) enum Popped<E> {
    Run(Node<E>),
    DoneSuccess(Erased),
    DoneFailure(Cause<E>),
}

/// The full set of stacks owned by one `FiberContext`.
pub(crate) struct Stacks<E> {
    pub cont: Vec<Frame<E>>,
    interrupt_mask: Vec<bool>,
    daemon_mask: Vec<bool>,
    env: Vec<Env>,
    executor: Vec<Arc<str>>,
}

impl<E> Stacks<E> {
    pub fn new(
        root_interruptible: bool,
        root_daemon: bool,
        root_env: Env,
        root_executor: Arc<str>,
    ) -> Self {
        Self {
            cont: Vec::with_capacity(INITIAL_CAPACITY),
            interrupt_mask: vec![root_interruptible],
            daemon_mask: vec![root_daemon],
            env: vec![root_env],
            executor: vec![root_executor],
        }
    }

    pub fn is_interruptible(&self) -> bool {
        *self.interrupt_mask.last().unwrap_or(&true)
    }

    pub fn is_daemon_default(&self) -> bool {
        *self.daemon_mask.last().unwrap_or(&false)
    }

    pub fn current_env(&self) -> Env {
        self.env.last().cloned().unwrap_or_default()
    }

    pub fn current_executor(&self) -> Arc<str> {
        self.executor
            .last()
            .cloned()
            .unwrap_or_else(|| Arc::from("default"))
    }

    pub fn push_interrupt_mask(&mut self, interruptible: bool) {
        self.interrupt_mask.push(interruptible);
        self.cont.push(Frame::PopInterruptMask);
    }

    pub fn push_daemon_mask(&mut self, daemon: bool) {
        self.daemon_mask.push(daemon);
        self.cont.push(Frame::PopDaemonMask);
    }

    pub fn push_env(&mut self, env: Env) {
        self.env.push(env);
        self.cont.push(Frame::PopEnv);
    }

    pub fn push_executor(&mut self, executor: Arc<str>) {
        self.executor.push(executor);
        self.cont.push(Frame::PopExecutor);
    }

    pub fn push_fold(&mut self, on_failure: FoldOnFailure<E>, on_success: FoldOnSuccess<E>) {
        self.cont.push(Frame::Fold(on_failure, on_success));
    }

    pub fn push_flat_map(&mut self, k: FlatMapCont<E>) {
        self.cont.push(Frame::FlatMap(k));
    }

    fn apply_sentinel(&mut self, frame: Frame<E>) {
        match frame {
            Frame::PopInterruptMask => {
                self.interrupt_mask.pop();
            }
            Frame::PopDaemonMask => {
                self.daemon_mask.pop();
            }
            Frame::PopEnv => {
                self.env.pop();
            }
            Frame::PopExecutor => {
                self.executor.pop();
            }
            Frame::FlatMap(_) | Frame::Fold(..) => unreachable!("not a sentinel"),
        }
    }

    /// Deliver a success value to the next user continuation, restoring any
    /// sentinel frames (mask/env/executor pops) encountered along the way.
    /// A `Fold` frame's `onFailure` half is simply dropped.
    pub fn pop_for_success(&mut self, value: Erased) -> Popped<E> {
        loop {
            match self.cont.pop() {
                None => return Popped::DoneSuccess(value),
                Some(Frame::FlatMap(k)) => return Popped::Run(k(value)),
                Some(Frame::Fold(_, on_success)) => return Popped::Run(on_success(value)),
                Some(sentinel) => self.apply_sentinel(sentinel),
            }
        }
    }

    /// Unwind the continuation stack looking for a `Fold` handler, dropping
    /// every `FlatMap` and sentinel in between (restoring sentinel side
    /// effects as it goes). Per ¤4.F: sentinels are never treated as error
    /// handlers.
    pub fn pop_for_failure(&mut self, cause: Cause<E>) -> Popped<E> {
        loop {
            match self.cont.pop() {
                None => return Popped::DoneFailure(cause),
                Some(Frame::Fold(on_failure, _)) => return Popped::Run(on_failure(cause)),
                Some(Frame::FlatMap(_)) => continue,
                Some(sentinel) => self.apply_sentinel(sentinel),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::node::erase;

    #[test]
    fn masks_restore_on_sentinel_pop() {
        let mut stacks: Stacks<&str> = Stacks::new(true, false, Env::empty(), Arc::from("default"));
        stacks.push_interrupt_mask(false);
        assert!(!stacks.is_interruptible());
        // simulate region exit: pop straight to success with nothing above it
        match stacks.pop_for_success(erase(())) {
            Popped::DoneSuccess(_) => {}
            _ => panic!("expected stack empty after popping only a sentinel"),
        }
        assert!(stacks.is_interruptible());
    }

    #[test]
    fn failure_unwind_skips_flat_maps_to_first_fold() {
        let mut stacks: Stacks<&str> = Stacks::new(true, false, Env::empty(), Arc::from("default"));
        stacks.push_flat_map(Box::new(|_| panic!("must not run on the failure path")));
        stacks.push_fold(
            Box::new(|_cause| Node::Succeed(erase("handled"))),
            Box::new(|_v| panic!("onSuccess must not run")),
        );
        match stacks.pop_for_failure(Cause::fail("boom")) {
            Popped::Run(Node::Succeed(v)) => {
                assert_eq!(*v.downcast::<&str>().unwrap(), "handled");
            }
            _ => panic!("expected the Fold handler to run"),
        }
    }
}
