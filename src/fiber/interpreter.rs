//! Component F: the interpreter — the core evaluation loop.
//!
//! One call to [`run`] is "a turn": it interprets `Node<E>` against a
//! `FiberContext<E>` until the fiber completes, suspends on `EffectAsync`,
//! or exhausts its op-count budget (at which point it resubmits itself to
//! the executor and returns, per ¤5 "the interpreter never blocks a worker
//! thread beyond its per-fiber op budget"). Dispatch is a single `match` on
//! `Node<E>`'s tag, per spec.md's Design Notes ("prefer a small integer tag
//! and dense switch"); nothing here recurses through the host call stack —
//! looping via `cur = next_node; continue` is the trampoline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::cause::{defect_from_panic, Cause, Defect};
use crate::effect::node::{erase, Erased, ForkedFiber, Node};
use crate::executor::registry as executor_registry;
use crate::executor::Executor;
use crate::exit::Exit;
use crate::fiber::context::{AnyFiberContext, FiberContext};
use crate::fiber::stack::Popped;
use crate::fiber::supervisor;

/// Run (or resume) one turn of `fiber`'s interpretation, starting from
/// `cur`, on `executor`.
pub(crate) fn run<E>(fiber: Arc<FiberContext<E>>, executor: Executor, mut cur: Node<E>)
where
    E: Send + Sync + Clone + 'static,
{
    supervisor::propagate_ancestor_interruption(&fiber);

    let mut op_count = 0usize;
    loop {
        // Step 1: deliver pending interruption, unless already unwinding a
        // Fail or currently masked (¤4.F per-iteration invariant #2).
        let masked = !fiber.stacks().lock().unwrap().is_interruptible();
        if !matches!(cur, Node::Fail(_)) && fiber.state().should_interrupt(masked) {
            let cause = Cause::lift(&fiber.state().accumulated_interrupt());
            cur = Node::Fail(cause);
        }

        // Step 2: fairness budget.
        if op_count >= fiber.op_count_limit() {
            trace!(fiber = %fiber.id(), "yielding: op-count budget exhausted");
            resubmit(&fiber, &executor, cur);
            return;
        }
        op_count += 1;

        // Step 3: dispatch.
        match cur {
            Node::Succeed(v) => match fiber.stacks().lock().unwrap().pop_for_success(v) {
                Popped::Run(next) => cur = next,
                Popped::DoneSuccess(value) => {
                    complete(&fiber, Exit::Success(value));
                    return;
                }
                Popped::DoneFailure(_) => unreachable!("pop_for_success never yields DoneFailure"),
            },

            Node::EffectTotal(thunk) => {
                match catch_unwind(AssertUnwindSafe(thunk)) {
                    Ok(value) => cur = Node::Succeed(value),
                    Err(payload) => cur = Node::Fail(Cause::die(classify_panic(&fiber, payload))),
                }
            }

            Node::EffectPartial(thunk) => {
                match catch_unwind(AssertUnwindSafe(thunk)) {
                    Ok(Ok(value)) => cur = Node::Succeed(value),
                    Ok(Err(e)) => cur = Node::Fail(Cause::fail(e)),
                    Err(payload) => cur = Node::Fail(Cause::die(classify_panic(&fiber, payload))),
                }
            }

            Node::Fail(cause) => {
                let cause = merge_with_accumulated_interrupt(&fiber, cause);
                match fiber.stacks().lock().unwrap().pop_for_failure(cause) {
                    Popped::Run(next) => cur = next,
                    Popped::DoneFailure(cause) => {
                        complete(&fiber, Exit::Failure(cause));
                        return;
                    }
                    Popped::DoneSuccess(_) => unreachable!("pop_for_failure never yields DoneSuccess"),
                }
            }

            Node::FlatMap(inner, k) => {
                fiber.stacks().lock().unwrap().push_flat_map(k);
                cur = *inner;
            }

            Node::Fold(inner, on_failure, on_success) => {
                fiber.stacks().lock().unwrap().push_fold(on_failure, on_success);
                cur = *inner;
            }

            Node::InterruptStatus(interruptible, inner) => {
                fiber.stacks().lock().unwrap().push_interrupt_mask(interruptible);
                cur = *inner;
            }

            Node::CheckInterrupt(k) => {
                let interruptible = fiber.stacks().lock().unwrap().is_interruptible();
                cur = k(interruptible);
            }

            Node::EffectAsync(register, _blocking_on) => {
                let interruptible = fiber.stacks().lock().unwrap().is_interruptible();
                let epoch = fiber.state().next_async_epoch();
                fiber.state().transition_to_suspended(interruptible, epoch);

                let resume_fiber = fiber.clone();
                let resume_executor = executor.clone();
                fiber.set_pending_resume(Box::new(move |node| {
                    resubmit(&resume_fiber, &resume_executor, node);
                }));

                let wake_fiber = fiber.clone();
                let resume: Box<dyn FnOnce(Node<E>) + Send> = Box::new(move |node| {
                    wake_fiber.try_wake(epoch, node);
                });

                match register(resume) {
                    Some(eager) => {
                        if fiber.state().try_resume(epoch) {
                            cur = eager;
                        } else {
                            // a concurrent interrupt already claimed this
                            // epoch and resubmitted; our eager value lost
                            // the race and must be discarded to preserve
                            // exactly-one-resume (¤4.F.2).
                            return;
                        }
                    }
                    None => return,
                }
            }

            Node::Fork(inner, daemon_override) => {
                let child = fork_child(&fiber, &executor, *inner, None, daemon_override);
                let handle = ForkedFiber { handle: child };
                cur = Node::Succeed(erase(handle));
            }

            Node::DaemonStatus(daemon, inner) => {
                fiber.stacks().lock().unwrap().push_daemon_mask(daemon);
                cur = *inner;
            }

            Node::CheckDaemon(k) => {
                let daemon = fiber.stacks().lock().unwrap().is_daemon_default();
                cur = k(daemon);
            }

            Node::Descriptor(k) => {
                cur = k(fiber.descriptor());
            }

            Node::Lock(executor_name, inner) => {
                let Some(target) = executor_registry::get(&executor_name) else {
                    cur = Node::Fail(Cause::die(Arc::new(format!(
                        "fibril: unknown executor {executor_name:?}"
                    ))));
                    continue;
                };
                fiber.stacks().lock().unwrap().push_executor(executor_name);
                resubmit(&fiber, &target, *inner);
                return;
            }

            Node::Yield => {
                resubmit(&fiber, &executor, Node::Succeed(erase(())));
                return;
            }

            Node::Access(k) => {
                let env = fiber.stacks().lock().unwrap().current_env();
                cur = k(env);
            }

            Node::Provide(env, inner) => {
                fiber.stacks().lock().unwrap().push_env(env);
                cur = *inner;
            }

            Node::FiberRefNew(initial, combine, k) => {
                let combine_fn: crate::sync::fiber_ref::CombineFn =
                    Arc::new(move |a, b| combine(a, b));
                let id = crate::sync::fiber_ref::register(initial, combine_fn);
                cur = k(id);
            }

            Node::FiberRefModify(id, f, k) => {
                let mut refs = fiber.fiber_refs().lock().unwrap();
                let current = refs.get(id);
                let (next, out) = f(current);
                refs.set(id, next);
                drop(refs);
                cur = k(out);
            }

            Node::RaceWith(left, right, on_left, on_right) => {
                race(&fiber, &executor, *left, *right, on_left, on_right);
                return;
            }

            Node::EffectSuspend(thunk) => {
                cur = thunk();
            }

            Node::Trace(k) => {
                cur = k(Arc::from(format!("fiber {}", fiber.id())));
            }
        }
    }
}

/// Classify a payload caught from a `EffectTotal`/`EffectPartial` thunk per
/// ¤7's error taxonomy: a fatal payload (per `Platform::fatal`) is reported
/// via `Platform::report_fatal` and then re-raised on this worker thread,
/// bypassing every effect-level handler instead of becoming a `Die` cause;
/// anything else becomes an ordinary [`Defect`].
fn classify_panic<E>(fiber: &Arc<FiberContext<E>>, payload: Box<dyn std::any::Any + Send>) -> Defect
where
    E: Send + Sync + Clone + 'static,
{
    let policy = fiber.panic_policy();
    if (policy.fatal)(payload.as_ref()) {
        (policy.report_fatal)(payload.as_ref());
        std::panic::resume_unwind(payload);
    }
    defect_from_panic(payload)
}

fn merge_with_accumulated_interrupt<E>(fiber: &Arc<FiberContext<E>>, cause: Cause<E>) -> Cause<E>
where
    E: Send + Sync + Clone + 'static,
{
    let accumulated = fiber.state().accumulated_interrupt();
    if accumulated.is_empty() {
        return cause;
    }
    let lifted: Cause<E> = Cause::lift(&accumulated);
    if cause.contains(&lifted) {
        cause
    } else {
        cause.then(lifted)
    }
}

fn complete<E>(fiber: &Arc<FiberContext<E>>, exit: Exit<E, Erased>)
where
    E: Send + Sync + Clone + 'static,
{
    let unhandled_failure = exit.is_failure();
    // fold this fiber's fiber-ref writes into its parent before anyone can
    // observe the completion (¤4.I) — a `join()` resumed by the `complete`
    // call below must see the merged value, not the parent's stale one.
    if let Some(parent) = fiber.parent() {
        parent.inherit_fiber_refs(&fiber.fiber_refs().lock().unwrap());
    }
    fiber.state().complete(exit);
    supervisor::on_complete(fiber);
    if unhandled_failure {
        trace!(fiber = %fiber.id(), "fiber completed with an unobserved failure");
    }
}

/// Re-submit a continuation to `executor`, re-entering [`run`] on whatever
/// worker thread picks it up.
pub(crate) fn resubmit<E>(fiber: &Arc<FiberContext<E>>, executor: &Executor, node: Node<E>)
where
    E: Send + Sync + Clone + 'static,
{
    let fiber = fiber.clone();
    let executor_clone = executor.clone();
    // if the target executor is closed, fall back to the fiber's own
    // current executor so a `Lock` onto a shut-down pool cannot strand a
    // fiber; a shutdown executor is expected to be draining, not routing
    // new work away from fibers already in flight.
    let target = if executor.is_closed() {
        executor_registry::get(&fiber.descriptor().executor).unwrap_or_else(|| executor.clone())
    } else {
        executor.clone()
    };
    let _ = target.submit(Box::new(move || run(fiber, executor_clone, node)));
}

/// Build and launch a child fiber. `override_interruptible` forces the
/// child's initial interrupt mask (used by `RaceWith`'s "interruptible
/// overlay"); `None` inherits the parent's current mask.
fn fork_child<E>(
    parent: &Arc<FiberContext<E>>,
    executor: &Executor,
    body: Node<E>,
    override_interruptible: Option<bool>,
    daemon_override: bool,
) -> Arc<dyn AnyFiberContext<E>>
where
    E: Send + Sync + Clone + 'static,
{
    let parent_stacks = parent.stacks().lock().unwrap();
    let interruptible = override_interruptible.unwrap_or_else(|| parent_stacks.is_interruptible());
    let daemon = daemon_override || parent_stacks.is_daemon_default();
    let env = parent_stacks.current_env();
    drop(parent_stacks);

    let fiber_refs = parent.fiber_refs().lock().unwrap().snapshot();
    let parent_weak: std::sync::Weak<dyn AnyFiberContext<E>> = if daemon {
        std::sync::Weak::<FiberContext<E>>::new() as std::sync::Weak<dyn AnyFiberContext<E>>
    } else {
        Arc::downgrade(parent) as std::sync::Weak<dyn AnyFiberContext<E>>
    };

    let child = FiberContext::new(
        env,
        executor.clone(),
        interruptible,
        daemon,
        Some(parent_weak),
        fiber_refs,
        parent.op_count_limit(),
        parent.daemon_registry().clone(),
        parent.panic_policy().clone(),
    );

    supervisor::supervise(parent, child.clone(), daemon);

    let runnable_child = child.clone();
    let runnable_executor = executor.clone();
    let _ = executor.submit(Box::new(move || run(runnable_child, runnable_executor, body)));

    child
}

fn race<E>(
    fiber: &Arc<FiberContext<E>>,
    executor: &Executor,
    left: Node<E>,
    right: Node<E>,
    on_left: Box<dyn FnOnce(Exit<E, Erased>, ForkedFiber<E>) -> Node<E> + Send>,
    on_right: Box<dyn FnOnce(Exit<E, Erased>, ForkedFiber<E>) -> Node<E> + Send>,
) where
    E: Send + Sync + Clone + 'static,
{
    let left_child = fork_child(fiber, executor, left, Some(true), false);
    let right_child = fork_child(fiber, executor, right, Some(true), false);

    let latch = Arc::new(AtomicBool::new(false));

    observe_any(&left_child, {
        let latch = latch.clone();
        let fiber = fiber.clone();
        let executor = executor.clone();
        let right_handle = right_child.clone();
        move |exit: Exit<E, Erased>| {
            if latch
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let node = on_left(
                    exit,
                    ForkedFiber {
                        handle: right_handle,
                    },
                );
                resubmit(&fiber, &executor, node);
            }
        }
    });

    observe_any(&right_child, {
        let latch = latch.clone();
        let fiber = fiber.clone();
        let executor = executor.clone();
        let left_handle = left_child.clone();
        move |exit: Exit<E, Erased>| {
            if latch
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let node = on_right(
                    exit,
                    ForkedFiber {
                        handle: left_handle,
                    },
                );
                resubmit(&fiber, &executor, node);
            }
        }
    });
}

/// Register a completion observer on an erased child handle. The concrete
/// `FiberContext<E>` behind `AnyFiberContext` is recovered via the
/// `observe_erased` trait method.
fn observe_any<E>(fiber: &Arc<dyn AnyFiberContext<E>>, f: impl FnOnce(Exit<E, Erased>) + Send + 'static)
where
    E: Send + Sync + Clone + 'static,
{
    fiber.observe_erased(Box::new(f));
}
