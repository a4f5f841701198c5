//! Component C's public face: `Effect<E, A>` and its combinators.
//!
//! `Effect<E, A>` is a thin, typed wrapper around a [`Node<E>`] tree — the
//! node itself is erased in its success type (see `effect::node`'s module
//! doc), and `Effect<E, A>` carries `A` only as a [`PhantomData`] marker so
//! every combinator here can be written against real Rust generics instead
//! of manual downcasts at every call site. spec.md's open question about a
//! separate environment type parameter (`R` alongside `E`/`A`) is resolved
//! here by *not* adding one: `Access`/`Provide` already thread a
//! type-indexed [`Env`] through the tree (¤6 "Has[Service]"), so a `R`
//! parameter would only duplicate information the interpreter already
//! tracks on its own env stack. See DESIGN.md for the full writeup.

pub mod node;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::cause::{Cause, Defect};
use crate::env::Env;
use crate::error::QueueShutdown;
use crate::exit::Exit;
use crate::fiber::descriptor::Descriptor;
use crate::fiber::handle::Fiber;
use crate::fiber::id::FiberId;
use crate::queue::Queue;
use crate::sync::fiber_ref::{FiberRef, FiberRefId, Service};
use crate::sync::promise::Promise;

use node::{erase, unerase, CombineFn, Erased, ForkedFiber, Node};

/// A reserved interruptor id used for interruptions that originate from
/// infrastructure rather than a fiber — currently only a shut-down
/// [`Queue`]. Real fibers are numbered from `1` (see
/// [`crate::fiber::FiberId::next`]), so `0` never collides with one.
const QUEUE_SHUTDOWN_INTERRUPTOR: FiberId = FiberId::from_raw(0);

/// A description of a concurrent computation that produces an `A` or fails
/// with a `Cause<E>` when run. Building an `Effect` performs no work; work
/// happens only once it is submitted to a [`crate::runtime::Runtime`] or
/// forked as a child of an already-running fiber.
pub struct Effect<E, A> {
    pub(crate) node: Node<E>,
    _marker: PhantomData<fn() -> A>,
}

impl<E, A> Effect<E, A> {
    pub(crate) fn from_node(node: Node<E>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node<E> {
        self.node
    }
}

impl<E, A: Send + Sync + Clone + 'static> Effect<E, A> {
    /// An effect that immediately succeeds with `value`, performing no work.
    pub fn succeed(value: A) -> Self {
        Self::from_node(Node::Succeed(erase(value)))
    }

    /// Run `f` when the effect is interpreted; a panic inside `f` becomes a
    /// `Die` defect rather than unwinding past the interpreter (¤4.F /
    /// ¤7's error taxonomy).
    pub fn from_fn(f: impl FnOnce() -> A + Send + 'static) -> Self {
        Self::from_node(Node::EffectTotal(Box::new(move || erase(f()))))
    }
}

impl<E: Send + Sync + Clone + 'static, A: Send + Sync + Clone + 'static> Effect<E, A> {
    /// Run `f`, which may fail with a typed `E`; a panic still becomes a
    /// `Die` defect, not a typed failure.
    pub fn try_fn(f: impl FnOnce() -> Result<A, E> + Send + 'static) -> Self {
        Self::from_node(Node::EffectPartial(Box::new(move || {
            f().map(erase)
        })))
    }

    /// An effect that immediately fails with a typed error.
    pub fn fail(error: E) -> Self {
        Self::from_node(Node::Fail(Cause::fail(error)))
    }

    /// An effect that immediately fails with a defect (an unexpected
    /// condition, as opposed to a typed, expected failure).
    pub fn die(defect: Defect) -> Self {
        Self::from_node(Node::Fail(Cause::die(defect)))
    }

    /// An effect that immediately fails with an arbitrary, already-built
    /// cause.
    pub fn halt(cause: Cause<E>) -> Self {
        Self::from_node(Node::Fail(cause))
    }

    /// Defer building the returned effect until this one is actually
    /// interpreted (e.g. to capture fresh state per run).
    pub fn suspend(f: impl FnOnce() -> Effect<E, A> + Send + 'static) -> Self {
        Self::from_node(Node::EffectSuspend(Box::new(move || f().into_node())))
    }

    pub fn map<B: Send + Sync + Clone + 'static>(
        self,
        f: impl FnOnce(A) -> B + Send + 'static,
    ) -> Effect<E, B> {
        self.flat_map(move |a| Effect::succeed(f(a)))
    }

    /// Replace a successful value with a constant, discarding the original.
    pub fn replace<B: Send + Sync + Clone + 'static>(self, value: B) -> Effect<E, B> {
        self.map(move |_| value)
    }

    pub fn flat_map<B: Send + Sync + Clone + 'static>(
        self,
        f: impl FnOnce(A) -> Effect<E, B> + Send + 'static,
    ) -> Effect<E, B> {
        let node = Node::FlatMap(
            Box::new(self.node),
            Box::new(move |erased: Erased| f(unerase::<A>(erased)).into_node()),
        );
        Effect::from_node(node)
    }

    /// Handle both outcomes uniformly, recovering into a fresh `Effect<E, B>`
    /// in either case (¤4.C `fold`).
    pub fn fold<B: Send + Sync + Clone + 'static>(
        self,
        on_failure: impl FnOnce(Cause<E>) -> Effect<E, B> + Send + 'static,
        on_success: impl FnOnce(A) -> Effect<E, B> + Send + 'static,
    ) -> Effect<E, B> {
        let node = Node::Fold(
            Box::new(self.node),
            Box::new(move |cause| on_failure(cause).into_node()),
            Box::new(move |erased: Erased| on_success(unerase::<A>(erased)).into_node()),
        );
        Effect::from_node(node)
    }

    /// Recover from any failure (typed, defect, or interruption) by
    /// inspecting the full `Cause`.
    pub fn catch_all_cause(
        self,
        h: impl FnOnce(Cause<E>) -> Effect<E, A> + Send + 'static,
    ) -> Effect<E, A> {
        self.fold(h, Effect::succeed)
    }

    /// Recover from a typed failure only; defects and interruptions are
    /// re-raised unchanged.
    pub fn catch_all(self, h: impl FnOnce(E) -> Effect<E, A> + Send + 'static) -> Effect<E, A>
    where
        E: Clone,
    {
        self.catch_all_cause(move |cause| match cause.failure_or_cause() {
            Ok(e) => h((*e).clone()),
            Err(cause) => Effect::halt(cause),
        })
    }

    /// Force this region uninterruptible regardless of the ambient mask.
    pub fn uninterruptible(self) -> Effect<E, A> {
        Effect::from_node(Node::InterruptStatus(false, Box::new(self.node)))
    }

    /// Force this region interruptible regardless of the ambient mask.
    pub fn interruptible(self) -> Effect<E, A> {
        Effect::from_node(Node::InterruptStatus(true, Box::new(self.node)))
    }

    /// Run `h` (uninterruptibly) if and only if this effect is interrupted,
    /// then re-raise the interruption cause (¤4.C `onInterrupt`).
    pub fn on_interrupt(self, h: impl FnOnce() -> Effect<E, ()> + Send + 'static) -> Effect<E, A> {
        let inner = self.interruptible().fold(
            move |cause: Cause<E>| {
                if cause.interrupted() {
                    h().uninterruptible().flat_map(move |_| Effect::halt(cause))
                } else {
                    Effect::halt(cause)
                }
            },
            Effect::succeed,
        );
        Effect::from_node(Node::InterruptStatus(false, Box::new(inner.into_node())))
    }

    /// Run `finalizer` (uninterruptibly) on every exit path: success,
    /// failure, or interruption.
    pub fn ensuring<F>(self, finalizer: F) -> Effect<E, A>
    where
        F: Fn() -> Effect<E, ()> + Send + Sync + 'static,
    {
        let finalizer = Arc::new(finalizer);
        let on_failure = finalizer.clone();
        self.fold(
            move |cause| {
                on_failure()
                    .uninterruptible()
                    .flat_map(move |_| Effect::halt(cause))
            },
            move |a| finalizer().uninterruptible().flat_map(move |_| Effect::succeed(a)),
        )
    }
}

/// Acquire-release: `acquire` runs uninterruptibly, `use_` runs
/// interruptibly, and `release` is guaranteed to run exactly once on every
/// exit path of `use_`, including interruption (¤4.C `bracket`).
pub fn acquire_release<E, A, B>(
    acquire: Effect<E, A>,
    release: impl Fn(A) -> Effect<E, ()> + Send + Sync + 'static,
    use_: impl FnOnce(A) -> Effect<E, B> + Send + 'static,
) -> Effect<E, B>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
    B: Send + Sync + Clone + 'static,
{
    let release = Arc::new(release);
    acquire.uninterruptible().flat_map(move |a: A| {
        let a_for_release = a.clone();
        use_(a)
            .interruptible()
            .ensuring(move || release(a_for_release.clone()))
    })
}

/// Race two effects; the loser is interrupted and its result discarded
/// (¤4.C `race`, via `RaceWith`).
pub fn race<E, A>(a: Effect<E, A>, b: Effect<E, A>) -> Effect<E, A>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    fn finish<E, A>(exit: Exit<E, Erased>, loser: ForkedFiber<E>) -> Node<E>
    where
        E: Send + Sync + Clone + 'static,
        A: Send + Sync + Clone + 'static,
    {
        let loser = Fiber::<E, A>::from_handle(loser.handle);
        loser
            .interrupt()
            .flat_map(move |_| match exit {
                Exit::Success(v) => Effect::succeed(unerase::<A>(v)),
                Exit::Failure(c) => Effect::halt(c),
            })
            .into_node()
    }

    let node = Node::RaceWith(
        Box::new(a.node),
        Box::new(b.node),
        Box::new(finish::<E, A>),
        Box::new(finish::<E, A>),
    );
    Effect::from_node(node)
}

/// Race `effect` against a sleep of `duration`; `None` if the timer won.
pub fn timeout<E, A>(
    effect: Effect<E, A>,
    duration: Duration,
    driver: &Arc<dyn crate::time::TimeDriver>,
) -> Effect<E, Option<A>>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    race(
        effect.map(Some),
        crate::time::sleep(driver, duration).map(|_| None),
    )
}

/// Sequence two effects and pair their results (no concurrency).
pub fn zip<E, A, B>(a: Effect<E, A>, b: Effect<E, B>) -> Effect<E, (A, B)>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
    B: Send + Sync + Clone + 'static,
{
    a.flat_map(move |av| b.map(move |bv| (av, bv)))
}

/// Run two effects concurrently (fork the first, run the second inline,
/// join the first) and pair their results. The happens-before edge the
/// combining step relies on is exactly the one `Fiber::join` already
/// provides (¤4.C `zipPar`).
pub fn zip_par<E, A, B>(a: Effect<E, A>, b: Effect<E, B>) -> Effect<E, (A, B)>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
    B: Send + Sync + Clone + 'static,
{
    fork(a).flat_map(move |fa| b.flat_map(move |bv| fa.join().map(move |av| (av, bv))))
}

/// Run every effect in `items` concurrently, returning their results in the
/// original order once all have completed.
pub fn for_each_par<E, A>(items: Vec<Effect<E, A>>) -> Effect<E, Vec<A>>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    fn fork_all<E, A>(
        mut items: std::vec::IntoIter<Effect<E, A>>,
        mut forked: Vec<Fiber<E, A>>,
    ) -> Effect<E, Vec<Fiber<E, A>>>
    where
        E: Send + Sync + Clone + 'static,
        A: Send + Sync + Clone + 'static,
    {
        match items.next() {
            None => Effect::succeed(forked),
            Some(item) => fork(item).flat_map(move |f| {
                forked.push(f);
                fork_all(items, forked)
            }),
        }
    }

    fn join_all<E, A>(
        mut fibers: std::vec::IntoIter<Fiber<E, A>>,
        mut out: Vec<A>,
    ) -> Effect<E, Vec<A>>
    where
        E: Send + Sync + Clone + 'static,
        A: Send + Sync + Clone + 'static,
    {
        match fibers.next() {
            None => Effect::succeed(out),
            Some(f) => f.join().flat_map(move |a| {
                out.push(a);
                join_all(fibers, out)
            }),
        }
    }

    fork_all(items.into_iter(), Vec::new())
        .flat_map(|fibers: Vec<Fiber<E, A>>| join_all(fibers.into_iter(), Vec::new()))
}

/// Fork `effect` as a non-daemon child of the calling fiber (¤4.G).
pub fn fork<E, A>(effect: Effect<E, A>) -> Effect<E, Fiber<E, A>>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    let node = Node::Fork(Box::new(effect.into_node()), false);
    Effect::<E, ForkedFiber<E>>::from_node(node)
        .flat_map(|f: ForkedFiber<E>| Effect::succeed(Fiber::from_handle(f.handle)))
}

/// Fork `effect` as a daemon: tracked globally rather than by the parent,
/// and never interrupted merely because its parent completed (¤4.G).
pub fn fork_daemon<E, A>(effect: Effect<E, A>) -> Effect<E, Fiber<E, A>>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    let node = Node::Fork(Box::new(effect.into_node()), true);
    Effect::<E, ForkedFiber<E>>::from_node(node)
        .flat_map(|f: ForkedFiber<E>| Effect::succeed(Fiber::from_handle(f.handle)))
}

/// The calling fiber's own descriptor.
pub fn descriptor<E: Send + Sync + Clone + 'static>() -> Effect<E, Descriptor> {
    Effect::from_node(Node::Descriptor(Box::new(|d| Node::Succeed(erase(d)))))
}

/// Yield to the scheduler, giving other fibers on the same executor a turn.
pub fn yield_now<E: Send + Sync + Clone + 'static>() -> Effect<E, ()> {
    Effect::from_node(Node::Yield)
}

/// Run `effect` on the named executor, restoring the ambient executor once
/// it completes (¤4's `Lock`).
pub fn lock<E, A>(executor_name: impl Into<Arc<str>>, effect: Effect<E, A>) -> Effect<E, A>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    Effect::from_node(Node::Lock(executor_name.into(), Box::new(effect.into_node())))
}

/// Read a service of type `T` out of the ambient [`Env`] (¤6
/// `Has[Service]`). Panics (via `Env::get`) if the service was never
/// provided.
pub fn access<E, T, B>(f: impl FnOnce(Arc<T>) -> B + Send + 'static) -> Effect<E, B>
where
    E: Send + Sync + Clone + 'static,
    T: Send + Sync + 'static,
    B: Send + Sync + Clone + 'static,
{
    Effect::from_node(Node::Access(Box::new(move |env: Env| {
        Node::Succeed(erase(f(env.get::<T>())))
    })))
}

/// Run `effect` with `service` added to the ambient environment, layered on
/// top of whatever was already provided (a nested `provide` never hides an
/// outer one's services).
pub fn provide<E, A, T>(service: T, effect: Effect<E, A>) -> Effect<E, A>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
    T: Send + Sync + 'static,
{
    let node = effect.into_node();
    Effect::from_node(Node::Access(Box::new(move |current: Env| {
        Node::Provide(current.with(service), Box::new(node))
    })))
}

// --- Queue effects -----------------------------------------------------

/// Suspend until an item is available, honoring the queue's FIFO order.
/// Surfaces a shut-down queue as an interruption attributed to a reserved,
/// non-fiber id (¤4.J: "shutdown ... surfaces an interrupted cause").
pub fn queue_take<E, A>(queue: Queue<A>) -> Effect<E, A>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    Effect::from_node(Node::EffectAsync(
        Box::new(move |resume| {
            queue.take_with(Box::new(move |res: Result<A, QueueShutdown>| match res {
                Ok(v) => resume(Node::Succeed(erase(v))),
                Err(_) => resume(Node::Fail(Cause::interrupt(QUEUE_SHUTDOWN_INTERRUPTOR))),
            }));
            None
        }),
        None,
    ))
}

/// Offer `item`, suspending the producer if the queue's strategy calls for
/// back-pressure (`Bounded` at capacity).
pub fn queue_offer<E, A>(queue: Queue<A>, item: A) -> Effect<E, bool>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + 'static,
{
    Effect::from_node(Node::EffectAsync(
        Box::new(move |resume| {
            queue.offer_with(
                item,
                Box::new(move |res: Result<bool, QueueShutdown>| match res {
                    Ok(v) => resume(Node::Succeed(erase(v))),
                    Err(_) => resume(Node::Fail(Cause::interrupt(QUEUE_SHUTDOWN_INTERRUPTOR))),
                }),
            );
            None
        }),
        None,
    ))
}

// --- Promise effects -----------------------------------------------------

/// Suspend until `promise` is completed, propagating its cause on failure.
pub fn promise_await<E, A>(promise: Arc<Promise<E, A>>) -> Effect<E, A>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    Effect::from_node(Node::EffectAsync(
        Box::new(move |resume| {
            promise.await_with(Box::new(move |exit: Exit<E, A>| match exit {
                Exit::Success(v) => resume(Node::Succeed(erase(v))),
                Exit::Failure(c) => resume(Node::Fail(c)),
            }));
            None
        }),
        None,
    ))
}

// --- FiberRef effects -----------------------------------------------------

/// Register a new fiber-ref kind with the given `initial` value and
/// `combine` function (used to merge a completed child's value back into
/// its parent on join, ¤4.I).
pub fn fiber_ref_make<E, A>(
    initial: A,
    combine: impl Fn(A, A) -> A + Send + Sync + 'static,
) -> Effect<E, FiberRef<A>>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    let combine_fn: CombineFn = Arc::new(move |a: &Service, b: &Service| {
        let a = a
            .downcast_ref::<A>()
            .expect("fibril: FiberRef combine type mismatch (internal bug)")
            .clone();
        let b = b
            .downcast_ref::<A>()
            .expect("fibril: FiberRef combine type mismatch (internal bug)")
            .clone();
        erase(combine(a, b))
    });
    Effect::from_node(Node::FiberRefNew(
        erase(initial),
        combine_fn,
        Box::new(|id: FiberRefId| Node::Succeed(erase(FiberRef::<A>::from_id(id)))),
    ))
}

fn fiber_ref_id_downcast<A: Send + Sync + Clone + 'static>(value: Erased) -> A {
    value
        .downcast_ref::<A>()
        .expect("fibril: FiberRef type mismatch (internal bug)")
        .clone()
}

impl<A: Send + Sync + Clone + 'static> FiberRef<A> {
    /// Read the current per-fiber value (the ref's registered initial value
    /// if this fiber has never set it).
    pub fn get<E: Send + Sync + Clone + 'static>(&self) -> Effect<E, A> {
        Effect::from_node(Node::FiberRefModify(
            self.id(),
            Box::new(|erased: Erased| {
                let v = fiber_ref_id_downcast::<A>(erased);
                (erase(v.clone()), erase(v))
            }),
            Box::new(Node::Succeed),
        ))
    }

    /// Overwrite the current per-fiber value.
    pub fn set<E: Send + Sync + Clone + 'static>(&self, value: A) -> Effect<E, ()> {
        Effect::from_node(Node::FiberRefModify(
            self.id(),
            Box::new(move |_old: Erased| (erase(value), erase(()))),
            Box::new(Node::Succeed),
        ))
    }

    /// Replace the current per-fiber value with `f` applied to it.
    pub fn update<E: Send + Sync + Clone + 'static>(
        &self,
        f: impl FnOnce(A) -> A + Send + 'static,
    ) -> Effect<E, ()> {
        Effect::from_node(Node::FiberRefModify(
            self.id(),
            Box::new(move |old: Erased| (erase(f(fiber_ref_id_downcast::<A>(old))), erase(()))),
            Box::new(Node::Succeed),
        ))
    }

    /// Run `effect` with this ref temporarily set to `value`, restoring the
    /// prior value on every exit path (success, failure, or interruption).
    pub fn locally<E: Send + Sync + Clone + 'static, B: Send + Sync + Clone + 'static>(
        &self,
        value: A,
        effect: Effect<E, B>,
    ) -> Effect<E, B> {
        let this = self.clone();
        let restore_ref = self.clone();
        this.get::<E>().flat_map(move |previous: A| {
            this.set::<E>(value).flat_map(move |_| {
                effect.ensuring(move || restore_ref.set::<E>(previous.clone()))
            })
        })
    }
}
