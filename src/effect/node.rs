//! Component C: the reified effect tree.
//!
//! Grounded on the teacher's own "reify the computation as data, interpret
//! it with a dense switch" discipline (the `Task`/`Header`/poll-state tags in
//! examples/JonasKruckenberg-k23/libs/kasync/src/task.rs), but applied to a
//! self-contained effect algebra instead of `Future`. spec.md's Design Notes
//! are explicit that target languages should model this as "a tagged variant
//! ... avoid virtual dispatch in the hot loop; prefer a small integer tag and
//! dense switch" — exactly what a Rust `enum` with a `#[repr]`-friendly
//! discriminant already gives us, so `Node<E>` is a plain enum matched by
//! [`crate::fiber::interpreter`] rather than a trait-object tree.
//!
//! `Node<E>` is fixed in its error type `E` for the whole tree (a single
//! `FlatMap`/`Fold` chain never changes error channel without going through
//! `Fold`), but is erased in its *value* type: every intermediate value
//! travelling between continuations is an `Arc<dyn Any + Send + Sync>`.
//! `Arc` rather than `Box` is the one deliberate divergence from "plain type
//! erasure": a fiber's result must be cheaply shareable with an arbitrary
//! number of observers (every `Fiber::join`er, both arms of a `RaceWith`),
//! which a move-only `Box` cannot support without either an artificial
//! `Clone` bound on every effect value or unsafe aliasing. `erase`/`downcast`
//! still give ordinary owned values back via `Arc::try_unwrap` on the
//! overwhelmingly common single-owner path (a `FlatMap` continuation is the
//! sole consumer of its predecessor's value); only the broadcast paths ever
//! pay for the extra clone. The public
//! [`Effect<R, E, A>`](crate::effect::Effect) wrapper recovers `A` with a
//! checked downcast at the one point a value leaves the interpreter (`Succeed`
//! delivered to the root caller, or a `Fiber::join`). This is the safe
//! alternative to the teacher's raw-pointer vtable erasure: we do not need to
//! interoperate with the native `Future`/`Waker` machinery at all, so there is
//! no vtable to build.

use std::any::Any;
use std::sync::Arc;

use crate::cause::Cause;
use crate::env::Env;
use crate::fiber::descriptor::Descriptor;
use crate::sync::fiber_ref::FiberRefId;

/// A type-erased value passed between continuations. See the module doc for
/// why this is `Arc` rather than `Box`.
pub type Erased = Arc<dyn Any + Send + Sync>;

pub(crate) fn erase<T: Send + Sync + 'static>(value: T) -> Erased {
    Arc::new(value)
}

/// Recover an owned value from an erased one. Panics if the interpreter's
/// bookkeeping is wrong (a bug, never a user-reachable condition — every
/// erasure site is paired with exactly one matching downcast site by
/// construction) or if `value` is shared with another live consumer and `T`
/// is not [`Clone`] (only reachable from deliberately-broadcast values, e.g.
/// racing both arms against the same already-observed `Exit`; prefer
/// [`downcast_ref`] there instead).
pub(crate) fn unerase<T: Send + Sync + Clone + 'static>(value: Erased) -> T {
    match value.downcast::<T>() {
        Ok(arc) => Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone()),
        Err(_) => panic!("fibril: effect value erasure mismatch (internal bug)"),
    }
}

/// As [`unerase`], but for values with no `Clone` bound available: only
/// valid to call when the erased value is known to be uniquely owned (the
/// ordinary `FlatMap`/`EffectTotal` single-consumer path).
pub(crate) fn unerase_owned<T: Send + Sync + 'static>(value: Erased) -> T {
    let arc = value
        .downcast::<T>()
        .unwrap_or_else(|_| panic!("fibril: effect value erasure mismatch (internal bug)"));
    Arc::try_unwrap(arc).unwrap_or_else(|_| {
        panic!("fibril: effect value erasure mismatch (value unexpectedly shared)")
    })
}

pub(crate) type TotalThunk = Box<dyn FnOnce() -> Erased + Send>;
pub(crate) type PartialThunk<E> = Box<dyn FnOnce() -> Result<Erased, E> + Send>;
pub(crate) type FlatMapCont<E> = Box<dyn FnOnce(Erased) -> Node<E> + Send>;
pub(crate) type FoldOnFailure<E> = Box<dyn FnOnce(Cause<E>) -> Node<E> + Send>;
pub(crate) type FoldOnSuccess<E> = Box<dyn FnOnce(Erased) -> Node<E> + Send>;
pub(crate) type ResumeFn<E> = Box<dyn FnOnce(Node<E>) + Send>;
pub(crate) type AsyncRegister<E> = Box<dyn FnOnce(ResumeFn<E>) -> Option<Node<E>> + Send>;
pub(crate) type SuspendThunk<E> = Box<dyn FnOnce() -> Node<E> + Send>;
pub(crate) type CombineFn = Arc<dyn Fn(&Erased, &Erased) -> Erased + Send + Sync>;

/// A fiber handle produced by `Fork`; join returns the child's `Exit`, erased
/// to `Erased` in the success slot (the public `Fiber<E, A>` downcasts it).
pub struct ForkedFiber<E> {
    pub(crate) handle: Arc<dyn crate::fiber::context::AnyFiberContext<E>>,
}

impl<E> Clone for ForkedFiber<E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

/// The reified effect tree dispatched by [`crate::fiber::interpreter`].
///
/// One node per tag in ¤3's Effect node-kind table. Boxing is used
/// wherever a node owns a sub-tree, matching an ordinary recursive-enum
/// encoding (no custom arena; `Box` is adequate since trees are built once
/// and walked a bounded number of times per op-count budget).
pub enum Node<E> {
    Succeed(Erased),
    EffectTotal(TotalThunk),
    EffectPartial(PartialThunk<E>),
    Fail(Cause<E>),
    FlatMap(Box<Node<E>>, FlatMapCont<E>),
    Fold(Box<Node<E>>, FoldOnFailure<E>, FoldOnSuccess<E>),
    InterruptStatus(bool, Box<Node<E>>),
    CheckInterrupt(Box<dyn FnOnce(bool) -> Node<E> + Send>),
    EffectAsync(AsyncRegister<E>, Option<Arc<str>>),
    Fork(Box<Node<E>>, bool),
    DaemonStatus(bool, Box<Node<E>>),
    CheckDaemon(Box<dyn FnOnce(bool) -> Node<E> + Send>),
    Descriptor(Box<dyn FnOnce(Descriptor) -> Node<E> + Send>),
    Lock(Arc<str>, Box<Node<E>>),
    Yield,
    Access(Box<dyn FnOnce(Env) -> Node<E> + Send>),
    Provide(Env, Box<Node<E>>),
    FiberRefNew(
        Erased,
        CombineFn,
        Box<dyn FnOnce(FiberRefId) -> Node<E> + Send>,
    ),
    FiberRefModify(
        FiberRefId,
        Box<dyn FnOnce(Erased) -> (Erased, Erased) + Send>,
        Box<dyn FnOnce(Erased) -> Node<E> + Send>,
    ),
    RaceWith(
        Box<Node<E>>,
        Box<Node<E>>,
        Box<dyn FnOnce(crate::exit::Exit<E, Erased>, ForkedFiber<E>) -> Node<E> + Send>,
        Box<dyn FnOnce(crate::exit::Exit<E, Erased>, ForkedFiber<E>) -> Node<E> + Send>,
    ),
    EffectSuspend(SuspendThunk<E>),
    Trace(Box<dyn FnOnce(Arc<str>) -> Node<E> + Send>),
}

impl<E> Node<E> {
    pub(crate) fn succeed(value: Erased) -> Self {
        Node::Succeed(value)
    }

    pub(crate) fn fail(cause: Cause<E>) -> Self {
        Node::Fail(cause)
    }
}
