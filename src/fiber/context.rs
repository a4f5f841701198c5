//! `FiberContext`: the mutable data backing one running fiber.
//!
//! Per spec.md ¤3's "FiberContext (per-fiber data)" list: the state atomic,
//! the four explicit stacks, the fiber-ref map, the async-epoch counter
//! (owned by [`FiberState`]), a nullable parent pointer, and a child set.
//! Generic only over the tree's error type `E` — the success type of
//! whatever `Node<E>` this fiber is interpreting is erased to
//! [`Erased`](crate::effect::node::Erased) at this layer (see
//! `effect::node`'s module doc for why), and recovered only by the typed
//! `Fiber<E, A>` handle the public API hands back to callers.

use std::sync::{Arc, Mutex, Weak};

use crate::cause::Interrupts;
use crate::effect::node::{Erased, Node};
use crate::env::Env;
use crate::exit::Exit;
use crate::executor::Executor;
use crate::fiber::descriptor::{Descriptor, InterruptStatus};
use crate::fiber::id::FiberId;
use crate::fiber::stack::Stacks;
use crate::fiber::state::{FiberState, Status};
use crate::sync::fiber_ref::FiberRefMap;

/// The subset of `Platform` (¤6 "Platform configuration") an interpreter
/// turn needs on every panic: whether a caught payload is fatal (bypasses
/// all effect-level handling, per ¤7's error taxonomy) and where to report
/// one if so. Shared process-wide configuration, not per-fiber state, but
/// threaded through the fiber tree the same way `op_count_limit` and
/// `daemon_registry` are, since a forked child must classify panics the
/// same way its parent does.
type RawPanic = dyn std::any::Any + Send;

#[derive(Clone)]
pub(crate) struct PanicPolicy {
    pub fatal: Arc<dyn Fn(&RawPanic) -> bool + Send + Sync>,
    pub report_fatal: Arc<dyn Fn(&RawPanic) + Send + Sync>,
}

impl PanicPolicy {
    pub fn lenient() -> Self {
        Self {
            fatal: Arc::new(|_| false),
            report_fatal: Arc::new(|_| {
                tracing::error!("fibril: fatal defect reported with no Platform configured")
            }),
        }
    }
}

/// Object-safe view of a `FiberContext<E>` that does not need to know the
/// fiber's own success type — what a parent needs of its children, and what
/// the daemon registry needs of every daemon fiber.
pub(crate) trait AnyFiberContext<E>: Send + Sync {
    fn id(&self) -> FiberId;
    fn is_done(&self) -> bool;
    fn descriptor(&self) -> Descriptor;
    fn take_children(&self) -> Vec<Arc<dyn AnyFiberContext<E>>>;
    fn adopt_children(&self, children: Vec<Arc<dyn AnyFiberContext<E>>>);
    fn remove_child(&self, id: FiberId);
    fn parent(&self) -> Option<Arc<dyn AnyFiberContext<E>>>;
    fn accumulated_interrupt(&self) -> Interrupts;
    /// Merge in an ancestor's interruption, waking the fiber if it is
    /// currently suspended and interruptible (¤4.G `interruptAs`).
    fn interrupt_as(self: Arc<Self>, by: FiberId);
    /// Register an observer for this fiber's (erased) `Exit`, used by
    /// `RaceWith` and `Fiber::join` to await a handle without knowing its
    /// concrete `FiberContext<E>` type. Delegates to
    /// [`FiberState::observe`](crate::fiber::state::FiberState::observe),
    /// so a fiber that is already done invokes `f` synchronously.
    fn observe_erased(&self, f: Box<dyn FnOnce(Exit<E, Erased>) + Send>);
    /// Fold `child`'s touched fiber-refs into this fiber's own map via each
    /// ref's registered `combine(self, child)` (¤4.I). Called on a parent
    /// when one of its children completes, before that completion is
    /// observed, so a subsequent `join()` sees the merged value.
    fn inherit_fiber_refs(&self, child: &FiberRefMap);
}

/// The full per-fiber context. Parameterized only by the tree's error type;
/// see the module doc.
pub struct FiberContext<E> {
    id: FiberId,
    state: FiberState<E, Erased>,
    stacks: Mutex<Stacks<E>>,
    fiber_refs: Mutex<FiberRefMap>,
    pending_resume: Mutex<Option<Box<dyn FnOnce(Node<E>) + Send>>>,
    parent: Option<Weak<dyn AnyFiberContext<E>>>,
    children: Mutex<Vec<Arc<dyn AnyFiberContext<E>>>>,
    is_daemon: bool,
    op_count_limit: usize,
    daemon_registry: Arc<DaemonRegistry<E>>,
    panic_policy: PanicPolicy,
}

impl<E: Send + Sync + 'static> FiberContext<E> {
    pub fn new(
        env: Env,
        executor: Executor,
        interruptible: bool,
        daemon: bool,
        parent: Option<Weak<dyn AnyFiberContext<E>>>,
        fiber_refs: FiberRefMap,
        op_count_limit: usize,
        daemon_registry: Arc<DaemonRegistry<E>>,
        panic_policy: PanicPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: FiberId::next(),
            state: FiberState::new(),
            stacks: Mutex::new(Stacks::new(interruptible, daemon, env, executor.name())),
            fiber_refs: Mutex::new(fiber_refs),
            pending_resume: Mutex::new(None),
            parent,
            children: Mutex::new(Vec::new()),
            is_daemon: daemon,
            op_count_limit,
            daemon_registry,
            panic_policy,
        })
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn is_daemon(&self) -> bool {
        self.is_daemon
    }

    pub fn op_count_limit(&self) -> usize {
        self.op_count_limit
    }

    pub(crate) fn state(&self) -> &FiberState<E, Erased> {
        &self.state
    }

    pub(crate) fn stacks(&self) -> &Mutex<Stacks<E>> {
        &self.stacks
    }

    pub(crate) fn fiber_refs(&self) -> &Mutex<FiberRefMap> {
        &self.fiber_refs
    }

    pub(crate) fn add_child(&self, child: Arc<dyn AnyFiberContext<E>>) {
        self.children.lock().unwrap().push(child);
    }

    pub(crate) fn children_snapshot(&self) -> Vec<Arc<dyn AnyFiberContext<E>>> {
        self.children.lock().unwrap().clone()
    }

    pub(crate) fn daemon_registry(&self) -> &Arc<DaemonRegistry<E>> {
        &self.daemon_registry
    }

    pub(crate) fn panic_policy(&self) -> &PanicPolicy {
        &self.panic_policy
    }

    /// Stash the closure that will resubmit this fiber's continuation to an
    /// executor once it is resumed (by an external event or by
    /// interruption). Overwrites any previous pending resume — there is at
    /// most one live suspension per fiber at a time.
    pub(crate) fn set_pending_resume(&self, resume: Box<dyn FnOnce(Node<E>) + Send>) {
        *self.pending_resume.lock().unwrap() = Some(resume);
    }

    fn take_pending_resume(&self) -> Option<Box<dyn FnOnce(Node<E>) + Send>> {
        self.pending_resume.lock().unwrap().take()
    }

    /// Attempt to wake a fiber suspended at `expected_epoch`, delivering
    /// `node` to its resume closure. No-op if the epoch is stale (¤4.F.2).
    pub(crate) fn try_wake(&self, expected_epoch: u64, node: Node<E>) -> bool {
        if self.state.try_resume(expected_epoch) {
            if let Some(resume) = self.take_pending_resume() {
                resume(node);
            }
            true
        } else {
            false
        }
    }

}

impl<E: Send + Sync + 'static> AnyFiberContext<E> for FiberContext<E> {
    fn id(&self) -> FiberId {
        self.id
    }

    fn is_done(&self) -> bool {
        self.state.is_done()
    }

    fn descriptor(&self) -> Descriptor {
        let stacks = self.stacks.lock().unwrap();
        Descriptor {
            id: self.id,
            status: self.state.status(),
            interruptors: self.state.accumulated_interrupt().interruptors(),
            interrupt_status: InterruptStatus::from_bool(stacks.is_interruptible()),
            children: self.children_snapshot().iter().map(|c| c.id()).collect(),
            executor: stacks.current_executor(),
        }
    }

    fn take_children(&self) -> Vec<Arc<dyn AnyFiberContext<E>>> {
        std::mem::take(&mut *self.children.lock().unwrap())
    }

    fn adopt_children(&self, mut children: Vec<Arc<dyn AnyFiberContext<E>>>) {
        self.children.lock().unwrap().append(&mut children);
    }

    fn remove_child(&self, id: FiberId) {
        self.children.lock().unwrap().retain(|c| c.id() != id);
    }

    fn parent(&self) -> Option<Arc<dyn AnyFiberContext<E>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    fn accumulated_interrupt(&self) -> Interrupts {
        self.state.accumulated_interrupt()
    }

    fn interrupt_as(self: Arc<Self>, by: FiberId) {
        let status = self.state.merge_interrupt(by);
        if let Status::Suspended {
            interruptible: true,
            epoch,
        } = status
        {
            let cause = crate::cause::Cause::lift(&self.state.accumulated_interrupt());
            self.try_wake(epoch, Node::Fail(cause));
        }
        // recursively interrupt children regardless of whether *this* fiber
        // woke — a masked fiber still has children that may be interruptible.
        for child in self.children_snapshot() {
            child.interrupt_as(by);
        }
    }

    fn observe_erased(&self, f: Box<dyn FnOnce(Exit<E, Erased>) + Send>) {
        self.state.observe(f);
    }

    fn inherit_fiber_refs(&self, child: &FiberRefMap) {
        self.fiber_refs.lock().unwrap().inherit(child);
    }
}

/// Tracks every fiber forked as a daemon: globally reachable so it is never
/// dropped for lack of a parent pointer, per ¤4.G "Daemon: child is globally
/// tracked ... no parent pointer".
pub(crate) struct DaemonRegistry<E> {
    daemons: Mutex<Vec<Arc<dyn AnyFiberContext<E>>>>,
}

impl<E> DaemonRegistry<E> {
    pub fn new() -> Self {
        Self {
            daemons: Mutex::new(Vec::new()),
        }
    }

    pub fn track(&self, fiber: Arc<dyn AnyFiberContext<E>>) {
        self.daemons.lock().unwrap().push(fiber);
    }

    /// Drop completed daemons to bound memory growth; called periodically
    /// by the executor (not on every completion, to avoid O(n) scans on a
    /// hot path).
    pub fn sweep(&self) {
        self.daemons.lock().unwrap().retain(|f| !f.is_done());
    }

    pub fn len(&self) -> usize {
        self.daemons.lock().unwrap().len()
    }
}

impl<E> Default for DaemonRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
