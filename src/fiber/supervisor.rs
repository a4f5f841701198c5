//! Component G: parent/child tracking, daemon policy, recursive
//! interruption.
//!
//! Grounded on spec.md ¤4.G directly; the "register in parent, adopt
//! grandchildren on completion, track daemons in a process-wide set"
//! structure mirrors the teacher's own task-tree bookkeeping in
//! examples/JonasKruckenberg-k23/libs/kasync/src/task.rs (where a `JoinSet`
//! plays the non-daemon role and its `detach` the daemon one), generalized
//! here to support ancestor interrupt propagation, which the teacher's
//! `Future`-based tasks have no equivalent of.

use std::sync::Arc;

use crate::fiber::context::{AnyFiberContext, DaemonRegistry, FiberContext};
use crate::fiber::id::FiberId;

/// Register a freshly-forked child with its supervisor: either the parent's
/// child set (non-daemon) or the process-wide daemon registry.
pub(crate) fn supervise<E: Send + Sync + 'static>(
    parent: &Arc<FiberContext<E>>,
    child: Arc<FiberContext<E>>,
    daemon: bool,
) {
    if daemon {
        parent.daemon_registry().track(child);
    } else {
        parent.add_child(child);
    }
}

/// Called when a fiber completes: detach it from its parent (if any,
/// non-daemon case) and have the parent adopt its orphaned children so a
/// completed fiber never pins its ancestors in the tree (spec.md ¤9 "Cyclic
/// parent/children references").
pub(crate) fn on_complete<E: Send + Sync + 'static>(fiber: &Arc<FiberContext<E>>) {
    let orphans = fiber.children_snapshot();
    if let Some(parent) = fiber.parent() {
        parent.remove_child(fiber.id());
        parent.adopt_children(orphans);
    }
    // daemon fibers have no parent pointer; their orphaned children (if any)
    // simply become daemons too, since nothing else can claim them.
    else if !orphans.is_empty() {
        for child in orphans {
            fiber.daemon_registry().track(child);
        }
    }
}

/// Walk the parent chain, unioning every ancestor's accumulated interrupt
/// cause into this fiber. Run at the start of each scheduling turn so an
/// ancestor marked interrupt-pending cooperatively wakes a running
/// descendant (¤4.G `propagateAncestorInterruption`).
///
/// Returns the (possibly newly-merged) interruption so the interpreter can
/// decide whether to synthesize a `Fail` this turn.
pub(crate) fn propagate_ancestor_interruption<E: Send + Sync + 'static>(fiber: &Arc<FiberContext<E>>) {
    let mut acc = crate::cause::Interrupts::empty();
    let mut cursor = AnyFiberContext::parent(fiber.as_ref());
    while let Some(ancestor) = cursor {
        acc = acc.both(ancestor.accumulated_interrupt());
        cursor = ancestor.parent();
    }
    fiber.state().merge_interrupts(&acc);
}

/// `interruptAs(byId)` (¤4.G): mark the target (and, transitively, its
/// children) interrupted by `by`, waking any of them that are currently
/// suspended and interruptible.
pub(crate) fn interrupt_as<E: Send + Sync + 'static>(target: Arc<FiberContext<E>>, by: FiberId) {
    AnyFiberContext::interrupt_as(target as Arc<dyn AnyFiberContext<E>>, by);
}
