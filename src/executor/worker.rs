//! A single executor worker thread: runs its local deque, steals from
//! siblings and the injector when empty, parks when there is nothing left
//! anywhere.
//!
//! Grounded on examples/JonasKruckenberg-k23/libs/async-exec/src/
//! scheduler.rs's `find_work` loop (local queue, then injector, then a
//! randomized pass over sibling stealers via `fastrand`), reimplemented
//! against `crossbeam_deque::{Worker, Stealer, Injector}` instead of the
//! teacher's intrusive queue types.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_deque::{Steal, Stealer, Worker as LocalQueue};
use tracing::trace;

use super::{Inner, Runnable};

const PARK_TIMEOUT: Duration = Duration::from_millis(50);

pub(super) fn run(inner: Weak<Inner>, index: usize, local: LocalQueue<Runnable>, stealers: Vec<Stealer<Runnable>>) {
    loop {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        match find_work(&inner, &local, &stealers) {
            Some(task) => {
                inner.queued.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                drop(inner);
                task();
            }
            None => {
                if inner.closed.load(std::sync::atomic::Ordering::Acquire) {
                    return;
                }
                trace!(worker = index, "parking, no work found");
                inner.parking_lot.park(index, PARK_TIMEOUT);
            }
        }
    }
}

fn find_work(
    inner: &Arc<Inner>,
    local: &LocalQueue<Runnable>,
    stealers: &[Stealer<Runnable>],
) -> Option<Runnable> {
    if let Some(task) = local.pop() {
        return Some(task);
    }

    loop {
        match inner.injector.steal_batch_and_pop(local) {
            Steal::Success(task) => return Some(task),
            Steal::Retry => continue,
            Steal::Empty => break,
        }
    }

    // randomized sibling steal, matching the teacher's fairness rationale:
    // always starting from stealer 0 would starve higher-indexed workers.
    let start = fastrand::usize(..stealers.len().max(1));
    for offset in 0..stealers.len() {
        let i = (start + offset) % stealers.len();
        loop {
            match stealers[i].steal_batch_and_pop(local) {
                Steal::Success(task) => return Some(task),
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }

    None
}
