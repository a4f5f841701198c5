//! Component K (second half): the delayed-task scheduler — the only timing
//! primitive `sleep`/`timeout` need (spec.md ¤4.K).
//!
//! Grounded on the teacher's own timer-wheel-backed `Timer`/`Sleep`
//! (examples/JonasKruckenberg-k23/libs/async-exec/src/{scheduler.rs,
//! time/sleep.rs}), reduced to the shape spec.md actually names —
//! `Scheduler.schedule(task, duration)` returning a cancel token — and
//! backed by a binary heap of deadlines serviced by one dedicated thread
//! parked on a condvar with a timeout, rather than the teacher's
//! interrupt-driven timer wheel. The wheel earns its complexity in a
//! `no_std` kernel context where there is no OS thread to dedicate to
//! timekeeping; `fibril` targets `std` and can afford the one thread.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub type Task = Box<dyn FnOnce() + Send>;

/// Cancels a pending scheduled task. Cancelling after the task has already
/// fired (or already been cancelled) is a no-op.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub(crate) fn new(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Anything that can run a task after a delay. [`Scheduler`] is the
/// real, wall-clock-driven implementation; [`crate::time::test_util::TestClock`]
/// is the virtual-time implementation used by the test-clock scenarios in
/// spec.md ¤8 (S1, S2, S9).
pub trait TimeDriver: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> CancelToken;
    fn now(&self) -> Instant;
}

struct Entry {
    deadline: Instant,
    seq: u64,
    task: Mutex<Option<Task>>,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline).then(self.seq.cmp(&other.seq))
    }
}

struct Inner {
    heap: Mutex<BinaryHeap<Reverse<Arc<Entry>>>>,
    condvar: Condvar,
    closed: AtomicBool,
    next_seq: AtomicU64,
}

/// A background-thread delayed-task scheduler: one dedicated thread
/// services a min-heap of deadlines, parking on a condvar until either the
/// next deadline or a newly-scheduled earlier one.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            closed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        });
        let worker = inner.clone();
        std::thread::Builder::new()
            .name("fibril-scheduler".into())
            .spawn(move || run(worker))
            .expect("fibril: failed to spawn scheduler thread");
        Self { inner }
    }

    /// Stop the background thread. Pending tasks are simply dropped.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.condvar.notify_all();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeDriver for Scheduler {
    fn schedule(&self, delay: Duration, task: Task) -> CancelToken {
        let cancelled = Arc::new(AtomicBool::new(false));
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            deadline: Instant::now() + delay,
            seq,
            task: Mutex::new(Some(task)),
            cancelled: cancelled.clone(),
        });
        self.inner.heap.lock().push(Reverse(entry));
        self.inner.condvar.notify_all();
        CancelToken::new(cancelled)
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

fn run(inner: Arc<Inner>) {
    loop {
        let mut heap = inner.heap.lock();
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        match heap.peek() {
            None => {
                inner.condvar.wait(&mut heap);
            }
            Some(Reverse(entry)) => {
                let now = Instant::now();
                if entry.deadline <= now {
                    let Reverse(entry) = heap.pop().expect("peek just observed an entry");
                    drop(heap);
                    if !entry.cancelled.load(Ordering::Acquire) {
                        if let Some(task) = entry.task.lock().take() {
                            task();
                        }
                    }
                } else {
                    let wait = entry.deadline - now;
                    inner.condvar.wait_for(&mut heap, wait);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn schedule_fires_after_delay() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel();
        scheduler.schedule(Duration::from_millis(10), Box::new(move || {
            let _ = tx.send(());
        }));
        rx.recv_timeout(Duration::from_secs(1)).expect("task did not fire");
        scheduler.shutdown();
    }

    #[test]
    fn cancel_before_deadline_suppresses_the_task() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel::<()>();
        let token = scheduler.schedule(Duration::from_millis(50), Box::new(move || {
            let _ = tx.send(());
        }));
        token.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        scheduler.shutdown();
    }
}
