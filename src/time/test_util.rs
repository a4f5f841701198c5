//! A manually-advanced virtual clock — test infrastructure only, not a
//! user-facing DSL (spec.md ¤1's Non-goals exclude a *user-facing* emulated
//! clock; this is the ambient test tooling the teacher's own
//! `time::test_util::MockClock` provides, reworked against [`TimeDriver`]
//! instead of the teacher's `RawClock` vtable — `fibril` is `std`-only, so
//! there is no need for the teacher's raw-pointer clone/drop dance).
//!
//! [`TestClock::advance`] fires every task whose deadline has passed,
//! synchronously and in deadline order, so scenario-style tests (spec.md ¤8
//! S1 "interrupt a sleeping fiber", S2 "race against a timeout", S9
//! "fairness under op-count pressure") can fast-forward virtual time
//! deterministically without a background thread or real sleeps.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::scheduler::{CancelToken, Task, TimeDriver};

struct Entry {
    deadline: Duration,
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

/// A clock whose `now()` only moves when [`TestClock::advance`] is called.
pub struct TestClock {
    anchor: Instant,
    elapsed: Mutex<Duration>,
    pending: Mutex<BinaryHeap<Reverse<Arc<Entry>>>>,
    next_seq: AtomicU64,
}

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            anchor: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            pending: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Advance virtual time by `by`, synchronously firing every scheduled
    /// task whose deadline is now due, oldest deadline first.
    pub fn advance(&self, by: Duration) {
        let target = {
            let mut elapsed = self.elapsed.lock().unwrap();
            *elapsed += by;
            *elapsed
        };
        loop {
            let due = {
                let mut pending = self.pending.lock().unwrap();
                match pending.peek() {
                    Some(Reverse(entry)) if entry.deadline <= target => {
                        let Reverse(entry) = pending.pop().expect("peek just observed an entry");
                        Some(entry)
                    }
                    _ => None,
                }
            };
            let Some(entry) = due else { break };
            if !entry.cancelled.load(Ordering::Acquire) {
                if let Some(task) = entry.task.lock().unwrap().take() {
                    task();
                }
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }
}

impl TimeDriver for TestClock {
    fn schedule(&self, delay: Duration, task: Task) -> CancelToken {
        let cancelled = Arc::new(AtomicBool::new(false));
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let deadline = *self.elapsed.lock().unwrap() + delay;
        let entry = Arc::new(Entry {
            deadline,
            seq,
            task: Mutex::new(Some(task)),
            cancelled: cancelled.clone(),
        });
        self.pending.lock().unwrap().push(Reverse(entry));
        CancelToken::new(cancelled)
    }

    fn now(&self) -> Instant {
        self.anchor + *self.elapsed.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_fires_only_due_tasks_in_deadline_order() {
        let clock = TestClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        clock.schedule(Duration::from_millis(50), Box::new(move || o1.lock().unwrap().push(50)));
        let o2 = order.clone();
        clock.schedule(Duration::from_millis(10), Box::new(move || o2.lock().unwrap().push(10)));
        let o3 = order.clone();
        clock.schedule(Duration::from_millis(100), Box::new(move || o3.lock().unwrap().push(100)));

        clock.advance(Duration::from_millis(60));
        assert_eq!(*order.lock().unwrap(), vec![10, 50]);

        clock.advance(Duration::from_millis(50));
        assert_eq!(*order.lock().unwrap(), vec![10, 50, 100]);
    }

    #[test]
    fn cancelled_task_does_not_fire_on_advance() {
        let clock = TestClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let token = clock.schedule(Duration::from_millis(10), Box::new(move || {
            fired2.store(true, Ordering::SeqCst);
        }));
        token.cancel();
        clock.advance(Duration::from_millis(20));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
