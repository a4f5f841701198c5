//! Component K (thread-pool half): `Executor`, a work-stealing pool of
//! worker threads that run `Runnable`s.
//!
//! Grounded on the teacher's executor/worker/parking-lot architecture
//! (examples/JonasKruckenberg-k23/libs/async-exec/src/{executor.rs,
//! scheduler.rs, park.rs}): a global injector queue feeding N workers, each
//! with its own local deque, stealing from siblings (and the injector) when
//! their own queue runs dry, parking via a `ParkingLot` when there is
//! nothing left to steal anywhere. The teacher implements the deque and
//! stealing with a hand-rolled intrusive `mpsc_queue`/`Stealer`; this
//! reimplements the same architecture on top of the real `crossbeam-deque`
//! crate, since fibril is not `no_std` and gets to use the ecosystem's own
//! (extensively fuzzed) work-stealing deque instead of hand-rolling one.

pub mod registry;
pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_deque::Injector;
use tracing::trace;

use crate::error::{Closed, SpawnError};
use crate::park::ParkingLot;

/// A unit of work submitted to an [`Executor`]: a continuation of some
/// fiber's interpreter loop. Always runs to either completion of its
/// op-count budget or a suspension point; never blocks the worker thread
/// beyond that (¤5 "Scheduling model").
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// The fairness budget: number of interpreter steps a fiber runs before it
/// is re-submitted to give other fibers a turn. Matches spec.md ¤5's
/// documented default.
pub const DEFAULT_YIELD_OP_COUNT: usize = 2048;

/// A work-stealing thread pool. Cheaply cloneable (an `Arc` handle); clones
/// share the same workers and injector queue.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    name: Arc<str>,
    injector: Injector<Runnable>,
    parking_lot: ParkingLot,
    closed: AtomicBool,
    queued: AtomicUsize,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl Executor {
    /// Spawn a pool with `worker_count` OS threads (each backed by its own
    /// work-stealing deque) sharing one global injector.
    pub fn new(name: impl Into<Arc<str>>, worker_count: usize) -> Self {
        let name = name.into();
        let worker_count = worker_count.max(1);
        let parking_lot = ParkingLot::new(worker_count);
        let injector = Injector::new();

        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<Inner>| {
            let mut workers = Vec::with_capacity(worker_count);
            let mut handles = Vec::with_capacity(worker_count);
            for _ in 0..worker_count {
                workers.push(crossbeam_deque::Worker::new_fifo());
            }
            let stealers: Vec<_> = workers.iter().map(|w| w.stealer()).collect();

            for (i, local) in workers.into_iter().enumerate() {
                let weak = weak.clone();
                let stealers = stealers.clone();
                let thread_name = format!("{name}-{i}");
                let handle = std::thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || worker::run(weak, i, local, stealers))
                    .expect("fibril: failed to spawn executor worker thread");
                handles.push(handle);
            }

            Inner {
                name,
                injector,
                parking_lot,
                closed: AtomicBool::new(false),
                queued: AtomicUsize::new(0),
                handles,
            }
        });

        Self { inner }
    }

    pub fn name(&self) -> Arc<str> {
        self.inner.name.clone()
    }

    /// Submit a runnable for execution on some worker. Wakes a parked
    /// worker if one is idle.
    pub fn submit(&self, runnable: Runnable) -> Result<(), Closed> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Closed(()));
        }
        self.inner.queued.fetch_add(1, Ordering::Relaxed);
        self.inner.injector.push(runnable);
        self.inner.parking_lot.unpark_one();
        Ok(())
    }

    pub fn queued_len(&self) -> usize {
        self.inner.queued.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Mark the executor closed: no further `submit` calls are accepted.
    /// Does not forcibly stop in-flight workers; they drain naturally once
    /// the injector and all local queues are empty and every worker parks.
    pub fn shutdown(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            trace!(executor = %self.inner.name, "executor shutting down");
            self.inner.parking_lot.unpark_all();
        }
    }

    pub(crate) fn injector(&self) -> &Injector<Runnable> {
        &self.inner.injector
    }

    pub(crate) fn parking_lot(&self) -> &ParkingLot {
        &self.inner.parking_lot
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.inner.name)
            .field("queued", &self.queued_len())
            .finish()
    }
}

/// Spawn fibers onto this executor via [`SpawnError`] to surface shutdown
/// uniformly with other closed-channel errors.
pub(crate) fn submit_or_spawn_error(executor: &Executor, runnable: Runnable) -> Result<(), SpawnError> {
    executor.submit(runnable).map_err(Into::into)
}
