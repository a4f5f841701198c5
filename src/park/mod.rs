//! Thread parking for idle executor workers.
//!
//! Grounded on the teacher's `Park`/`Parker`/`ParkingLot` design
//! (examples/JonasKruckenberg-k23/libs/async-exec/src/park.rs), which itself
//! wraps a condition variable; the teacher's version is built on its
//! `no_std`-compatible `spin` crate because `async-exec` must run without an
//! OS. `fibril` targets `std`, so this reaches directly for `parking_lot`'s
//! `Mutex`/`Condvar` (a drop-in, better-performing replacement for
//! `std::sync`'s own, and already a teacher dependency elsewhere in the
//! retrieval pack) rather than reimplement futex-style parking.
//!
//! Which specific worker wakes on `unpark_one` is not load-bearing for
//! correctness: every worker searches the same shared injector plus its
//! siblings' deques, so any woken worker can pick up the newly available
//! work. This lets the lot collapse to one shared condvar instead of the
//! teacher's per-worker slot array.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct ParkingLot {
    parked: Mutex<usize>,
    condvar: Condvar,
}

impl ParkingLot {
    pub fn new(_worker_count: usize) -> Self {
        Self {
            parked: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Park the calling worker until woken or `timeout` elapses. `_index`
    /// identifies the caller for tracing only.
    pub fn park(&self, _index: usize, timeout: Duration) {
        let mut parked = self.parked.lock();
        *parked += 1;
        self.condvar.wait_for(&mut parked, timeout);
        *parked = parked.saturating_sub(1);
    }

    pub fn unpark_one(&self) {
        self.condvar.notify_one();
    }

    pub fn unpark_all(&self) {
        self.condvar.notify_all();
    }

    pub fn parked_count(&self) -> usize {
        *self.parked.lock()
    }
}
