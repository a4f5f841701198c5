//! Component I (other half): `Ref`, a plain atomic cell.
//!
//! Grounded on the same `ArcSwap`-backed "atomic reference to an immutable
//! record" pattern as [`crate::fiber::state`], here specialized to hold an
//! arbitrary user value rather than a fiber's own status record. Unlike
//! `FiberRef`, a `Ref` has no fiber affinity and no awaiters — any number of
//! fibers may read and CAS it concurrently (spec.md ¤5 "Promises, Queues,
//! Refs: safe for concurrent use by any number of fibers").

use std::sync::Arc;

use arc_swap::ArcSwap;

/// An atomic, shareable cell. Cloning a `Ref` shares the same backing cell
/// (it is itself `Arc`-backed), matching the usual `Ref[A]` handle semantics.
#[derive(Clone)]
pub struct Ref<A> {
    inner: Arc<ArcSwap<A>>,
}

impl<A: Send + Sync + 'static> Ref<A> {
    pub fn make(initial: A) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn get(&self) -> Arc<A> {
        self.inner.load_full()
    }

    pub fn set(&self, value: A) {
        self.inner.store(Arc::new(value));
    }

    /// Atomically replace the value, returning the previous one.
    pub fn get_and_set(&self, value: A) -> Arc<A> {
        self.inner.swap(Arc::new(value))
    }

    /// Atomic compare-and-swap loop: apply `f` to the current value,
    /// producing a new value. Retries under contention; `f` must be pure
    /// (it may run more than once).
    pub fn update(&self, mut f: impl FnMut(&A) -> A) {
        self.inner.rcu(|cur| f(cur));
    }

    /// As [`Ref::update`], but `f` also returns an auxiliary result computed
    /// from the pre-update value, delivered from the attempt that actually
    /// commits.
    pub fn modify<B>(&self, mut f: impl FnMut(&A) -> (A, B)) -> B {
        let mut out = None;
        self.inner.rcu(|cur| {
            let (next, b) = f(cur);
            out = Some(b);
            next
        });
        out.expect("fibril: Ref::modify rcu always invokes its closure at least once")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_roundtrip() {
        let r = Ref::make(1);
        assert_eq!(*r.get(), 1);
        r.set(2);
        assert_eq!(*r.get(), 2);
    }

    #[test]
    fn update_applies_under_contention() {
        let r = Ref::make(0i64);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        r.update(|v| v + 1);
                    }
                });
            }
        });
        assert_eq!(*r.get(), 8000);
    }

    #[test]
    fn modify_returns_value_from_committed_attempt() {
        let r = Ref::make(10);
        let doubled = r.modify(|v| (v * 2, *v));
        assert_eq!(doubled, 10);
        assert_eq!(*r.get(), 20);
    }
}
