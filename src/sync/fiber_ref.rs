//! Component I (half): `FiberRef`, a per-fiber associative variable.
//!
//! Grounded on the teacher's thread/cpu-local storage idiom
//! (examples/JonasKruckenberg-k23/libs/cpu-local and the `task_local!`-style
//! registries used across the pack) but reworked for fork/join inheritance
//! instead of thread affinity: identity is an opaque allocated token (spec.md
//! ¤9 "do not rely on reference equality of the containing map entries"), and
//! values are stored behind `Arc<dyn Any + Send + Sync>` so a child's
//! snapshot is an O(1) map clone (`Arc::clone` per entry) rather than a deep
//! copy, matching the "ensure copies are structurally shared where possible"
//! guidance.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

pub type Service = Arc<dyn Any + Send + Sync>;
pub type CombineFn = Arc<dyn Fn(&Service, &Service) -> Service + Send + Sync>;

/// Opaque identity of a registered fiber-ref. Never reused; comparable for
/// the lifetime of the process.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct FiberRefId(u64);

impl FiberRefId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Entry {
    initial: Service,
    combine: CombineFn,
}

fn registry() -> &'static Mutex<HashMap<FiberRefId, Entry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<FiberRefId, Entry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a new fiber-ref kind (one call per `FiberRef::make` site
/// evaluation, not per fiber) and return its id.
pub(crate) fn register(initial: Service, combine: CombineFn) -> FiberRefId {
    let id = FiberRefId::next();
    registry()
        .lock()
        .unwrap()
        .insert(id, Entry { initial, combine });
    id
}

fn initial_of(id: FiberRefId) -> Service {
    registry()
        .lock()
        .unwrap()
        .get(&id)
        .expect("fibril: unregistered FiberRefId")
        .initial
        .clone()
}

fn combine_of(id: FiberRefId, parent: &Service, child: &Service) -> Service {
    let combine = registry()
        .lock()
        .unwrap()
        .get(&id)
        .expect("fibril: unregistered FiberRefId")
        .combine
        .clone();
    combine(parent, child)
}

/// Per-fiber storage for every fiber-ref value touched by this fiber.
/// Exclusively owned and mutated by the fiber it belongs to (spec.md ¤5:
/// "single-writer ... for fiber-refs").
#[derive(Clone, Default)]
pub struct FiberRefMap {
    values: HashMap<FiberRefId, Service>,
}

impl FiberRefMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FiberRefId) -> Service {
        self.values.get(&id).cloned().unwrap_or_else(|| initial_of(id))
    }

    pub fn set(&mut self, id: FiberRefId, value: Service) {
        self.values.insert(id, value);
    }

    /// Copy-on-fork snapshot handed to a new child.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Merge a completed child's touched fiber-refs into `self` (the
    /// parent), per ¤4.I: "the receiver iterates the child's map and
    /// updates each ref via combine(old, child)".
    pub fn inherit(&mut self, child: &FiberRefMap) {
        for (id, child_val) in &child.values {
            let parent_val = self.get(*id);
            let merged = combine_of(*id, &parent_val, child_val);
            self.values.insert(*id, merged);
        }
    }
}

/// A typed handle to a registered fiber-ref, returned to user code once the
/// `FiberRefNew` node has executed. Cheap to clone (the id is a plain
/// integer); every clone refers to the same per-fiber slot.
pub struct FiberRef<A> {
    pub(crate) id: FiberRefId,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<A> FiberRef<A> {
    pub(crate) fn from_id(id: FiberRefId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> FiberRefId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_ref_reads_its_initial_value() {
        let id = register(Arc::new(0i32), Arc::new(|_: &Service, c: &Service| c.clone()));
        let map = FiberRefMap::new();
        assert_eq!(*map.get(id).downcast::<i32>().unwrap(), 0);
    }

    #[test]
    fn inherit_combines_child_into_parent() {
        let id = register(
            Arc::new(0i32),
            Arc::new(|p: &Service, c: &Service| {
                let p = *p.downcast_ref::<i32>().unwrap();
                let c = *c.downcast_ref::<i32>().unwrap();
                Arc::new(p + c) as Service
            }),
        );
        let mut parent = FiberRefMap::new();
        parent.set(id, Arc::new(10i32));
        let mut child = parent.snapshot();
        child.set(id, Arc::new(5i32));

        parent.inherit(&child);
        assert_eq!(*parent.get(id).downcast::<i32>().unwrap(), 15);
    }
}
