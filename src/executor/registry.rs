//! A process-wide name -> [`Executor`] lookup, backing the `Lock(executor,
//! inner)` effect node, which spec.md describes as running its inner effect
//! "on a designated executor". Fibers reference executors by name (so a
//! `FiberContext`'s executor stack stays `Clone`-cheap); the interpreter
//! resolves the name to a handle only at the point it actually needs to
//! resubmit a continuation.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use super::Executor;

fn registry() -> &'static RwLock<HashMap<Arc<str>, Executor>> {
    static REGISTRY: OnceLock<RwLock<HashMap<Arc<str>, Executor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub fn register(executor: Executor) {
    registry()
        .write()
        .unwrap()
        .insert(executor.name(), executor);
}

pub fn get(name: &str) -> Option<Executor> {
    registry().read().unwrap().get(name).cloned()
}

pub fn unregister(name: &str) {
    registry().write().unwrap().remove(name);
}
