//! Component H/I: the runtime's concurrency primitives — promises, atomic
//! refs, and fiber-locals.

pub mod atomic_ref;
pub mod fiber_ref;
pub mod promise;

pub use atomic_ref::Ref;
pub use fiber_ref::{FiberRef, FiberRefId};
pub use promise::Promise;
