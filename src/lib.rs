//! fibril: a structured, effect-based concurrent runtime.
//!
//! The core is a fiber interpreter: computations are reified as an effect
//! tree ([`effect::node::Node`]) rather than run directly, so the tree can be
//! suspended, resumed, raced, and interrupted without ever recursing through
//! the host call stack. A cooperative, bounded-op-count scheduler
//! ([`fiber::interpreter`]) walks the tree on a work-stealing executor
//! ([`executor::Executor`]); structured supervision ([`fiber::supervisor`])
//! keeps parent/child fibers (and daemon fibers that opt out of that
//! structure) consistent under interruption.
//!
//! Start here: build an [`Effect`] with its constructors and combinators,
//! then hand it to a [`Runtime`].

pub mod cause;
pub mod effect;
pub mod env;
pub mod error;
pub mod executor;
pub mod exit;
pub mod fiber;
pub mod park;
pub mod queue;
pub mod runtime;
pub mod sync;
pub mod time;

pub use cause::Cause;
pub use effect::Effect;
pub use env::Env;
pub use exit::Exit;
pub use fiber::{Fiber, FiberId};
pub use queue::Queue;
pub use runtime::{Platform, Runtime};
pub use sync::{FiberRef, Promise, Ref};
