//! `Fiber<E, A>`: the public handle to a running (or completed) fiber.
//!
//! Wraps the object-safe [`AnyFiberContext`] the interpreter already hands
//! back from `Fork`/`RaceWith`, recovering the fiber's typed success value
//! the same way [`crate::effect::node`] recovers any other erased value: a
//! checked downcast at the one point it leaves the interpreter.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::effect::node::{erase, unerase, Erased, Node};
use crate::effect::Effect;
use crate::exit::Exit;
use crate::fiber::context::AnyFiberContext;
use crate::fiber::id::FiberId;

/// A handle to a fiber forked by [`crate::effect::fork`] or
/// [`crate::effect::fork_daemon`]. Cloning a `Fiber` shares the same
/// underlying fiber; both clones observe the same completion.
pub struct Fiber<E, A> {
    pub(crate) handle: Arc<dyn AnyFiberContext<E>>,
    _marker: PhantomData<fn() -> A>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E, A> Fiber<E, A> {
    pub(crate) fn from_handle(handle: Arc<dyn AnyFiberContext<E>>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> FiberId {
        self.handle.id()
    }
}

fn downcast_exit<E, A: Send + Sync + Clone + 'static>(exit: Exit<E, Erased>) -> Exit<E, A> {
    exit.map(unerase::<A>)
}

impl<E, A> Fiber<E, A>
where
    E: Send + Sync + Clone + 'static,
    A: Send + Sync + Clone + 'static,
{
    /// Await this fiber's `Exit` without propagating failure into the
    /// calling tree — the ZIO-style "await", as opposed to `join`.
    pub fn await_exit(self) -> Effect<E, Exit<E, A>> {
        let handle = self.handle;
        Effect::from_node(Node::EffectAsync(
            Box::new(move |resume| {
                handle.observe_erased(Box::new(move |exit: Exit<E, Erased>| {
                    let typed = downcast_exit::<E, A>(exit);
                    resume(Node::Succeed(erase(typed)));
                }));
                None
            }),
            None,
        ))
    }

    /// Await this fiber's result, re-raising its cause in the calling tree
    /// on failure (spec.md testable property #5: a joiner observes exactly
    /// the joined fiber's own `Exit`).
    pub fn join(self) -> Effect<E, A> {
        self.await_exit().flat_map(|exit| match exit {
            Exit::Success(v) => Effect::succeed(v),
            Exit::Failure(c) => Effect::halt(c),
        })
    }

    /// Interrupt this fiber (attributing the interruption to the calling
    /// fiber) and await its final `Exit`.
    pub fn interrupt(self) -> Effect<E, Exit<E, A>> {
        let handle = self.handle;
        Effect::from_node(Node::Descriptor(Box::new(move |desc| {
            handle.clone().interrupt_as(desc.id);
            Fiber::<E, A>::from_handle(handle).await_exit().into_node()
        })))
    }
}
