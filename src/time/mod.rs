//! Component K (second half): time as an effect — `sleep`, layered on the
//! [`scheduler`] module's [`TimeDriver`].
//!
//! spec.md's Design Notes call out timing as the one place a target
//! implementation is expected to reach for *something* beyond the effect
//! core itself ("the only timing primitive required for `sleep`"); this
//! module is that something, reduced to exactly what `sleep`/`timeout`
//! need.

pub mod scheduler;
pub mod test_util;

use std::sync::Arc;
use std::time::Duration;

pub use scheduler::{CancelToken, Scheduler, TimeDriver};

use crate::effect::node::{erase, Node};
use crate::effect::Effect;

/// Suspend the calling fiber until `duration` has elapsed on `driver`.
/// Reduces directly to `EffectAsync` (¤4.C): the registration schedules a
/// wakeup and returns `None`, so the fiber truly suspends rather than
/// busy-polling.
pub fn sleep<E: Send + Sync + Clone + 'static>(
    driver: &Arc<dyn TimeDriver>,
    duration: Duration,
) -> Effect<E, ()> {
    let driver = driver.clone();
    Effect::from_node(Node::EffectAsync(
        Box::new(move |resume| {
            driver.schedule(
                duration,
                Box::new(move || {
                    resume(Node::Succeed(erase(())));
                }),
            );
            None
        }),
        None,
    ))
}
