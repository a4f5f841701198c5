//! End-to-end scenarios run against a real [`Runtime`]: one fiber forking
//! another, racing against a timer, or being interrupted mid-flight.
//! Component-level behavior (the `Cause` algebra, `Queue` strategies,
//! `Promise` completion, `FiberState` transitions) already has its own
//! `#[cfg(test)]` coverage next to the code; these tests exercise the
//! pieces wired together the way a user program actually would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibril::{effect, time, Effect, Exit, Fiber, FiberRef, Platform, Promise, Queue, Runtime};

fn runtime() -> Runtime {
    Runtime::new(Platform::default_platform())
}

#[test]
fn succeed_runs_to_completion() {
    let exit = runtime().unsafe_run(Effect::<String, i32>::succeed(41).map(|v| v + 1));
    assert!(matches!(exit, Exit::Success(42)));
}

#[test]
fn typed_failure_is_recovered_by_catch_all() {
    let program: Effect<String, i32> = Effect::fail("boom".to_string())
        .catch_all(|e| Effect::succeed(e.len() as i32));
    let exit = runtime().unsafe_run(program);
    assert!(matches!(exit, Exit::Success(4)));
}

#[test]
fn fork_then_join_returns_the_childs_value() {
    let program = effect::fork(Effect::<String, i32>::succeed(7)).flat_map(|child| child.join());
    let exit = runtime().unsafe_run(program);
    assert!(matches!(exit, Exit::Success(7)));
}

#[test]
fn nested_provide_layers_services_without_hiding_the_outer_one() {
    struct Outer(i32);
    struct Inner(i32);

    let program: Effect<String, (i32, i32)> = effect::provide(
        Outer(1),
        effect::provide(
            Inner(2),
            effect::access::<String, Outer, i32>(|o| o.0).flat_map(|o| {
                effect::access::<String, Inner, i32>(|i| i.0).map(move |i| (o, i))
            }),
        ),
    );
    let exit = runtime().unsafe_run(program);
    assert!(matches!(exit, Exit::Success((1, 2))));
}

/// S1: interrupting a fiber suspended in `sleep` reports an interrupted
/// `Exit`, not a hang or a success.
#[test]
fn interrupting_a_sleeping_fiber_reports_interrupted() {
    let rt = runtime();
    let driver = rt.platform().scheduler.clone();
    let started: Arc<Promise<String, ()>> = Arc::new(Promise::new());
    let started_in_child = started.clone();

    let child_effect: Effect<String, ()> = Effect::from_fn(move || {
        started_in_child.succeed(());
    })
    .flat_map(move |_| time::sleep(&driver, Duration::from_secs(30)));

    let program = effect::fork(child_effect).flat_map(move |child: Fiber<String, ()>| {
        effect::promise_await(started).flat_map(move |_: ()| child.interrupt())
    });

    let exit = rt.unsafe_run(program);
    match exit {
        Exit::Success(inner) => {
            assert!(matches!(inner, Exit::Failure(ref c) if c.interrupted()))
        }
        Exit::Failure(c) => panic!("root effect should not itself fail: {}", c.pretty_print()),
    }
}

/// S2: racing an effect against a timer resolves to whichever finishes
/// first; the loser is interrupted.
#[test]
fn timeout_wins_when_the_effect_is_slower_than_the_deadline() {
    let rt = runtime();
    let driver = rt.platform().scheduler.clone();
    let slow: Effect<String, i32> = time::sleep(&driver, Duration::from_secs(30)).replace(1);
    let raced = effect::timeout(slow, Duration::from_millis(20), &driver);
    let exit = rt.unsafe_run(raced);
    assert!(matches!(exit, Exit::Success(None)));
}

#[test]
fn timeout_returns_the_value_when_the_effect_finishes_first() {
    let rt = runtime();
    let driver = rt.platform().scheduler.clone();
    let fast: Effect<String, i32> = Effect::succeed(7);
    let raced = effect::timeout(fast, Duration::from_secs(30), &driver);
    let exit = rt.unsafe_run(raced);
    assert!(matches!(exit, Exit::Success(Some(7))));
}

/// S3: `acquire_release`'s finalizer runs exactly once even when the `use_`
/// region is interrupted mid-flight.
#[test]
fn bracket_release_runs_on_interruption() {
    let rt = runtime();
    let driver = rt.platform().scheduler.clone();
    let started: Arc<Promise<String, ()>> = Arc::new(Promise::new());
    let started_in_use = started.clone();
    let released = Arc::new(AtomicBool::new(false));
    let released_in_release = released.clone();

    let program: Effect<String, ()> = effect::acquire_release(
        Effect::succeed(()),
        move |_: ()| {
            let released = released_in_release.clone();
            Effect::from_fn(move || {
                released.store(true, Ordering::SeqCst);
            })
        },
        move |_: ()| {
            Effect::from_fn(move || {
                started_in_use.succeed(());
            })
            .flat_map(move |_| time::sleep(&driver, Duration::from_secs(30)))
        },
    );

    let outer = effect::fork(program).flat_map(move |child: Fiber<String, ()>| {
        effect::promise_await(started).flat_map(move |_: ()| child.interrupt())
    });

    let exit = rt.unsafe_run(outer);
    assert!(matches!(exit, Exit::Success(Exit::Failure(ref c)) if c.interrupted()));
    assert!(released.load(Ordering::SeqCst), "release must run on interruption");
}

/// S4: a forked child inherits a snapshot of the parent's fiber-refs; on
/// join, the child's own writes are folded back via the ref's combine
/// function (last-writer-wins here).
#[test]
fn fiber_ref_child_update_is_combined_into_parent_on_join() {
    let rt = runtime();
    let program = effect::fiber_ref_make::<String, i32>(1, |_parent: i32, child: i32| child)
        .flat_map(|r: FiberRef<i32>| {
            let r_for_join = r.clone();
            effect::fork(r.set::<String>(2)).flat_map(move |child| {
                child.join().flat_map(move |_: ()| r_for_join.get::<String>())
            })
        });
    let exit = rt.unsafe_run(program);
    assert!(matches!(exit, Exit::Success(2)));
}

/// S5: a bounded queue suspends its producer once full, and only admits the
/// parked item once a consumer frees a slot.
#[test]
fn bounded_queue_backpressures_producer_until_a_slot_frees() {
    let rt = runtime();
    let q: Queue<i32> = Queue::bounded(1);
    q.try_offer(1).expect("queue is not shut down");

    let q_for_consumer = q.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(q_for_consumer.try_take(), Some(1));
    });

    let exit = rt.unsafe_run(effect::queue_offer::<String, i32>(q.clone(), 2));
    assert!(matches!(exit, Exit::Success(true)));
    assert_eq!(q.try_take(), Some(2));
}

/// S6: only the first completion of a `Promise` takes effect, and every
/// awaiter — however it was scheduled — observes that same value.
#[test]
fn promise_completes_exactly_once_and_every_awaiter_sees_the_same_value() {
    let rt = runtime();
    let promise: Arc<Promise<String, i32>> = Arc::new(Promise::new());
    let p_a = promise.clone();
    let p_b = promise.clone();
    let p_complete = promise;

    let awaiters = effect::zip_par(effect::promise_await(p_a), effect::promise_await(p_b));

    let program = effect::fork(awaiters).flat_map(move |awaiters_fiber| {
        Effect::from_fn(move || {
            assert!(p_complete.succeed(1));
            assert!(!p_complete.succeed(2));
        })
        .flat_map(move |_| awaiters_fiber.join())
    });

    let exit = rt.unsafe_run(program);
    match exit {
        Exit::Success((a, b)) => assert_eq!((a, b), (1, 1)),
        Exit::Failure(c) => panic!("unexpected failure: {}", c.pretty_print()),
    }
}

/// S1 (test-clock variant): advancing a [`time::test_util::TestClock`] short
/// of a sleeping fiber's deadline must not complete it; interrupting that
/// fiber afterwards still reports interrupted, not success.
#[test]
fn advancing_a_test_clock_short_of_the_deadline_leaves_a_long_sleep_interruptible() {
    let rt = runtime();
    let clock = time::test_util::TestClock::new();
    let driver: Arc<dyn time::TimeDriver> = clock.clone();
    let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
    let completed = Arc::new(AtomicBool::new(false));
    let completed_in_child = completed.clone();
    let clock_in_child = driver.clone();

    let child_effect: Effect<String, ()> = Effect::from_fn(move || {
        let _ = started_tx.send(());
    })
    .flat_map(move |_| time::sleep(&clock_in_child, Duration::from_secs(10 * 3600)))
    .flat_map(move |_| Effect::from_fn(move || completed_in_child.store(true, Ordering::SeqCst)));

    let child = rt.unsafe_run_async(child_effect);
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("child fiber never reached its sleep");

    clock.advance(Duration::from_secs(9 * 3600));
    assert!(!completed.load(Ordering::SeqCst), "a 10h sleep fired after only 9h");

    let exit = rt.unsafe_run(child.interrupt());
    match exit {
        Exit::Success(inner) => {
            assert!(matches!(inner, Exit::Failure(ref c) if c.interrupted()))
        }
        Exit::Failure(c) => panic!("interrupting effect should not itself fail: {}", c.pretty_print()),
    }
    assert!(!completed.load(Ordering::SeqCst), "sleep must not have fired before interruption");
}

/// Property #9: `zip_par(sleep(a), sleep(b))` takes exactly `max(a, b)` of
/// virtual time to complete, not `a + b` — advancing a test clock by the
/// larger of the two durations is enough to resolve both.
#[test]
fn zip_par_of_two_test_clock_sleeps_resolves_after_advancing_by_their_max() {
    let rt = runtime();
    let clock = time::test_util::TestClock::new();
    let shorter = Duration::from_secs(30);
    let longer = Duration::from_secs(90);

    let driver_a: Arc<dyn time::TimeDriver> = clock.clone();
    let driver_b: Arc<dyn time::TimeDriver> = clock.clone();
    let program: Effect<String, ((), ())> =
        effect::zip_par(time::sleep(&driver_a, shorter), time::sleep(&driver_b, longer));

    let fiber = rt.unsafe_run_async(program);
    // let both sides register their deadline with the clock before advancing it.
    std::thread::sleep(Duration::from_millis(50));
    clock.advance(longer.max(shorter));

    let exit = rt.unsafe_run(fiber.join());
    assert!(matches!(exit, Exit::Success(((), ()))));
    assert_eq!(clock.elapsed(), longer);
}

/// S9: a fiber that never explicitly yields still gets preempted by the
/// op-count budget, so two such fibers running concurrently both make
/// progress instead of one starving the other.
#[test]
fn op_count_budget_lets_two_long_running_fibers_both_finish() {
    fn count_down<E: Send + Sync + Clone + 'static>(n: u32) -> Effect<E, u32> {
        if n == 0 {
            Effect::succeed(0)
        } else {
            Effect::suspend(move || count_down::<E>(n - 1))
        }
    }

    let program = effect::zip_par(
        count_down::<String>(200_000),
        count_down::<String>(200_000),
    );
    let exit = runtime().unsafe_run(program);
    assert!(matches!(exit, Exit::Success((0, 0))));
}
