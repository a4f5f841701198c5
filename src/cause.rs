//! Component A: the `Cause` algebra.
//!
//! A `Cause<E>` is a composable failure value: a typed error, a defect (an
//! unexpected panic caught by the interpreter), an interruption, or a
//! combination of these built with the `Then`/`Both` combinators. `Empty` is
//! the identity for both combinators.
//!
//! Interruption never carries a type parameter — a fiber's own accumulated
//! "I've been asked to stop" state is tracked separately as [`Interrupts`],
//! which is untyped so it can be merged across fibers running effects with
//! different `E` types (ancestor propagation, ¤4.G). [`Cause::lift`] embeds
//! an `Interrupts` tree losslessly into any `Cause<E>`.

use std::fmt;
use std::sync::Arc;

use crate::fiber::FiberId;

/// A type-erased panic payload captured by the interpreter when a user
/// thunk (`EffectTotal`/`EffectPartial`) panics instead of returning
/// normally. Stored as `Arc` so causes remain cheaply cloneable.
pub type Defect = Arc<dyn std::any::Any + Send + Sync>;

/// `std::panic::catch_unwind` hands back `Box<dyn Any + Send>` — not
/// `Sync`, since nothing stops a panic payload from containing a
/// non-thread-safe type. In practice the payload is inert the moment it is
/// caught (single owner, read-only inspection via `downcast_ref`), so this
/// wrapper asserts `Sync` the same way `AssertUnwindSafe` asserts
/// `UnwindSafe`: a deliberate, narrow claim about how the value is actually
/// used, not a general guarantee about `Box<dyn Any + Send>`.
struct PanicPayload(Box<dyn std::any::Any + Send>);

// Safety: a `PanicPayload` is read through `downcast_ref` only, never
// mutated or shared for concurrent access beyond that.
unsafe impl Sync for PanicPayload {}

/// Wrap a caught panic payload as a [`Defect`].
pub fn defect_from_panic(payload: Box<dyn std::any::Any + Send>) -> Defect {
    Arc::new(PanicPayload(payload))
}

pub(crate) fn defect_message(defect: &Defect) -> String {
    let Some(payload) = defect.downcast_ref::<PanicPayload>() else {
        return "<opaque defect>".to_string();
    };
    if let Some(s) = payload.0.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.0.downcast_ref::<String>() {
        s.clone()
    } else {
        "<opaque defect>".to_string()
    }
}

/// The untyped subset of a `Cause` that tracks nothing but interruption.
///
/// This is what [`FiberState`](crate::fiber::state::FiberState) accumulates:
/// it never needs to know the error type of the effect it belongs to in
/// order to record "fiber 7 asked me to stop".
#[derive(Clone, Debug, Default)]
pub struct Interrupts(Option<Arc<InterruptNode>>);

#[derive(Debug)]
enum InterruptNode {
    Interrupt(FiberId),
    Then(Interrupts, Interrupts),
    Both(Interrupts, Interrupts),
}

impl Interrupts {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn interrupt(by: FiberId) -> Self {
        Self(Some(Arc::new(InterruptNode::Interrupt(by))))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Sequential composition: `self` happened, then `other`.
    pub fn then(self, other: Self) -> Self {
        match (&self.0, &other.0) {
            (None, _) => other,
            (_, None) => self,
            _ => Self(Some(Arc::new(InterruptNode::Then(self, other)))),
        }
    }

    /// Parallel composition: `self` and `other` both happened, order
    /// unspecified.
    pub fn both(self, other: Self) -> Self {
        match (&self.0, &other.0) {
            (None, _) => other,
            (_, None) => self,
            _ => Self(Some(Arc::new(InterruptNode::Both(self, other)))),
        }
    }

    /// Returns `true` if this cause records an interruption by any fiber.
    pub fn is_interrupted(&self) -> bool {
        self.0.is_some()
    }

    /// The set of fiber ids that requested interruption.
    pub fn interruptors(&self) -> Vec<FiberId> {
        fn walk(node: &Interrupts, out: &mut Vec<FiberId>) {
            let Some(n) = &node.0 else { return };
            match n.as_ref() {
                InterruptNode::Interrupt(id) => out.push(*id),
                InterruptNode::Then(a, b) | InterruptNode::Both(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }

    /// `true` if `other`'s interruptors are a subset of `self`'s — used to
    /// avoid re-appending an interrupt a cause already records (¤4.F.3).
    pub fn contains(&self, by: FiberId) -> bool {
        self.interruptors().contains(&by)
    }
}

/// Component A: a composable failure value.
///
/// `Empty` is the identity of both `Then` (sequential) and `Both` (parallel)
/// composition; both combinators are total and allocate only the
/// newly-created node (O(1) beyond existing subtrees, since subtrees are
/// `Arc`-shared).
#[derive(Clone)]
pub enum Cause<E> {
    Empty,
    Fail(Arc<E>),
    Die(Defect),
    Interrupt(FiberId),
    Then(Arc<Cause<E>>, Arc<Cause<E>>),
    Both(Arc<Cause<E>>, Arc<Cause<E>>),
}

impl<E> Cause<E> {
    pub fn fail(e: E) -> Self {
        Cause::Fail(Arc::new(e))
    }

    pub fn die(defect: Defect) -> Self {
        Cause::Die(defect)
    }

    pub fn interrupt(by: FiberId) -> Self {
        Cause::Interrupt(by)
    }

    /// Embed an untyped [`Interrupts`] tree into a typed `Cause<E>`. Never
    /// produces `Fail`/`Die` nodes.
    pub fn lift(interrupts: &Interrupts) -> Self {
        fn walk<E>(node: &Interrupts) -> Cause<E> {
            let Some(n) = &node.0 else { return Cause::Empty };
            match n.as_ref() {
                InterruptNode::Interrupt(id) => Cause::Interrupt(*id),
                InterruptNode::Then(a, b) => Cause::Then(Arc::new(walk(a)), Arc::new(walk(b))),
                InterruptNode::Both(a, b) => Cause::Both(Arc::new(walk(a)), Arc::new(walk(b))),
            }
        }
        walk(interrupts)
    }

    pub fn then(self, other: Self) -> Self {
        match (&self, &other) {
            (Cause::Empty, _) => other,
            (_, Cause::Empty) => self,
            _ => Cause::Then(Arc::new(self), Arc::new(other)),
        }
    }

    pub fn both(self, other: Self) -> Self {
        match (&self, &other) {
            (Cause::Empty, _) => other,
            (_, Cause::Empty) => self,
            _ => Cause::Both(Arc::new(self), Arc::new(other)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cause::Empty)
    }

    pub fn failed(&self) -> bool {
        self.fold_bool(|c| matches!(c, Cause::Fail(_)))
    }

    pub fn died(&self) -> bool {
        self.fold_bool(|c| matches!(c, Cause::Die(_)))
    }

    pub fn interrupted(&self) -> bool {
        self.fold_bool(|c| matches!(c, Cause::Interrupt(_)))
    }

    fn fold_bool(&self, pred: impl Fn(&Self) -> bool + Copy) -> bool {
        match self {
            Cause::Then(a, b) | Cause::Both(a, b) => a.fold_bool(pred) || b.fold_bool(pred),
            other => pred(other),
        }
    }

    /// The set of fiber ids that appear as `Interrupt` nodes anywhere in this
    /// cause.
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out = Vec::new();
        self.collect_interruptors(&mut out);
        out
    }

    fn collect_interruptors(&self, out: &mut Vec<FiberId>) {
        match self {
            Cause::Interrupt(id) => out.push(*id),
            Cause::Then(a, b) | Cause::Both(a, b) => {
                a.collect_interruptors(out);
                b.collect_interruptors(out);
            }
            _ => {}
        }
    }

    /// Structural containment modulo the `Empty` identity: does `self`
    /// contain `sub` as a (reflexive) subtree?
    pub fn contains(&self, sub: &Self) -> bool
    where
        E: PartialEq,
    {
        if self.structural_eq(sub) {
            return true;
        }
        match self {
            Cause::Then(a, b) | Cause::Both(a, b) => a.contains(sub) || b.contains(sub),
            _ => false,
        }
    }

    fn structural_eq(&self, other: &Self) -> bool
    where
        E: PartialEq,
    {
        match (self, other) {
            (Cause::Empty, Cause::Empty) => true,
            (Cause::Fail(a), Cause::Fail(b)) => **a == **b,
            (Cause::Die(a), Cause::Die(b)) => Arc::ptr_eq(a, b),
            (Cause::Interrupt(a), Cause::Interrupt(b)) => a == b,
            (Cause::Then(a1, b1), Cause::Then(a2, b2)) => {
                a1.structural_eq(a2) && b1.structural_eq(b2)
            }
            (Cause::Both(a1, b1), Cause::Both(a2, b2)) => {
                (a1.structural_eq(a2) && b1.structural_eq(b2))
                    || (a1.structural_eq(b2) && b1.structural_eq(a2))
            }
            _ => false,
        }
    }

    /// Splits off the first typed failure, if any, returning the remaining
    /// cause with that node replaced by `Empty`.
    pub fn failure_or_cause(&self) -> Result<Arc<E>, Self>
    where
        E: Clone,
    {
        match self {
            Cause::Fail(e) => Ok(e.clone()),
            _ => Err(self.clone()),
        }
    }

    /// Lift the optional-error domain (`Option<E>`) into a cause: `None` is
    /// `Empty`, `Some(e)` is `Fail(e)`.
    pub fn sequence_cause_option(opt: Option<E>) -> Self {
        match opt {
            None => Cause::Empty,
            Some(e) => Cause::fail(e),
        }
    }

    pub fn pretty_print(&self) -> String
    where
        E: fmt::Display,
    {
        match self {
            Cause::Empty => "<empty>".to_string(),
            Cause::Fail(e) => format!("Fail({e})"),
            Cause::Die(d) => format!("Die({})", defect_message(d)),
            Cause::Interrupt(id) => format!("Interrupt(by={id:?})"),
            Cause::Then(a, b) => format!("{}\n  ++ {}", a.pretty_print(), b.pretty_print()),
            Cause::Both(a, b) => format!("{}\n  && {}", a.pretty_print(), b.pretty_print()),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Empty => f.write_str("Empty"),
            Cause::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            Cause::Die(d) => f
                .debug_tuple("Die")
                .field(&defect_message(d))
                .finish(),
            Cause::Interrupt(id) => f.debug_tuple("Interrupt").field(id).finish(),
            Cause::Then(a, b) => f.debug_tuple("Then").field(a).field(b).finish(),
            Cause::Both(a, b) => f.debug_tuple("Both").field(a).field(b).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(n: u64) -> FiberId {
        FiberId::from_raw(n)
    }

    #[test]
    fn empty_is_identity() {
        let c = Cause::<&str>::fail("boom");
        assert!(c.clone().then(Cause::Empty).contains(&c));
        assert!(Cause::Empty.then(c.clone()).contains(&c));
        assert!(c.clone().both(Cause::Empty).contains(&c));
    }

    #[test]
    fn predicates() {
        let c = Cause::<&str>::interrupt(fid(1));
        assert!(c.interrupted());
        assert!(!c.failed());
        assert!(!c.died());

        let c2 = Cause::<&str>::fail("x").then(Cause::interrupt(fid(2)));
        assert!(c2.failed());
        assert!(c2.interrupted());
        assert_eq!(c2.interruptors(), vec![fid(2)]);
    }

    #[test]
    fn interrupts_merge_and_lift() {
        let a = Interrupts::interrupt(fid(1));
        let b = Interrupts::interrupt(fid(2));
        let merged = a.both(b);
        assert_eq!(merged.interruptors(), vec![fid(1), fid(2)]);
        assert!(merged.contains(fid(1)));

        let lifted: Cause<&str> = Cause::lift(&merged);
        assert!(lifted.interrupted());
        assert_eq!(lifted.interruptors(), vec![fid(1), fid(2)]);
    }

    #[test]
    fn contains_is_structural_and_commutative_for_both() {
        let a = Cause::<&str>::fail("a");
        let b = Cause::<&str>::interrupt(fid(9));
        let lhs = a.clone().both(b.clone());
        let rhs = b.both(a);
        assert!(lhs.contains(&rhs));
    }
}
