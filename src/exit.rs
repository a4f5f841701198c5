//! Component B: `Exit`, the terminal outcome of a fiber.

use crate::cause::Cause;

/// The terminal outcome of running an effect to completion: either a success
/// value or a failure [`Cause`].
pub enum Exit<E, A> {
    Success(A),
    Failure(Cause<E>),
}

impl<E, A> Exit<E, A> {
    pub fn succeed(value: A) -> Self {
        Exit::Success(value)
    }

    pub fn fail(cause: Cause<E>) -> Self {
        Exit::Failure(cause)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    pub fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Exit::Failure(c) => Some(c),
            Exit::Success(_) => None,
        }
    }

    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<E, B> {
        match self {
            Exit::Success(a) => Exit::Success(f(a)),
            Exit::Failure(c) => Exit::Failure(c),
        }
    }

    /// Collapse a success/failure pair into a plain [`Result`], discarding
    /// the distinction between a typed failure and a defect/interruption.
    /// Mirrors `Fold`'s unification of the error channel.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Exit::Success(a) => Ok(a),
            Exit::Failure(c) => Err(c),
        }
    }
}

impl<E: Clone, A: Clone> Clone for Exit<E, A> {
    fn clone(&self) -> Self {
        match self {
            Exit::Success(a) => Exit::Success(a.clone()),
            Exit::Failure(c) => Exit::Failure(c.clone()),
        }
    }
}

impl<E, A> std::fmt::Debug for Exit<E, A>
where
    E: std::fmt::Debug,
    A: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exit::Success(a) => f.debug_tuple("Success").field(a).finish(),
            Exit::Failure(c) => f.debug_tuple("Failure").field(c).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::FiberId;

    #[test]
    fn map_only_touches_success() {
        let e: Exit<&str, i32> = Exit::succeed(1);
        assert!(matches!(e.map(|v| v + 1), Exit::Success(2)));

        let e: Exit<&str, i32> = Exit::fail(Cause::interrupt(FiberId::from_raw(1)));
        assert!(matches!(e.map(|v| v + 1), Exit::Failure(_)));
    }
}
