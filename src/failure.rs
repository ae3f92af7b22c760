//! The two-variant error channel every operation runs through.

use std::fmt;

/// Either the user operation's own error or the distinct `Cancelled`
/// sentinel.
///
/// Cancellation is never retried, never cleared by staleness, but is
/// observable via [`Failure::is_cancelled`].
#[derive(Debug, Clone)]
pub enum Failure<E> {
    Operation(E),
    Cancelled,
}

impl<E> Failure<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Failure::Cancelled)
    }

    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Failure::Operation(e) => Some(e),
            Failure::Cancelled => None,
        }
    }

    pub fn map<F, U>(self, f: F) -> Failure<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Failure::Operation(e) => Failure::Operation(f(e)),
            Failure::Cancelled => Failure::Cancelled,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Operation(e) => write!(f, "{e}"),
            Failure::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Failure<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinct_from_operation_errors() {
        let cancelled: Failure<String> = Failure::Cancelled;
        let op: Failure<String> = Failure::Operation("boom".into());

        assert!(cancelled.is_cancelled());
        assert!(!op.is_cancelled());
        assert_eq!(op.operation_error(), Some(&"boom".to_string()));
        assert_eq!(cancelled.operation_error(), None);
    }
}
