//! [`Clock`] — the `now()` collaborator threaded through context.
//!
//! The core never reads the wall clock directly; every timestamp written
//! into [`crate::state::OperationState`] goes through a `Clock` pulled
//! from [`crate::context::Context`], so tests can freeze or advance time
//! deterministically.

use crate::context::ContextKey;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// `now()` as an injectable collaborator.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The default clock, backed by the system wall clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests: starts at a fixed instant and only moves
/// when [`MockClock::advance`] or [`MockClock::set`] is called.
#[derive(Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn epoch() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(0, 0).expect("valid epoch"))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Context key carrying the injected [`Clock`].
pub struct ClockKey;

impl ContextKey for ClockKey {
    type Value = Arc<dyn Clock>;

    fn default_value() -> Self::Value {
        Arc::new(SystemClock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_deterministically() {
        let clock = MockClock::epoch();
        let t0 = clock.now();
        clock.advance(chrono::Duration::seconds(2));
        let t1 = clock.now();
        assert_eq!((t1 - t0).num_seconds(), 2);
    }
}
