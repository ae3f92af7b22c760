//! Backoff functions: pure `retry index -> Duration` mappings.

use std::sync::Arc;
use std::time::Duration;

/// A pure backoff function, boxed so it can live in a [`crate::context::Context`]
/// entry and be passed around without generics leaking into every modifier.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// `base * 2^(n-1)` for `n >= 1`, `0` at `n == 0`.
pub fn exponential(base: Duration) -> BackoffFn {
    Arc::new(move |n| {
        if n == 0 {
            Duration::ZERO
        } else {
            base.saturating_mul(1u32 << (n - 1).min(31))
        }
    })
}

/// `step * n`.
pub fn linear(step: Duration) -> BackoffFn {
    Arc::new(move |n| step.saturating_mul(n))
}

/// `step * fib(n)`, with `fib(0) = 0`, `fib(1) = 1`.
pub fn fibonacci(step: Duration) -> BackoffFn {
    Arc::new(move |n| {
        let (mut a, mut b) = (0u32, 1u32);
        for _ in 0..n {
            let next = a.saturating_add(b);
            a = b;
            b = next;
        }
        step.saturating_mul(a)
    })
}

/// Always `duration`, regardless of retry index.
pub fn constant(duration: Duration) -> BackoffFn {
    Arc::new(move |_n| duration)
}

/// Always zero — used by tests and by `CompletelyOffline`.
pub fn no_backoff() -> BackoffFn {
    Arc::new(|_n| Duration::ZERO)
}

/// Multiplies `inner`'s result by a uniform random factor in `(0, 1]`.
pub fn jittered(inner: BackoffFn) -> BackoffFn {
    Arc::new(move |n| {
        use rand::Rng;
        let base = inner(n);
        let factor: f64 = rand::rng().random_range(f64::EPSILON..=1.0);
        base.mul_f64(factor)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_from_the_second_retry() {
        let backoff = exponential(Duration::from_millis(100));
        assert_eq!(backoff(0), Duration::ZERO);
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(200));
        assert_eq!(backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn linear_scales_by_index() {
        let backoff = linear(Duration::from_millis(50));
        assert_eq!(backoff(3), Duration::from_millis(150));
    }

    #[test]
    fn fibonacci_matches_sequence() {
        let backoff = fibonacci(Duration::from_millis(10));
        assert_eq!(backoff(0), Duration::ZERO);
        assert_eq!(backoff(1), Duration::from_millis(10));
        assert_eq!(backoff(2), Duration::from_millis(10));
        assert_eq!(backoff(3), Duration::from_millis(20));
        assert_eq!(backoff(4), Duration::from_millis(30));
    }

    #[test]
    fn constant_ignores_index() {
        let backoff = constant(Duration::from_secs(1));
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(10), Duration::from_secs(1));
    }

    #[test]
    fn no_backoff_is_always_zero() {
        assert_eq!(no_backoff()(5), Duration::ZERO);
    }

    #[test]
    fn jittered_never_exceeds_base() {
        let backoff = jittered(constant(Duration::from_secs(1)));
        for n in 0..20 {
            assert!(backoff(n) <= Duration::from_secs(1));
        }
    }
}
