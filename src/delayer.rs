//! [`Delayer`] — the sleep collaborator the retry modifier waits on.
//!
//! The retry modifier (`src/modifiers/retry.rs`) is the main consumer:
//! it awaits `delayer.delay(backoff(retry_index), &cancel)` between
//! attempts, and a cancelled task must not block on a full backoff
//! sleep it will never get to use.

use crate::cancel::CancelToken;
use crate::context::ContextKey;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Sleeps for a `Duration`, honouring cooperative cancellation via the
/// passed [`CancelToken`].
#[async_trait]
pub trait Delayer: Send + Sync {
    /// Sleeps for `duration`, or returns early if `cancel` fires first.
    /// Returns `true` if the sleep completed, `false` if it was cancelled.
    async fn delay(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Sleeps using the tokio runtime clock.
#[derive(Debug, Clone, Default)]
pub struct TokioDelayer;

#[async_trait]
impl Delayer for TokioDelayer {
    async fn delay(&self, duration: Duration, cancel: &CancelToken) -> bool {
        if duration.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// Never actually sleeps — used by tests and by `CompletelyOffline` style
/// configurations where backoff is disabled anyway.
#[derive(Debug, Clone, Default)]
pub struct NoDelay;

#[async_trait]
impl Delayer for NoDelay {
    async fn delay(&self, _duration: Duration, cancel: &CancelToken) -> bool {
        !cancel.is_cancelled()
    }
}

/// Context key carrying the injected [`Delayer`].
pub struct DelayerKey;

impl ContextKey for DelayerKey {
    type Value = Arc<dyn Delayer>;

    fn default_value() -> Self::Value {
        Arc::new(TokioDelayer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_delay_returns_immediately() {
        let cancel = CancelToken::new();
        assert!(NoDelay.delay(Duration::from_secs(5), &cancel).await);
    }

    #[tokio::test]
    async fn cancelling_interrupts_tokio_delayer() {
        let cancel = CancelToken::new();
        let delayer = TokioDelayer;
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            c2.cancel();
        });
        let completed = delayer.delay(Duration::from_secs(30), &cancel).await;
        assert!(!completed);
    }
}
