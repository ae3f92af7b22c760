//! Retry modifier.

use super::backoff::{self, BackoffFn};
use crate::cancel::RunCancelKey;
use crate::context::{Context, ContextKey};
use crate::delayer::{Delayer, DelayerKey};
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use async_trait::async_trait;

/// Current retry attempt index, starting at 0 for the first attempt.
pub struct RetryIndexKey;
impl ContextKey for RetryIndexKey {
    type Value = u32;
    fn default_value() -> u32 {
        0
    }
}

/// Maximum number of retries after the first attempt (0 disables retry).
pub struct MaxRetriesKey;
impl ContextKey for MaxRetriesKey {
    type Value = u32;
    fn default_value() -> u32 {
        0
    }
}

/// The backoff function consulted between attempts.
pub struct BackoffKey;
impl ContextKey for BackoffKey {
    type Value = BackoffFn;
    fn default_value() -> BackoffFn {
        backoff::no_backoff()
    }
}

/// Wraps `inner`, retrying on failure up to `max_retries` additional
/// times, sleeping `backoff(retry_index)` between attempts via the
/// context's [`crate::delayer::Delayer`]. `Failure::Cancelled` is never
/// retried.
pub struct Retry<O: Operation> {
    inner: O,
    max_retries: u32,
    backoff: BackoffFn,
}

impl<O: Operation> Retry<O> {
    pub fn new(inner: O, max_retries: u32, backoff: BackoffFn) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }
}

#[async_trait]
impl<O: Operation> Operation for Retry<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
        ctx.set::<MaxRetriesKey>(self.max_retries);
        ctx.set::<BackoffKey>(self.backoff.clone());
    }

    async fn run(
        &self,
        mut ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        let max_retries = ctx.get::<MaxRetriesKey>();
        let backoff = ctx.get::<BackoffKey>();
        let delayer = ctx.get::<DelayerKey>();
        let cancel = ctx.get::<RunCancelKey>();

        loop {
            let retry_index = ctx.get::<RetryIndexKey>();
            let result = self.inner.run(ctx.clone(), continuation.clone()).await;

            match &result {
                Err(_) if retry_index < max_retries => {
                    let wait = backoff(retry_index + 1);
                    delayer.delay(wait, &cancel).await;
                    ctx.set::<RetryIndexKey>(retry_index + 1);
                    continue;
                }
                _ => return result,
            }
        }
    }
}

/// Convenience extension for building a retrying operation: `op.retry(3, backoff::exponential(..))`.
pub trait RetryExt: Operation + Sized {
    fn retry(self, max_retries: u32, backoff: BackoffFn) -> Retry<Self> {
        Retry::new(self, max_retries, backoff)
    }
}

impl<O: Operation> RetryExt for O {}
