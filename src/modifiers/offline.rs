//! `CompletelyOffline`: for operations that never touch the
//! network, so retry/backoff/connection-gating are all pointless work.

use super::backoff;
use super::network::SatisfiedConnectionStatusKey;
use super::retry::{BackoffKey, MaxRetriesKey};
use crate::context::Context;
use crate::modifiers::network::ConnStatus;
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use async_trait::async_trait;

/// Wraps `inner`, forcing `satisfiedConnectionStatus = disconnected`,
/// `maxRetries = 0`, `backoff = noBackoff` during `setup`. Does not
/// intercept `run` — it only tells the other standard modifiers (which
/// must be composed around it) not to bother.
pub struct CompletelyOffline<O: Operation> {
    inner: O,
}

impl<O: Operation> CompletelyOffline<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: Operation> Operation for CompletelyOffline<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
        ctx.set::<SatisfiedConnectionStatusKey>(ConnStatus::Disconnected);
        ctx.set::<MaxRetriesKey>(0);
        ctx.set::<BackoffKey>(backoff::no_backoff());
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        self.inner.run(ctx, continuation).await
    }
}

/// Convenience extension: `op.completely_offline()`.
pub trait CompletelyOfflineExt: Operation + Sized {
    fn completely_offline(self) -> CompletelyOffline<Self> {
        CompletelyOffline::new(self)
    }
}

impl<O: Operation> CompletelyOfflineExt for O {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Answer;

    #[async_trait]
    impl Operation for Answer {
        type Value = i32;
        type Failure = String;

        fn path(&self) -> Path {
            Path::single("offline-answer")
        }

        async fn run(&self, _ctx: Context, _continuation: Continuation<i32, String>) -> Result<i32, String> {
            Ok(1)
        }
    }

    #[test]
    fn setup_disables_retry_and_requires_nothing_from_the_network() {
        let op = Answer.completely_offline();
        let mut ctx = Context::new();
        op.setup(&mut ctx);

        assert_eq!(ctx.get::<MaxRetriesKey>(), 0);
        assert_eq!(ctx.get::<SatisfiedConnectionStatusKey>(), ConnStatus::Disconnected);
        assert_eq!(ctx.get::<BackoffKey>()(5), std::time::Duration::ZERO);
    }
}
