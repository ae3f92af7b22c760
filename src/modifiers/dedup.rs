//! Deduplication modifier.
//!
//! Keyed by the operation's path: since a [`Deduplicated`] instance is
//! created once per store (composed exactly once when the store is
//! built), the slot below naturally scopes one in-flight computation
//! per path without any process-wide registry.

use crate::context::Context;
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use async_trait::async_trait;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type BoxResultFuture<V, E> = Pin<Box<dyn Future<Output = Result<V, E>> + Send>>;
type SharedResultFuture<V, E> = Shared<BoxResultFuture<V, E>>;

/// Fires `notify_one` when dropped — including when the future it guards
/// is dropped mid-poll by an abort — so the slot-clearing cleanup task
/// below can learn the in-flight computation is done without itself
/// becoming an uncounted waiter on the `Shared` future.
struct NotifyOnDrop(Arc<tokio::sync::Notify>);

impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

struct InFlight<V, E> {
    shared: SharedResultFuture<V, E>,
    abort: tokio::task::AbortHandle,
    attached: AtomicUsize,
}

/// Drops to zero attachments cancel the underlying computation; while any
/// attachment remains, the computation keeps running for all of them.
struct Attachment<V, E> {
    inflight: Arc<InFlight<V, E>>,
}

impl<V, E> Drop for Attachment<V, E> {
    fn drop(&mut self) {
        if self.inflight.attached.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inflight.abort.abort();
        }
    }
}

pub struct Deduplicated<O: Operation> {
    inner: Arc<O>,
    slot: Arc<Mutex<Option<Arc<InFlight<O::Value, O::Failure>>>>>,
}

impl<O: Operation> Deduplicated<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner: Arc::new(inner),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn attach(
        &self,
        ctx: Context,
        continuation: Continuation<O::Value, O::Failure>,
    ) -> (SharedResultFuture<O::Value, O::Failure>, Attachment<O::Value, O::Failure>) {
        let mut slot = self.slot.lock();
        if let Some(inflight) = slot.as_ref() {
            inflight.attached.fetch_add(1, Ordering::AcqRel);
            let shared = inflight.shared.clone();
            return (shared, Attachment { inflight: Arc::clone(inflight) });
        }

        let inner = Arc::clone(&self.inner);
        let finished = Arc::new(tokio::sync::Notify::new());
        let finished_for_body = Arc::clone(&finished);
        let body: BoxResultFuture<O::Value, O::Failure> = Box::pin(async move {
            let _notify_on_drop = NotifyOnDrop(finished_for_body);
            inner.run(ctx, continuation).await
        });
        let join = tokio::spawn(body);
        let abort = join.abort_handle();
        let joined: BoxResultFuture<O::Value, O::Failure> = Box::pin(async move {
            match join.await {
                Ok(result) => result,
                Err(_aborted_or_panicked) => {
                    unreachable!("shared dedup future observed after abort or panic — only an attached waiter's own `run` polls it, and that waiter's future is dropped (taking its Attachment with it) before the abort it triggered could ever be observed here")
                }
            }
        });
        let shared = joined.shared();

        let inflight = Arc::new(InFlight {
            shared: shared.clone(),
            abort,
            attached: AtomicUsize::new(1),
        });
        *slot = Some(Arc::clone(&inflight));

        // Clears the slot once the computation is done, whether it ran to
        // completion or was aborted — driven by `finished`, never by
        // polling `shared` itself, so this task never races the abort it
        // may have caused.
        let cleanup_slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            finished.notified().await;
            *cleanup_slot.lock() = None;
        });

        (shared, Attachment { inflight })
    }
}

#[async_trait]
impl<O: Operation> Operation for Deduplicated<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        let (shared, _attachment) = self.attach(ctx, continuation);
        shared.await
    }
}

/// Convenience extension: `op.deduplicated()`.
pub trait DeduplicatedExt: Operation + Sized {
    fn deduplicated(self) -> Deduplicated<Self> {
        Deduplicated::new(self)
    }
}

impl<O: Operation> DeduplicatedExt for O {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingSleep {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Operation for CountingSleep {
        type Value = &'static str;
        type Failure = String;

        fn path(&self) -> Path {
            Path::single("counting-sleep")
        }

        async fn run(
            &self,
            _ctx: Context,
            _continuation: Continuation<&'static str, String>,
        ) -> Result<&'static str, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("blob")
        }
    }

    #[tokio::test]
    async fn concurrent_runs_share_a_single_invocation() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = CountingSleep { calls: Arc::clone(&calls) }.deduplicated();

        let (c1, _f1) = crate::operation::test_support::noop_continuation();
        let (c2, _f2) = crate::operation::test_support::noop_continuation();

        let (r1, r2) = tokio::join!(
            op.run(Context::new(), c1),
            op.run(Context::new(), c2),
        );

        assert_eq!(r1.unwrap(), "blob");
        assert_eq!(r2.unwrap(), "blob");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_runs_after_completion_invoke_again() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = CountingSleep { calls: Arc::clone(&calls) }.deduplicated();

        let (c1, _f1) = crate::operation::test_support::noop_continuation();
        op.run(Context::new(), c1).await.unwrap();

        let (c2, _f2) = crate::operation::test_support::noop_continuation();
        op.run(Context::new(), c2).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_every_attachment_mid_flight_cancels_without_panicking() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = CountingSleep { calls: Arc::clone(&calls) }.deduplicated();

        {
            let (c1, _f1) = crate::operation::test_support::noop_continuation();
            let mut fut = Box::pin(op.run(Context::new(), c1));
            // Drive it far enough that attach() spawns the in-flight body
            // and it has started running, then drop the only attachment
            // — the reference-counted cancellation path — before it
            // finishes.
            let _ = futures::poll!(fut.as_mut());
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(fut);
        }

        // Give the aborted body and the cleanup task a chance to run.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(op.slot.lock().is_none());
    }
}
