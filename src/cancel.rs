//! Cooperative cancellation primitive shared by [`crate::task::Task`],
//! [`crate::delayer::Delayer`], and the modifier pipeline.

use crate::context::ContextKey;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cheap-to-clone, cooperative cancellation flag.
///
/// `cancel()` is idempotent. Anything awaiting [`CancelToken::cancelled`]
/// (typically inside a `tokio::select!` alongside the real work) observes
/// cancellation at its next suspension point — there is no preemption.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Marks this token cancelled. Safe to call more than once.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

/// Context key carrying the [`CancelToken`] of the task currently driving
/// a run. Defaults to a token that can never
/// fire, so reading it outside a run is harmless.
pub struct RunCancelKey;

impl ContextKey for RunCancelKey {
    type Value = CancelToken;

    fn default_value() -> Self::Value {
        CancelToken::new()
    }
}
