//! Network-connection run specification.

use crate::context::{Context, ContextKey};
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use crate::subscription::Subscription;
use async_trait::async_trait;
use std::sync::Arc;

/// Observed connectivity, ordered `Disconnected < RequiresConnection < Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnStatus {
    Disconnected,
    RequiresConnection,
    Connected,
}

/// An abstract source of connectivity status. The core never
/// talks to a platform reachability API directly — bindings publish
/// through this trait, and tests use an in-memory mock.
pub trait NetworkObserver: Send + Sync {
    fn current_status(&self) -> ConnStatus;
    fn subscribe(&self, handler: Box<dyn Fn(ConnStatus) + Send + Sync>) -> Subscription;
}

/// Context key carrying the minimum [`ConnStatus`] an operation requires
/// before it is allowed to run.
pub struct SatisfiedConnectionStatusKey;

impl ContextKey for SatisfiedConnectionStatusKey {
    type Value = ConnStatus;

    fn default_value() -> Self::Value {
        ConnStatus::Disconnected
    }
}

/// Wraps `inner`, blocking `run` until `observer.current_status() >=
/// context.satisfiedConnectionStatus`. Re-checks on every status change
/// the observer reports, so a connection regained mid-wait is noticed
/// without polling.
pub struct NetworkGate<O: Operation> {
    inner: O,
    observer: Arc<dyn NetworkObserver>,
    threshold: ConnStatus,
}

impl<O: Operation> NetworkGate<O> {
    pub fn new(inner: O, observer: Arc<dyn NetworkObserver>, threshold: ConnStatus) -> Self {
        Self { inner, observer, threshold }
    }

    fn is_satisfied(&self) -> bool {
        self.observer.current_status() >= self.threshold
    }

    async fn wait_until_satisfied(&self) {
        if self.is_satisfied() {
            return;
        }
        loop {
            let notify = Arc::new(tokio::sync::Notify::new());
            let waiter = Arc::clone(&notify);
            let _sub = self.observer.subscribe(Box::new(move |_status| waiter.notify_one()));
            if self.is_satisfied() {
                return;
            }
            notify.notified().await;
            if self.is_satisfied() {
                return;
            }
        }
    }
}

#[async_trait]
impl<O: Operation> Operation for NetworkGate<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
        ctx.set::<SatisfiedConnectionStatusKey>(self.threshold);
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        self.wait_until_satisfied().await;
        self.inner.run(ctx, continuation).await
    }
}

/// Convenience extension: `op.require_connection(observer, threshold)`.
pub trait NetworkGateExt: Operation + Sized {
    fn require_connection(self, observer: Arc<dyn NetworkObserver>, threshold: ConnStatus) -> NetworkGate<Self> {
        NetworkGate::new(self, observer, threshold)
    }
}

impl<O: Operation> NetworkGateExt for O {}

/// An in-memory [`NetworkObserver`] for tests and demos.
pub struct MockNetworkObserver {
    status: parking_lot::Mutex<ConnStatus>,
    subscribers: Arc<crate::subscription::SubscriptionList<Arc<dyn Fn(ConnStatus) + Send + Sync>>>,
}

impl Default for MockNetworkObserver {
    fn default() -> Self {
        Self::new(ConnStatus::Connected)
    }
}

impl MockNetworkObserver {
    pub fn new(initial: ConnStatus) -> Self {
        Self {
            status: parking_lot::Mutex::new(initial),
            subscribers: Arc::new(crate::subscription::SubscriptionList::new()),
        }
    }

    pub fn set_status(&self, status: ConnStatus) {
        *self.status.lock() = status;
        self.subscribers.for_each(|handler| handler(status));
    }
}

impl NetworkObserver for MockNetworkObserver {
    fn current_status(&self) -> ConnStatus {
        *self.status.lock()
    }

    fn subscribe(&self, handler: Box<dyn Fn(ConnStatus) + Send + Sync>) -> Subscription {
        let (sub, _first) = self.subscribers.register(Arc::from(handler), false);
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Answer(i32);

    #[async_trait]
    impl Operation for Answer {
        type Value = i32;
        type Failure = String;

        fn path(&self) -> Path {
            Path::single("answer")
        }

        async fn run(&self, _ctx: Context, _continuation: Continuation<i32, String>) -> Result<i32, String> {
            Ok(self.0)
        }
    }

    #[test]
    fn conn_status_orders_as_specified() {
        assert!(ConnStatus::Disconnected < ConnStatus::RequiresConnection);
        assert!(ConnStatus::RequiresConnection < ConnStatus::Connected);
    }

    #[tokio::test]
    async fn run_proceeds_immediately_when_already_satisfied() {
        let observer = Arc::new(MockNetworkObserver::new(ConnStatus::Connected));
        let op = Answer(7).require_connection(observer, ConnStatus::RequiresConnection);
        let (continuation, _f) = crate::operation::test_support::noop_continuation();
        assert_eq!(op.run(Context::new(), continuation).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn run_waits_for_connection_to_be_regained() {
        let observer = Arc::new(MockNetworkObserver::new(ConnStatus::Disconnected));
        let op = Arc::new(Answer(9).require_connection(Arc::clone(&observer) as Arc<dyn NetworkObserver>, ConnStatus::Connected));

        let observed = Arc::new(AtomicU32::new(0));
        let op2 = Arc::clone(&op);
        let observed2 = Arc::clone(&observed);
        let handle = tokio::spawn(async move {
            let (continuation, _f) = crate::operation::test_support::noop_continuation();
            let result = op2.run(Context::new(), continuation).await.unwrap();
            observed2.store(result as u32, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(observed.load(Ordering::SeqCst), 0);

        observer.set_status(ConnStatus::Connected);
        handle.await.unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 9);
    }
}
