//! Handle-events modifier: injects a pass-through event
//! handler forwarding `run started / result / run ended` to whatever the
//! store itself wires up via [`EventHandlerKey`] — the store's own
//! state-changed/run-started/run-ended/result-received fan-out is this
//! same mechanism, composed once by [`crate::client::ClientConfig`]
//! instead of by hand.

use crate::context::{Context, ContextKey};
use crate::failure::Failure;
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

/// One event in an operation run's lifecycle.
#[derive(Clone)]
pub enum OperationEvent<V, E> {
    RunStarted,
    Result(Result<V, Failure<E>>),
    RunEnded,
}

pub type EventHandlerFn<V, E> = Arc<dyn Fn(&OperationEvent<V, E>) + Send + Sync>;

/// Context key carrying the composed event handler for operations of
/// value type `V` and failure type `E`. Each [`HandleEvents`] layer
/// composes itself in front of whatever was already installed, so
/// multiple layers (and the store's own injected handler) all observe
/// every event.
pub struct EventHandlerKey<V, E>(PhantomData<fn() -> (V, E)>);

impl<V, E> ContextKey for EventHandlerKey<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = EventHandlerFn<V, E>;

    fn default_value() -> Self::Value {
        Arc::new(|_event| {})
    }
}

pub struct HandleEvents<O: Operation> {
    inner: O,
    handler: EventHandlerFn<O::Value, O::Failure>,
}

impl<O: Operation> HandleEvents<O> {
    pub fn new(inner: O, handler: EventHandlerFn<O::Value, O::Failure>) -> Self {
        Self { inner, handler }
    }
}

#[async_trait]
impl<O: Operation> Operation for HandleEvents<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
        let previous = ctx.get::<EventHandlerKey<O::Value, O::Failure>>();
        let added = self.handler.clone();
        let composed: EventHandlerFn<O::Value, O::Failure> = Arc::new(move |event| {
            previous(event);
            added(event);
        });
        ctx.set::<EventHandlerKey<O::Value, O::Failure>>(composed);
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        let handler = ctx.get::<EventHandlerKey<O::Value, O::Failure>>();

        handler(&OperationEvent::RunStarted);
        let observing_handler = handler.clone();
        let observed_continuation = continuation.tee(move |result| {
            observing_handler(&OperationEvent::Result(result.clone()));
        });

        let result = self.inner.run(ctx, observed_continuation).await;
        handler(&OperationEvent::Result(
            result.clone().map_err(Failure::Operation),
        ));
        handler(&OperationEvent::RunEnded);
        result
    }
}

/// Convenience extension: `op.handle_events(|event| ...)`.
pub trait HandleEventsExt: Operation + Sized {
    fn handle_events(self, handler: impl Fn(&OperationEvent<Self::Value, Self::Failure>) + Send + Sync + 'static) -> HandleEvents<Self> {
        HandleEvents::new(self, Arc::new(handler))
    }
}

impl<O: Operation> HandleEventsExt for O {}
