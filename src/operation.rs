//! The `Operation` contract and the continuation sender operation bodies
//! use to emit intermediate results.

use crate::context::Context;
use crate::failure::Failure;
use crate::path::Path;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sent into [`Operation::run`]; lets the body emit zero or more
/// intermediate results before its final `return`.
///
/// Using the continuation after the body has returned is a no-op that
/// logs a `YieldAfterReturn` diagnostic — the sender stays
/// valid, it just stops doing anything.
pub struct Continuation<V, E> {
    emit: Arc<dyn Fn(Result<V, Failure<E>>) + Send + Sync>,
    finished: Arc<AtomicBool>,
}

impl<V, E> Clone for Continuation<V, E> {
    fn clone(&self) -> Self {
        Self {
            emit: Arc::clone(&self.emit),
            finished: Arc::clone(&self.finished),
        }
    }
}

impl<V, E> Continuation<V, E> {
    /// Constructs a continuation around the store's ingest callback.
    /// `finished` is flipped by the store the instant the body's async
    /// fn returns, before the final result is ingested.
    pub fn new(
        emit: impl Fn(Result<V, Failure<E>>) + Send + Sync + 'static,
        finished: Arc<AtomicBool>,
    ) -> Self {
        Self {
            emit: Arc::new(emit),
            finished,
        }
    }

    pub fn yield_value(&self, value: V) {
        self.emit_checked(Ok(value));
    }

    pub fn yield_error(&self, error: E) {
        self.emit_checked(Err(Failure::Operation(error)));
    }

    fn emit_checked(&self, result: Result<V, Failure<E>>) {
        if self.finished.load(Ordering::Acquire) {
            tracing::warn!("continuation used after the operation body returned; yield dropped");
            return;
        }
        (self.emit)(result);
    }
}

impl<V: 'static, E: 'static> Continuation<V, E> {
    /// Builds a continuation that forwards every result to both `observer`
    /// and `self`, sharing `self`'s finished flag. Used by event-observing
    /// modifiers (`src/modifiers/handle_events.rs`) to watch yields
    /// without taking over delivery to the store.
    pub fn tee(&self, observer: impl Fn(&Result<V, Failure<E>>) + Send + Sync + 'static) -> Continuation<V, E> {
        let inner_emit = Arc::clone(&self.emit);
        Self {
            emit: Arc::new(move |result: Result<V, Failure<E>>| {
                observer(&result);
                (inner_emit)(result);
            }),
            finished: Arc::clone(&self.finished),
        }
    }
}

/// A user-supplied asynchronous computation with a path and a state shape.
///
/// Modifiers (`src/modifiers/*`) are themselves operations that wrap an
/// inner `Operation`, so composition is zero-cost trait wrapping rather
/// than dynamic dispatch — the store only erases the *outermost*
/// composed operation when it needs heterogeneous storage
/// ([`crate::opaque_store::OpaqueStore`]).
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;
    type Failure: Clone + Send + Sync + 'static;

    fn path(&self) -> Path;

    /// Called once per store creation to seed context defaults (retry
    /// policy, staleness predicate, and so on). Modifiers call the
    /// wrapped operation's `setup` first, then apply their own — setup
    /// order is leaf-first.
    fn setup(&self, _ctx: &mut Context) {}

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure>;
}

/// A trait-object-erased [`Operation`], its `Value`/`Failure` still named
/// concretely so two differently-shaped operations composed behind this
/// alias remain distinguishable by their state type. Used by
/// [`crate::client::Client`] to compose a caller's operation with the
/// registry's default modifier stack without
/// naming the resulting nest of modifier wrapper types.
pub type BoxedOperation<V, E> = Box<dyn Operation<Value = V, Failure = E>>;

#[async_trait]
impl<V, E> Operation for BoxedOperation<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = V;
    type Failure = E;

    fn path(&self) -> Path {
        (**self).path()
    }

    fn setup(&self, ctx: &mut Context) {
        (**self).setup(ctx)
    }

    async fn run(&self, ctx: Context, continuation: Continuation<V, E>) -> Result<V, E> {
        (**self).run(ctx, continuation).await
    }
}

/// Test-only helpers for exercising operations/modifiers without a store.
#[cfg(test)]
pub(crate) mod test_support {
    use super::Continuation;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    /// A continuation that discards every intermediate result — useful
    /// when a test only cares about an operation's final return.
    pub fn noop_continuation<V, E>() -> (Continuation<V, E>, Arc<AtomicBool>) {
        let finished = Arc::new(AtomicBool::new(false));
        let continuation = Continuation::new(|_result| {}, Arc::clone(&finished));
        (continuation, finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn yield_after_finish_is_dropped() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&received);
        let finished = Arc::new(AtomicBool::new(false));
        let continuation = Continuation::new(
            move |result: Result<i32, Failure<String>>| recorded.lock().unwrap().push(result),
            Arc::clone(&finished),
        );

        continuation.yield_value(1);
        finished.store(true, Ordering::Release);
        continuation.yield_value(2);

        let seen = received.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], Ok(1)));
    }

    #[test]
    fn tee_forwards_to_both_observer_and_inner_emit() {
        let inner_seen = Arc::new(Mutex::new(Vec::new()));
        let inner_recorded = Arc::clone(&inner_seen);
        let finished = Arc::new(AtomicBool::new(false));
        let base = Continuation::new(
            move |result: Result<i32, Failure<String>>| inner_recorded.lock().unwrap().push(result),
            Arc::clone(&finished),
        );

        let observed = Arc::new(Mutex::new(Vec::new()));
        let tee_recorded = Arc::clone(&observed);
        let teed = base.tee(move |result| tee_recorded.lock().unwrap().push(result.clone()));

        teed.yield_value(7);

        let inner = inner_seen.lock().unwrap();
        let outer = observed.lock().unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(outer.len(), 1);
        assert!(matches!(inner[0], Ok(7)));
        assert!(matches!(outer[0], Ok(7)));
    }
}
