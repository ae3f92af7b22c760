//! Shared-state adapter: a key-based cell mirroring a store into a
//! read/write observable value.
//!
//! Built entirely out of [`crate::store::Store`] rather than duplicating
//! its state/subscription plumbing: `current_value`/`subscribe`/
//! `set_value`/`reset` all delegate straight through, whether or not the
//! cell has a real fetch operation behind it. The only adapter-specific
//! behaviour is `run()` refusing with `UnbackedRun` when there
//! is nothing to fetch.

use crate::context::Context;
use crate::error::OpCoreError;
use crate::failure::Failure;
use crate::modifiers::automatic_running::AutomaticRunningSpecKey;
use crate::operation::{BoxedOperation, Continuation, Operation};
use crate::path::Path;
use crate::state::Status;
use crate::store::{Store, StoreObserver};
use crate::subscription::Subscription;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

/// A key-based cell mirroring a store's value.
pub struct SharedState<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    store: Arc<Store<BoxedOperation<V, E>>>,
    backed: bool,
}

impl<V, E> SharedState<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Mirrors `store`, which has a real operation capable of producing
    /// fresh values — `run()` delegates to it normally.
    pub fn backed(store: Arc<Store<BoxedOperation<V, E>>>) -> Self {
        Self { store, backed: true }
    }

    /// A cell with no backing operation: `current_value`/`subscribe`/
    /// `set_value`/`reset` work exactly as for a backed cell, but
    /// `run()` always fails with `OpCoreError::UnbackedRun`
    /// and logs a warning, without ever touching the store's task
    /// machinery. Useful for UI-local state nobody ever "fetches".
    pub fn unbacked(path: Path, initial_value: Option<V>) -> Self {
        let operation: BoxedOperation<V, E> = Box::new(NeverRuns::new(path));
        let store = Store::with_initial_value(operation, initial_value);
        Self { store, backed: false }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn current_value(&self) -> Option<V> {
        self.store.current_value()
    }

    pub fn status(&self) -> Status<V, E> {
        self.store.status()
    }

    pub fn subscribe(&self, observer: Arc<dyn StoreObserver<V, E>>) -> Subscription {
        self.store.subscribe(observer)
    }

    pub fn set_value(&self, value: V) {
        self.store.set_result(Ok(value), None);
    }

    pub fn set_error(&self, error: E) {
        self.store.set_result(Err(error), None);
    }

    pub fn reset(&self) {
        self.store.reset_state(None);
    }

    /// Runs the backing operation, or refuses immediately with
    /// `SharedStateError::Unbacked` if this cell was built with
    /// [`SharedState::unbacked`].
    pub async fn run(&self) -> Result<V, SharedStateError<E>> {
        if !self.backed {
            tracing::warn!(path = %self.store.path(), "shared state has no backing operation; run() refused");
            return Err(SharedStateError::Unbacked(OpCoreError::UnbackedRun {
                path: self.store.path().to_string(),
            }));
        }
        self.store.run(None).await.map_err(SharedStateError::Operation)
    }
}

/// The outcome of [`SharedState::run`] on a cell that may or may not
/// have a backing operation.
#[derive(Debug, Clone)]
pub enum SharedStateError<E> {
    Unbacked(OpCoreError),
    Operation(Failure<E>),
}

/// The operation installed behind an [`SharedState::unbacked`] cell.
/// Its `run` is never actually invoked — `SharedState::run` short-
/// circuits before calling into the store for unbacked cells — but it
/// still needs a real `Operation` impl to give the cell a `Store` to
/// delegate `current_value`/`subscribe`/`set_value`/`reset` through.
struct NeverRuns<V, E> {
    path: Path,
    _marker: PhantomData<fn() -> (V, E)>,
}

impl<V, E> NeverRuns<V, E> {
    fn new(path: Path) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<V, E> Operation for NeverRuns<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = V;
    type Failure = E;

    fn path(&self) -> Path {
        self.path.clone()
    }

    fn setup(&self, ctx: &mut Context) {
        ctx.set::<AutomaticRunningSpecKey>(false);
    }

    async fn run(&self, _ctx: Context, _continuation: Continuation<V, E>) -> Result<V, E> {
        unreachable!("NeverRuns::run must never execute: SharedState::run refuses before calling Store::run on an unbacked cell")
    }
}
