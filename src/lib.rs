//! # opcore
//!
//! Asynchronous operation runtime: observable, deduplicated, retry-capable,
//! cancellable operations with a path-addressed store registry.
//!
//! An [`operation::Operation`] is a user-supplied asynchronous computation
//! keyed by a [`path::Path`]. A [`store::Store`] owns one operation's state
//! and schedules its [`task::Task`]s; a [`client::Client`] is a registry of
//! stores, keyed by path, that composes every registered operation with a
//! default stack of [`modifiers`] (retry, deduplication, staleness,
//! optional network gating) before handing back a [`store::Store`] to run
//! and observe.
//!
//! ## Quick start
//!
//! ```rust
//! use opcore::prelude::*;
//!
//! struct FetchMountain(i64);
//!
//! #[async_trait::async_trait]
//! impl Operation for FetchMountain {
//!     type Value = String;
//!     type Failure = String;
//!
//!     fn path(&self) -> Path {
//!         Path::single("mountains").append(self.0)
//!     }
//!
//!     async fn run(&self, _ctx: Context, _continuation: Continuation<String, String>) -> Result<String, String> {
//!         Ok(format!("mountain #{}", self.0))
//!     }
//! }
//!
//! # async fn example() {
//! let client = Client::new(ClientConfig::default());
//! let store = client.store_for(FetchMountain(42)).await;
//! let name = store.run(None).await.unwrap();
//! assert_eq!(name, "mountain #42");
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`operation`] — the `Operation` contract and `Continuation` sender.
//! - [`modifiers`] — composable wrappers (retry, backoff, dedup, staleness,
//!   network gating, offline short-circuit, automatic-running, event taps).
//! - [`store`] / [`state`] / [`task`] — the runtime: state machine, task
//!   scheduling and cancellation, event fan-out.
//! - [`client`] / [`opaque_store`] — the path-addressed registry and its
//!   type-erased store handle.
//! - [`context`] — the heterogeneous typed config bag threaded through
//!   `setup`/`run`.
//! - [`tokens`], [`serial_queue`], [`sync_engine`], [`shared_state`] —
//!   reusable coordination primitives built on the core (single-flight
//!   token refresh, FIFO critical sections, observation-driven
//!   reconciliation, read/write observable cells).
//! - [`page`] — paginated state: an [`Operation`] whose value accumulates
//!   one fetched page at a time, in either direction.

pub mod cancel;
pub mod client;
pub mod clock;
pub mod context;
pub mod delayer;
pub mod error;
pub mod failure;
pub mod memory_pressure;
pub mod modifiers;
pub mod opaque_store;
pub mod operation;
pub mod page;
pub mod path;
pub mod serial_queue;
pub mod shared_state;
pub mod state;
pub mod store;
pub mod subscription;
pub mod sync_engine;
pub mod task;
pub mod tokens;

pub use cancel::CancelToken;
pub use client::{Client, ClientConfig};
pub use clock::{Clock, MockClock, SystemClock};
pub use context::{Context, ContextKey};
pub use delayer::{Delayer, NoDelay, TokioDelayer};
pub use error::OpCoreError;
pub use failure::Failure;
pub use memory_pressure::{MemoryPressureSource, Pressure};
pub use opaque_store::OpaqueStore;
pub use operation::{BoxedOperation, Continuation, Operation};
pub use page::{Page, PageSource, Paginated, PaginatedState, PagingDirection, PagingRequest};
pub use path::{Path, PathSegment};
pub use serial_queue::SerialQueue;
pub use shared_state::{SharedState, SharedStateError};
pub use state::Status;
pub use store::{Controls, Store, StoreObserver};
pub use subscription::Subscription;
pub use sync_engine::{ExternalStore, SyncDatabase, SyncEngine, SyncRecord};
pub use task::Task;
pub use tokens::{InMemorySecureStorage, SecureStorage, TokenLoader, Tokens};

/// Convenience glob import covering the types most callers touch:
/// `Operation`/`Continuation`/`Path`/`Context` to define an operation,
/// `Client`/`ClientConfig` to register it, `Store`/`Status` to run and
/// observe it.
pub mod prelude {
    pub use crate::client::{Client, ClientConfig};
    pub use crate::context::{Context, ContextKey};
    pub use crate::operation::{BoxedOperation, Continuation, Operation};
    pub use crate::path::{Path, PathSegment};
    pub use crate::state::Status;
    pub use crate::store::{Store, StoreObserver};
    pub use crate::subscription::Subscription;
}
