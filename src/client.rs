//! The client registry: a path-addressed directory of live stores.
//!
//! A `RwLock`-guarded map behind a small config struct, the same shape an
//! in-memory storage backend holding `Arc<RwLock<HashMap<String, Record>>>`
//! takes — generalized from a flat id to a hierarchical [`Path`] and from a
//! concrete record type to the heterogeneous [`OpaqueStore`].

use crate::memory_pressure::{MemoryPressureSource, Pressure};
use crate::modifiers::backoff::{self, BackoffFn};
use crate::modifiers::dedup::DeduplicatedExt;
use crate::modifiers::network::{ConnStatus, NetworkGateExt, NetworkObserver};
use crate::modifiers::retry::RetryExt;
use crate::modifiers::staleness::{any_of, has_no_value, age_exceeds, StalenessExt};
use crate::modifiers::automatic_running::AutomaticRunningExt;
use crate::opaque_store::OpaqueStore;
use crate::operation::{BoxedOperation, Operation};
use crate::path::Path;
use crate::store::Store;
use crate::subscription::Subscription;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default modifier stack the registry composes around a caller's
/// operation.
#[derive(Clone)]
pub struct ClientConfig {
    pub default_max_retries: u32,
    pub default_backoff: BackoffFn,
    /// `Some(seconds)` installs `stale_after(seconds)`; `None` leaves the
    /// operation's own staleness predicate (or the always-stale default)
    /// untouched.
    pub default_stale_after_seconds: Option<i64>,
    /// If set, every registered store additionally gates its run behind
    /// this connectivity observer and threshold.
    pub network: Option<(Arc<dyn NetworkObserver>, ConnStatus)>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("default_max_retries", &self.default_max_retries)
            .field("default_stale_after_seconds", &self.default_stale_after_seconds)
            .field("network_gated", &self.network.is_some())
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_backoff: backoff::exponential(std::time::Duration::from_millis(250)),
            default_stale_after_seconds: None,
            network: None,
        }
    }
}

impl ClientConfig {
    /// Composes `operation` with this config's default retry, dedup,
    /// staleness, and (if configured) network-gating modifiers, then
    /// applies `automatic_running`.
    fn compose<O: Operation>(&self, operation: O, automatic_running: bool) -> BoxedOperation<O::Value, O::Failure> {
        let staled = match self.default_stale_after_seconds {
            Some(seconds) => operation.stale_when(any_of(vec![has_no_value(), age_exceeds(seconds)])),
            None => operation.stale_when(has_no_value()),
        };
        let deduped = staled.deduplicated();
        let retried = deduped.retry(self.default_max_retries, self.default_backoff.clone());

        let boxed: BoxedOperation<O::Value, O::Failure> = match &self.network {
            Some((observer, threshold)) => {
                let gated = retried.require_connection(Arc::clone(observer), *threshold);
                if automatic_running {
                    Box::new(gated.enable_automatic_running())
                } else {
                    Box::new(gated.disable_automatic_running())
                }
            }
            None => {
                if automatic_running {
                    Box::new(retried.enable_automatic_running())
                } else {
                    Box::new(retried.disable_automatic_running())
                }
            }
        };
        boxed
    }
}

/// Path-addressed directory of live [`Store`]s.
///
/// Lookups and registration take the registry's own lock briefly;
/// creation inside [`Client::store_for`] is atomic and double-checked so
/// two racing callers for a brand-new path never register two stores.
pub struct Client {
    config: ClientConfig,
    registry: RwLock<HashMap<Path, OpaqueStore>>,
    /// Written once, immediately after construction, by
    /// [`Client::with_memory_pressure_source`] — `parking_lot::Mutex`
    /// lets that happen through `&Arc<Self>` without requiring `&mut self`.
    pressure_subscription: parking_lot::Mutex<Option<Subscription>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: RwLock::new(HashMap::new()),
            pressure_subscription: parking_lot::Mutex::new(None),
        })
    }

    /// Builds a client that also wires up eviction against `source`.
    pub fn with_memory_pressure_source(config: ClientConfig, source: &MemoryPressureSource) -> Arc<Self> {
        let client = Self::new(config);

        let weak = Arc::downgrade(&client);
        let subscription = source.subscribe(move |pressure| {
            if pressure == Pressure::Normal {
                return;
            }
            if let Some(client) = weak.upgrade() {
                tokio::spawn(async move { client.evict_at(pressure).await });
            }
        });

        *client.pressure_subscription.lock() = Some(subscription);
        client
    }

    /// Looks up `operation.path()`; if a store already exists there and
    /// its state type (`Value`/`Failure`) matches, returns it. If the
    /// path is free, composes `operation` with the registry's default
    /// modifier stack, registers it, and returns the new store.
    /// Automatic running defaults to enabled.
    pub async fn store_for<O: Operation>(self: &Arc<Self>, operation: O) -> Arc<Store<BoxedOperation<O::Value, O::Failure>>> {
        self.store_for_with_auto_run(operation, true).await
    }

    /// Like [`Client::store_for`], but automatic running defaults to
    /// disabled — the usual choice for mutation-shaped operations.
    pub async fn store_for_mutation<O: Operation>(self: &Arc<Self>, operation: O) -> Arc<Store<BoxedOperation<O::Value, O::Failure>>> {
        self.store_for_with_auto_run(operation, false).await
    }

    async fn store_for_with_auto_run<O: Operation>(
        self: &Arc<Self>,
        operation: O,
        automatic_running: bool,
    ) -> Arc<Store<BoxedOperation<O::Value, O::Failure>>> {
        let path = operation.path();

        if let Some(existing) = self.registry.read().await.get(&path) {
            if let Some(store) = existing.downcast::<BoxedOperation<O::Value, O::Failure>>() {
                return store;
            }
            tracing::warn!(%path, "duplicate path registered with a mismatched state type; returning a detached store");
            let composed = self.config.compose(operation, automatic_running);
            return Store::new(composed);
        }

        let mut registry = self.registry.write().await;
        // Double-checked: another writer may have raced us while we
        // waited for the write lock.
        if let Some(existing) = registry.get(&path) {
            if let Some(store) = existing.downcast::<BoxedOperation<O::Value, O::Failure>>() {
                return store;
            }
            tracing::warn!(%path, "duplicate path registered with a mismatched state type; returning a detached store");
            let composed = self.config.compose(operation, automatic_running);
            return Store::new(composed);
        }

        let composed = self.config.compose(operation, automatic_running);
        let store = Store::new(composed);
        registry.insert(path, OpaqueStore::new(Arc::clone(&store)));
        store
    }

    /// Exact-path lookup, type-erased.
    pub async fn store_with_path(&self, path: &Path) -> Option<OpaqueStore> {
        self.registry.read().await.get(path).cloned()
    }

    /// Snapshots entries whose path has `prefix`.
    pub async fn stores_matching(&self, prefix: &Path) -> Vec<(Path, OpaqueStore)> {
        self.registry
            .read()
            .await
            .iter()
            .filter(|(path, _)| prefix.is_prefix_of(path))
            .map(|(path, store)| (path.clone(), store.clone()))
            .collect()
    }

    pub async fn clear_store(&self, path: &Path) -> bool {
        self.registry.write().await.remove(path).is_some()
    }

    pub async fn clear_stores_matching(&self, prefix: &Path) -> usize {
        let mut registry = self.registry.write().await;
        let doomed: Vec<Path> = registry.keys().filter(|path| prefix.is_prefix_of(path)).cloned().collect();
        for path in &doomed {
            registry.remove(path);
        }
        doomed.len()
    }

    /// Exclusive mutable access to the subset of the registry whose path
    /// has `prefix`. `f` may
    /// add, replace, or remove entries in the map it's handed; the
    /// result is merged back under the same write-lock acquisition.
    pub async fn with_stores_matching(
        &self,
        prefix: &Path,
        f: impl FnOnce(&mut HashMap<Path, OpaqueStore>),
    ) {
        let mut registry = self.registry.write().await;
        let mut subset: HashMap<Path, OpaqueStore> = registry
            .iter()
            .filter(|(path, _)| prefix.is_prefix_of(path))
            .map(|(path, store)| (path.clone(), store.clone()))
            .collect();

        f(&mut subset);

        registry.retain(|path, _| !prefix.is_prefix_of(path));
        registry.extend(subset);
    }

    /// Removes every entry whose path is a prefix-match under `prefix`
    ///, and whose `subscriber_count() == 0`
    /// and `is_evictable_at(pressure)`. Called by the memory-pressure
    /// subscription installed in [`Client::with_memory_pressure_source`],
    /// and by [`Client::sweep_stale_stores`] for callers who drive
    /// eviction from a timer instead of a live pressure source.
    async fn evict_at(&self, pressure: Pressure) {
        let mut registry = self.registry.write().await;
        registry.retain(|path, store| {
            let keep = store.subscriber_count() > 0 || !store.is_evictable_at(pressure);
            if !keep {
                tracing::debug!(%path, ?pressure, label = store.debug_label(), "evicting unsubscribed store under memory pressure");
            }
            keep
        });
    }

    /// Periodic maintenance hook: applies the same eviction rule as a
    /// live [`MemoryPressureSource`] event, for callers who drive
    /// eviction from a timer rather than wiring up a real pressure
    /// source — a scheduled trigger for the same eviction rule, no new
    /// policy, in the spirit of a periodic `maintenance()` sweep.
    pub async fn sweep_stale_stores(&self, pressure: Pressure) {
        if pressure != Pressure::Normal {
            self.evict_at(pressure).await;
        }
    }

    pub async fn store_count(&self) -> usize {
        self.registry.read().await.len()
    }
}
