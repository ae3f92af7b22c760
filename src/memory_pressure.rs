//! Memory pressure source used by the [`crate::client::Client`]
//! to evict evictable, unsubscribed stores.

use crate::context::ContextKey;
use crate::subscription::{Subscription, SubscriptionList};
use std::collections::HashSet;
use std::sync::Arc;

/// Coarse-grained memory pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pressure {
    Normal,
    Warning,
    Critical,
}

/// Context key carrying the set of [`Pressure`] levels at which a store
/// is a candidate for eviction from the [`crate::client::Client`]
/// registry.
///
/// Defaults to evictable at `Warning` and `Critical` — an unsubscribed
/// store is, by construction, something nobody is currently watching,
/// so the safe default favours reclaiming it under pressure over
/// growing the registry unboundedly. Operations that need to survive
/// pressure (e.g. a cache primed once at startup) opt out explicitly.
pub struct EvictableMemoryPressureKey;

impl ContextKey for EvictableMemoryPressureKey {
    type Value = Arc<HashSet<Pressure>>;

    fn default_value() -> Self::Value {
        Arc::new(HashSet::from([Pressure::Warning, Pressure::Critical]))
    }
}

type Handler = Arc<dyn Fn(Pressure) + Send + Sync>;

/// An abstract source of memory-pressure notifications.
///
/// The core never talks to an OS memory API directly — platform
/// bindings publish through this type, and tests use
/// [`MemoryPressureSource::publish`] directly.
#[derive(Clone)]
pub struct MemoryPressureSource {
    handlers: Arc<SubscriptionList<Handler>>,
}

impl Default for MemoryPressureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPressureSource {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(SubscriptionList::new()),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(Pressure) + Send + Sync + 'static) -> Subscription {
        let (sub, _first) = self.handlers.register(Arc::new(handler), false);
        sub
    }

    /// Notifies every live subscriber. Intended for platform bindings and
    /// tests — the core itself never calls this.
    pub fn publish(&self, pressure: Pressure) {
        self.handlers.for_each(|handler| handler(pressure));
    }
}
