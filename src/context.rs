//! Per-run heterogeneous context map.
//!
//! A type-keyed bag of config knobs, generalized from a flat config
//! struct into a type-keyed map so the core can thread clock, delayer,
//! retry bookkeeping, and modifier-specific settings through a single
//! value without a god-struct. Each key defines its own default, so
//! reading an unset key never panics.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A typed key into a [`Context`]. `Value` is the type stored under this
/// key; `default_value` is returned by [`Context::get`] when the key was
/// never set.
pub trait ContextKey: 'static {
    type Value: Clone + Send + Sync + 'static;

    fn default_value() -> Self::Value;
}

/// Per-run heterogeneous, typed scratch map.
///
/// Values are held behind `Arc` so [`Context::clone`] is a shallow,
/// cheap copy-on-read snapshot: forking a context for a task does not
/// deep-copy the values it carries, and mutating the fork's entries
/// afterwards never touches the original's entries (each `set` installs
/// a fresh `Arc`, it never mutates one in place).
#[derive(Clone, Default)]
pub struct Context {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self { values: HashMap::new() }
    }

    /// Returns the value stored for `K`, or `K::default_value()` if unset.
    pub fn get<K: ContextKey>(&self) -> K::Value {
        self.values
            .get(&TypeId::of::<K>())
            .and_then(|v| v.downcast_ref::<K::Value>())
            .cloned()
            .unwrap_or_else(K::default_value)
    }

    /// Installs `value` under `K`, replacing any previous value.
    pub fn set<K: ContextKey>(&mut self, value: K::Value) {
        self.values.insert(TypeId::of::<K>(), Arc::new(value));
    }

    /// True iff `K` has an explicitly set value (as opposed to its default).
    pub fn contains<K: ContextKey>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<K>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RetryIndexKey;
    impl ContextKey for RetryIndexKey {
        type Value = u32;
        fn default_value() -> u32 {
            0
        }
    }

    #[test]
    fn unset_key_returns_default() {
        let ctx = Context::new();
        assert_eq!(ctx.get::<RetryIndexKey>(), 0);
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut ctx = Context::new();
        ctx.set::<RetryIndexKey>(3);
        assert_eq!(ctx.get::<RetryIndexKey>(), 3);
    }

    #[test]
    fn clone_is_a_snapshot() {
        let mut base = Context::new();
        base.set::<RetryIndexKey>(1);

        let mut fork = base.clone();
        fork.set::<RetryIndexKey>(2);

        assert_eq!(base.get::<RetryIndexKey>(), 1);
        assert_eq!(fork.get::<RetryIndexKey>(), 2);
    }
}
