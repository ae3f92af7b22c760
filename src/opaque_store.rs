//! Type-erased store handle for heterogeneous registry storage.
//!
//! The [`crate::client::Client`] registry holds one map keyed by [`Path`]
//! but the stores it holds are instantiated over arbitrary `Operation`
//! types — an `OpaqueStore` is how a single `HashMap<Path, OpaqueStore>`
//! can hold a `Store<FetchMountain>` next to a `Store<SaveClimb>` — the
//! same shape a tool registry uses to hand back `Box<dyn Tool>`-style
//! erased handles while still supporting typed downcast at the call
//! site.

use crate::memory_pressure::{EvictableMemoryPressureKey, Pressure};
use crate::operation::Operation;
use crate::path::Path;
use crate::store::Store;
use std::any::Any;
use std::sync::Arc;

/// Object-safe surface every concrete [`Store<O>`] implements, letting
/// [`OpaqueStore`] hold one without naming `O`.
trait DynStore: Send + Sync {
    fn path(&self) -> &Path;
    fn subscriber_count(&self) -> usize;
    fn debug_label(&self) -> &'static str;
    fn is_evictable_at(&self, level: Pressure) -> bool;
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

impl<O: Operation> DynStore for Store<O> {
    fn path(&self) -> &Path {
        Store::path(self)
    }

    fn subscriber_count(&self) -> usize {
        Store::subscriber_count(self)
    }

    fn debug_label(&self) -> &'static str {
        std::any::type_name::<O>()
    }

    fn is_evictable_at(&self, level: Pressure) -> bool {
        self.context().get::<EvictableMemoryPressureKey>().contains(&level)
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// A type-erased [`Store<O>`] handle. Exposes the
/// type-agnostic surface directly; typed access goes through
/// [`OpaqueStore::downcast`].
///
/// Holds two coercions of the *same* `Arc<Store<O>>` allocation side by
/// side — one to `dyn DynStore` for the type-agnostic surface, one to
/// `dyn Any + Send + Sync` for downcasting — built once at construction
/// while `O` is still in scope, since stable Rust cannot cast directly
/// between two unrelated trait objects.
#[derive(Clone)]
pub struct OpaqueStore {
    meta: Arc<dyn DynStore>,
    any: Arc<dyn Any + Send + Sync>,
}

impl OpaqueStore {
    pub fn new<O: Operation>(store: Arc<Store<O>>) -> Self {
        Self {
            any: Arc::clone(&store) as Arc<dyn Any + Send + Sync>,
            meta: store as Arc<dyn DynStore>,
        }
    }

    pub fn path(&self) -> &Path {
        self.meta.path()
    }

    pub fn subscriber_count(&self) -> usize {
        self.meta.subscriber_count()
    }

    /// The operation's type name — ambient debugging texture, in the
    /// same vein as a storage backend exposing its own `backend_name()`.
    pub fn debug_label(&self) -> &'static str {
        self.meta.debug_label()
    }

    pub fn is_evictable_at(&self, level: Pressure) -> bool {
        self.meta.is_evictable_at(level)
    }

    /// Recovers the typed `Store<O>` this handle was built from, or
    /// `None` if `O` does not match the state type it was registered
    /// under.
    pub fn downcast<O: Operation>(&self) -> Option<Arc<Store<O>>> {
        Arc::clone(&self.any).downcast::<Store<O>>().ok()
    }

    /// Sets `value` as the current value of the underlying `Store<O>`
    /// without going through `run`.
    ///
    /// # Panics
    /// Panics if this handle was not registered with operation type `O` —
    /// a type mismatch here is a bug at the call site, not a runtime
    /// condition to recover from.
    pub fn unchecked_set_current_value<O: Operation>(&self, value: O::Value) {
        let store = self
            .downcast::<O>()
            .expect("OpaqueStore::unchecked_set_current_value: state type mismatch");
        store.set_result(Ok(value), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::operation::Continuation;
    use async_trait::async_trait;

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

    struct OtherAnswer;

    #[async_trait]
    impl Operation for OtherAnswer {
        type Value = String;
        type Failure = String;

        fn path(&self) -> Path {
            Path::single("other-answer")
        }

        async fn run(&self, _ctx: Context, _continuation: Continuation<String, String>) -> Result<String, String> {
            Ok("hi".to_string())
        }
    }

    #[test]
    fn downcast_succeeds_for_the_original_operation_type() {
        let store = Store::new(Answer(7));
        let opaque = OpaqueStore::new(Arc::clone(&store));

        let recovered = opaque.downcast::<Answer>().expect("downcast should succeed");
        assert_eq!(recovered.current_value(), None);
        assert_eq!(opaque.path(), store.path());
    }

    #[test]
    fn downcast_fails_for_a_mismatched_operation_type() {
        let store = Store::new(Answer(7));
        let opaque = OpaqueStore::new(store);

        assert!(opaque.downcast::<OtherAnswer>().is_none());
    }

    #[tokio::test]
    async fn unchecked_set_current_value_updates_the_underlying_store() {
        let store = Store::new(Answer(0));
        let opaque = OpaqueStore::new(Arc::clone(&store));

        opaque.unchecked_set_current_value::<Answer>(42);
        assert_eq!(store.current_value(), Some(42));
    }

    #[test]
    #[should_panic(expected = "state type mismatch")]
    fn unchecked_set_current_value_panics_on_type_mismatch() {
        let store = Store::new(Answer(0));
        let opaque = OpaqueStore::new(store);

        opaque.unchecked_set_current_value::<OtherAnswer>("nope".to_string());
    }

    #[test]
    fn is_evictable_at_defaults_to_warning_and_critical() {
        let store = Store::new(Answer(1));
        let opaque = OpaqueStore::new(store);

        assert!(!opaque.is_evictable_at(Pressure::Normal));
        assert!(opaque.is_evictable_at(Pressure::Warning));
        assert!(opaque.is_evictable_at(Pressure::Critical));
    }
}
