//! Subscription handles and handler fan-out lists.
//!
//! The same shape a session-storage backend's SSE broadcast takes —
//! snapshotting a handler map under a lock before fan-out — generalized
//! into a reusable primitive the store, the memory pressure source, and
//! the network observer all share.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A cancellable handle. `cancel()` is idempotent; dropping a
/// `Subscription` implies `cancel()`.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    /// A subscription that does nothing on cancel.
    pub fn empty() -> Self {
        Self {
            cancel: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wraps a single one-shot cancel closure.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Combines several subscriptions into one: cancelling the result
    /// cancels all of them.
    pub fn combined(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for sub in subscriptions {
                sub.cancel();
            }
        })
    }

    pub fn cancel(mut self) {
        self.cancel_in_place();
    }

    fn cancel_in_place(&mut self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_in_place();
    }
}

/// Registers handlers under monotonically increasing ids and iterates a
/// snapshot on `for_each`. Handlers registered as `temporary` (the
/// store's one-shot `run()` observer) are excluded from [`SubscriptionList::count`].
pub struct SubscriptionList<H> {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Entry<H>>>,
}

struct Entry<H> {
    handler: H,
    temporary: bool,
}

impl<H> Default for SubscriptionList<H> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<H: Send + 'static> SubscriptionList<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`. Returns the cancellable subscription and
    /// whether this was the first non-temporary registration.
    pub fn register(self: &Arc<Self>, handler: H, temporary: bool) -> (Subscription, bool) {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let was_empty = self.count() == 0;
        let mut entries = self.entries.lock();
        entries.insert(id, Entry { handler, temporary });
        let is_first = !temporary && was_empty;
        drop(entries);

        let list = Arc::clone(self);
        (
            Subscription::new(move || {
                list.entries.lock().remove(&id);
            }),
            is_first,
        )
    }

    /// Number of non-temporary registrations currently live.
    pub fn count(&self) -> usize {
        self.entries.lock().values().filter(|e| !e.temporary).count()
    }

    pub fn is_empty_non_temporary(&self) -> bool {
        self.count() == 0
    }
}

impl<H: Clone + Send + 'static> SubscriptionList<H> {
    /// Invokes `f` for a snapshot of currently registered handlers, in
    /// registration order. Handlers added or removed mid-iteration by `f`
    /// (re-entrancy) do not affect this pass.
    pub fn for_each(&self, mut f: impl FnMut(&H)) {
        let snapshot: Vec<H> = self.entries.lock().values().map(|e| e.handler.clone()).collect();
        for handler in &snapshot {
            f(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_implies_cancel() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        {
            let c = Arc::clone(&calls);
            let _sub = Subscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_non_temporary_registration_is_flagged() {
        let list: Arc<SubscriptionList<i32>> = Arc::new(SubscriptionList::new());
        let (_s1, first1) = list.register(1, false);
        let (_s2, first2) = list.register(2, false);
        assert!(first1);
        assert!(!first2);
        assert_eq!(list.count(), 2);
    }

    #[test]
    fn temporary_handlers_excluded_from_count() {
        let list: Arc<SubscriptionList<i32>> = Arc::new(SubscriptionList::new());
        let (_s1, _) = list.register(1, true);
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn cancelling_subscription_removes_handler() {
        let list: Arc<SubscriptionList<i32>> = Arc::new(SubscriptionList::new());
        let (sub, _) = list.register(1, false);
        assert_eq!(list.count(), 1);
        sub.cancel();
        assert_eq!(list.count(), 0);
    }
}
