//! Sync engine: serialised replace-all of an external store driven by
//! database observation — an illustrative pattern built on
//! [`crate::serial_queue::SerialQueue`] and [`crate::cancel::CancelToken`].

use crate::cancel::CancelToken;
use crate::serial_queue::SerialQueue;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A record the sync engine can identify and re-schedule.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    type Id: Eq + Hash + Clone + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
}

/// The external collaborator being kept in sync.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    type Record: SyncRecord;
    type Error: std::fmt::Debug + Clone + Send + Sync + 'static;

    /// Cancels anything this store currently has scheduled.
    async fn cancel_all(&self);
    /// Schedules every record, returning a per-record outcome.
    async fn schedule_all(&self, records: &[Self::Record]) -> Vec<(Self::Record, Option<Self::Error>)>;
    /// The ids this store currently believes are live.
    async fn all(&self) -> HashSet<<Self::Record as SyncRecord>::Id>;
}

/// The database collaborator the engine drives: an observation stream
/// plus per-row status writes.
#[async_trait]
pub trait SyncDatabase: Send + Sync {
    type Record: SyncRecord;

    /// Ids of rows this database currently believes are "scheduled".
    async fn scheduled_ids(&self) -> HashSet<<Self::Record as SyncRecord>::Id>;
    async fn mark_finished(&self, id: &<Self::Record as SyncRecord>::Id);
    async fn mark_scheduled(&self, id: &<Self::Record as SyncRecord>::Id);
    async fn mark_pending(&self, id: &<Self::Record as SyncRecord>::Id);
    /// Emits the full current row set whenever it changes.
    fn observe(&self) -> BoxStream<'static, Vec<Self::Record>>;
}

/// Drives `store` to mirror `db`'s observed rows.
pub struct SyncEngine<D, S>
where
    D: SyncDatabase + 'static,
    S: ExternalStore<Record = D::Record> + 'static,
{
    db: Arc<D>,
    store: Arc<S>,
    queue: Arc<SerialQueue>,
    on_schedule_new_alarms: Arc<dyn Fn(&[D::Record]) + Send + Sync>,
    current_cancel: parking_lot::Mutex<CancelToken>,
    subscription_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<D, S> SyncEngine<D, S>
where
    D: SyncDatabase + 'static,
    S: ExternalStore<Record = D::Record> + 'static,
{
    pub fn new(
        db: Arc<D>,
        store: Arc<S>,
        on_schedule_new_alarms: impl Fn(&[D::Record]) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            store,
            queue: Arc::new(SerialQueue::new()),
            on_schedule_new_alarms: Arc::new(on_schedule_new_alarms),
            current_cancel: parking_lot::Mutex::new(CancelToken::new()),
            subscription_task: parking_lot::Mutex::new(None),
        })
    }

    /// Reconciles rows the database believes are "scheduled" but the
    /// store no longer knows about, then subscribes
    /// to the database's observation stream (step 2). Each emission
    /// cancels any prior in-flight reconciliation before running its own.
    pub async fn start(self: &Arc<Self>) {
        self.reconcile().await;

        let this = Arc::clone(self);
        let mut stream = self.db.observe();
        let handle = tokio::spawn(async move {
            while let Some(records) = stream.next().await {
                this.handle_emission(records).await;
            }
        });

        *self.subscription_task.lock() = Some(handle);
    }

    async fn reconcile(&self) {
        let scheduled = self.db.scheduled_ids().await;
        let live = self.store.all().await;
        for id in scheduled {
            if !live.contains(&id) {
                self.db.mark_finished(&id).await;
            }
        }
    }

    async fn handle_emission(self: &Arc<Self>, records: Vec<D::Record>) {
        let cancel = CancelToken::new();
        let previous = std::mem::replace(&mut *self.current_cancel.lock(), cancel.clone());
        previous.cancel();

        let db = Arc::clone(&self.db);
        let store = Arc::clone(&self.store);
        let callback = Arc::clone(&self.on_schedule_new_alarms);

        self.queue
            .run(move || async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("sync engine reconciliation superseded before it finished");
                    }
                    _ = Self::replace_all(&db, &store, &callback, records) => {}
                }
            })
            .await;
    }

    /// Cancels all scheduling then re-schedules every current record
    /// concurrently. Per-record
    /// failures are logged and update the row to `pending`; successes
    /// update it to `scheduled`. Failures never propagate to the caller.
    async fn replace_all(
        db: &D,
        store: &S,
        callback: &Arc<dyn Fn(&[D::Record]) + Send + Sync>,
        records: Vec<D::Record>,
    ) {
        store.cancel_all().await;
        let results = store.schedule_all(&records).await;

        for (record, error) in &results {
            let id = record.id();
            match error {
                None => db.mark_scheduled(&id).await,
                Some(err) => {
                    tracing::warn!(?err, "failed to schedule record during sync reconciliation");
                    db.mark_pending(&id).await;
                }
            }
        }
        callback(&records);
    }

    /// Cancels the subscription task.
    pub fn stop(&self) {
        if let Some(handle) = self.subscription_task.lock().take() {
            handle.abort();
        }
        self.current_cancel.lock().cancel();
    }
}

impl<D, S> Drop for SyncEngine<D, S>
where
    D: SyncDatabase + 'static,
    S: ExternalStore<Record = D::Record> + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    struct Alarm {
        id: u32,
    }

    impl SyncRecord for Alarm {
        type Id = u32;
        fn id(&self) -> u32 {
            self.id
        }
    }

    struct FakeDb {
        sender: Mutex<Option<mpsc::UnboundedSender<Vec<Alarm>>>>,
        receiver: Mutex<Option<mpsc::UnboundedReceiver<Vec<Alarm>>>>,
        scheduled: Mutex<HashSet<u32>>,
        pending: Mutex<HashSet<u32>>,
        finished: Mutex<HashSet<u32>>,
    }

    impl FakeDb {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                sender: Mutex::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
                scheduled: Mutex::new(HashSet::new()),
                pending: Mutex::new(HashSet::new()),
                finished: Mutex::new(HashSet::new()),
            }
        }

        fn emit(&self, records: Vec<Alarm>) {
            self.sender.lock().as_ref().unwrap().send(records).unwrap();
        }
    }

    #[async_trait]
    impl SyncDatabase for FakeDb {
        type Record = Alarm;

        async fn scheduled_ids(&self) -> HashSet<u32> {
            self.scheduled.lock().clone()
        }

        async fn mark_finished(&self, id: &u32) {
            self.finished.lock().insert(*id);
            self.scheduled.lock().remove(id);
        }

        async fn mark_scheduled(&self, id: &u32) {
            self.scheduled.lock().insert(*id);
            self.pending.lock().remove(id);
        }

        async fn mark_pending(&self, id: &u32) {
            self.pending.lock().insert(*id);
        }

        fn observe(&self) -> BoxStream<'static, Vec<Alarm>> {
            let rx = self.receiver.lock().take().expect("observe called only once");
            UnboundedReceiverStream::new(rx).boxed()
        }
    }

    struct FakeStore {
        live: Mutex<HashSet<u32>>,
        schedule_calls: AtomicU32,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                live: Mutex::new(HashSet::new()),
                schedule_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ExternalStore for FakeStore {
        type Record = Alarm;
        type Error = String;

        async fn cancel_all(&self) {
            self.live.lock().clear();
        }

        async fn schedule_all(&self, records: &[Alarm]) -> Vec<(Alarm, Option<String>)> {
            self.schedule_calls.fetch_add(1, Ordering::SeqCst);
            let mut live = self.live.lock();
            records
                .iter()
                .map(|r| {
                    live.insert(r.id);
                    (r.clone(), None)
                })
                .collect()
        }

        async fn all(&self) -> HashSet<u32> {
            self.live.lock().clone()
        }
    }

    #[tokio::test]
    async fn reconcile_marks_locally_scheduled_rows_absent_from_the_store_as_finished() {
        let db = Arc::new(FakeDb::new());
        db.scheduled.lock().insert(1);
        db.scheduled.lock().insert(2);
        let store = Arc::new(FakeStore::new());
        store.live.lock().insert(1); // 2 is absent from the store

        let engine = SyncEngine::new(Arc::clone(&db), store, |_| {});
        engine.reconcile().await;

        assert!(db.finished.lock().contains(&2));
        assert!(!db.finished.lock().contains(&1));
    }

    #[tokio::test]
    async fn emission_schedules_all_records_and_marks_them_scheduled() {
        let db = Arc::new(FakeDb::new());
        let store = Arc::new(FakeStore::new());
        let notified = Arc::new(AtomicU32::new(0));
        let n = Arc::clone(&notified);

        let engine = SyncEngine::new(Arc::clone(&db), Arc::clone(&store), move |records| {
            n.fetch_add(records.len() as u32, Ordering::SeqCst);
        });

        engine.start().await;
        db.emit(vec![Alarm { id: 10 }, Alarm { id: 11 }]);

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert!(db.scheduled.lock().contains(&10));
        assert!(db.scheduled.lock().contains(&11));
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert_eq!(store.schedule_calls.load(Ordering::SeqCst), 1);
    }
}
