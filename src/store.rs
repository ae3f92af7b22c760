//! The store: owns one operation's state, schedules tasks, fans out
//! events.

use crate::cancel::RunCancelKey;
use crate::clock::ClockKey;
use crate::context::{Context, ContextKey};
use crate::failure::Failure;
use crate::modifiers::automatic_running::AutomaticRunningSpecKey;
use crate::modifiers::staleness::StalenessConditionKey;
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use crate::state::{OperationState, Status};
use crate::subscription::{Subscription, SubscriptionList};
use crate::task::{Task, TaskConfig};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;

/// Context key carrying a back-reference to the store driving the
/// current run. Lets a collaborator the operation calls into — not just the
/// operation body itself — reach the store that issued this run, e.g. a
/// [`Controls`] handle stashed away earlier. Defaults to an empty
/// [`Weak`] so reading it outside a run upgrades to `None` rather than
/// panicking.
pub struct RunningStoreKey<O>(PhantomData<fn() -> O>);

impl<O: Operation> ContextKey for RunningStoreKey<O> {
    type Value = Weak<Store<O>>;

    fn default_value() -> Self::Value {
        Weak::new()
    }
}

/// Observes a store's lifecycle. All methods
/// default to no-ops so a caller who only cares about state changes can
/// implement just that one.
pub trait StoreObserver<V, E>: Send + Sync {
    fn on_state_changed(&self, _status: &Status<V, E>) {}
    fn on_run_started(&self) {}
    fn on_run_ended(&self) {}
    fn on_result_received(&self, _result: &Result<V, Failure<E>>) {}
}

/// Adapts a plain closure into a [`StoreObserver`] that only cares about
/// state changes — the overwhelmingly common case.
pub struct OnStateChanged<F>(pub F);

impl<V, E, F> StoreObserver<V, E> for OnStateChanged<F>
where
    F: Fn(&Status<V, E>) + Send + Sync,
{
    fn on_state_changed(&self, status: &Status<V, E>) {
        (self.0)(status)
    }
}

/// An external object that may inject values into a store's state
/// without running the underlying operation.
/// Accessed through [`Store::controls`]; using the returned [`Controls`]
/// after the owning store has been dropped is a `ControllerDeallocatedAccess`
/// diagnostic, never a panic.
pub struct Controls<O: Operation> {
    store: Weak<Store<O>>,
}

impl<O: Operation> Controls<O> {
    fn upgrade_or_warn(&self) -> Option<Arc<Store<O>>> {
        let store = self.store.upgrade();
        if store.is_none() {
            tracing::warn!("controls used after their owning store was dropped");
        }
        store
    }

    pub fn yield_value(&self, value: O::Value) {
        if let Some(store) = self.upgrade_or_warn() {
            store.set_result(Ok(value), None);
        }
    }

    pub fn yield_error(&self, error: O::Failure) {
        if let Some(store) = self.upgrade_or_warn() {
            store.set_result(Err(error), None);
        }
    }

    /// `None` if automatic running is disabled for this store — there is
    /// nothing sensible to refetch.
    pub fn yield_refetch_task(&self) -> Option<Arc<Task<O::Value, O::Failure>>> {
        let store = self.upgrade_or_warn()?;
        if !store.is_automatic_running_enabled() {
            return None;
        }
        Some(store.run_task(None))
    }

    pub fn yield_reset_state(&self) {
        if let Some(store) = self.upgrade_or_warn() {
            store.reset_state(None);
        }
    }

    pub fn status(&self) -> Option<Status<O::Value, O::Failure>> {
        self.upgrade_or_warn().map(|store| store.status())
    }

    pub fn with_exclusive_access<R>(&self, f: impl FnOnce(&Store<O>) -> R) -> Option<R> {
        self.upgrade_or_warn().map(|store| store.with_exclusive_access(f))
    }
}

/// The runtime wrapper owning one operation's state.
///
/// The state lock is re-entrant (`parking_lot::ReentrantMutex`) so a
/// subscriber's own event handler may call back into the same store —
/// e.g. a controller that yields a value in response to a state change.
pub struct Store<O: Operation> {
    path: Path,
    operation: Arc<O>,
    base_context: Context,
    state: ReentrantMutex<RefCell<OperationState<O::Value, O::Failure>>>,
    subscribers: Arc<SubscriptionList<Arc<dyn StoreObserver<O::Value, O::Failure>>>>,
    auto_run_task: parking_lot::Mutex<Option<Arc<Task<O::Value, O::Failure>>>>,
}

impl<O: Operation> Store<O> {
    /// Builds a store around `operation`, running its `setup` once to
    /// seed the base context, with no initial value (the common "query"
    /// shape).
    pub fn new(operation: O) -> Arc<Self> {
        Self::with_initial_value(operation, None)
    }

    /// Builds a store with an explicit initial value — used for
    /// operations whose state type has a meaningful starting point
    /// other than "nothing yet".
    pub fn with_initial_value(operation: O, initial_value: Option<O::Value>) -> Arc<Self> {
        let mut ctx = Context::new();
        operation.setup(&mut ctx);
        let path = operation.path();

        Arc::new(Self {
            path,
            operation: Arc::new(operation),
            base_context: ctx,
            state: ReentrantMutex::new(RefCell::new(OperationState::new(initial_value))),
            subscribers: Arc::new(SubscriptionList::new()),
            auto_run_task: parking_lot::Mutex::new(None),
        })
    }

    /// Builds a store from an already-seeded context, skipping
    /// `operation.setup` — for callers that need to install something
    /// (like a [`crate::clock::MockClock`]) before the predicates that
    /// read it are stored.
    pub fn with_context(operation: O, initial_value: Option<O::Value>, base_context: Context) -> Arc<Self> {
        let path = operation.path();
        Arc::new(Self {
            path,
            operation: Arc::new(operation),
            base_context,
            state: ReentrantMutex::new(RefCell::new(OperationState::new(initial_value))),
            subscribers: Arc::new(SubscriptionList::new()),
            auto_run_task: parking_lot::Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn context(&self) -> Context {
        self.base_context.clone()
    }

    pub fn status(&self) -> Status<O::Value, O::Failure> {
        self.state.lock().borrow().status()
    }

    pub fn current_value(&self) -> Option<O::Value> {
        self.state.lock().borrow().current_value.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    pub fn is_automatic_running_enabled(&self) -> bool {
        self.base_context.get::<AutomaticRunningSpecKey>()
    }

    /// Reads the composite staleness predicate installed by
    /// `Staleness::setup` and evaluates it against the current state.
    pub fn is_stale(&self) -> bool {
        let predicate = self.base_context.get::<StalenessConditionKey<O::Value, O::Failure>>();
        let guard = self.state.lock();
        predicate(&guard.borrow(), &self.base_context)
    }

    fn broadcast_state_changed(&self) {
        let status = self.status();
        self.subscribers.for_each(|observer| observer.on_state_changed(&status));
    }

    /// Registers `observer`: invokes
    /// `on_state_changed` immediately with the current status, and — if
    /// this is the first non-temporary subscriber and the store is
    /// stale with automatic running enabled — schedules a run. Dropping
    /// the last non-temporary subscriber cancels that subscription-driven
    /// task.
    pub fn subscribe(self: &Arc<Self>, observer: Arc<dyn StoreObserver<O::Value, O::Failure>>) -> Subscription {
        observer.on_state_changed(&self.status());
        let (sub, is_first) = self.subscribers.register(observer, false);

        if is_first && self.is_stale() && self.is_automatic_running_enabled() {
            self.schedule_auto_run();
        }

        let this = Arc::clone(self);
        Subscription::new(move || {
            sub.cancel();
            if this.subscribers.count() == 0 {
                this.cancel_auto_run();
            }
        })
    }

    fn schedule_auto_run(self: &Arc<Self>) {
        let task = self.run_task(None);
        *self.auto_run_task.lock() = Some(task);
    }

    fn cancel_auto_run(&self) {
        if let Some(task) = self.auto_run_task.lock().take() {
            task.cancel();
        }
    }

    /// Ensures a task exists for this run and awaits it.
    pub async fn run(self: &Arc<Self>, ctx_override: Option<Context>) -> Result<O::Value, Failure<O::Failure>> {
        self.run_with_observer(ctx_override, None).await
    }

    /// Like [`Store::run`], but additionally subscribes `observer`
    /// temporarily for the duration of the run (it does not count
    /// towards [`Store::subscriber_count`]).
    pub async fn run_with_observer(
        self: &Arc<Self>,
        ctx_override: Option<Context>,
        observer: Option<Arc<dyn StoreObserver<O::Value, O::Failure>>>,
    ) -> Result<O::Value, Failure<O::Failure>> {
        let _temporary = observer.map(|observer| self.subscribers.register(observer, true).0);
        let task = self.run_task(ctx_override);
        task.run_if_needed().await
    }

    /// Creates and schedules a task for a run without awaiting it. The
    /// body is handed to `tokio::spawn` immediately so the task makes
    /// progress whether or not the caller ever awaits it.
    pub fn run_task(self: &Arc<Self>, ctx_override: Option<Context>) -> Arc<Task<O::Value, O::Failure>> {
        let herd = self.state.lock().borrow().herd_id();
        let mut context = ctx_override.unwrap_or_else(|| self.base_context.clone());
        context.set::<RunningStoreKey<O>>(Arc::downgrade(self));

        let task_cell: Arc<OnceCell<Weak<Task<O::Value, O::Failure>>>> = Arc::new(OnceCell::new());
        let finished = Arc::new(AtomicBool::new(false));

        let operation = Arc::clone(&self.operation);
        let body_task_cell = Arc::clone(&task_cell);
        let body_finished = Arc::clone(&finished);
        let body_store = Arc::downgrade(self);

        let task = Task::new(herd, TaskConfig::default(), context, move |mut run_ctx, task_cancel| {
            Box::pin(async move {
                run_ctx.set::<RunCancelKey>(task_cancel);
                let task_weak = body_task_cell.get().expect("task handle set before body runs").clone();

                let continuation = {
                    let store = body_store.clone();
                    let task_weak = task_weak.clone();
                    Continuation::new(
                        move |result: Result<O::Value, Failure<O::Failure>>| {
                            if let (Some(store), Some(task)) = (store.upgrade(), task_weak.upgrade()) {
                                store.ingest(&task, result, false);
                            }
                        },
                        Arc::clone(&body_finished),
                    )
                };

                let outcome = operation.run(run_ctx, continuation).await.map_err(Failure::Operation);
                body_finished.store(true, Ordering::Release);

                if let (Some(store), Some(task)) = (body_store.upgrade(), task_weak.upgrade()) {
                    store.ingest(&task, outcome.clone(), true);
                }
                outcome
            })
        });

        task_cell.set(Arc::downgrade(&task)).ok();

        self.state.lock().borrow_mut().schedule(Arc::clone(&task));
        self.broadcast_state_changed();
        self.subscribers.for_each(|observer| observer.on_run_started());

        let spawned = Arc::clone(&task);
        tokio::spawn(async move {
            let _ = spawned.run_if_needed().await;
        });

        task
    }

    /// Applies an ingested result from a running task: acquires the
    /// state lock, applies the ingestion rule (dropped if the task's
    /// herd is stale), removes the task from `activeTasks` if this is
    /// the final result, then fans out `onResultReceived` /
    /// `onStateChanged` / `onRunEnded`.
    fn ingest(self: &Arc<Self>, task: &Arc<Task<O::Value, O::Failure>>, result: Result<O::Value, Failure<O::Failure>>, is_final: bool) {
        let now = self.base_context.get::<ClockKey>().now();
        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            state.update(&result, task, now);
            if is_final {
                state.finish(task);
            }
        }
        self.subscribers.for_each(|observer| observer.on_result_received(&result));
        self.broadcast_state_changed();
        if is_final {
            self.subscribers.for_each(|observer| observer.on_run_ended());
        }
    }

    /// Directly sets the current result without running the operation.
    /// A successful set always clears any previously recorded `error`.
    pub fn set_result(self: &Arc<Self>, result: Result<O::Value, O::Failure>, ctx_override: Option<&Context>) {
        let ctx = ctx_override.cloned().unwrap_or_else(|| self.base_context.clone());
        let now = ctx.get::<ClockKey>().now();
        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            match result {
                Ok(value) => {
                    state.current_value = Some(value);
                    state.value_update_count += 1;
                    state.value_last_updated_at = Some(now);
                    state.error = None;
                }
                Err(error) => {
                    state.error = Some(Failure::Operation(error));
                    state.error_update_count += 1;
                    state.error_last_updated_at = Some(now);
                }
            }
        }
        self.broadcast_state_changed();
    }

    /// Resets state to its initial value and cancels in-flight tasks.
    pub fn reset_state(self: &Arc<Self>, ctx_override: Option<&Context>) {
        let ctx = ctx_override.cloned().unwrap_or_else(|| self.base_context.clone());
        let effect = self.state.lock().borrow_mut().reset(&ctx);
        effect.cancel();
        self.broadcast_state_changed();
    }

    /// Takes the store's re-entrant lock for the duration of `f`, so a
    /// read-modify-write sequence on state is race-free. Re-entrant: `f` may itself call back into
    /// methods that take this same lock.
    pub fn with_exclusive_access<R>(self: &Arc<Self>, f: impl FnOnce(&Store<O>) -> R) -> R {
        let _guard = self.state.lock();
        f(self)
    }

    /// Returns a [`Controls`] handle an external controller can use to
    /// inject values into this store from outside the normal run
    /// protocol.
    pub fn controls(self: &Arc<Self>) -> Controls<O> {
        Controls { store: Arc::downgrade(self) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

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

    struct AlwaysFails;

    #[async_trait]
    impl Operation for AlwaysFails {
        type Value = i32;
        type Failure = String;

        fn path(&self) -> Path {
            Path::single("always-fails")
        }

        async fn run(&self, _ctx: Context, _continuation: Continuation<i32, String>) -> Result<i32, String> {
            Err("boom".to_string())
        }
    }

    struct Hangs;

    #[async_trait]
    impl Operation for Hangs {
        type Value = i32;
        type Failure = String;

        fn path(&self) -> Path {
            Path::single("hangs")
        }

        async fn run(&self, ctx: Context, _continuation: Continuation<i32, String>) -> Result<i32, String> {
            let cancel = ctx.get::<RunCancelKey>();
            cancel.cancelled().await;
            std::future::pending::<()>().await;
            Ok(1)
        }
    }

    #[tokio::test]
    async fn fresh_store_is_idle_with_no_subscribers() {
        let store = Store::new(Answer(1));
        assert_eq!(store.subscriber_count(), 0);
        assert!(store.status().is_idle());
    }

    #[tokio::test]
    async fn basic_success_updates_state_as_specified() {
        let store = Store::new(Answer(1));
        let result = store.run(None).await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(store.current_value(), Some(1));
        let guard = store.state.lock();
        assert_eq!(guard.borrow().value_update_count, 1);
        drop(guard);
        assert!(matches!(store.status(), Status::Success(1)));
    }

    #[tokio::test]
    async fn failed_run_is_observable_as_failure_status() {
        let store = Store::new(AlwaysFails);
        let result = store.run(None).await;

        assert!(result.is_err());
        assert!(matches!(store.status(), Status::Failure(_)));
    }

    #[tokio::test]
    async fn reset_cancels_in_flight_run_and_restores_initial_value() {
        let store = Store::with_initial_value(Hangs, Some(0));
        let task = store.run_task(None);

        tokio::task::yield_now().await;
        store.reset_state(None);

        let result = task.run_if_needed().await;
        assert!(matches!(result, Err(Failure::Cancelled)));
        assert_eq!(store.current_value(), Some(0));
        let guard = store.state.lock();
        assert_eq!(guard.borrow().value_update_count, 0);
    }

    #[tokio::test]
    async fn subscribe_triggers_auto_run_when_stale_and_enabled() {
        use crate::modifiers::staleness::{always, StalenessConditionKey};

        struct CountingAnswer(Arc<AtomicU32>);

        #[async_trait]
        impl Operation for CountingAnswer {
            type Value = i32;
            type Failure = String;

            fn path(&self) -> Path {
                Path::single("counting-answer")
            }

            fn setup(&self, ctx: &mut Context) {
                ctx.set::<StalenessConditionKey<i32, String>>(always());
            }

            async fn run(&self, _ctx: Context, _continuation: Continuation<i32, String>) -> Result<i32, String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        }

        let calls = Arc::new(AtomicU32::new(0));
        let store = Store::new(CountingAnswer(Arc::clone(&calls)));

        let observed = Arc::new(AtomicU32::new(0));
        let o = Arc::clone(&observed);
        let _sub = store.subscribe(Arc::new(OnStateChanged(move |status: &Status<i32, String>| {
            if let Status::Success(v) = status {
                o.store(*v as u32, Ordering::SeqCst);
            }
        })));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_result_clears_error_on_success() {
        let store = Store::new(Answer(1));
        store.set_result(Err("boom".to_string()), None);
        assert!(matches!(store.status(), Status::Failure(_)));

        store.set_result(Ok(5), None);
        assert!(matches!(store.status(), Status::Success(5)));
        let guard = store.state.lock();
        assert!(guard.borrow().error.is_none());
    }

    #[tokio::test]
    async fn stale_after_seconds_uses_injected_clock() {
        use crate::modifiers::staleness::StalenessExt;

        let clock = MockClock::epoch();
        struct FortyTwo;

        #[async_trait]
        impl Operation for FortyTwo {
            type Value = i32;
            type Failure = String;
            fn path(&self) -> Path {
                Path::single("forty-two")
            }
            async fn run(&self, _ctx: Context, _continuation: Continuation<i32, String>) -> Result<i32, String> {
                Ok(42)
            }
        }

        let op = FortyTwo.stale_after(1);
        let mut ctx = Context::new();
        op.setup(&mut ctx);
        ctx.set::<ClockKey>(Arc::new(clock.clone()));

        let store = Store::with_context(op, None, ctx);
        assert!(store.is_stale());

        store.run(None).await.unwrap();
        assert!(!store.is_stale());

        clock.advance(chrono::Duration::seconds(2));
        assert!(store.is_stale());
    }
}
