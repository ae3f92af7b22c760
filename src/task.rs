//! Cancellable, dependency-scheduled, at-most-once async work units.

use crate::cancel::CancelToken;
use crate::context::Context;
use crate::failure::Failure;
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Where a task's body should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorPreference {
    /// Run inline on whatever task drives `run_if_needed`.
    #[default]
    Inherit,
    /// Hand the body to `tokio::spawn` so it survives the first caller
    /// dropping its `run_if_needed` future.
    Spawn,
}

/// Naming and scheduling hints captured at task-creation time.
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    pub name: Option<String>,
    pub executor: ExecutorPreference,
}

impl TaskConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            executor: ExecutorPreference::default(),
        }
    }

    pub fn with_executor(mut self, executor: ExecutorPreference) -> Self {
        self.executor = executor;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Initial,
    Running,
    Finished,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type Body<V, E> = Box<dyn FnOnce(Context, CancelToken) -> BoxFuture<'static, Result<V, Failure<E>>> + Send>;

/// Type-erased handle used only for dependency scheduling: `Task::schedule_after`
/// orders side effects between tasks of unrelated `Value`/`Failure` types, so
/// the dependency graph is walked through this object-safe seam rather than
/// through `Task<V, E>` directly.
#[async_trait]
pub trait DependencyTask: Send + Sync {
    fn task_id(&self) -> Uuid;
    fn dependency_snapshot(&self) -> Vec<Arc<dyn DependencyTask>>;
    async fn run_and_ignore(&self);
    /// Requests cooperative cancellation of the underlying task. Used by
    /// [`crate::state::OperationState::reset`] to cancel outgoing tasks
    /// without needing their concrete `Value`/`Failure` types.
    fn cancel(&self);
}

/// A cancellable, one-shot async unit produced by a store for a single run.
pub struct Task<V, E> {
    id: Uuid,
    herd_id: u64,
    config: TaskConfig,
    context: Context,
    cancel: CancelToken,
    state: Mutex<TaskState>,
    dependencies: Mutex<Vec<Arc<dyn DependencyTask>>>,
    body: Mutex<Option<Body<V, E>>>,
    result: OnceCell<Result<V, Failure<E>>>,
}

impl<V, E> Task<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(
        herd_id: u64,
        config: TaskConfig,
        context: Context,
        body: impl FnOnce(Context, CancelToken) -> BoxFuture<'static, Result<V, Failure<E>>> + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::now_v7(),
            herd_id,
            config,
            context,
            cancel: CancelToken::new(),
            state: Mutex::new(TaskState::Initial),
            dependencies: Mutex::new(Vec::new()),
            body: Mutex::new(Some(Box::new(body))),
            result: OnceCell::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn herd_id(&self) -> u64 {
        self.herd_id
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Appends `other` as a dependency of `self`, scheduled to run (and be
    /// ignored for success/failure purposes) before `self`'s own body.
    /// Refuses — and emits a `CircularTaskScheduling` diagnostic — if doing
    /// so would create a cycle.
    pub fn schedule_after(self: &Arc<Self>, other: Arc<dyn DependencyTask>) {
        if Self::reaches(&other, self.id) {
            tracing::warn!(
                task_id = %self.id,
                dependency_id = %other.task_id(),
                "refusing to schedule dependency: would create a cycle"
            );
            return;
        }
        self.dependencies.lock().push(other);
    }

    fn reaches(start: &Arc<dyn DependencyTask>, target: Uuid) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![Arc::clone(start)];
        while let Some(node) = stack.pop() {
            if node.task_id() == target {
                return true;
            }
            if !seen.insert(node.task_id()) {
                continue;
            }
            stack.extend(node.dependency_snapshot());
        }
        false
    }

    pub fn has_started(&self) -> bool {
        *self.state.lock() != TaskState::Initial
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == TaskState::Running
    }

    pub fn is_finished(&self) -> bool {
        *self.state.lock() == TaskState::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The stored result, if the task has finished. Never blocks.
    pub fn finished_result(&self) -> Option<Result<V, Failure<E>>> {
        self.result.get().cloned()
    }

    /// Requests cooperative cancellation. A body that never checks its
    /// `CancelToken` still finishes normally; only the store's herd-id
    /// comparison then prevents its result from mutating state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// First caller executes the body (after running dependencies,
    /// ignoring their results); every other caller — concurrent or
    /// later — awaits the same stored result. At-most-once execution.
    ///
    /// Every call races the shared result against this task's
    /// [`CancelToken`]: a body that never checks the token keeps running
    /// in the background, but a cancelled caller is reported
    /// `Failure::Cancelled` without waiting for it. Once finished, the race is disabled so cancelling an
    /// already-finished task is a no-op for every later caller.
    pub async fn run_if_needed(self: &Arc<Self>) -> Result<V, Failure<E>> {
        if self.cancel.is_cancelled() && !self.has_started() {
            return Err(Failure::Cancelled);
        }

        let this = Arc::clone(self);
        let init = self.result.get_or_init(move || async move {
            *this.state.lock() = TaskState::Running;

            let deps: Vec<_> = this.dependencies.lock().clone();
            for dep in &deps {
                dep.run_and_ignore().await;
            }

            let body = this.body.lock().take();
            let outcome = match body {
                Some(body) if !this.cancel.is_cancelled() => {
                    let context = this.context.clone();
                    let cancel = this.cancel.clone();
                    match this.config.executor {
                        ExecutorPreference::Inherit => body(context, cancel).await,
                        ExecutorPreference::Spawn => {
                            match tokio::spawn(body(context, cancel)).await {
                                Ok(result) => result,
                                Err(_join_error) => Err(Failure::Cancelled),
                            }
                        }
                    }
                }
                _ => Err(Failure::Cancelled),
            };

            *this.state.lock() = TaskState::Finished;
            outcome
        });

        let still_racing = !self.is_finished();
        tokio::select! {
            result = init => result.clone(),
            _ = self.cancel.cancelled(), if still_racing => Err(Failure::Cancelled),
        }
    }

    /// Builds a task that awaits `self` and applies a pure function to a
    /// successful value. Dependencies carry no data; `map` is the sanctioned way to chain values across tasks.
    pub fn map<U>(
        self: &Arc<Self>,
        f: impl FnOnce(V) -> U + Send + 'static,
    ) -> Arc<Task<U, E>>
    where
        U: Clone + Send + Sync + 'static,
    {
        let upstream = Arc::clone(self);
        Task::new(self.herd_id, self.config.clone(), self.context.clone(), move |_ctx, _cancel| {
            Box::pin(async move { upstream.run_if_needed().await.map(f) })
        })
    }
}

impl<V, E> Task<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Type-erases `self` for use as another task's dependency.
    pub fn as_dependency(self: &Arc<Self>) -> Arc<dyn DependencyTask> {
        Arc::new(DependencyHandle(Arc::clone(self)))
    }
}

struct DependencyHandle<V, E>(Arc<Task<V, E>>);

#[async_trait]
impl<V, E> DependencyTask for DependencyHandle<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn task_id(&self) -> Uuid {
        self.0.id
    }

    fn dependency_snapshot(&self) -> Vec<Arc<dyn DependencyTask>> {
        self.0.dependencies.lock().clone()
    }

    async fn run_and_ignore(&self) {
        let _ = self.0.run_if_needed().await;
    }

    fn cancel(&self) {
        self.0.cancel();
    }
}
