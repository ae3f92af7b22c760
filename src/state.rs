//! Per-operation runtime state and the derived [`Status`] view.
//!
//! Mutating methods here are store-only by convention — an
//! [`OperationState`] does not take its own lock (the owning
//! [`crate::store::Store`] serializes all access with its re-entrant
//! lock), so every method here takes `&mut self`.

use crate::context::Context;
use crate::failure::Failure;
use crate::task::{DependencyTask, Task};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Derived view of an [`OperationState`].
#[derive(Debug, Clone)]
pub enum Status<V, E> {
    Idle,
    Loading,
    Success(V),
    Failure(Failure<E>),
}

impl<V, E> Status<V, E> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Status::Loading)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Status::Idle)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Status::Failure(f) if f.is_cancelled())
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Status::Success(v) => Some(v),
            _ => None,
        }
    }
}

/// The effect of a [`OperationState::reset`]: cancelling the tasks that
/// were in flight at reset time, kept outside the state's own lock so the
/// store can release its lock before triggering cancellation.
#[must_use = "ResetEffect must be cancelled to actually stop the in-flight tasks"]
pub struct ResetEffect {
    outgoing: Vec<Arc<dyn DependencyTask>>,
}

impl ResetEffect {
    pub fn cancel(self) {
        for task in self.outgoing {
            task.cancel();
        }
    }
}

/// Runtime state for a single operation.
pub struct OperationState<V, E> {
    pub current_value: Option<V>,
    pub initial_value: Option<V>,
    pub value_update_count: u64,
    pub value_last_updated_at: Option<DateTime<Utc>>,
    pub error_update_count: u64,
    pub error_last_updated_at: Option<DateTime<Utc>>,
    pub error: Option<Failure<E>>,
    active_tasks: Vec<Arc<Task<V, E>>>,
    herd_id: u64,
}

impl<V: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> OperationState<V, E> {
    pub fn new(initial_value: Option<V>) -> Self {
        Self {
            current_value: initial_value.clone(),
            initial_value,
            value_update_count: 0,
            value_last_updated_at: None,
            error_update_count: 0,
            error_last_updated_at: None,
            error: None,
            active_tasks: Vec::new(),
            herd_id: 0,
        }
    }

    pub fn herd_id(&self) -> u64 {
        self.herd_id
    }

    pub fn is_loading(&self) -> bool {
        !self.active_tasks.is_empty()
    }

    pub fn active_task_count(&self) -> usize {
        self.active_tasks.len()
    }

    /// Derives the externally observable [`Status`].
    pub fn status(&self) -> Status<V, E> {
        if self.is_loading() {
            return Status::Loading;
        }
        if self.value_update_count == 0 && self.error_update_count == 0 {
            return Status::Idle;
        }
        let value_wins = match (self.value_last_updated_at, self.error_last_updated_at) {
            (Some(v), Some(e)) => v >= e,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => true,
        };
        if value_wins {
            match &self.current_value {
                Some(v) => Status::Success(v.clone()),
                None => Status::Idle,
            }
        } else {
            match &self.error {
                Some(e) => Status::Failure(e.clone()),
                None => Status::Idle,
            }
        }
    }

    /// Appends `task` to `active_tasks`. Called by the store only, before
    /// the task's body starts running.
    pub fn schedule(&mut self, task: Arc<Task<V, E>>) {
        self.active_tasks.push(task);
    }

    /// Applies an ingested result for `task`. Dropped silently (besides
    /// the warning the store logs at the call site) if `task`'s herd id
    /// no longer matches — this is what makes `reset` followed
    /// immediately by a fresh value race-free against a still-finishing
    /// stale task.
    pub fn update(&mut self, result: &Result<V, Failure<E>>, task: &Task<V, E>, now: DateTime<Utc>) {
        if task.herd_id() != self.herd_id {
            return;
        }
        match result {
            Ok(value) => {
                self.current_value = Some(value.clone());
                self.value_update_count += 1;
                self.value_last_updated_at = Some(now);
                self.error = None;
            }
            Err(failure) => {
                self.error = Some(failure.clone());
                self.error_update_count += 1;
                self.error_last_updated_at = Some(now);
            }
        }
    }

    /// Removes `task` from `active_tasks`. Called by the store once the
    /// task has reached a terminal result, regardless of herd id.
    pub fn finish(&mut self, task: &Task<V, E>) {
        self.active_tasks.retain(|t| t.id() != task.id());
    }

    /// Restores `initial_value`, clears counters/error, bumps the herd
    /// id so in-flight results can no longer mutate state, and returns a
    /// [`ResetEffect`] the caller must `cancel()` outside this state's lock.
    pub fn reset(&mut self, _ctx: &Context) -> ResetEffect {
        self.herd_id += 1;
        self.current_value = self.initial_value.clone();
        self.value_update_count = 0;
        self.value_last_updated_at = None;
        self.error_update_count = 0;
        self.error_last_updated_at = None;
        self.error = None;

        let outgoing = std::mem::take(&mut self.active_tasks)
            .into_iter()
            .map(|t| t.as_dependency())
            .collect();
        ResetEffect { outgoing }
    }
}
