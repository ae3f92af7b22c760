//! Staleness predicates.
//!
//! The store's `isStale` reads the composite predicate installed here —
//! this module only builds and stores the predicate; evaluating it
//! against a live `OperationState` is `crate::store::Store::is_stale`.

use crate::context::{Context, ContextKey};
use crate::operation::Operation;
use crate::path::Path;
use crate::state::OperationState;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::marker::PhantomData;
use std::sync::Arc;

/// `(state, context) -> bool`. Boxed so it can travel through a
/// [`Context`] entry without leaking a closure type into every modifier.
pub type StalenessPredicate<V, E> = Arc<dyn Fn(&OperationState<V, E>, &Context) -> bool + Send + Sync>;

/// Always stale — the default for a fresh operation with no explicit
/// staleness configuration (there is nothing to revalidate against, so
/// erring towards "run again" is the safe default).
pub fn always<V: Send + Sync + 'static, E: Send + Sync + 'static>() -> StalenessPredicate<V, E> {
    Arc::new(|_state, _ctx| true)
}

/// Stale iff the state has never received a value.
pub fn has_no_value<V: Send + Sync + 'static, E: Send + Sync + 'static>() -> StalenessPredicate<V, E> {
    Arc::new(|state, _ctx| state.current_value.is_none())
}

/// Stale iff the last successful value is older than `seconds`, measured
/// against `context`'s injected [`crate::clock::Clock`]. A state with no
/// value yet is stale (nothing to be fresh about).
pub fn age_exceeds<V: Send + Sync + 'static, E: Send + Sync + 'static>(seconds: i64) -> StalenessPredicate<V, E> {
    Arc::new(move |state, ctx| {
        let clock = ctx.get::<crate::clock::ClockKey>();
        match state.value_last_updated_at {
            Some(updated_at) => clock.now() - updated_at > ChronoDuration::seconds(seconds),
            None => true,
        }
    })
}

/// Stale iff `predicate(state, context)` — an escape hatch for
/// caller-defined freshness rules that don't fit the built-ins above.
pub fn fetch_condition<V, E>(
    predicate: impl Fn(&OperationState<V, E>, &Context) -> bool + Send + Sync + 'static,
) -> StalenessPredicate<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    Arc::new(predicate)
}

/// Boolean OR of `predicates`: stale iff any of them says so.
pub fn any_of<V, E>(predicates: Vec<StalenessPredicate<V, E>>) -> StalenessPredicate<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    Arc::new(move |state, ctx| predicates.iter().any(|p| p(state, ctx)))
}

/// Context key carrying the composite staleness predicate for operations
/// of value type `V` and failure type `E`.
pub struct StalenessConditionKey<V, E>(PhantomData<fn() -> (V, E)>);

impl<V, E> ContextKey for StalenessConditionKey<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = StalenessPredicate<V, E>;

    fn default_value() -> Self::Value {
        always()
    }
}

/// Wraps `inner`, installing `condition` as the store's staleness
/// predicate during `setup`. Does not intercept `run` — staleness only
/// gates whether the store schedules an automatic run, which is the
/// store's own concern.
pub struct Staleness<O: Operation> {
    inner: O,
    condition: StalenessPredicate<O::Value, O::Failure>,
}

impl<O: Operation> Staleness<O> {
    pub fn new(inner: O, condition: StalenessPredicate<O::Value, O::Failure>) -> Self {
        Self { inner, condition }
    }
}

#[async_trait]
impl<O: Operation> Operation for Staleness<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
        ctx.set::<StalenessConditionKey<O::Value, O::Failure>>(self.condition.clone());
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: crate::operation::Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        self.inner.run(ctx, continuation).await
    }
}

/// Convenience extension: `op.stale(after_seconds)` / `op.stale_when(predicate)`.
pub trait StalenessExt: Operation + Sized {
    fn stale_when(self, condition: StalenessPredicate<Self::Value, Self::Failure>) -> Staleness<Self> {
        Staleness::new(self, condition)
    }

    fn stale_after(self, seconds: i64) -> Staleness<Self> {
        let condition = any_of(vec![has_no_value(), age_exceeds(seconds)]);
        Staleness::new(self, condition)
    }
}

impl<O: Operation> StalenessExt for O {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockKey, MockClock};

    #[test]
    fn has_no_value_is_true_for_empty_state() {
        let state: OperationState<i32, String> = OperationState::new(None);
        let ctx = Context::new();
        assert!(has_no_value()(&state, &ctx));
    }

    #[test]
    fn has_no_value_is_false_once_populated() {
        let mut state: OperationState<i32, String> = OperationState::new(None);
        let task = crate::task::Task::new(0, crate::task::TaskConfig::default(), Context::new(), |_, _| {
            Box::pin(async { Ok(1) })
        });
        state.schedule(task.clone());
        state.update(&Ok(1), &task, chrono::Utc::now());
        let ctx = Context::new();
        assert!(!has_no_value()(&state, &ctx));
    }

    #[test]
    fn age_exceeds_honours_injected_clock() {
        let mut state: OperationState<i32, String> = OperationState::new(None);
        let clock = MockClock::epoch();
        let mut ctx = Context::new();
        ctx.set::<ClockKey>(Arc::new(clock.clone()));

        let task = crate::task::Task::new(0, crate::task::TaskConfig::default(), Context::new(), |_, _| {
            Box::pin(async { Ok(42) })
        });
        state.schedule(task.clone());
        state.update(&Ok(42), &task, clock.now());

        let predicate = age_exceeds::<i32, String>(1);
        assert!(!predicate(&state, &ctx));

        clock.advance(chrono::Duration::seconds(2));
        assert!(predicate(&state, &ctx));
    }

    #[test]
    fn any_of_is_true_if_one_predicate_matches() {
        let state: OperationState<i32, String> = OperationState::new(None);
        let ctx = Context::new();
        let predicate = any_of(vec![
            fetch_condition(|_s: &OperationState<i32, String>, _c: &Context| false),
            always(),
        ]);
        assert!(predicate(&state, &ctx));
    }
}
