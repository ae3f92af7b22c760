//! `EnableAutomaticRunning` / `DisableAutomaticRunning`.
//!
//! The store reads the [`AutomaticRunningSpecKey`] context entry to
//! decide whether a fresh first subscriber should trigger a run.
//! Mutation-shaped operations default to disabled; everything else
//! defaults to enabled — that default lives in
//! [`crate::client::ClientConfig`], not here; this module only lets a
//! caller override it explicitly.

use crate::context::{Context, ContextKey};
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use async_trait::async_trait;

/// Context key: whether the store should schedule a run for itself when
/// it gains its first non-temporary subscriber and `isStale`.
pub struct AutomaticRunningSpecKey;

impl ContextKey for AutomaticRunningSpecKey {
    type Value = bool;

    fn default_value() -> Self::Value {
        true
    }
}

/// Wraps `inner`, forcing the `AutomaticRunningSpecKey` context entry to
/// `true` during `setup`.
pub struct EnableAutomaticRunning<O: Operation> {
    inner: O,
}

impl<O: Operation> EnableAutomaticRunning<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: Operation> Operation for EnableAutomaticRunning<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
        ctx.set::<AutomaticRunningSpecKey>(true);
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        self.inner.run(ctx, continuation).await
    }
}

/// Wraps `inner`, forcing the `AutomaticRunningSpecKey` context entry to
/// `false` during `setup` — the usual choice for mutation-shaped operations.
pub struct DisableAutomaticRunning<O: Operation> {
    inner: O,
}

impl<O: Operation> DisableAutomaticRunning<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: Operation> Operation for DisableAutomaticRunning<O> {
    type Value = O::Value;
    type Failure = O::Failure;

    fn path(&self) -> Path {
        self.inner.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.inner.setup(ctx);
        ctx.set::<AutomaticRunningSpecKey>(false);
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        self.inner.run(ctx, continuation).await
    }
}

/// Convenience extensions: `op.enable_automatic_running()` / `op.disable_automatic_running()`.
pub trait AutomaticRunningExt: Operation + Sized {
    fn enable_automatic_running(self) -> EnableAutomaticRunning<Self> {
        EnableAutomaticRunning::new(self)
    }

    fn disable_automatic_running(self) -> DisableAutomaticRunning<Self> {
        DisableAutomaticRunning::new(self)
    }
}

impl<O: Operation> AutomaticRunningExt for O {}
