//! Library-produced error enum.
//!
//! Most diagnosable misuse (duplicate paths, yielding after a run
//! returned, circular task scheduling, using a controller after its
//! store was dropped) is reported straight to the `tracing` sink rather
//! than returned — the same split an in-memory storage backend draws
//! between returned errors and warnings its state machine logs for
//! transitions it simply refuses. [`OpCoreError`] covers the one kind
//! that genuinely has no sensible value to hand back: an unbacked
//! [`crate::shared_state::SharedState`] asked to run.

/// Errors the core itself produces and returns (as opposed to logging
/// as a diagnostic and continuing).
#[derive(Debug, Clone, thiserror::Error)]
pub enum OpCoreError {
    /// A [`crate::shared_state::SharedState`] with no backing operation
    /// was asked to `run()`.
    #[error("shared state at {path} has no backing operation to run")]
    UnbackedRun { path: String },
}
