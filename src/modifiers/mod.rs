//! Standard modifiers: composable wrappers around an
//! [`crate::operation::Operation`] that are themselves operations, so
//! composing several is zero-cost trait wrapping rather than dynamic
//! dispatch.

pub mod automatic_running;
pub mod backoff;
pub mod dedup;
pub mod handle_events;
pub mod network;
pub mod offline;
pub mod retry;
pub mod staleness;

pub use automatic_running::{AutomaticRunningExt, AutomaticRunningSpecKey, DisableAutomaticRunning, EnableAutomaticRunning};
pub use backoff::BackoffFn;
pub use dedup::{Deduplicated, DeduplicatedExt};
pub use handle_events::{EventHandlerFn, EventHandlerKey, HandleEvents, HandleEventsExt, OperationEvent};
pub use network::{ConnStatus, MockNetworkObserver, NetworkGate, NetworkGateExt, NetworkObserver, SatisfiedConnectionStatusKey};
pub use offline::{CompletelyOffline, CompletelyOfflineExt};
pub use retry::{BackoffKey, MaxRetriesKey, Retry, RetryExt, RetryIndexKey};
pub use staleness::{Staleness, StalenessConditionKey, StalenessExt, StalenessPredicate};
