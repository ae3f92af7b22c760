//! A single-threaded FIFO queue for critical sections that must not
//! interleave.
//!
//! Distinct from the store's re-entrant lock: a
//! [`SerialQueue`] orders whole async closures end-to-end — including
//! their own internal `.await` points — rather than just guarding a
//! synchronous critical section. The sync engine (`src/sync_engine.rs`)
//! uses one to serialise its `replace_all` reconciliation passes.

use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Runs submitted jobs one at a time, in submission order, on a single
/// background task. Dropping the queue stops accepting new jobs but
/// lets any job already running finish.
pub struct SerialQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialQueue {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job().await;
            }
        });
        Self { sender }
    }

    /// Submits `f` and awaits its result. `f` does not start running
    /// until every job submitted before it has finished; jobs submitted
    /// after it from other callers wait in turn.
    pub async fn run<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let result = f().await;
                let _ = result_tx.send(result);
            })
        });

        self.sender
            .send(job)
            .expect("serial queue worker task should outlive its sender");

        result_rx.await.expect("serial queue worker dropped its job before completion")
    }
}
