//! Unbounded helpers: run a batch of futures, or spawn one and receive its
//! output later.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Run every future at once and wait for all of them
///
/// Returns the first error in completion order, after the remaining tasks
/// have finished. An empty batch succeeds.
///
/// # Panics
///
/// If a task panics, the panic is resumed here once the rest of the batch
/// has completed.
pub async fn run_batch<I, Fut, E>(tasks: I) -> Result<(), E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Send + 'static,
{
    let mut join_set = JoinSet::new();
    for task in tasks {
        join_set.spawn(task);
    }

    let total = join_set.len();
    debug!(total, "running task batch");

    let mut first_error = None;
    let mut first_panic = None;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_error.is_none() {
                    warn!("batch task failed");
                    first_error = Some(err);
                }
            }
            Err(join_error) if join_error.is_panic() => {
                error!("batch task panicked");
                if first_panic.is_none() {
                    first_panic = Some(join_error.into_panic());
                }
            }
            Err(join_error) => {
                // Only happens when the runtime shuts down under us
                warn!(error = %join_error, "batch task was cancelled");
            }
        }
    }

    if let Some(payload) = first_panic {
        std::panic::resume_unwind(payload);
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            debug!(total, "task batch completed");
            Ok(())
        }
    }
}

/// Spawn `task` and return a receiver for its output
///
/// The task runs to completion even if the receiver is dropped. If the task
/// panics, the sender is dropped with it and the receiver yields
/// [`oneshot::error::RecvError`].
///
/// # Panics
///
/// Must be called from within a tokio runtime.
pub fn spawn_result<Fut>(task: Fut) -> oneshot::Receiver<Fut::Output>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let output = task.await;
        if tx.send(output).is_err() {
            debug!("result receiver dropped before the task finished");
        }
    });
    rx
}
