//! Bounded concurrent task group
//!
//! A [`TaskGroup`] runs independent futures on the tokio runtime with a
//! fixed cap on how many execute at the same time. Submitting blocks while
//! the group is full, [`TaskGroup::wait`] joins every task and returns the
//! first error any of them produced.
//!
//! Groups built with [`TaskGroup::with_cancellation`] also own a child
//! [`CancellationToken`]. It is cancelled when the first task fails or when
//! `wait` finishes, whichever happens first. Running tasks are never
//! aborted; they observe the token if they want to stop early.

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument, Span};
use utilz_core::{Error, GroupConfig, Result};

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Cancellation wired to a group, fired at most once
struct CancelHandle {
    token: CancellationToken,
    fired: AtomicBool,
}

impl CancelHandle {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            fired: AtomicBool::new(false),
        }
    }

    fn fire(&self, reason: &'static str) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            info!(reason, "cancelling task group");
            self.token.cancel();
        }
    }
}

/// State shared between the group and its running tasks
struct Shared<E> {
    first_error: Mutex<Option<E>>,
    first_panic: Mutex<Option<PanicPayload>>,
    cancel: Option<CancelHandle>,
}

impl<E> Shared<E> {
    fn record_error(&self, task_id: u64, err: E) {
        let recorded = {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
                true
            } else {
                false
            }
        };

        if recorded {
            warn!(task_id, "task failed, keeping its error as the group result");
            self.cancel("task failed");
        } else {
            debug!(task_id, "task failed after an earlier failure, discarding error");
        }
    }

    fn record_panic(&self, task_id: u64, payload: PanicPayload) {
        error!(task_id, "task panicked");
        {
            let mut slot = self.first_panic.lock();
            if slot.is_none() {
                *slot = Some(payload);
            }
        }
        self.cancel("task panicked");
    }

    fn cancel(&self, reason: &'static str) {
        if let Some(cancel) = &self.cancel {
            cancel.fire(reason);
        }
    }
}

/// A group of concurrently running tasks with a fixed concurrency limit
///
/// `E` is the error type returned by the submitted tasks. Only the first
/// error is kept; later ones are dropped.
///
/// The group is consumed by [`wait`](Self::wait), so submitting after the
/// join or joining twice does not compile. Dropping a group without waiting
/// leaves its tasks running detached on the runtime.
pub struct TaskGroup<E = Error> {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    shared: Arc<Shared<E>>,
    submitted: AtomicU64,
    span: Span,
}

impl<E> TaskGroup<E>
where
    E: Send + 'static,
{
    /// Create a group that runs at most `capacity` tasks at once
    ///
    /// Fails with [`Error::InvalidCapacity`] for `0` or for more permits than
    /// a tokio semaphore can hold.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::build(&GroupConfig::new(capacity), None)
    }

    /// Create a group from a validated [`GroupConfig`]
    pub fn from_config(config: &GroupConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a group linked to a child of `parent`
    ///
    /// The returned token is the child: hand it to the tasks so they can
    /// stop early. It is cancelled when the first task fails, when
    /// [`wait`](Self::wait) returns, or when `parent` is cancelled.
    /// Cancelling the child never cancels `parent`.
    pub fn with_cancellation(
        capacity: usize,
        parent: &CancellationToken,
    ) -> Result<(Self, CancellationToken)> {
        let child = parent.child_token();
        let group = Self::build(&GroupConfig::new(capacity), Some(child.clone()))?;
        Ok((group, child))
    }

    fn build(config: &GroupConfig, token: Option<CancellationToken>) -> Result<Self> {
        config.validate()?;
        if config.capacity > Semaphore::MAX_PERMITS {
            return Err(Error::invalid_capacity(
                config.capacity,
                Semaphore::MAX_PERMITS,
            ));
        }

        let span = tracing::info_span!(
            "task_group",
            name = %config.name,
            capacity = config.capacity,
            cancellable = token.is_some()
        );

        Ok(Self {
            capacity: config.capacity,
            semaphore: Arc::new(Semaphore::new(config.capacity)),
            tracker: TaskTracker::new(),
            shared: Arc::new(Shared {
                first_error: Mutex::new(None),
                first_panic: Mutex::new(None),
                cancel: token.map(CancelHandle::new),
            }),
            submitted: AtomicU64::new(0),
            span,
        })
    }

    /// Submit a task, waiting for a free slot if the group is full
    ///
    /// Returns as soon as the task has been spawned; it does not wait for the
    /// task to finish. The permit wait is not interrupted by the group's
    /// cancellation, use [`go_cancellable`](Self::go_cancellable) for that.
    pub async fn go<Fut>(&self, task: Fut) -> Result<()>
    where
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        // Pending covers the permit wait as well as the run.
        let pending = self.tracker.token();
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::permit_acquisition(e.to_string()))?;

        self.spawn_with_permit(permit, pending, task);
        Ok(())
    }

    /// Submit a task unless the group gets cancelled while waiting for a slot
    ///
    /// Returns [`Error::Cancelled`] without running `task` if the group's
    /// token is already cancelled or fires before a permit frees up. Groups
    /// without a token behave exactly like [`go`](Self::go).
    pub async fn go_cancellable<Fut>(&self, task: Fut) -> Result<()>
    where
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        let Some(cancel) = self.shared.cancel.as_ref() else {
            return self.go(task).await;
        };

        let pending = self.tracker.token();
        let permit = tokio::select! {
            biased;
            _ = cancel.token.cancelled() => {
                debug!(parent: &self.span, "group cancelled before a permit was free");
                return Err(Error::cancelled("acquire task group permit"));
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|e| Error::permit_acquisition(e.to_string()))?
            }
        };

        self.spawn_with_permit(permit, pending, task);
        Ok(())
    }

    /// Submit a task only if a slot is free right now
    ///
    /// Returns `false`, dropping `task` unpolled, when the group is full.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime when a slot is free, since
    /// the task is spawned right away.
    pub fn try_go<Fut>(&self, task: Fut) -> bool
    where
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                let pending = self.tracker.token();
                self.spawn_with_permit(permit, pending, task);
                true
            }
            Err(_) => {
                debug!(parent: &self.span, "group full, task not started");
                false
            }
        }
    }

    fn spawn_with_permit<Fut>(
        &self,
        permit: OwnedSemaphorePermit,
        pending: TaskTrackerToken,
        task: Fut,
    ) where
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        let task_id = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        let shared = Arc::clone(&self.shared);
        let span = tracing::debug_span!(parent: &self.span, "task", task_id);

        tokio::spawn(
            async move {
                // Locals drop in reverse: the permit is returned before the
                // pending count goes down.
                let _pending = pending;
                let _permit = permit;

                debug!("task started");
                match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(Ok(())) => debug!("task completed"),
                    Ok(Err(err)) => shared.record_error(task_id, err),
                    Err(payload) => shared.record_panic(task_id, payload),
                }
            }
            .instrument(span),
        );
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`
    ///
    /// On time out the group's token (if any) is cancelled so cooperative
    /// tasks can stop, and [`Error::Timeout`] is returned. Tasks still running
    /// are left detached on the runtime. Otherwise the inner result is what
    /// `wait` returned.
    pub async fn wait_timeout(
        self,
        timeout: Duration,
    ) -> Result<std::result::Result<(), E>> {
        let shared = Arc::clone(&self.shared);
        let span = self.span.clone();

        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!(parent: &span, ?timeout, "timed out waiting for task group");
                shared.cancel("wait timed out");
                Err(Error::timeout("wait for task group", timeout))
            }
        }
    }

    /// Wait for every submitted task, then return the first error
    ///
    /// Cancels the group's token (if any) once all tasks have finished.
    ///
    /// # Panics
    ///
    /// Resumes the panic of the first task that panicked, after all other
    /// tasks have finished.
    pub async fn wait(self) -> std::result::Result<(), E> {
        self.tracker.close();
        self.tracker.wait().instrument(self.span.clone()).await;

        self.shared.cancel("group finished");

        let panic = self.shared.first_panic.lock().take();
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }

        let first_error = self.shared.first_error.lock().take();
        match first_error {
            Some(err) => {
                debug!(
                    parent: &self.span,
                    submitted = self.submitted(),
                    "task group finished with an error"
                );
                Err(err)
            }
            None => {
                debug!(
                    parent: &self.span,
                    submitted = self.submitted(),
                    "task group finished"
                );
                Ok(())
            }
        }
    }
}

impl<E> TaskGroup<E> {
    /// Maximum number of tasks running at once
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held by running tasks
    pub fn active(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Number of tasks submitted and not finished, including submitters
    /// still waiting for a permit
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Number of tasks that have been started so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Whether some task has already returned an error
    pub fn has_failed(&self) -> bool {
        self.shared.first_error.lock().is_some()
    }

    /// The child token of a group built with [`TaskGroup::with_cancellation`]
    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.shared.cancel.as_ref().map(|cancel| &cancel.token)
    }

    /// Whether the group's token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

impl<E> fmt::Debug for TaskGroup<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("capacity", &self.capacity)
            .field("active", &self.active())
            .field("pending", &self.pending())
            .field("submitted", &self.submitted())
            .field("cancellable", &self.shared.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;
    use tokio::time::sleep;
    use utilz_core::config::MAX_GROUP_CAPACITY;

    #[test]
    fn test_max_capacity_matches_semaphore() {
        assert_eq!(MAX_GROUP_CAPACITY, Semaphore::MAX_PERMITS);
    }

    #[test]
    fn test_rejects_invalid_capacity() {
        let err = TaskGroup::<Error>::new(0).unwrap_err();
        assert!(matches!(err, Error::InvalidCapacity { capacity: 0, .. }));

        let err = TaskGroup::<Error>::new(Semaphore::MAX_PERMITS + 1).unwrap_err();
        assert!(matches!(err, Error::InvalidCapacity { .. }));

        let parent = CancellationToken::new();
        assert!(TaskGroup::<Error>::with_cancellation(0, &parent).is_err());
    }

    #[test]
    fn test_new_group_is_idle() {
        let group = TaskGroup::<Error>::new(3).unwrap();
        assert_eq!(group.capacity(), 3);
        assert_eq!(group.active(), 0);
        assert_eq!(group.pending(), 0);
        assert_eq!(group.submitted(), 0);
        assert!(!group.has_failed());
        assert!(group.cancellation_token().is_none());
        assert!(!group.is_cancelled());

        let debug = format!("{group:?}");
        assert!(debug.contains("capacity: 3"));
        assert!(debug.contains("cancellable: false"));
    }

    #[test]
    fn test_from_config_uses_capacity() {
        let config = GroupConfig::new(5).with_name("uploads");
        let group = TaskGroup::<Error>::from_config(&config).unwrap();
        assert_eq!(group.capacity(), 5);

        let config = GroupConfig::new(0);
        assert!(TaskGroup::<Error>::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_empty_group_waits_immediately() {
        let group = TaskGroup::<Error>::new(1).unwrap();
        assert!(group.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_try_go_refuses_when_full() {
        let group = TaskGroup::<Error>::new(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        assert!(group.try_go(async move {
            let _ = release_rx.await;
            Ok(())
        }));
        assert_eq!(group.active(), 1);

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        assert!(!group.try_go(async move {
            ran_clone.store(true, Ordering::SeqCst);
            Ok(())
        }));

        release_tx.send(()).unwrap();
        // Yield until the first task hands its permit back
        while group.active() > 0 {
            sleep(Duration::from_millis(1)).await;
        }

        assert!(group.try_go(async { Ok(()) }));
        group.wait().await.unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pending_counts_running_tasks() {
        let group = TaskGroup::<Error>::new(2).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        group
            .go(async move {
                let _ = release_rx.await;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(group.pending(), 1);
        assert_eq!(group.submitted(), 1);

        release_tx.send(()).unwrap();
        group.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_cancels_child_token() {
        let parent = CancellationToken::new();
        let (group, child) = TaskGroup::with_cancellation(2, &parent).unwrap();

        group
            .go(async { Err(Error::configuration("boom")) })
            .await
            .unwrap();

        child.cancelled().await;
        assert!(group.is_cancelled());
        assert!(group.has_failed());
        assert!(!parent.is_cancelled());

        let err = group.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "configuration error: boom");
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = CancellationToken::new();
        let (group, child) = TaskGroup::<Error>::with_cancellation(1, &parent).unwrap();

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(group.is_cancelled());
        group.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_go_cancellable_refuses_after_cancel() {
        let parent = CancellationToken::new();
        let (group, child) = TaskGroup::<Error>::with_cancellation(2, &parent).unwrap();
        child.cancel();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        let err = group
            .go_cancellable(async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(group.pending(), 0);
        group.wait().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_go_cancellable_without_token_runs_task() {
        let group = TaskGroup::<Error>::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);

        group
            .go_cancellable(async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        group.wait().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic]
    fn test_try_go_outside_runtime_panics() {
        let group = TaskGroup::<Error>::new(1).unwrap();
        group.try_go(async { Ok(()) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_returns_result_in_time() {
        let group = TaskGroup::<Error>::new(2).unwrap();
        group
            .go(async {
                sleep(Duration::from_millis(20)).await;
                Err(Error::configuration("late but in time"))
            })
            .await
            .unwrap();

        let outcome = group.wait_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            outcome.unwrap_err().to_string(),
            "configuration error: late but in time"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_cancels_on_deadline() {
        let parent = CancellationToken::new();
        let (group, child) = TaskGroup::<Error>::with_cancellation(1, &parent).unwrap();
        group
            .go(async {
                sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
            .unwrap();

        let err = group
            .wait_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    async fn explode() -> Result<()> {
        panic!("kaboom")
    }

    #[tokio::test]
    #[should_panic(expected = "kaboom")]
    async fn test_wait_resumes_task_panic() {
        let group = TaskGroup::<Error>::new(2).unwrap();
        group.go(explode()).await.unwrap();
        group.go(async { Ok(()) }).await.unwrap();

        let _ = group.wait().await;
    }
}
