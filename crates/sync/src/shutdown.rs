//! Process shutdown driven by SIGINT and SIGTERM
//!
//! [`Shutdown`] is a shared "exiting" flag backed by a [`CancellationToken`].
//! Pass [`Shutdown::token`] as the parent of a
//! [`TaskGroup::with_cancellation`](crate::TaskGroup::with_cancellation) and
//! the group's token fires as soon as the process is asked to stop.
//!
//! On non-Unix targets only Ctrl+C is observed.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utilz_core::{Error, Result};

/// A signal asking the process to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C (SIGINT)
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownSignal {
    /// Conventional signal name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }

    /// Signal number on Unix
    #[must_use]
    pub const fn number(&self) -> i32 {
        match self {
            Self::Interrupt => 2,
            Self::Terminate => 15,
        }
    }

    /// Exit status used when this signal forces the process down
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        128 + self.number()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Completed,
    Forced(ShutdownSignal),
}

/// Shared flag telling every part of the process that it is exiting
///
/// Clones observe the same flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing token as the flag
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// The token that is cancelled when the process starts exiting
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_exiting(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Mark the process as exiting
    pub fn set_exiting(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Resolve once the process is exiting
    pub async fn exiting(&self) {
        self.token.cancelled().await;
    }

    /// Wait for the first SIGINT or SIGTERM, then mark the process as exiting
    pub async fn wait_for_signal(&self) -> Result<ShutdownSignal> {
        let mut signals = system_signals()?;
        self.next_signal(&mut signals).await
    }

    /// Run `on_first_signal` after the first SIGINT or SIGTERM
    ///
    /// Returns once the callback has finished. A second signal arriving while
    /// the callback still runs exits the process immediately with
    /// [`ShutdownSignal::exit_code`].
    pub async fn hard_wait<F, Fut>(&self, on_first_signal: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        match self
            .run_until_forced(system_signals()?, on_first_signal)
            .await?
        {
            Outcome::Completed => Ok(()),
            Outcome::Forced(signal) => {
                warn!(signal = signal.name(), "second signal received, forcing exit");
                std::process::exit(signal.exit_code())
            }
        }
    }

    async fn next_signal<S>(&self, signals: &mut S) -> Result<ShutdownSignal>
    where
        S: Stream<Item = ShutdownSignal> + Unpin,
    {
        let signal = signals
            .next()
            .await
            .ok_or_else(|| Error::signal("signal stream ended before any signal arrived"))?;

        info!(signal = signal.name(), "shutdown signal received");
        self.set_exiting();
        Ok(signal)
    }

    async fn run_until_forced<S, F, Fut>(
        &self,
        mut signals: S,
        on_first_signal: F,
    ) -> Result<Outcome>
    where
        S: Stream<Item = ShutdownSignal> + Unpin,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.next_signal(&mut signals).await?;

        let callback = on_first_signal();
        tokio::pin!(callback);

        tokio::select! {
            biased;
            () = &mut callback => {
                debug!("shutdown callback finished");
                Ok(Outcome::Completed)
            }
            Some(signal) = signals.next() => Ok(Outcome::Forced(signal)),
        }
    }
}

/// Call `handler` for every SIGINT or SIGTERM until it returns `false`
pub async fn notify<F>(handler: F) -> Result<()>
where
    F: FnMut(ShutdownSignal) -> bool,
{
    notify_from(system_signals()?, handler).await
}

async fn notify_from<S, F>(mut signals: S, mut handler: F) -> Result<()>
where
    S: Stream<Item = ShutdownSignal> + Unpin,
    F: FnMut(ShutdownSignal) -> bool,
{
    while let Some(signal) = signals.next().await {
        debug!(signal = signal.name(), "signal received");
        if !handler(signal) {
            break;
        }
    }
    Ok(())
}

fn system_signals() -> Result<BoxStream<'static, ShutdownSignal>> {
    let listener = SignalListener::new()?;
    Ok(stream::unfold(listener, |mut listener| async move {
        listener.recv().await.map(|signal| (signal, listener))
    })
    .boxed())
}

#[cfg(unix)]
struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| Error::signal(format!("SIGINT: {e}")))?;
        let terminate = signal(SignalKind::terminate())
            .map_err(|e| Error::signal(format!("SIGTERM: {e}")))?;
        Ok(Self {
            interrupt,
            terminate,
        })
    }

    async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| ShutdownSignal::Interrupt),
            received = self.terminate.recv() => received.map(|()| ShutdownSignal::Terminate),
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<ShutdownSignal> {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(ShutdownSignal::Interrupt),
            Err(e) => {
                warn!(error = %e, "unable to listen for Ctrl+C");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskGroup;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_exit_codes_follow_shell_convention() {
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), 130);
        assert_eq!(ShutdownSignal::Terminate.exit_code(), 143);
        assert_eq!(ShutdownSignal::Terminate.name(), "SIGTERM");
    }

    #[test]
    fn test_exit_flag_is_shared_between_clones() {
        let shutdown = Shutdown::new();
        let observer = shutdown.clone();
        assert!(!observer.is_exiting());

        shutdown.set_exiting();
        shutdown.set_exiting();
        assert!(observer.is_exiting());
        assert!(observer.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_first_signal_marks_exiting() {
        let shutdown = Shutdown::new();
        let mut signals = stream::iter([ShutdownSignal::Terminate]);

        let signal = shutdown.next_signal(&mut signals).await.unwrap();
        assert_eq!(signal, ShutdownSignal::Terminate);
        assert!(shutdown.is_exiting());
        shutdown.exiting().await;
    }

    #[tokio::test]
    async fn test_ended_signal_stream_is_an_error() {
        let shutdown = Shutdown::new();
        let mut signals = stream::empty::<ShutdownSignal>();

        let err = shutdown.next_signal(&mut signals).await.unwrap_err();
        assert!(matches!(err, Error::Signal { .. }));
        assert!(!shutdown.is_exiting());
    }

    #[tokio::test]
    async fn test_hard_wait_runs_callback_after_first_signal() {
        let shutdown = Shutdown::new();
        let signals = stream::iter([ShutdownSignal::Interrupt]).chain(stream::pending());
        let saw_exiting = Arc::new(AtomicBool::new(false));

        let observer = shutdown.clone();
        let saw = Arc::clone(&saw_exiting);
        let outcome = shutdown
            .run_until_forced(signals, || async move {
                tokio::task::yield_now().await;
                saw.store(observer.is_exiting(), Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert!(saw_exiting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_second_signal_during_callback_forces_exit() {
        let shutdown = Shutdown::new();
        let signals = stream::iter([ShutdownSignal::Interrupt, ShutdownSignal::Terminate]);

        let outcome = shutdown
            .run_until_forced(signals, futures::future::pending::<()>)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Forced(ShutdownSignal::Terminate));
    }

    #[tokio::test]
    async fn test_notify_stops_when_handler_declines() {
        let signals = stream::iter([
            ShutdownSignal::Interrupt,
            ShutdownSignal::Interrupt,
            ShutdownSignal::Terminate,
            ShutdownSignal::Interrupt,
        ]);
        let seen = AtomicUsize::new(0);

        notify_from(signals, |signal| {
            seen.fetch_add(1, Ordering::SeqCst);
            signal != ShutdownSignal::Terminate
        })
        .await
        .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_signal_cancels_linked_task_group() {
        let shutdown = Shutdown::new();
        let (group, child) =
            TaskGroup::<Error>::with_cancellation(1, &shutdown.token()).unwrap();

        let mut signals = stream::iter([ShutdownSignal::Interrupt]);
        shutdown.next_signal(&mut signals).await.unwrap();

        assert!(child.is_cancelled());
        let err = group.go_cancellable(async { Ok(()) }).await.unwrap_err();
        assert!(err.is_cancelled());
        group.wait().await.unwrap();
    }
}
