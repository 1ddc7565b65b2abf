//! Signal-driven shutdown.
//!
//! Termination signals never run cleanup themselves. The handler task only
//! records the first signal in a [`Shutdown`] value; the main loop observes
//! it and returns through the same path as a normal exit, where the
//! [`Lifecycle`](super::lifecycle::Lifecycle) releases the handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::Result;

/// Signal that requested termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    /// SIGHUP.
    Hangup,
    /// SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        };
        write!(f, "{}", s)
    }
}

/// Process-scoped shutdown request.
///
/// Cheap to clone; all clones observe the same state. Only the first
/// [`trigger`](Self::trigger) is recorded.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<TerminationSignal>>>,
    rx: watch::Receiver<Option<TerminationSignal>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create a shutdown value in the not-triggered state.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request shutdown. Returns `false` if it was already requested.
    pub fn trigger(&self, sig: TerminationSignal) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(sig);
            true
        })
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The signal that requested shutdown, if any.
    pub fn signal(&self) -> Option<TerminationSignal> {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&self) -> TerminationSignal {
        let mut rx = self.rx.clone();
        loop {
            if let Some(sig) = *rx.borrow_and_update() {
                return sig;
            }
            if rx.changed().await.is_err() {
                // Sender is held by `self`, so this only happens while
                // tearing down; treat it as a termination request.
                return TerminationSignal::Terminate;
            }
        }
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }

        tokio::select! {
            _ = self.wait() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Install handlers for SIGHUP, SIGINT and SIGTERM.
///
/// Each signal triggers `shutdown`. Repeated signals are absorbed, so a
/// signal arriving during cleanup cannot start a second release.
pub fn register_termination_handlers(shutdown: &Shutdown) -> Result<JoinHandle<()>> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let shutdown = shutdown.clone();

    let handle = tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                _ = hangup.recv() => TerminationSignal::Hangup,
                _ = interrupt.recv() => TerminationSignal::Interrupt,
                _ = terminate.recv() => TerminationSignal::Terminate,
            };

            if shutdown.trigger(sig) {
                tracing::info!("Received {}, shutting down", sig);
            } else {
                tracing::debug!("Received {} while already shutting down", sig);
            }
        }
    });

    tracing::debug!("Termination signal handlers registered");
    Ok(handle)
}
