//! Peripheral lifecycle management.
//!
//! Every tool follows the same pattern: request one handle, run a loop
//! while it is held, and release it on every exit path. [`Lifecycle`] owns
//! the handle and enforces the state machine
//!
//! ```text
//! Uninitialized -> Acquired -> (Running)* -> Released
//! ```
//!
//! Release happens at most once, either through an explicit
//! [`Lifecycle::cleanup`] or when the lifecycle is dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut lifecycle = Lifecycle::new();
//! let handle = lifecycle.request(|| can::configure(&SocketCanDriver, "can0", config))?;
//! // ... use handle ...
//! lifecycle.cleanup();
//! ```

use std::fmt;

use super::error::{HwError, Result};
use super::shutdown::TerminationSignal;

/// A hardware resource that can be requested and released.
pub trait Peripheral {
    /// Human readable description used in logs.
    fn describe(&self) -> String;

    /// Stop background work attached to the handle (interrupt waiters,
    /// receive pollers). Called before [`release`](Self::release).
    fn stop(&mut self) {}

    /// Release the underlying resource.
    fn release(&mut self) -> Result<()>;
}

/// Lifecycle state of a peripheral handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// No handle requested yet.
    #[default]
    Uninitialized,
    /// Handle requested and configured.
    Acquired,
    /// Handle in use by a transfer or sampling loop.
    Running,
    /// Handle released. Terminal.
    Released,
}

impl LifecycleState {
    /// Whether a handle is currently held.
    #[inline]
    pub const fn holds_handle(&self) -> bool {
        matches!(self, Self::Acquired | Self::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Acquired => "Acquired",
            Self::Running => "Running",
            Self::Released => "Released",
        };
        write!(f, "{}", s)
    }
}

/// Owner of a single peripheral handle.
pub struct Lifecycle<P: Peripheral> {
    state: LifecycleState,
    handle: Option<P>,
}

impl<P: Peripheral> Default for Lifecycle<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Peripheral> Lifecycle<P> {
    /// Create an empty lifecycle.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            handle: None,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Request a handle using `open`.
    ///
    /// On failure nothing is held and the state is unchanged, so a later
    /// [`cleanup`](Self::cleanup) is a no-op.
    pub fn request<F>(&mut self, open: F) -> Result<&mut P>
    where
        F: FnOnce() -> Result<P>,
    {
        if self.state.holds_handle() {
            return Err(HwError::invalid("a peripheral handle is already held"));
        }

        let handle = open()?;
        tracing::info!("Acquired {}", handle.describe());

        self.state = LifecycleState::Acquired;
        Ok(self.handle.insert(handle))
    }

    /// Async variant of [`request`](Self::request).
    pub async fn request_async<F, Fut>(&mut self, open: F) -> Result<&mut P>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<P>>,
    {
        if self.state.holds_handle() {
            return Err(HwError::invalid("a peripheral handle is already held"));
        }

        let handle = open().await?;
        tracing::info!("Acquired {}", handle.describe());

        self.state = LifecycleState::Acquired;
        Ok(self.handle.insert(handle))
    }

    /// Borrow the held handle.
    pub fn handle(&self) -> Result<&P> {
        self.handle.as_ref().ok_or(HwError::NotAcquired)
    }

    /// Mutably borrow the held handle.
    pub fn handle_mut(&mut self) -> Result<&mut P> {
        self.handle.as_mut().ok_or(HwError::NotAcquired)
    }

    /// Enter the running state.
    pub fn mark_running(&mut self) -> Result<&mut P> {
        let handle = self.handle.as_mut().ok_or(HwError::NotAcquired)?;
        self.state = LifecycleState::Running;
        Ok(handle)
    }

    /// Stop background work and release the handle.
    ///
    /// Idempotent: returns `true` only on the call that actually released
    /// a handle. Release errors are logged, not returned, since cleanup runs
    /// on exit paths that are already reporting their own outcome.
    pub fn cleanup(&mut self) -> bool {
        let Some(mut handle) = self.handle.take() else {
            return false;
        };

        let description = handle.describe();
        handle.stop();
        if let Err(e) = handle.release() {
            tracing::warn!("Failed to release {}: {}", description, e);
        }
        drop(handle);

        self.state = LifecycleState::Released;
        tracing::info!("Released {}", description);
        true
    }
}

impl<P: Peripheral> Drop for Lifecycle<P> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// How a tool's main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Loop finished its work.
    Completed,
    /// Loop stopped because of a termination signal.
    Interrupted(TerminationSignal),
}

impl RunOutcome {
    /// Process exit status for this outcome. Signal-triggered termination
    /// is reported as failure.
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Counters {
        stopped: AtomicUsize,
        released: AtomicUsize,
    }

    #[derive(Debug)]
    struct FakePeripheral {
        counters: Arc<Counters>,
        fail_release: bool,
    }

    impl Peripheral for FakePeripheral {
        fn describe(&self) -> String {
            "fake peripheral".to_string()
        }

        fn stop(&mut self) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&mut self) -> Result<()> {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                return Err(HwError::Peripheral("busy".into()));
            }
            Ok(())
        }
    }

    fn fake(counters: &Arc<Counters>) -> FakePeripheral {
        FakePeripheral {
            counters: Arc::clone(counters),
            fail_release: false,
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let counters = Arc::new(Counters::default());
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        lifecycle.request(|| Ok(fake(&counters))).unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Acquired);

        lifecycle.mark_running().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        assert!(lifecycle.cleanup());
        assert_eq!(lifecycle.state(), LifecycleState::Released);
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let counters = Arc::new(Counters::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.request(|| Ok(fake(&counters))).unwrap();

        assert!(lifecycle.cleanup());
        assert!(!lifecycle.cleanup());
        drop(lifecycle);

        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_without_handle_is_noop() {
        let mut lifecycle: Lifecycle<FakePeripheral> = Lifecycle::new();

        assert!(!lifecycle.cleanup());
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert!(matches!(lifecycle.handle(), Err(HwError::NotAcquired)));
    }

    #[test]
    fn test_failed_request_holds_nothing() {
        let mut lifecycle: Lifecycle<FakePeripheral> = Lifecycle::new();

        let err = lifecycle
            .request(|| Err(HwError::acquire("CAN interface can7", "No such device")))
            .unwrap_err();

        assert!(matches!(err, HwError::Acquire { .. }));
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert!(!lifecycle.cleanup());
    }

    #[test]
    fn test_second_request_rejected_while_held() {
        let counters = Arc::new(Counters::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.request(|| Ok(fake(&counters))).unwrap();

        let err = lifecycle.request(|| Ok(fake(&counters))).unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_release_error_still_releases_once() {
        let counters = Arc::new(Counters::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle
            .request(|| {
                Ok(FakePeripheral {
                    counters: Arc::clone(&counters),
                    fail_release: true,
                })
            })
            .unwrap();

        assert!(lifecycle.cleanup());
        assert!(!lifecycle.cleanup());
        assert_eq!(lifecycle.state(), LifecycleState::Released);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_handle() {
        let counters = Arc::new(Counters::default());
        {
            let mut lifecycle = Lifecycle::new();
            lifecycle.request(|| Ok(fake(&counters))).unwrap();
        }
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_async() {
        let counters = Arc::new(Counters::default());
        let mut lifecycle = Lifecycle::new();

        let c = Arc::clone(&counters);
        lifecycle
            .request_async(|| async move { Ok(fake(&c)) })
            .await
            .unwrap();

        assert_eq!(lifecycle.state(), LifecycleState::Acquired);
    }

    #[test]
    fn test_run_outcome() {
        assert!(RunOutcome::Completed.is_success());
        assert!(!RunOutcome::Interrupted(TerminationSignal::Interrupt).is_success());
    }
}
