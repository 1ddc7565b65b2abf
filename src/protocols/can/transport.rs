//! Seams between the CAN engine and the kernel.
//!
//! [`CanDriver`] resolves and configures an interface and opens a
//! [`CanTransport`] on it. The SocketCAN implementation lives in
//! [`super::socket`]; tests use a scripted mock.

use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::error::Result;

use super::config::CanInterfaceConfig;
use super::filter::CanFilter;
use super::frame::CanFrame;

/// Error returned by a single transmit call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transmit queue full; the frame may be retried later.
    #[error("transmit queue busy, retry later")]
    Busy,

    /// Any other failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify an I/O error. `ENOBUFS` and `EAGAIN` mean the queue is
    /// full; everything else is fatal.
    pub fn from_io(err: io::Error) -> Self {
        let busy = err.kind() == io::ErrorKind::WouldBlock
            || matches!(err.raw_os_error(), Some(code) if code == libc::ENOBUFS || code == libc::EAGAIN);

        if busy {
            Self::Busy
        } else {
            Self::Io(err)
        }
    }

    /// Whether the error is worth retrying.
    #[inline]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// A frame taken off the bus.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// The frame.
    pub frame: CanFrame,
    /// Reception time.
    pub timestamp: DateTime<Utc>,
}

impl ReceivedFrame {
    /// Stamp `frame` with the current time.
    pub fn now(frame: CanFrame) -> Self {
        Self {
            frame,
            timestamp: Utc::now(),
        }
    }
}

/// An open CAN socket.
pub trait CanTransport: Send + 'static {
    /// Queue one frame for transmission.
    fn transmit(&mut self, frame: &CanFrame) -> std::result::Result<(), TransportError>;

    /// Replace the receive filters.
    fn set_filters(&mut self, filters: &[CanFilter]) -> io::Result<()>;

    /// Read one frame without blocking. `Ok(None)` when nothing is pending.
    fn try_receive(&mut self) -> io::Result<Option<ReceivedFrame>>;
}

/// Resolves, configures and opens CAN interfaces.
pub trait CanDriver {
    /// Transport produced by [`open`](Self::open).
    type Transport: CanTransport;

    /// Check that `iface` exists. Fails with [`HwError::Acquire`].
    ///
    /// [`HwError::Acquire`]: crate::core::error::HwError::Acquire
    fn probe(&self, iface: &str) -> Result<()>;

    /// Apply `config` to `iface` and open a socket on it. Fails with
    /// [`HwError::Config`] when the configuration is rejected.
    ///
    /// [`HwError::Config`]: crate::core::error::HwError::Config
    fn open(&self, iface: &str, config: &CanInterfaceConfig) -> Result<Self::Transport>;
}
