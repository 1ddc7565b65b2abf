//! CAN transmit and receive engine.
//!
//! Built on SocketCAN. This module supports:
//! - Interface configuration (bitrate, sample points, CAN-FD, receive buffer)
//! - Frame generation with random or fixed ids and lengths
//! - Transmission with retry while the transmit queue is busy
//! - Receive filters with an accept-all default
//! - Background reception over a bounded channel
//!
//! ## Dependencies
//!
//! This module uses:
//! - [`socketcan`](https://crates.io/crates/socketcan) for CAN bus communication (Linux only)
//!
//! ## Example
//!
//! ```rust,ignore
//! use hwkit::protocols::can::{self, CanInterfaceConfig, RetryPolicy, SocketCanDriver};
//!
//! let mut handle = can::configure(&SocketCanDriver, "can0", CanInterfaceConfig::new(500_000))?;
//! handle.register_filters(&can::parse_filters("023:fff,006:00f")?).await?;
//!
//! let frame = can::CanFrame::from_parts(0x123, false, false, &[1, 2, 3], false)?;
//! handle.transmit_with_retry(&frame, &RetryPolicy::default()).await?;
//! ```

mod config;
mod filter;
mod frame;
mod handle;
mod receive;
mod socket;
mod transmit;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{CanInterfaceConfig, MAX_RECEPTION_BUFFER};
pub use filter::{effective_filters, parse_filters, CanFilter};
pub use frame::{
    CanFrame, FrameFlags, CANFD_MAX_DLEN, CAN_EFF_FLAG, CAN_EFF_MASK, CAN_MAX_DLEN, CAN_RTR_FLAG,
    CAN_SFF_MASK,
};
pub use handle::{configure, CanHandle};
pub use receive::CanReceiver;
pub use socket::{SocketCanDriver, SocketCanTransport};
pub use transmit::{
    run_send_job, transmit_with_retry, RetryPolicy, SendJob, SendSummary, TxReport,
    TX_RETRIES, TX_RETRY_BACKOFF,
};
pub use transport::{CanDriver, CanTransport, ReceivedFrame, TransportError};
