//! # hwkit
//!
//! Peripheral toolkit for embedded Linux.
//!
//! ## Features
//!
//! - **Lifecycle management**: request one handle, stop on SIGHUP/SIGINT/SIGTERM,
//!   release exactly once on every exit path
//! - **CAN engine**: SocketCAN interface setup, frame generation, transmit with
//!   retry on a busy queue, receive filters
//! - **GPIO**: button/LED lines over the GPIO character device
//! - **Watchdog**: timeout setup and refresh of a Linux watchdog device
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hwkit::prelude::*;
//! use hwkit::protocols::can::{self, CanInterfaceConfig, SendJob, SocketCanDriver};
//!
//! let shutdown = Shutdown::new();
//! register_termination_handlers(&shutdown)?;
//!
//! let mut lifecycle = Lifecycle::new();
//! let handle = lifecycle.request(|| {
//!     can::configure(&SocketCanDriver, "can0", CanInterfaceConfig::new(500_000))
//! })?;
//! can::run_send_job(handle, &SendJob::default(), &shutdown, &mut rand::thread_rng()).await?;
//! lifecycle.cleanup();
//! ```

pub mod core;
pub mod protocols;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        register_termination_handlers, HwError, Identifier, Lifecycle, LifecycleState,
        Peripheral, Result, RunOutcome, Settings, Shutdown, TerminationSignal,
    };
}

// Re-export core types at crate root for convenience
pub use crate::core::error::{HwError, Result, TxError};
pub use crate::core::lifecycle::{Lifecycle, Peripheral};
pub use crate::core::shutdown::Shutdown;
