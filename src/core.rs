//! Core abstractions shared by every tool.
//!
//! This module provides error handling, settings, identifier resolution,
//! signal-driven shutdown and the peripheral lifecycle.

pub mod config;
pub mod error;
pub mod identifier;
pub mod lifecycle;
pub mod logging;
pub mod shutdown;

pub use config::{AliasTable, CanDefaults, Settings};
pub use error::{HwError, Result, TxError};
pub use identifier::Identifier;
pub use lifecycle::{Lifecycle, LifecycleState, Peripheral, RunOutcome};
pub use shutdown::{register_termination_handlers, Shutdown, TerminationSignal};
