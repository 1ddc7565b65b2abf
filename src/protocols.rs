//! Peripheral implementations.
//!
//! Each module provides a handle type implementing
//! [`Peripheral`](crate::core::lifecycle::Peripheral) so it can be owned by a
//! [`Lifecycle`](crate::core::lifecycle::Lifecycle).

pub mod can;
pub mod gpio;
pub mod watchdog;
