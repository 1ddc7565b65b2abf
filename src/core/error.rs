//! Error types for hwkit.
//!
//! Every fallible operation in the crate returns [`Result`], whose error is
//! [`HwError`]. The variants follow the order in which a tool can fail:
//! argument validation, resource acquisition, configuration, then runtime
//! transfer errors.

use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HwError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum HwError {
    /// Invalid command-line argument or parameter. Raised before any
    /// resource is acquired.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested resource could not be resolved or opened.
    #[error("Failed to acquire {resource}: {reason}")]
    Acquire { resource: String, reason: String },

    /// The resource rejected its configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Receive filters could not be parsed or installed.
    #[error("Filter error: {0}")]
    Filter(String),

    /// Frame transmission failed.
    #[error(transparent)]
    Transmit(#[from] TxError),

    /// Runtime error reported by a peripheral after acquisition.
    #[error("Peripheral error: {0}")]
    Peripheral(String),

    /// Operation requires an acquired handle.
    #[error("No peripheral handle acquired")]
    NotAcquired,

    /// Settings file could not be read or parsed.
    #[error("Settings error: {0}")]
    Settings(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HwError {
    /// Create an invalid argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an acquisition error for `resource`.
    pub fn acquire(resource: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Acquire {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error happened before any resource was touched.
    #[inline]
    pub const fn is_argument_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::Settings(_))
    }
}

/// Failure of a retried frame transmission.
///
/// `Exhausted` and `Fatal` are kept apart so the caller can report
/// "failed after N tries" and "failed with error E" differently.
#[derive(Debug, Error)]
pub enum TxError {
    /// Every attempt reported that the transmit queue was busy.
    #[error("Failed to send CAN frame after {attempts} tries")]
    Exhausted { attempts: u32 },

    /// The transport reported a non-recoverable error.
    #[error("Failed to send CAN frame ({source})")]
    Fatal {
        /// Attempt on which the error occurred (1-based).
        attempt: u32,
        #[source]
        source: io::Error,
    },
}

impl TxError {
    /// Number of transport calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts } => *attempts,
            Self::Fatal { attempt, .. } => *attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HwError::acquire("CAN interface can9", "No such device");
        assert_eq!(
            err.to_string(),
            "Failed to acquire CAN interface can9: No such device"
        );

        let err: HwError = TxError::Exhausted { attempts: 10 }.into();
        assert_eq!(err.to_string(), "Failed to send CAN frame after 10 tries");
    }

    #[test]
    fn test_argument_errors_are_flagged() {
        assert!(HwError::invalid("bad bitrate").is_argument_error());
        assert!(!HwError::Config("rejected".into()).is_argument_error());
    }

    #[test]
    fn test_tx_error_attempts() {
        let fatal = TxError::Fatal {
            attempt: 1,
            source: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert_eq!(fatal.attempts(), 1);
        assert_eq!(TxError::Exhausted { attempts: 4 }.attempts(), 4);
    }
}
