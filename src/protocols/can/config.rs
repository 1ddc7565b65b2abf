//! CAN interface configuration types

use crate::core::error::{HwError, Result};

/// Receive buffer size applied by the receive tool (512 KiB).
pub const MAX_RECEPTION_BUFFER: u32 = 512 * 1024;

/// CAN interface configuration.
///
/// Immutable once applied to an interface.
#[derive(Debug, Clone, PartialEq)]
pub struct CanInterfaceConfig {
    /// Arbitration-phase bitrate (bits per second).
    pub bitrate: u32,

    /// CAN-FD data-phase bitrate (bits per second).
    pub data_bitrate: Option<u32>,

    /// Arbitration-phase sample point as a fraction of the bit time (0.875).
    pub sample_point: Option<f32>,

    /// Data-phase sample point as a fraction of the bit time.
    pub data_sample_point: Option<f32>,

    /// Enable CAN-FD.
    pub fd_enabled: bool,

    /// Socket receive buffer size in bytes. `None` keeps the kernel default.
    pub rx_buffer_length: Option<u32>,
}

impl Default for CanInterfaceConfig {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            data_bitrate: None,
            sample_point: None,
            data_sample_point: None,
            fd_enabled: false,
            rx_buffer_length: None,
        }
    }
}

impl CanInterfaceConfig {
    /// Create a configuration for `bitrate`.
    pub fn new(bitrate: u32) -> Self {
        Self {
            bitrate,
            ..Default::default()
        }
    }

    /// Set the arbitration sample point.
    pub fn with_sample_point(mut self, sample_point: f32) -> Self {
        self.sample_point = Some(sample_point);
        self
    }

    /// Set the data-phase bitrate.
    pub fn with_data_bitrate(mut self, data_bitrate: u32) -> Self {
        self.data_bitrate = Some(data_bitrate);
        self
    }

    /// Set the data-phase sample point.
    pub fn with_data_sample_point(mut self, sample_point: f32) -> Self {
        self.data_sample_point = Some(sample_point);
        self
    }

    /// Enable or disable CAN-FD.
    pub fn with_fd(mut self, enabled: bool) -> Self {
        self.fd_enabled = enabled;
        self
    }

    /// Set the socket receive buffer size.
    pub fn with_rx_buffer_length(mut self, len: u32) -> Self {
        self.rx_buffer_length = Some(len);
        self
    }

    /// Check the configuration before it is applied.
    pub fn validate(&self) -> Result<()> {
        if self.bitrate == 0 {
            return Err(HwError::Config("bitrate must be greater than 0".into()));
        }

        if self.data_bitrate == Some(0) {
            return Err(HwError::Config(
                "data bitrate must be greater than 0".into(),
            ));
        }

        if !self.fd_enabled && (self.data_bitrate.is_some() || self.data_sample_point.is_some()) {
            return Err(HwError::Config(
                "data bitrate and data sample point require CAN FD".into(),
            ));
        }

        for (name, sp) in [
            ("sample point", self.sample_point),
            ("data sample point", self.data_sample_point),
        ] {
            if let Some(sp) = sp {
                if !(sp > 0.0 && sp < 1.0) {
                    return Err(HwError::Config(format!(
                        "{} must be between 0 and 1, got {}",
                        name, sp
                    )));
                }
            }
        }

        Ok(())
    }

    /// Arbitration sample point in tenths of a percent, as netlink expects.
    pub fn sample_point_tenths(&self) -> Option<u32> {
        self.sample_point.map(to_tenths)
    }

    /// Data-phase sample point in tenths of a percent.
    pub fn data_sample_point_tenths(&self) -> Option<u32> {
        self.data_sample_point.map(to_tenths)
    }

    /// Largest payload a frame on this interface may carry.
    pub fn max_payload(&self) -> usize {
        if self.fd_enabled {
            super::frame::CANFD_MAX_DLEN
        } else {
            super::frame::CAN_MAX_DLEN
        }
    }
}

fn to_tenths(sp: f32) -> u32 {
    (sp * 1000.0).round() as u32
}
