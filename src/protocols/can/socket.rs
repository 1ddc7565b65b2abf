//! SocketCAN backend.
//!
//! Interface setup goes through netlink ([`socketcan::CanInterface`]),
//! frames through a raw CAN-FD capable socket, which also carries classic
//! frames.

use std::io;

use socketcan::{
    CanAnyFrame, CanCtrlMode, CanFdSocket, CanInterface, EmbeddedFrame, ExtendedId, Id, Socket,
    SocketOptions, StandardId,
};

use crate::core::error::{HwError, Result};

use super::config::CanInterfaceConfig;
use super::filter::CanFilter;
use super::frame::CanFrame;
use super::transport::{CanDriver, CanTransport, ReceivedFrame, TransportError};

/// Driver for kernel CAN interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketCanDriver;

impl SocketCanDriver {
    fn apply_link_config(&self, iface: &str, config: &CanInterfaceConfig) -> Result<()> {
        let link = CanInterface::open(iface)
            .map_err(|e| HwError::acquire(format!("CAN interface {}", iface), e))?;

        let reject = |what: &str, e: &dyn std::fmt::Display| {
            HwError::Config(format!("{}: failed to set {}: {}", iface, what, e))
        };

        link.bring_down().map_err(|e| reject("link down", &e))?;

        link.set_bitrate(config.bitrate, config.sample_point_tenths())
            .map_err(|e| reject("bitrate", &e))?;

        link.set_ctrlmode(CanCtrlMode::Fd, config.fd_enabled)
            .map_err(|e| reject("CAN FD mode", &e))?;

        if config.fd_enabled {
            if let Some(dbitrate) = config.data_bitrate {
                link.set_data_bitrate(dbitrate, config.data_sample_point_tenths())
                    .map_err(|e| reject("data bitrate", &e))?;
            }
        }

        link.bring_up().map_err(|e| reject("link up", &e))?;

        tracing::debug!(
            "{}: bitrate={} sample_point={:?} fd={} data_bitrate={:?}",
            iface,
            config.bitrate,
            config.sample_point,
            config.fd_enabled,
            config.data_bitrate
        );
        Ok(())
    }
}

impl CanDriver for SocketCanDriver {
    type Transport = SocketCanTransport;

    fn probe(&self, iface: &str) -> Result<()> {
        CanInterface::open(iface)
            .map(|_| ())
            .map_err(|e| HwError::acquire(format!("CAN interface {}", iface), e))
    }

    fn open(&self, iface: &str, config: &CanInterfaceConfig) -> Result<SocketCanTransport> {
        self.apply_link_config(iface, config)?;

        let socket = CanFdSocket::open(iface)
            .map_err(|e| HwError::acquire(format!("CAN socket on {}", iface), e))?;

        if let Some(len) = config.rx_buffer_length {
            let len = libc::c_int::try_from(len)
                .map_err(|_| HwError::Config(format!("receive buffer length {} too large", len)))?;
            socket
                .set_socket_option(libc::SOL_SOCKET, libc::SO_RCVBUF, &len)
                .map_err(|e| {
                    HwError::Config(format!("{}: failed to set receive buffer: {}", iface, e))
                })?;
        }

        socket.set_nonblocking(true)?;

        Ok(SocketCanTransport {
            iface: iface.to_string(),
            socket,
        })
    }
}

/// Raw CAN socket bound to one interface.
pub struct SocketCanTransport {
    iface: String,
    socket: CanFdSocket,
}

impl SocketCanTransport {
    /// Interface the socket is bound to.
    pub fn interface(&self) -> &str {
        &self.iface
    }
}

fn embedded_id(frame: &CanFrame) -> io::Result<Id> {
    let id = if frame.is_extended() {
        ExtendedId::new(frame.id()).map(Id::Extended)
    } else {
        u16::try_from(frame.id())
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };

    id.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid CAN id 0x{:X}", frame.id()),
        )
    })
}

fn invalid_frame(frame: &CanFrame) -> TransportError {
    TransportError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("cannot encode {:?}", frame),
    ))
}

fn from_embedded<F: EmbeddedFrame>(f: &F, fd: bool) -> Option<CanFrame> {
    let (id, extended) = match f.id() {
        Id::Standard(id) => (u32::from(id.as_raw()), false),
        Id::Extended(id) => (id.as_raw(), true),
    };

    if f.is_remote_frame() {
        return CanFrame::remote(id, extended, f.dlc()).ok();
    }

    CanFrame::from_parts(id, extended, false, f.data(), fd).ok()
}

impl CanTransport for SocketCanTransport {
    fn transmit(&mut self, frame: &CanFrame) -> std::result::Result<(), TransportError> {
        let id = embedded_id(frame)?;

        let result = if frame.is_fd() {
            let fd_frame =
                socketcan::CanFdFrame::new(id, frame.data()).ok_or_else(|| invalid_frame(frame))?;
            self.socket.write_frame(&fd_frame)
        } else if frame.is_rtr() {
            let remote = socketcan::CanFrame::new_remote(id, frame.dlc() as usize)
                .ok_or_else(|| invalid_frame(frame))?;
            self.socket.write_frame(&remote)
        } else {
            let data_frame =
                socketcan::CanFrame::new(id, frame.data()).ok_or_else(|| invalid_frame(frame))?;
            self.socket.write_frame(&data_frame)
        };

        result.map_err(TransportError::from_io)
    }

    fn set_filters(&mut self, filters: &[CanFilter]) -> io::Result<()> {
        let filters: Vec<socketcan::CanFilter> = filters
            .iter()
            .map(|f| socketcan::CanFilter::new(f.id, f.mask))
            .collect();
        self.socket.set_filters(&filters)
    }

    fn try_receive(&mut self) -> io::Result<Option<ReceivedFrame>> {
        let any = match self.socket.read_frame() {
            Ok(any) => any,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        };

        let frame = match any {
            CanAnyFrame::Normal(f) => from_embedded(&f, false),
            CanAnyFrame::Remote(f) => from_embedded(&f, false),
            CanAnyFrame::Fd(f) => from_embedded(&f, true),
            _ => {
                tracing::debug!("{}: ignoring error frame", self.iface);
                None
            }
        };

        Ok(frame.map(ReceivedFrame::now))
    }
}
