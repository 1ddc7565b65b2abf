//! CAN frame representation and the send-side frame generator.
//!
//! Frames keep the id in the kernel `canid_t` layout: the low 29 (or 11)
//! bits hold the identifier, bit 31 marks an extended frame and bit 30 a
//! remote transmission request.

use std::fmt;

use bitflags::bitflags;
use rand::Rng;

use crate::core::error::{HwError, Result};

/// Valid bits of a standard (11-bit) identifier.
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Valid bits of an extended (29-bit) identifier.
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// Extended frame format flag.
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag.
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;

/// Maximum classic CAN payload.
pub const CAN_MAX_DLEN: usize = 8;
/// Maximum CAN-FD payload.
pub const CANFD_MAX_DLEN: usize = 64;

/// Payload lengths a CAN-FD frame can encode.
const CANFD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

bitflags! {
    /// Options applied by [`CanFrame::update`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Draw a random standard id instead of the configured one.
        const RANDOM_ID = 0x01;
        /// Use the extended frame format.
        const EXTENDED_ID = 0x02;
        /// Send a remote transmission request.
        const RTR = 0x04;
        /// Draw a random payload length.
        const RANDOM_DLC = 0x08;
    }
}

/// A classic CAN or CAN-FD frame.
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    can_id: u32,
    len: u8,
    data: [u8; CANFD_MAX_DLEN],
    fd: bool,
}

impl Default for CanFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("0x{:X}", self.id()))
            .field("extended", &self.is_extended())
            .field("rtr", &self.is_rtr())
            .field("fd", &self.fd)
            .field("data", &self.data())
            .finish()
    }
}

impl CanFrame {
    /// Empty classic frame with id 0.
    pub fn new() -> Self {
        Self {
            can_id: 0,
            len: 0,
            data: [0; CANFD_MAX_DLEN],
            fd: false,
        }
    }

    /// Empty CAN-FD frame with id 0.
    pub fn new_fd() -> Self {
        Self {
            fd: true,
            ..Self::new()
        }
    }

    /// Build a frame from its parts.
    ///
    /// Fails if the id does not fit the selected format or the payload is
    /// too long.
    pub fn from_parts(id: u32, extended: bool, rtr: bool, data: &[u8], fd: bool) -> Result<Self> {
        let mask = if extended { CAN_EFF_MASK } else { CAN_SFF_MASK };
        if id & !mask != 0 {
            return Err(HwError::invalid(format!(
                "CAN id 0x{:X} exceeds the {} range",
                id,
                if extended { "29-bit" } else { "11-bit" }
            )));
        }

        let max = if fd { CANFD_MAX_DLEN } else { CAN_MAX_DLEN };
        if data.len() > max {
            return Err(HwError::invalid(format!(
                "payload of {} bytes exceeds {} bytes",
                data.len(),
                max
            )));
        }
        if fd && rtr {
            return Err(HwError::invalid("CAN FD frames cannot be remote requests"));
        }

        let mut frame = if fd { Self::new_fd() } else { Self::new() };
        frame.can_id = id;
        if extended {
            frame.can_id |= CAN_EFF_FLAG;
        }
        if rtr {
            frame.can_id |= CAN_RTR_FLAG;
        }
        frame.set_len(data.len());
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    /// Build a remote transmission request with `dlc` requested bytes.
    pub fn remote(id: u32, extended: bool, dlc: usize) -> Result<Self> {
        let mut frame = Self::from_parts(id, extended, true, &[], false)?;
        if dlc > CAN_MAX_DLEN {
            return Err(HwError::invalid(format!("remote frame DLC {} exceeds 8", dlc)));
        }
        frame.len = dlc as u8;
        Ok(frame)
    }

    /// Raw id word including the extended and RTR flags.
    #[inline]
    pub fn raw_id(&self) -> u32 {
        self.can_id
    }

    /// Identifier without flags.
    #[inline]
    pub fn id(&self) -> u32 {
        if self.is_extended() {
            self.can_id & CAN_EFF_MASK
        } else {
            self.can_id & CAN_SFF_MASK
        }
    }

    /// Whether the frame uses the 29-bit format.
    #[inline]
    pub fn is_extended(&self) -> bool {
        self.can_id & CAN_EFF_FLAG != 0
    }

    /// Whether the frame is a remote transmission request.
    #[inline]
    pub fn is_rtr(&self) -> bool {
        self.can_id & CAN_RTR_FLAG != 0
    }

    /// Whether this is a CAN-FD frame.
    #[inline]
    pub fn is_fd(&self) -> bool {
        self.fd
    }

    /// Payload length (DLC for classic frames).
    #[inline]
    pub fn dlc(&self) -> u8 {
        self.len
    }

    /// Payload bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Maximum payload for this frame type.
    #[inline]
    pub fn max_len(&self) -> usize {
        if self.fd {
            CANFD_MAX_DLEN
        } else {
            CAN_MAX_DLEN
        }
    }

    /// Set the payload length, clamped to the frame maximum. CAN-FD lengths
    /// are rounded up to the next encodable size.
    fn set_len(&mut self, len: usize) {
        let len = len.min(self.max_len());
        let len = if self.fd {
            CANFD_LENGTHS
                .iter()
                .copied()
                .find(|&l| l >= len)
                .unwrap_or(CANFD_MAX_DLEN)
        } else {
            len
        };
        self.len = len as u8;
    }

    /// Prepare the frame for the next transmission.
    ///
    /// Applies the id and length according to `flags`, then advances the
    /// payload counter. The payload is a little-endian counter over the
    /// first `dlc` bytes: byte 0 increments and carries into byte 1 only
    /// when it wraps from 255 to 0, and so on.
    pub fn update<R: Rng + ?Sized>(&mut self, id: u32, dlc: u8, flags: FrameFlags, rng: &mut R) {
        let id = if flags.contains(FrameFlags::RANDOM_ID) {
            rng.gen_range(1..=2047)
        } else {
            id
        };

        self.can_id = if flags.contains(FrameFlags::EXTENDED_ID) {
            (id & CAN_EFF_MASK) | CAN_EFF_FLAG
        } else {
            id & CAN_SFF_MASK
        };

        if flags.contains(FrameFlags::RTR) {
            self.can_id |= CAN_RTR_FLAG;
        }

        let dlc = if flags.contains(FrameFlags::RANDOM_DLC) {
            rng.gen_range(1..=CAN_MAX_DLEN as u8)
        } else {
            dlc
        };
        self.set_len(dlc as usize);

        for byte in self.data[..self.len as usize].iter_mut() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_extended_id_masking() {
        let mut frame = CanFrame::new();
        frame.update(0xFFFF_FFFF, 8, FrameFlags::EXTENDED_ID, &mut rng());

        assert_eq!(frame.raw_id(), (0xFFFF_FFFF & CAN_EFF_MASK) | CAN_EFF_FLAG);
        assert_eq!(frame.id(), CAN_EFF_MASK);
        assert!(frame.is_extended());
        assert!(!frame.is_rtr());
    }

    #[test]
    fn test_standard_id_masking() {
        let mut frame = CanFrame::new();
        frame.update(0x1234_5678, 8, FrameFlags::empty(), &mut rng());

        assert_eq!(frame.raw_id(), 0x1234_5678 & CAN_SFF_MASK);
        assert_eq!(frame.raw_id() & CAN_EFF_FLAG, 0);
        assert!(!frame.is_extended());
    }

    #[test]
    fn test_rtr_flag() {
        let mut frame = CanFrame::new();
        frame.update(0x123, 2, FrameFlags::RTR | FrameFlags::EXTENDED_ID, &mut rng());

        assert!(frame.is_rtr());
        assert!(frame.is_extended());
        assert_eq!(frame.id(), 0x123);
    }

    #[test]
    fn test_random_id_and_dlc_ranges() {
        let mut rng = rng();
        let mut frame = CanFrame::new();

        for _ in 0..500 {
            frame.update(0x123, 8, FrameFlags::RANDOM_ID | FrameFlags::RANDOM_DLC, &mut rng);
            assert!((1..=2047).contains(&frame.id()));
            assert!((1..=8).contains(&frame.dlc()));
        }
    }

    #[test]
    fn test_payload_single_byte_wraps() {
        let mut rng = rng();
        let mut frame = CanFrame::new();

        for expected in (1..=255u8).chain([0, 1]) {
            frame.update(0x123, 1, FrameFlags::empty(), &mut rng);
            assert_eq!(frame.data(), &[expected]);
        }
    }

    #[test]
    fn test_payload_carries_into_next_byte() {
        let mut rng = rng();
        let mut frame = CanFrame::new();

        for _ in 0..255 {
            frame.update(0x123, 2, FrameFlags::empty(), &mut rng);
        }
        assert_eq!(frame.data(), &[255, 0]);

        frame.update(0x123, 2, FrameFlags::empty(), &mut rng);
        assert_eq!(frame.data(), &[0, 1]);

        frame.update(0x123, 2, FrameFlags::empty(), &mut rng);
        assert_eq!(frame.data(), &[1, 1]);
    }

    #[test]
    fn test_dlc_clamped_to_frame_type() {
        let mut frame = CanFrame::new();
        frame.update(0x123, 20, FrameFlags::empty(), &mut rng());
        assert_eq!(frame.dlc(), 8);

        let mut frame = CanFrame::new_fd();
        frame.update(0x123, 10, FrameFlags::empty(), &mut rng());
        assert_eq!(frame.dlc(), 12);

        frame.update(0x123, 200, FrameFlags::empty(), &mut rng());
        assert_eq!(frame.dlc(), 64);
    }

    #[test]
    fn test_from_parts() {
        let frame = CanFrame::from_parts(0x023, false, false, &[1, 2, 3], false).unwrap();
        assert_eq!(frame.id(), 0x023);
        assert_eq!(frame.data(), &[1, 2, 3]);

        assert!(CanFrame::from_parts(0x800, false, false, &[], false).is_err());
        assert!(CanFrame::from_parts(0x800, true, false, &[], false).is_ok());
        assert!(CanFrame::from_parts(0x1, false, false, &[0; 9], false).is_err());
        assert!(CanFrame::from_parts(0x1, false, true, &[], true).is_err());
    }

    #[test]
    fn test_remote_frame() {
        let frame = CanFrame::remote(0x18ff_0001, true, 4).unwrap();
        assert!(frame.is_rtr());
        assert!(frame.is_extended());
        assert_eq!(frame.dlc(), 4);

        assert!(CanFrame::remote(0x123, false, 9).is_err());
    }
}
