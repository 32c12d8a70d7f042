//! UDP (User Datagram Protocol) header view.
//!
//! This module provides a zero-copy view over the 8-byte UDP header and the
//! datagram behind it.

use crate::{PacketError, PacketHeader, read_u16, write_u16};

pub const HEADER_LEN: usize = 8;

/// A read/write view of a UDP datagram.
///
/// Contains the basic fields of a UDP header:
/// - Source port
/// - Destination port
/// - Length (header + payload)
/// - Checksum
///
/// The buffer should end where the enclosing IP packet ends; the payload is
/// everything after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> UdpHeader<T> {
    /// Wraps `buffer` without checking its length.
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    /// Wraps `buffer`, ensuring it holds at least a full header.
    ///
    /// # Returns
    /// - `Ok(UdpHeader)` - A view whose accessors cannot read out of bounds
    /// - `Err(PacketError::Truncated)` - If fewer than 8 bytes are available
    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        let header = Self::new_unchecked(buffer);
        header.check()?;
        Ok(header)
    }

    pub fn check(&self) -> Result<(), PacketError> {
        if self.buffer.as_ref().len() < HEADER_LEN {
            return Err(PacketError::Truncated);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn src_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 0)
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 2)
    }

    /// The length field as carried on the wire, header included.
    pub fn length(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 4)
    }

    /// Checksum field. Zero means the sender did not compute one (IPv4 only).
    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 6)
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> UdpHeader<T> {
    pub fn set_src_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), 0, port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        write_u16(self.buffer.as_mut(), 2, port);
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        write_u16(self.buffer.as_mut(), 6, checksum);
    }
}

impl<T: AsRef<[u8]>> PacketHeader for UdpHeader<T> {
    /// Returns the length of the UDP header in bytes.
    ///
    /// The UDP header is always 8 bytes long.
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn header_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[..HEADER_LEN]
    }
}
