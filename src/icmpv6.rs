//! ICMPv6 header view (RFC 4443).

use serde::{Deserialize, Serialize};

use crate::{PacketError, PacketHeader, read_u16, read_u32, write_u16};

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Icmpv6Type {
    DestinationUnreachable = 1,
    PacketTooBig = 2,
    TimeExceeded = 3,
    ParameterProblem = 4,
    EchoRequest = 128,
    EchoReply = 129,
    RouterSolicitation = 133,
    RouterAdvertisement = 134,
    NeighborSolicitation = 135,
    NeighborAdvertisement = 136,
}

impl Icmpv6Type {
    pub fn from_u8(value: u8) -> Option<Self> {
        let message_type = match value {
            1 => Icmpv6Type::DestinationUnreachable,
            2 => Icmpv6Type::PacketTooBig,
            3 => Icmpv6Type::TimeExceeded,
            4 => Icmpv6Type::ParameterProblem,
            128 => Icmpv6Type::EchoRequest,
            129 => Icmpv6Type::EchoReply,
            133 => Icmpv6Type::RouterSolicitation,
            134 => Icmpv6Type::RouterAdvertisement,
            135 => Icmpv6Type::NeighborSolicitation,
            136 => Icmpv6Type::NeighborAdvertisement,
            _ => return None,
        };
        Some(message_type)
    }
}

/// A read/write view of an ICMPv6 message.
///
/// Its checksum covers an IPv6 pseudo header, see [`crate::checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icmpv6Header<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Icmpv6Header<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

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

    pub fn msg_type(&self) -> u8 {
        self.buffer.as_ref()[0]
    }

    pub fn icmpv6_type(&self) -> Option<Icmpv6Type> {
        Icmpv6Type::from_u8(self.msg_type())
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[1]
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), 2)
    }

    pub fn body(&self) -> u32 {
        read_u32(self.buffer.as_ref(), 4)
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Icmpv6Header<T> {
    pub fn set_checksum(&mut self, checksum: u16) {
        write_u16(self.buffer.as_mut(), 2, checksum);
    }
}

impl<T: AsRef<[u8]>> PacketHeader for Icmpv6Header<T> {
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn header_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[..HEADER_LEN]
    }
}
