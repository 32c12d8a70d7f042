//! ICMP (Internet Control Message Protocol) header view.
//!
//! This module provides the message type catalogue and a zero-copy view over
//! the 8-byte ICMP header found behind an IPv4 header.

use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::{Checksumable, PacketError, PacketHeader, read_u16, read_u32, write_u16};

pub const HEADER_LEN: usize = 8;

/// ICMP message types as defined in RFC 792 and subsequent RFCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IcmpType {
    /// Echo Reply (Type 0)
    EchoReply = 0,
    /// Destination Unreachable (Type 3)
    DestinationUnreachable = 3,
    /// Source Quench (Type 4)
    SourceQuench = 4,
    /// Redirect Message (Type 5)
    Redirect = 5,
    /// Echo Request (Type 8)
    EchoRequest = 8,
    /// Router Advertisement (Type 9)
    RouterAdvertisement = 9,
    /// Router Solicitation (Type 10)
    RouterSolicitation = 10,
    /// Time Exceeded (Type 11)
    TimeExceeded = 11,
    /// Parameter Problem (Type 12)
    ParameterProblem = 12,
    /// Timestamp Request (Type 13)
    TimestampRequest = 13,
    /// Timestamp Reply (Type 14)
    TimestampReply = 14,
}

impl IcmpType {
    /// Maps a raw type byte to a known message type.
    pub fn from_u8(value: u8) -> Option<Self> {
        let message_type = match value {
            0 => IcmpType::EchoReply,
            3 => IcmpType::DestinationUnreachable,
            4 => IcmpType::SourceQuench,
            5 => IcmpType::Redirect,
            8 => IcmpType::EchoRequest,
            9 => IcmpType::RouterAdvertisement,
            10 => IcmpType::RouterSolicitation,
            11 => IcmpType::TimeExceeded,
            12 => IcmpType::ParameterProblem,
            13 => IcmpType::TimestampRequest,
            14 => IcmpType::TimestampReply,
            _ => return None,
        };
        Some(message_type)
    }
}

mod field {
    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: usize = 2;
    pub const BODY: usize = 4;
}

/// A read/write view of an ICMP message.
///
/// The buffer must start at the ICMP header and end with the message, so
/// that the checksum covers exactly the ICMP bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> IcmpHeader<T> {
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

    /// The raw type byte.
    pub fn msg_type(&self) -> u8 {
        self.buffer.as_ref()[field::TYPE]
    }

    /// The message type, if it is one this crate knows by name.
    pub fn icmp_type(&self) -> Option<IcmpType> {
        IcmpType::from_u8(self.msg_type())
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::CHECKSUM)
    }

    /// The "rest of header" word, whose meaning depends on the type.
    pub fn body(&self) -> u32 {
        read_u32(self.buffer.as_ref(), field::BODY)
    }

    /// Echo identifier; only meaningful for echo request and reply.
    pub fn echo_identifier(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::BODY)
    }

    /// Echo sequence number; only meaningful for echo request and reply.
    pub fn echo_sequence(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::BODY + 2)
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IcmpHeader<T> {
    pub fn set_checksum(&mut self, checksum: u16) {
        write_u16(self.buffer.as_mut(), field::CHECKSUM, checksum);
    }

    pub fn fill_checksum(&mut self) {
        let checksum = self.calculate_checksum();
        self.set_checksum(checksum);
    }
}

impl<T: AsRef<[u8]>> PacketHeader for IcmpHeader<T> {
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn header_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[..HEADER_LEN]
    }
}

impl<T: AsRef<[u8]>> Checksumable for IcmpHeader<T> {
    fn calculate_checksum(&self) -> u16 {
        // Skip the checksum field. Subtracting the stored value instead picks
        // the wrong one of the two ones' complement zeros.
        let message = self.buffer.as_ref();
        let head = message.get(..field::CHECKSUM).unwrap_or(message);
        let rest = message.get(field::BODY..).unwrap_or(&[]);
        !checksum::combine(&[checksum::data(head), checksum::data(rest)])
    }

    fn verify_checksum(&self) -> bool {
        checksum::data(self.buffer.as_ref()) == 0xffff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::ECHO_REQUEST;

    #[test]
    fn test_icmp_echo_request() {
        let header = IcmpHeader::new_checked(&ECHO_REQUEST[20..]).unwrap();
        assert_eq!(header.icmp_type(), Some(IcmpType::EchoRequest));
        assert_eq!(header.code(), 0);
        assert_eq!(header.echo_identifier(), 1);
        assert_eq!(header.echo_sequence(), 42);
        assert_eq!(header.body(), 0x0001_002a);
        assert_eq!(header.payload().len(), 32);
        assert!(header.verify_checksum());
    }

    #[test]
    fn test_icmp_fill_checksum() {
        let mut message = ECHO_REQUEST[20..].to_vec();
        let mut header = IcmpHeader::new_checked(&mut message[..]).unwrap();
        header.set_checksum(0);
        assert!(!header.verify_checksum());
        header.fill_checksum();
        assert_eq!(header.checksum(), 0x4d31);
    }

    #[test]
    fn test_icmp_unknown_type() {
        let message = [42u8, 0, 0, 0, 0, 0, 0, 0];
        let header = IcmpHeader::new_checked(&message[..]).unwrap();
        assert_eq!(header.msg_type(), 42);
        assert_eq!(header.icmp_type(), None);
    }

    #[test]
    fn test_icmp_truncated() {
        assert_eq!(
            IcmpHeader::new_checked(&ECHO_REQUEST[20..27]).unwrap_err(),
            PacketError::Truncated
        );
    }

    #[test]
    fn test_icmp_all_zero_checksum() {
        // Echo reply, id 0, seq 0, no payload: the message sums to zero.
        let mut message = [0u8; 8];
        let mut header = IcmpHeader::new_checked(&mut message[..]).unwrap();
        header.fill_checksum();
        assert_eq!(header.checksum(), 0xffff);
        assert!(header.verify_checksum());

        // The stored value does not leak into the result.
        header.set_checksum(0x1234);
        assert_eq!(header.calculate_checksum(), 0xffff);
    }
}
