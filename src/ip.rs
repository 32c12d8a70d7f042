use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::{Checksumable, PacketError, PacketHeader, read_u16, write_u16};

/// IP protocol / IPv6 next-header numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpProtocol {
    HOPOPT,
    ICMP,
    TCP,
    UDP,
    IPv6Route,
    IPv6Frag,
    AH,
    ICMPv6,
    IPv6NoNxt,
    IPv6Opts,
    Unknown(u8),
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            0 => IpProtocol::HOPOPT,
            1 => IpProtocol::ICMP,
            6 => IpProtocol::TCP,
            17 => IpProtocol::UDP,
            43 => IpProtocol::IPv6Route,
            44 => IpProtocol::IPv6Frag,
            51 => IpProtocol::AH,
            58 => IpProtocol::ICMPv6,
            59 => IpProtocol::IPv6NoNxt,
            60 => IpProtocol::IPv6Opts,
            other => IpProtocol::Unknown(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(protocol: IpProtocol) -> Self {
        match protocol {
            IpProtocol::HOPOPT => 0,
            IpProtocol::ICMP => 1,
            IpProtocol::TCP => 6,
            IpProtocol::UDP => 17,
            IpProtocol::IPv6Route => 43,
            IpProtocol::IPv6Frag => 44,
            IpProtocol::AH => 51,
            IpProtocol::ICMPv6 => 58,
            IpProtocol::IPv6NoNxt => 59,
            IpProtocol::IPv6Opts => 60,
            IpProtocol::Unknown(other) => other,
        }
    }
}

/// IPv4 header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Flags {
    pub reserved: bool,
    pub dont_fragment: bool,
    pub more_fragments: bool,
}

impl Ipv4Flags {
    pub fn from_u8(bits: u8) -> Self {
        Self {
            reserved: bits & 0b100 != 0,
            dont_fragment: bits & 0b010 != 0,
            more_fragments: bits & 0b001 != 0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        let mut flags = 0u8;
        if self.reserved { flags |= 0b100; }
        if self.dont_fragment { flags |= 0b010; }
        if self.more_fragments { flags |= 0b001; }
        flags
    }
}

pub const MIN_HEADER_LEN: usize = 20;

mod field {
    pub const VER_IHL: usize = 0;
    pub const TOS: usize = 1;
    pub const LENGTH: usize = 2;
    pub const IDENT: usize = 4;
    pub const FLG_OFF: usize = 6;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: usize = 10;
    pub const SRC_ADDR: usize = 12;
    pub const DST_ADDR: usize = 16;
}

/// A read/write view of an IPv4 header at the start of `buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv4Header<T> {
    /// Wraps `buffer` without validating it. Accessors may panic on short
    /// buffers; use [`Ipv4Header::new_checked`] for untrusted input.
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        let header = Self::new_unchecked(buffer);
        header.check()?;
        Ok(header)
    }

    /// Ensures no accessor can read past the buffer.
    ///
    /// The header must fit the buffer, carry version 4, declare a header
    /// length of at least 20 bytes, and a total length between the header
    /// length and the buffer length.
    pub fn check(&self) -> Result<(), PacketError> {
        let data = self.buffer.as_ref();
        if data.len() < MIN_HEADER_LEN {
            return Err(PacketError::Truncated);
        }
        if self.version() != 4 {
            return Err(PacketError::InvalidProtocolVersion);
        }
        let header_len = self.header_len();
        if header_len < MIN_HEADER_LEN {
            return Err(PacketError::InvalidHeaderLength);
        }
        let total_len = self.total_len() as usize;
        if total_len < header_len || total_len > data.len() {
            return Err(PacketError::InvalidLength);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    /// Header length in bytes (IHL × 4).
    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[field::VER_IHL] & 0x0f) as usize) * 4
    }

    pub fn tos(&self) -> u8 {
        self.buffer.as_ref()[field::TOS]
    }

    pub fn total_len(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::LENGTH)
    }

    pub fn identification(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::IDENT)
    }

    pub fn flags(&self) -> Ipv4Flags {
        Ipv4Flags::from_u8((read_u16(self.buffer.as_ref(), field::FLG_OFF) >> 13) as u8)
    }

    pub fn dont_fragment(&self) -> bool {
        self.flags().dont_fragment
    }

    pub fn more_fragments(&self) -> bool {
        self.flags().more_fragments
    }

    /// Fragment offset in units of 8 bytes.
    pub fn fragment_offset(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::FLG_OFF) & 0x1fff
    }

    /// Whether this packet is one fragment of a larger datagram.
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset() != 0
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.buffer.as_ref()[field::PROTOCOL])
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::CHECKSUM)
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        let data = self.buffer.as_ref();
        Ipv4Addr::new(
            data[field::SRC_ADDR],
            data[field::SRC_ADDR + 1],
            data[field::SRC_ADDR + 2],
            data[field::SRC_ADDR + 3],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        let data = self.buffer.as_ref();
        Ipv4Addr::new(
            data[field::DST_ADDR],
            data[field::DST_ADDR + 1],
            data[field::DST_ADDR + 2],
            data[field::DST_ADDR + 3],
        )
    }

    /// Bytes covered by the total length field, header included.
    pub fn packet(&self) -> &[u8] {
        &self.buffer.as_ref()[..self.total_len() as usize]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..self.total_len() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Header<T> {
    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[field::TTL] = ttl;
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        write_u16(self.buffer.as_mut(), field::CHECKSUM, checksum);
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::SRC_ADDR..field::SRC_ADDR + 4].copy_from_slice(&addr.octets());
    }

    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[field::DST_ADDR..field::DST_ADDR + 4].copy_from_slice(&addr.octets());
    }

    /// Recomputes and stores the header checksum.
    pub fn fill_checksum(&mut self) {
        let checksum = self.calculate_checksum();
        self.set_checksum(checksum);
    }
}

impl<T: AsRef<[u8]>> PacketHeader for Ipv4Header<T> {
    fn header_len(&self) -> usize {
        Ipv4Header::header_len(self)
    }

    fn header_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[..Ipv4Header::header_len(self)]
    }
}

impl<T: AsRef<[u8]>> Checksumable for Ipv4Header<T> {
    fn calculate_checksum(&self) -> u16 {
        let header = self.header_bytes();
        let stored = self.checksum();
        // The stored checksum is part of the sum; take it back out.
        let sum = checksum::combine(&[checksum::data(header), !stored]);
        !sum
    }

    fn verify_checksum(&self) -> bool {
        checksum::data(self.header_bytes()) == 0xffff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::{DNS_REQUEST, ECHO_REQUEST, HTTP_REQUEST};

    #[test]
    fn test_ipv4_fields() {
        let header = Ipv4Header::new_checked(&ECHO_REQUEST[..]).unwrap();
        assert_eq!(header.version(), 4);
        assert_eq!(header.header_len(), 20);
        assert_eq!(header.total_len(), 60);
        assert_eq!(header.identification(), 0x3a1c);
        assert!(header.dont_fragment());
        assert!(!header.is_fragment());
        assert_eq!(header.ttl(), 128);
        assert_eq!(header.protocol(), IpProtocol::ICMP);
        assert_eq!(header.checksum(), 0x9c81);
        assert_eq!(header.src_addr(), Ipv4Addr::new(10, 10, 10, 10));
        assert_eq!(header.dst_addr(), Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(header.payload().len(), 40);
    }

    #[test]
    fn test_ipv4_checksum() {
        for packet in [&ECHO_REQUEST[..], &HTTP_REQUEST[..], &DNS_REQUEST[..]] {
            let header = Ipv4Header::new_checked(packet).unwrap();
            assert!(header.verify_checksum());
            assert_eq!(header.calculate_checksum(), header.checksum());
        }

        let mut packet = HTTP_REQUEST.to_vec();
        let mut header = Ipv4Header::new_checked(&mut packet[..]).unwrap();
        header.set_ttl(1);
        assert!(!header.verify_checksum());
        header.fill_checksum();
        assert!(header.verify_checksum());
    }

    #[test]
    fn test_ipv4_rejects_malformed() {
        assert_eq!(
            Ipv4Header::new_checked(&ECHO_REQUEST[..19]).unwrap_err(),
            PacketError::Truncated
        );
        // Total length claims more than the buffer holds.
        assert_eq!(
            Ipv4Header::new_checked(&ECHO_REQUEST[..40]).unwrap_err(),
            PacketError::InvalidLength
        );

        let mut packet = ECHO_REQUEST.to_vec();
        packet[0] = 0x44;
        assert_eq!(
            Ipv4Header::new_checked(&packet[..]).unwrap_err(),
            PacketError::InvalidHeaderLength
        );
        packet[0] = 0x65;
        assert_eq!(
            Ipv4Header::new_checked(&packet[..]).unwrap_err(),
            PacketError::InvalidProtocolVersion
        );
    }

    #[test]
    fn test_ipv4_flags() {
        let flags = Ipv4Flags::from_u8(0b011);
        assert!(flags.dont_fragment);
        assert!(flags.more_fragments);
        assert!(!flags.reserved);
        assert_eq!(flags.as_u8(), 0b011);
    }

    #[test]
    fn test_protocol_numbers() {
        for value in 0..=255u8 {
            assert_eq!(u8::from(IpProtocol::from(value)), value);
        }
        assert_eq!(IpProtocol::from(58), IpProtocol::ICMPv6);
    }
}
