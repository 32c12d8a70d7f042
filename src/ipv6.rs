//! IPv6 header view and extension-header chain walk.

use std::net::Ipv6Addr;

use crate::ip::IpProtocol;
use crate::{PacketError, PacketHeader, read_u16, read_u32};

pub const HEADER_LEN: usize = 40;

/// Longest extension-header chain that is followed before giving up.
pub const MAX_EXTENSION_HEADERS: usize = 8;

mod field {
    pub const VER_TC_FLOW: usize = 0;
    pub const LENGTH: usize = 4;
    pub const NXT_HDR: usize = 6;
    pub const HOP_LIMIT: usize = 7;
    pub const SRC_ADDR: usize = 8;
    pub const DST_ADDR: usize = 24;
}

/// Where the extension-header chain of a packet ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionChain {
    /// Next-header value found after the last extension header.
    pub protocol: IpProtocol,
    /// Offset of the upper-layer header from the start of the IPv6 header.
    pub offset: usize,
    /// Number of extension headers walked.
    pub count: usize,
    /// A fragment header was found.
    pub fragment: bool,
    /// `protocol` really starts at `offset`. False when the chain is
    /// truncated, too long, or belongs to a non-first fragment.
    pub complete: bool,
}

/// A read/write view of an IPv6 header at the start of `buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv6Header<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Self, PacketError> {
        let header = Self::new_unchecked(buffer);
        header.check()?;
        Ok(header)
    }

    /// Ensures no accessor can read past the buffer: 40 bytes of fixed header
    /// with version 6, and a payload length that fits the buffer.
    pub fn check(&self) -> Result<(), PacketError> {
        let data = self.buffer.as_ref();
        if data.len() < HEADER_LEN {
            return Err(PacketError::Truncated);
        }
        if self.version() != 6 {
            return Err(PacketError::InvalidProtocolVersion);
        }
        if HEADER_LEN + self.payload_len() as usize > data.len() {
            return Err(PacketError::InvalidLength);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_TC_FLOW] >> 4
    }

    pub fn traffic_class(&self) -> u8 {
        (read_u16(self.buffer.as_ref(), field::VER_TC_FLOW) >> 4) as u8
    }

    pub fn flow_label(&self) -> u32 {
        read_u32(self.buffer.as_ref(), field::VER_TC_FLOW) & 0x000f_ffff
    }

    pub fn payload_len(&self) -> u16 {
        read_u16(self.buffer.as_ref(), field::LENGTH)
    }

    /// The next-header field of the fixed header, before any extension.
    pub fn next_header(&self) -> IpProtocol {
        IpProtocol::from(self.buffer.as_ref()[field::NXT_HDR])
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer.as_ref()[field::HOP_LIMIT]
    }

    pub fn src_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.buffer.as_ref()[field::SRC_ADDR..field::SRC_ADDR + 16]);
        Ipv6Addr::from(octets)
    }

    pub fn dst_addr(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.buffer.as_ref()[field::DST_ADDR..field::DST_ADDR + 16]);
        Ipv6Addr::from(octets)
    }

    /// Fixed header plus payload, without trailing bytes past the payload length.
    pub fn packet(&self) -> &[u8] {
        &self.buffer.as_ref()[..HEADER_LEN + self.payload_len() as usize]
    }

    pub fn payload(&self) -> &[u8] {
        &self.packet()[HEADER_LEN..]
    }

    /// Follows the extension-header chain to the upper-layer protocol.
    ///
    /// Every extension header is bounds-checked against the payload length
    /// before it is read, so a malformed chain only ends the walk early.
    pub fn extension_chain(&self) -> ExtensionChain {
        let data = self.packet();
        let end = data.len();
        let mut chain = ExtensionChain {
            protocol: self.next_header(),
            offset: HEADER_LEN,
            count: 0,
            fragment: false,
            complete: true,
        };

        loop {
            let len = match chain.protocol {
                IpProtocol::HOPOPT | IpProtocol::IPv6Route | IpProtocol::IPv6Opts => {
                    if chain.offset + 2 > end {
                        chain.complete = false;
                        return chain;
                    }
                    (data[chain.offset + 1] as usize + 1) * 8
                }
                IpProtocol::AH => {
                    if chain.offset + 2 > end {
                        chain.complete = false;
                        return chain;
                    }
                    (data[chain.offset + 1] as usize + 2) * 4
                }
                IpProtocol::IPv6Frag => 8,
                _ => return chain,
            };

            if chain.count == MAX_EXTENSION_HEADERS || chain.offset + len > end {
                chain.complete = false;
                return chain;
            }

            let next = IpProtocol::from(data[chain.offset]);
            if chain.protocol == IpProtocol::IPv6Frag {
                chain.fragment = true;
                let fragment_offset = read_u16(data, chain.offset + 2) >> 3;
                if fragment_offset != 0 {
                    chain.protocol = next;
                    chain.offset += len;
                    chain.count += 1;
                    chain.complete = false;
                    return chain;
                }
            }

            chain.protocol = next;
            chain.offset += len;
            chain.count += 1;
        }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv6Header<T> {
    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.buffer.as_mut()[field::HOP_LIMIT] = hop_limit;
    }

    pub fn set_src_addr(&mut self, addr: Ipv6Addr) {
        self.buffer.as_mut()[field::SRC_ADDR..field::SRC_ADDR + 16].copy_from_slice(&addr.octets());
    }

    pub fn set_dst_addr(&mut self, addr: Ipv6Addr) {
        self.buffer.as_mut()[field::DST_ADDR..field::DST_ADDR + 16].copy_from_slice(&addr.octets());
    }
}

impl<T: AsRef<[u8]>> PacketHeader for Ipv6Header<T> {
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn header_bytes(&self) -> &[u8] {
        &self.buffer.as_ref()[..HEADER_LEN]
    }
}
