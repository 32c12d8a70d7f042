//! Decomposition of a raw IP packet into network and transport views.
//!
//! Parsing never fails: a header that does not validate is simply absent
//! from the result. At most one network view and one transport view exist
//! for a packet, so the result is a pair of tagged variants rather than one
//! slot per protocol.

use crate::icmp::IcmpHeader;
use crate::icmpv6::Icmpv6Header;
use crate::ip::{IpProtocol, Ipv4Header};
use crate::ipv6::{self, Ipv6Header};
use crate::tcp::TcpHeader;
use crate::udp::UdpHeader;
use crate::{PacketError, PacketHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NetworkKind {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportKind {
    Icmp,
    Icmpv6,
    Tcp,
    Udp,
}

/// Byte offsets of the validated headers of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub network: NetworkKind,
    pub transport: Option<TransportKind>,
    /// Start of the upper-layer data, after IPv4 options or IPv6 extensions.
    pub transport_offset: usize,
    /// End of the packet according to its IP length field.
    pub end: usize,
    pub protocol: IpProtocol,
    pub fragment: bool,
}

impl Layout {
    pub fn of(buffer: &[u8]) -> Option<Layout> {
        match buffer.first()? >> 4 {
            4 => Self::ipv4(buffer),
            6 => Self::ipv6(buffer),
            _ => None,
        }
    }

    fn ipv4(buffer: &[u8]) -> Option<Layout> {
        let header = Ipv4Header::new_checked(buffer).ok()?;
        let mut layout = Layout {
            network: NetworkKind::Ipv4,
            transport: None,
            transport_offset: header.header_len(),
            end: header.total_len() as usize,
            protocol: header.protocol(),
            fragment: header.is_fragment(),
        };
        if header.fragment_offset() == 0 {
            layout.transport = transport_kind(
                layout.protocol,
                NetworkKind::Ipv4,
                &buffer[layout.transport_offset..layout.end],
            );
        }
        Some(layout)
    }

    fn ipv6(buffer: &[u8]) -> Option<Layout> {
        let header = Ipv6Header::new_checked(buffer).ok()?;
        let chain = header.extension_chain();
        let mut layout = Layout {
            network: NetworkKind::Ipv6,
            transport: None,
            transport_offset: chain.offset,
            end: ipv6::HEADER_LEN + header.payload_len() as usize,
            protocol: chain.protocol,
            fragment: chain.fragment,
        };
        if chain.complete {
            layout.transport = transport_kind(
                layout.protocol,
                NetworkKind::Ipv6,
                &buffer[layout.transport_offset..layout.end],
            );
        }
        Some(layout)
    }

    /// Offset of the transport payload, or of the network payload when no
    /// transport header was recognised.
    pub fn payload_offset(&self, buffer: &[u8]) -> usize {
        let header_len = match self.transport {
            Some(TransportKind::Tcp) => {
                TcpHeader::new_unchecked(&buffer[self.transport_offset..self.end]).header_len()
            }
            Some(_) => 8,
            None => 0,
        };
        self.transport_offset + header_len
    }
}

fn transport_kind(protocol: IpProtocol, network: NetworkKind, segment: &[u8]) -> Option<TransportKind> {
    let kind = match (protocol, network) {
        (IpProtocol::TCP, _) => {
            TcpHeader::new_checked(segment).ok()?;
            TransportKind::Tcp
        }
        (IpProtocol::UDP, _) => {
            UdpHeader::new_checked(segment).ok()?;
            TransportKind::Udp
        }
        (IpProtocol::ICMP, NetworkKind::Ipv4) => {
            IcmpHeader::new_checked(segment).ok()?;
            TransportKind::Icmp
        }
        (IpProtocol::ICMPv6, NetworkKind::Ipv6) => {
            Icmpv6Header::new_checked(segment).ok()?;
            TransportKind::Icmpv6
        }
        _ => return None,
    };
    Some(kind)
}

/// The network-layer header of a parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHeader<'a> {
    Ipv4(Ipv4Header<&'a [u8]>),
    Ipv6(Ipv6Header<&'a [u8]>),
}

impl PacketHeader for NetworkHeader<'_> {
    fn header_len(&self) -> usize {
        match self {
            NetworkHeader::Ipv4(header) => header.header_len(),
            NetworkHeader::Ipv6(header) => PacketHeader::header_len(header),
        }
    }

    fn header_bytes(&self) -> &[u8] {
        match self {
            NetworkHeader::Ipv4(header) => header.header_bytes(),
            NetworkHeader::Ipv6(header) => header.header_bytes(),
        }
    }
}

/// The transport-layer header of a parsed packet. Each view spans the
/// segment up to the end of the IP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader<'a> {
    Icmp(IcmpHeader<&'a [u8]>),
    Icmpv6(Icmpv6Header<&'a [u8]>),
    Tcp(TcpHeader<&'a [u8]>),
    Udp(UdpHeader<&'a [u8]>),
}

impl PacketHeader for TransportHeader<'_> {
    fn header_len(&self) -> usize {
        match self {
            TransportHeader::Icmp(header) => header.header_len(),
            TransportHeader::Icmpv6(header) => header.header_len(),
            TransportHeader::Tcp(header) => PacketHeader::header_len(header),
            TransportHeader::Udp(header) => header.header_len(),
        }
    }

    fn header_bytes(&self) -> &[u8] {
        match self {
            TransportHeader::Icmp(header) => header.header_bytes(),
            TransportHeader::Icmpv6(header) => header.header_bytes(),
            TransportHeader::Tcp(header) => header.header_bytes(),
            TransportHeader::Udp(header) => header.header_bytes(),
        }
    }
}

/// Result of [`parse`]: the validated views of one packet.
#[derive(Debug, Clone, Copy)]
pub struct ParsedPacket<'a> {
    buffer: &'a [u8],
    layout: Option<Layout>,
}

/// Decomposes `buffer` into header views.
///
/// Bytes after the length declared by the IP header are ignored.
pub fn parse(buffer: &[u8]) -> ParsedPacket<'_> {
    ParsedPacket {
        buffer,
        layout: Layout::of(buffer),
    }
}

/// Explains why `buffer` does not start with a valid IPv4 or IPv6 header.
pub fn check_network(buffer: &[u8]) -> Result<(), PacketError> {
    match buffer.first().map(|byte| byte >> 4) {
        None => Err(PacketError::Truncated),
        Some(4) => Ipv4Header::new_checked(buffer).map(|_| ()),
        Some(6) => Ipv6Header::new_checked(buffer).map(|_| ()),
        Some(_) => Err(PacketError::InvalidProtocolVersion),
    }
}

impl<'a> ParsedPacket<'a> {
    /// Whether a valid IPv4 or IPv6 header was found.
    pub fn is_valid(&self) -> bool {
        self.layout.is_some()
    }

    pub fn network(&self) -> Option<NetworkHeader<'a>> {
        let layout = self.layout?;
        let header = match layout.network {
            NetworkKind::Ipv4 => NetworkHeader::Ipv4(Ipv4Header::new_unchecked(self.buffer)),
            NetworkKind::Ipv6 => NetworkHeader::Ipv6(Ipv6Header::new_unchecked(self.buffer)),
        };
        Some(header)
    }

    pub fn transport(&self) -> Option<TransportHeader<'a>> {
        let layout = self.layout?;
        let segment = &self.buffer[layout.transport_offset..layout.end];
        let header = match layout.transport? {
            TransportKind::Icmp => TransportHeader::Icmp(IcmpHeader::new_unchecked(segment)),
            TransportKind::Icmpv6 => TransportHeader::Icmpv6(Icmpv6Header::new_unchecked(segment)),
            TransportKind::Tcp => TransportHeader::Tcp(TcpHeader::new_unchecked(segment)),
            TransportKind::Udp => TransportHeader::Udp(UdpHeader::new_unchecked(segment)),
        };
        Some(header)
    }

    pub fn ipv4(&self) -> Option<Ipv4Header<&'a [u8]>> {
        match self.network()? {
            NetworkHeader::Ipv4(header) => Some(header),
            _ => None,
        }
    }

    pub fn ipv6(&self) -> Option<Ipv6Header<&'a [u8]>> {
        match self.network()? {
            NetworkHeader::Ipv6(header) => Some(header),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<IcmpHeader<&'a [u8]>> {
        match self.transport()? {
            TransportHeader::Icmp(header) => Some(header),
            _ => None,
        }
    }

    pub fn icmpv6(&self) -> Option<Icmpv6Header<&'a [u8]>> {
        match self.transport()? {
            TransportHeader::Icmpv6(header) => Some(header),
            _ => None,
        }
    }

    pub fn tcp(&self) -> Option<TcpHeader<&'a [u8]>> {
        match self.transport()? {
            TransportHeader::Tcp(header) => Some(header),
            _ => None,
        }
    }

    pub fn udp(&self) -> Option<UdpHeader<&'a [u8]>> {
        match self.transport()? {
            TransportHeader::Udp(header) => Some(header),
            _ => None,
        }
    }

    /// The upper-layer protocol number, after any IPv6 extension headers.
    pub fn protocol(&self) -> Option<IpProtocol> {
        self.layout.map(|layout| layout.protocol)
    }

    /// IPv6 extension headers between the fixed header and the transport.
    /// Empty for IPv4 and for IPv6 packets without extensions.
    pub fn extension_headers(&self) -> &'a [u8] {
        match self.layout {
            Some(layout) if layout.network == NetworkKind::Ipv6 => {
                &self.buffer[ipv6::HEADER_LEN..layout.transport_offset]
            }
            _ => &[],
        }
    }

    /// Data after the innermost recognised header.
    pub fn payload(&self) -> &'a [u8] {
        match self.layout {
            Some(layout) => &self.buffer[layout.payload_offset(self.buffer)..layout.end],
            None => &[],
        }
    }

    /// The IP packet, without bytes past its declared length.
    pub fn packet(&self) -> &'a [u8] {
        match self.layout {
            Some(layout) => &self.buffer[..layout.end],
            None => &[],
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.layout.is_some_and(|layout| layout.fragment)
    }
}
