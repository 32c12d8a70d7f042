//! RFC 1071 checksum engine.
//!
//! [`calculate`] repairs every checksum a packet carries after it has been
//! modified, [`verify`] checks them. Both work on the offsets found by
//! [`crate::parse`] and never write outside the headers they found.

use std::net::{Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::icmp::IcmpHeader;
use crate::ip::Ipv4Header;
use crate::ipv6::Ipv6Header;
use crate::packet::{Layout, NetworkKind, TransportKind};
use crate::{Checksumable, read_u16, write_u16};

bitflags! {
    /// Checksums to leave untouched in [`calculate`].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ChecksumFlags: u64 {
        const NO_IP_CHECKSUM = 1;
        const NO_ICMP_CHECKSUM = 2;
        const NO_ICMPV6_CHECKSUM = 4;
        const NO_TCP_CHECKSUM = 8;
        const NO_UDP_CHECKSUM = 16;
        /// Only fill checksum fields that are currently zero.
        const NO_REPLACE = 2048;
    }
}

fn propagate_carries(word: u32) -> u16 {
    let sum = (word >> 16) + (word & 0xffff);
    ((sum >> 16) as u16) + (sum as u16)
}

/// Compute an RFC 1071 compliant checksum (without the final complement).
///
/// An odd trailing byte is summed as if padded with a zero byte.
pub fn data(mut data: &[u8]) -> u16 {
    let mut accum = 0u32;

    // Sum 32-byte chunks separately so `accum` cannot overflow on jumbo
    // payloads before carries are folded.
    const CHUNK_SIZE: usize = 32;
    while data.len() >= CHUNK_SIZE {
        let mut chunk = 0u32;
        let mut d = &data[..CHUNK_SIZE];
        while d.len() >= 2 {
            chunk += read_u16(d, 0) as u32;
            d = &d[2..];
        }
        accum = propagate_carries(accum + chunk) as u32;
        data = &data[CHUNK_SIZE..];
    }

    while data.len() >= 2 {
        accum += read_u16(data, 0) as u32;
        data = &data[2..];
    }

    if let Some(&value) = data.first() {
        accum += (value as u32) << 8;
    }

    propagate_carries(accum)
}

/// Combine several RFC 1071 compliant checksums.
pub fn combine(checksums: &[u16]) -> u16 {
    let mut accum: u32 = 0;
    for &word in checksums {
        accum += word as u32;
    }
    propagate_carries(accum)
}

/// Compute an IPv4 pseudo header checksum.
pub fn pseudo_header_v4(src_addr: Ipv4Addr, dst_addr: Ipv4Addr, protocol: u8, length: u16) -> u16 {
    let mut proto_len = [0u8; 4];
    proto_len[1] = protocol;
    write_u16(&mut proto_len, 2, length);

    combine(&[
        data(&src_addr.octets()),
        data(&dst_addr.octets()),
        data(&proto_len[..]),
    ])
}

/// Compute an IPv6 pseudo header checksum.
pub fn pseudo_header_v6(src_addr: Ipv6Addr, dst_addr: Ipv6Addr, protocol: u8, length: u32) -> u16 {
    let mut proto_len = [0u8; 8];
    proto_len[0..4].copy_from_slice(&length.to_be_bytes());
    proto_len[7] = protocol;

    combine(&[
        data(&src_addr.octets()),
        data(&dst_addr.octets()),
        data(&proto_len[..]),
    ])
}

fn pseudo_header(packet: &[u8], layout: &Layout, protocol: u8) -> u16 {
    let length = layout.end - layout.transport_offset;
    match layout.network {
        NetworkKind::Ipv4 => {
            let header = Ipv4Header::new_unchecked(packet);
            pseudo_header_v4(header.src_addr(), header.dst_addr(), protocol, length as u16)
        }
        NetworkKind::Ipv6 => {
            let header = Ipv6Header::new_unchecked(packet);
            pseudo_header_v6(header.src_addr(), header.dst_addr(), protocol, length as u32)
        }
    }
}

/// Checksum field offset inside the transport header, and the protocol
/// number that goes into the pseudo header (`None` for ICMP, which has none).
fn transport_field(kind: TransportKind) -> (usize, Option<u8>) {
    match kind {
        TransportKind::Icmp => (2, None),
        TransportKind::Icmpv6 => (2, Some(58)),
        TransportKind::Tcp => (16, Some(6)),
        TransportKind::Udp => (6, Some(17)),
    }
}

fn skip_flag(kind: TransportKind) -> ChecksumFlags {
    match kind {
        TransportKind::Icmp => ChecksumFlags::NO_ICMP_CHECKSUM,
        TransportKind::Icmpv6 => ChecksumFlags::NO_ICMPV6_CHECKSUM,
        TransportKind::Tcp => ChecksumFlags::NO_TCP_CHECKSUM,
        TransportKind::Udp => ChecksumFlags::NO_UDP_CHECKSUM,
    }
}

/// Recomputes the checksums of `packet` in place.
///
/// The IPv4 header checksum covers the IP header alone; TCP, UDP and ICMPv6
/// checksums also cover a pseudo header. Transport checksums of fragments
/// are left alone since the segment is incomplete.
///
/// # Returns
/// The number of checksum fields written. Zero when the packet has no valid
/// IP header.
pub fn calculate(packet: &mut [u8], flags: ChecksumFlags) -> usize {
    let Some(layout) = Layout::of(packet) else {
        return 0;
    };
    let no_replace = flags.contains(ChecksumFlags::NO_REPLACE);
    let mut written = 0;

    if layout.network == NetworkKind::Ipv4 && !flags.contains(ChecksumFlags::NO_IP_CHECKSUM) {
        let mut header = Ipv4Header::new_unchecked(&mut packet[..]);
        if !(no_replace && header.checksum() != 0) {
            header.fill_checksum();
            written += 1;
        }
    }

    let Some(kind) = layout.transport else {
        return written;
    };
    if layout.fragment || flags.contains(skip_flag(kind)) {
        return written;
    }

    let (offset, protocol) = transport_field(kind);
    let field = layout.transport_offset + offset;
    if no_replace && read_u16(packet, field) != 0 {
        return written;
    }

    let checksum = match protocol {
        None => IcmpHeader::new_unchecked(&packet[layout.transport_offset..layout.end]).calculate_checksum(),
        Some(protocol) => {
            write_u16(packet, field, 0);
            let sum = combine(&[
                pseudo_header(packet, &layout, protocol),
                data(&packet[layout.transport_offset..layout.end]),
            ]);
            match (!sum, kind) {
                // Zero means "no checksum" for UDP.
                (0, TransportKind::Udp) => 0xffff,
                (checksum, _) => checksum,
            }
        }
    };
    write_u16(packet, field, checksum);
    written + 1
}

/// Checks every checksum the packet carries.
///
/// A UDP checksum of zero over IPv4 means none was computed and is accepted.
/// Packets without a valid IP header never verify.
pub fn verify(packet: &[u8]) -> bool {
    let Some(layout) = Layout::of(packet) else {
        return false;
    };

    if layout.network == NetworkKind::Ipv4 && !Ipv4Header::new_unchecked(packet).verify_checksum() {
        return false;
    }

    let Some(kind) = layout.transport else {
        return true;
    };
    if layout.fragment {
        return true;
    }

    let segment = &packet[layout.transport_offset..layout.end];
    let (offset, protocol) = transport_field(kind);
    match protocol {
        None => IcmpHeader::new_unchecked(segment).verify_checksum(),
        Some(_) if kind == TransportKind::Udp
            && layout.network == NetworkKind::Ipv4
            && read_u16(segment, offset) == 0 =>
        {
            true
        }
        Some(protocol) => {
            combine(&[pseudo_header(packet, &layout, protocol), data(segment)]) == 0xffff
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::*;
    use crate::packet;

    #[test]
    fn test_data_checksum() {
        // RFC 1071 section 3 example.
        let bytes = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(data(&bytes), 0xddf2);
        // Odd length pads with zero.
        assert_eq!(data(&[0x12, 0x34, 0x56]), 0x6834);
        assert_eq!(data(&[]), 0);
        assert_eq!(combine(&[0xffff, 0x0001]), 0x0001);
    }

    #[test]
    fn test_data_checksum_long_input() {
        let bytes = vec![0xff; 70_000];
        assert_eq!(data(&bytes), 0xffff);
    }

    #[test]
    fn test_vectors_verify() {
        for (name, vector) in ALL_VECTORS {
            assert!(verify(vector), "{name}");
        }
    }

    #[test]
    fn test_calculate_zeroed_transport_checksums() {
        for &(vector, offset, expected) in TRANSPORT_CHECKSUMS {
            let mut packet = vector.to_vec();
            packet[offset..offset + 2].fill(0);
            // A zero UDP checksum over IPv4 means "none" and still verifies.
            let udp_over_ipv4 = packet::parse(&packet).udp().is_some() && vector[0] >> 4 == 4;
            assert_eq!(verify(&packet), udp_over_ipv4);

            let written = calculate(&mut packet, ChecksumFlags::empty());
            assert_eq!(read_u16(&packet, offset), expected);
            assert_eq!(&packet[..], vector);
            let ipv4 = vector[0] >> 4 == 4;
            assert_eq!(written, if ipv4 { 2 } else { 1 });
        }
    }

    #[test]
    fn test_calculate_zeroed_ip_checksum() {
        for vector in [ECHO_REQUEST, HTTP_REQUEST, DNS_REQUEST] {
            let mut packet = vector.to_vec();
            packet[10..12].fill(0);
            calculate(&mut packet, ChecksumFlags::NO_REPLACE);
            assert_eq!(&packet[..], vector);
        }
    }

    #[test]
    fn test_calculate_after_mutation() {
        let mut packet = HTTP_REQUEST.to_vec();
        packet[40] = b'P';
        assert!(!verify(&packet));
        calculate(&mut packet, ChecksumFlags::empty());
        assert!(verify(&packet));
    }

    #[test]
    fn test_calculate_respects_flags() {
        let mut packet = HTTP_REQUEST.to_vec();
        packet[10..12].fill(0);
        packet[36..38].fill(0);
        let written = calculate(
            &mut packet,
            ChecksumFlags::NO_IP_CHECKSUM | ChecksumFlags::NO_TCP_CHECKSUM,
        );
        assert_eq!(written, 0);
        assert_eq!(&packet[10..12], &[0, 0]);
        assert_eq!(&packet[36..38], &[0, 0]);

        // NO_REPLACE leaves a wrong but non-zero checksum in place.
        let mut packet = DNS_REQUEST.to_vec();
        packet[26..28].copy_from_slice(&[0x12, 0x34]);
        assert_eq!(calculate(&mut packet, ChecksumFlags::NO_REPLACE), 0);
        assert_eq!(&packet[26..28], &[0x12, 0x34]);
    }

    #[test]
    fn test_calculate_all_zero_icmp_message() {
        // IPv4 header of the echo request, followed by an echo reply with
        // id 0, seq 0 and no payload.
        let mut packet = ECHO_REQUEST[..28].to_vec();
        write_u16(&mut packet, 2, 28);
        packet[20..].fill(0);

        assert_eq!(calculate(&mut packet, ChecksumFlags::empty()), 2);
        assert_eq!(read_u16(&packet, 22), 0xffff);
        assert!(verify(&packet));
    }

    #[test]
    fn test_udp_zero_checksum_accepted() {
        let mut packet = DNS_REQUEST.to_vec();
        packet[26..28].fill(0);
        assert!(verify(&packet));

        let mut packet = IPV6_EXTHDRS_UDP.to_vec();
        packet[86..88].fill(0);
        assert!(!verify(&packet));
    }

    #[test]
    fn test_calculate_invalid_packet() {
        let mut garbage = vec![0xffu8; 32];
        assert_eq!(calculate(&mut garbage, ChecksumFlags::empty()), 0);
        assert_eq!(garbage, vec![0xff; 32]);
        assert!(!verify(&garbage));

        // Truncated transport: only the IP checksum is touched.
        let mut packet = HTTP_REQUEST[..30].to_vec();
        packet[2..4].copy_from_slice(&30u16.to_be_bytes());
        let tail = packet[20..].to_vec();
        assert_eq!(calculate(&mut packet, ChecksumFlags::empty()), 1);
        assert_eq!(&packet[20..], &tail[..]);
    }

    #[test]
    fn test_checksum_flags_serde_bits() {
        let flags = ChecksumFlags::NO_TCP_CHECKSUM | ChecksumFlags::NO_REPLACE;
        assert_eq!(flags.bits(), 2056);
        assert_eq!(ChecksumFlags::from_bits_truncate(2056), flags);
    }
}
