//! A Rust library for diverting, inspecting and re-injecting network packets.
//!
//! A [`Diversion`] handle is bound to a filter, a layer and a priority on top
//! of a packet interception [`Driver`]. Packets it captures can be decomposed,
//! checked against the filter language and re-injected. It features:
//!
//! - Zero-copy header views for IPv4, IPv6, ICMP, ICMPv6, TCP and UDP
//! - RFC 1071 checksum recalculation and verification
//! - A user-space evaluator for the driver's filter language
//! - Blocking and async receive/send with completion tokens
//! - An in-process loopback driver and a Linux raw-socket driver
//! - Serialization support via Serde

pub mod address;
pub mod capture;
pub mod checksum;
pub mod completion;
pub mod diversion;
pub mod driver;
pub mod error;
pub mod filter;
pub mod icmp;
pub mod icmpv6;
pub mod ip;
pub mod ipv6;
pub mod loopback;
pub mod packet;
pub mod process;
#[cfg(target_os = "linux")]
pub mod socket;
pub mod tcp;
pub mod udp;

#[cfg(test)]
mod test_vectors;

pub use address::{Address, Direction, Layer};
pub use capture::{CaptureStats, StopSignal, Verdict};
pub use checksum::ChecksumFlags;
pub use completion::{AsyncResult, Submission, WaitStatus};
pub use diversion::{Diversion, DiversionBuilder, DiversionConfig, Received};
pub use driver::{Driver, DriverHandle, OpenFlags, Param};
pub use error::{DivertError, FilterError, OpenError, PacketError, Result};
pub use filter::Filter;
pub use loopback::{CapturedPacket, LoopbackNetwork};
pub use packet::{parse, ParsedPacket};
pub use process::{ProcessName, ProcessOwner, ProcessTable, StaticProcessTable};
#[cfg(target_os = "linux")]
pub use socket::RawSocketDriver;

/// Trait for headers that carry a checksum over their own bytes.
///
/// Transport checksums also cover a pseudo header taken from the IP header,
/// so they are handled by [`checksum::calculate`] instead.
pub trait Checksumable {
    /// Calculate the checksum for the header, ignoring the stored value.
    ///
    /// # Returns
    /// The calculated checksum value as a 16-bit unsigned integer.
    fn calculate_checksum(&self) -> u16;

    /// Verify the checksum of the header.
    ///
    /// # Returns
    /// `true` if the checksum is valid, `false` otherwise.
    fn verify_checksum(&self) -> bool;
}

/// Common header trait for all header views.
///
/// This trait gives uniform access to the on-wire bytes of a header,
/// regardless of protocol.
pub trait PacketHeader {
    /// Get the header length in bytes, options and extensions included.
    fn header_len(&self) -> usize;

    /// Get the header bytes exactly as they appear in the packet buffer.
    fn header_bytes(&self) -> &[u8];
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

pub(crate) fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::ALL_VECTORS;

    #[test]
    fn test_field_helpers() {
        let mut buffer = [0u8; 6];
        write_u16(&mut buffer, 0, 0xbeef);
        write_u32(&mut buffer, 2, 0x0102_0304);
        assert_eq!(buffer, [0xbe, 0xef, 1, 2, 3, 4]);
        assert_eq!(read_u16(&buffer, 0), 0xbeef);
        assert_eq!(read_u32(&buffer, 2), 0x0102_0304);
    }

    #[test]
    fn test_header_bytes_reproduce_packet() {
        for (name, vector) in ALL_VECTORS {
            let packet = parse(vector);
            let network = packet.network().unwrap();
            let transport = packet.transport().unwrap();

            let mut rebuilt = Vec::new();
            rebuilt.extend_from_slice(network.header_bytes());
            rebuilt.extend_from_slice(packet.extension_headers());
            rebuilt.extend_from_slice(transport.header_bytes());
            rebuilt.extend_from_slice(packet.payload());
            assert_eq!(&rebuilt[..], *vector, "{name}");
        }
    }
}
