//! Linux raw-socket driver.
//!
//! Captures every IP packet seen by the host on an `AF_PACKET` socket and
//! evaluates the handle's filter in user space; injects through raw IPv4 and
//! IPv6 sockets with the IP header included. The kernel keeps delivering
//! captured packets whatever the handle does with them, so this driver can
//! observe and inject but not divert: handles must be opened with
//! [`OpenFlags::SNIFF`] or [`OpenFlags::SEND_ONLY`].
//!
//! Opening a handle needs `CAP_NET_RAW`.

use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::{SocketAddrV4, SocketAddrV6};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::address::{Address, Direction, Layer};
use crate::completion::lock;
use crate::driver::{Driver, DriverHandle, OpenFlags, Param};
use crate::error::{DivertError, OpenError, Result};
use crate::filter::Filter;
use crate::packet::{self, NetworkHeader};

// Linux ABI values. socket2 does not export them.

/// Every protocol (`<linux/if_ether.h>`). Passed in network byte order.
const ETH_P_ALL: u16 = 0x0003;
/// The caller supplies the IP header (`<linux/in.h>`, `<netinet/in.h>`).
const IPPROTO_RAW: i32 = 255;
/// Non-blocking for one call (`<bits/socket.h>`, via `<sys/socket.h>`).
const MSG_DONTWAIT: i32 = 0x40;
/// `sll_pkttype` of a frame this host sent (`<linux/if_packet.h>`).
const PACKET_OUTGOING: u8 = 4;

/// Field offsets of `struct sockaddr_ll` (`<linux/if_packet.h>`):
/// `u16 sll_family; u16 sll_protocol; i32 sll_ifindex; u16 sll_hatype;
/// u8 sll_pkttype; u8 sll_halen; u8 sll_addr[8]`.
mod sockaddr_ll {
    pub const IFINDEX: usize = 4;
    pub const PKTTYPE: usize = 10;
}

/// Largest frame read off the capture socket.
const MAX_FRAME_LEN: usize = 0xffff;

/// How often a blocked receive checks whether its handle was closed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Opens raw-socket handles.
#[derive(Debug, Clone)]
pub struct RawSocketDriver {
    poll_interval: Duration,
}

impl Default for RawSocketDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSocketDriver {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how long a blocked receive may take to notice that its handle
    /// was closed.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

fn open_error(e: io::Error) -> OpenError {
    match e.kind() {
        ErrorKind::PermissionDenied => OpenError::PermissionDenied,
        // EAFNOSUPPORT: no packet socket support in this kernel.
        _ if e.raw_os_error() == Some(97) => OpenError::DriverNotFound,
        ErrorKind::Unsupported => OpenError::DriverNotFound,
        _ => OpenError::Driver(e.to_string()),
    }
}

fn capture_socket(poll_interval: Duration) -> io::Result<Socket> {
    let socket = Socket::new(
        Domain::PACKET,
        Type::DGRAM,
        Some(Protocol::from(ETH_P_ALL.to_be() as i32)),
    )?;
    socket.set_read_timeout(Some(poll_interval))?;
    Ok(socket)
}

impl Driver for RawSocketDriver {
    fn open(
        &self,
        filter: &Filter,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<Arc<dyn DriverHandle>, OpenError> {
        if filter.layer() != Layer::Network {
            return Err(OpenError::InvalidLayer(filter.layer()));
        }
        if !flags.intersects(OpenFlags::SNIFF | OpenFlags::SEND_ONLY) {
            return Err(OpenError::Unsupported(
                "raw sockets cannot divert or drop packets; open with SNIFF or SEND_ONLY".to_string(),
            ));
        }

        let capture = if flags.can_receive() {
            Some(capture_socket(self.poll_interval).map_err(open_error)?)
        } else {
            None
        };
        let (inject_v4, inject_v6) = if flags.can_send() {
            let v4 = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(IPPROTO_RAW)))
                .map_err(open_error)?;
            let v6 = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::from(IPPROTO_RAW)))
                .map_err(open_error)?;
            (Some(v4), Some(v6))
        } else {
            (None, None)
        };

        debug!(
            "opened raw socket handle (priority {} ignored, flags {:?}, filter \"{}\")",
            priority, flags, filter
        );
        Ok(Arc::new(RawSocketHandle {
            filter: filter.clone(),
            flags,
            capture,
            inject_v4,
            inject_v6,
            stashed: Mutex::new(None),
            queue_length: AtomicU64::new(Param::QueueLength.default_value()),
            queue_time: AtomicU64::new(Param::QueueTime.default_value()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct RawSocketHandle {
    filter: Filter,
    flags: OpenFlags,
    capture: Option<Socket>,
    inject_v4: Option<Socket>,
    inject_v6: Option<Socket>,
    /// A matching packet that did not fit the caller's buffer.
    stashed: Mutex<Option<(Vec<u8>, Address)>>,
    // Recorded for `param`; the kernel socket buffer bounds the real queue.
    queue_length: AtomicU64,
    queue_time: AtomicU64,
    closed: AtomicBool,
}

/// Reads the interface index and packet type out of a `sockaddr_ll`.
fn link_info(addr: &SockAddr) -> (u32, u8) {
    // SAFETY: `as_ptr` points at sockaddr storage of which the first `len`
    // bytes were written by `recvfrom`, and `len` never exceeds the storage.
    let raw = unsafe { std::slice::from_raw_parts(addr.as_ptr() as *const u8, addr.len() as usize) };
    parse_link_info(raw)
}

/// Zeros when `raw` is too short to hold the fields.
fn parse_link_info(raw: &[u8]) -> (u32, u8) {
    let ifindex = raw
        .get(sockaddr_ll::IFINDEX..sockaddr_ll::IFINDEX + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(i32::from_ne_bytes);
    match (ifindex, raw.get(sockaddr_ll::PKTTYPE)) {
        (Some(ifindex), Some(&pkttype)) => (ifindex.max(0) as u32, pkttype),
        _ => (0, 0),
    }
}

impl RawSocketHandle {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DivertError::HandleClosed);
        }
        Ok(())
    }

    fn capture(&self, buffer: &[u8]) -> Result<&Socket> {
        self.ensure_open()?;
        if buffer.is_empty() {
            return Err(DivertError::EmptyBuffer);
        }
        self.capture.as_ref().ok_or_else(|| {
            DivertError::InvalidOperation("handle was opened without receive access".to_string())
        })
    }

    /// Hands out the stashed packet if it fits now.
    fn take_stashed(&self, buffer: &mut [u8]) -> Result<Option<(usize, Address)>> {
        let mut stashed = lock(&self.stashed);
        let Some((data, address)) = stashed.as_ref() else {
            return Ok(None);
        };
        if data.len() > buffer.len() {
            return Err(DivertError::BufferTooSmall {
                needed: data.len(),
                available: buffer.len(),
            });
        }
        let (length, address) = (data.len(), *address);
        buffer[..length].copy_from_slice(data);
        *stashed = None;
        Ok(Some((length, address)))
    }

    /// Reads one frame. Returns `Ok(None)` when nothing arrived in time or
    /// the frame does not match the filter.
    fn read_frame(&self, socket: &Socket, flags: i32) -> io::Result<Option<(Vec<u8>, Address)>> {
        let mut frame = [MaybeUninit::<u8>::uninit(); MAX_FRAME_LEN];
        let (n, from) = match socket.recv_from_with_flags(&mut frame, flags) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // SAFETY: the kernel initialised the first `n` bytes.
        let data: Vec<u8> = frame[..n].iter().map(|byte| unsafe { byte.assume_init() }).collect();
        if packet::check_network(&data).is_err() {
            return Ok(None);
        }

        let (interface_index, pkttype) = link_info(&from);
        let parsed = packet::parse(&data);
        let loopback = match parsed.network() {
            Some(NetworkHeader::Ipv4(ip)) => ip.src_addr().is_loopback() || ip.dst_addr().is_loopback(),
            Some(NetworkHeader::Ipv6(ip)) => ip.src_addr().is_loopback() || ip.dst_addr().is_loopback(),
            None => false,
        };
        let address = Address {
            layer: Layer::Network,
            direction: if pkttype == PACKET_OUTGOING {
                Direction::Outbound
            } else {
                Direction::Inbound
            },
            interface_index,
            subinterface_index: 0,
            loopback,
            impostor: false,
            fragment: parsed.is_fragment(),
        };
        if address.fragment && !self.flags.contains(OpenFlags::FRAGMENTS) {
            return Ok(None);
        }
        if !self.filter.matches(&parsed, &address) {
            return Ok(None);
        }
        trace!("captured {} byte packet on interface {}", n, interface_index);
        Ok(Some((data, address)))
    }

    fn deliver(&self, data: Vec<u8>, address: Address, buffer: &mut [u8]) -> Result<(usize, Address)> {
        if data.len() > buffer.len() {
            let needed = data.len();
            *lock(&self.stashed) = Some((data, address));
            return Err(DivertError::BufferTooSmall {
                needed,
                available: buffer.len(),
            });
        }
        buffer[..data.len()].copy_from_slice(&data);
        Ok((data.len(), address))
    }
}

impl DriverHandle for RawSocketHandle {
    fn recv(&self, buffer: &mut [u8]) -> Result<(usize, Address)> {
        let socket = self.capture(buffer)?;
        loop {
            self.ensure_open()?;
            if let Some(received) = self.take_stashed(buffer)? {
                return Ok(received);
            }
            if let Some((data, address)) = self.read_frame(socket, 0)? {
                return self.deliver(data, address, buffer);
            }
        }
    }

    fn try_recv(&self, buffer: &mut [u8]) -> Result<Option<(usize, Address)>> {
        let socket = self.capture(buffer)?;
        if let Some(received) = self.take_stashed(buffer)? {
            return Ok(Some(received));
        }
        match self.read_frame(socket, MSG_DONTWAIT)? {
            Some((data, address)) => self.deliver(data, address, buffer).map(Some),
            None => Ok(None),
        }
    }

    fn send(&self, packet: &[u8], _address: &Address) -> Result<usize> {
        self.ensure_open()?;
        packet::check_network(packet)?;
        let unavailable =
            || DivertError::InvalidOperation("handle was opened without send access".to_string());

        let sent = match packet::parse(packet).network() {
            Some(NetworkHeader::Ipv4(ip)) => {
                let socket = self.inject_v4.as_ref().ok_or_else(unavailable)?;
                socket.send_to(packet, &SockAddr::from(SocketAddrV4::new(ip.dst_addr(), 0)))?
            }
            Some(NetworkHeader::Ipv6(ip)) => {
                let socket = self.inject_v6.as_ref().ok_or_else(unavailable)?;
                socket.send_to(packet, &SockAddr::from(SocketAddrV6::new(ip.dst_addr(), 0, 0, 0)))?
            }
            None => return Err(DivertError::InvalidOperation("packet has no IP header".to_string())),
        };
        trace!("injected {} byte packet", sent);
        Ok(sent)
    }

    fn try_send(&self, packet: &[u8], address: &Address) -> Result<Option<usize>> {
        self.send(packet, address).map(Some)
    }

    fn set_param(&self, param: Param, value: u64) -> Result<()> {
        self.ensure_open()?;
        let value = param.validate(value)?;
        match param {
            Param::QueueLength => self.queue_length.store(value, Ordering::Relaxed),
            Param::QueueTime => self.queue_time.store(value, Ordering::Relaxed),
        }
        Ok(())
    }

    fn param(&self, param: Param) -> Result<u64> {
        self.ensure_open()?;
        Ok(match param {
            Param::QueueLength => self.queue_length.load(Ordering::Relaxed),
            Param::QueueTime => self.queue_time.load(Ordering::Relaxed),
        })
    }

    fn close(&self) -> Result<bool> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        debug!("closed raw socket handle \"{}\"", self.filter);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{self, ChecksumFlags};
    use crate::test_vectors::DNS_REQUEST;
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_millis(20);

    fn driver() -> RawSocketDriver {
        RawSocketDriver::new().with_poll_interval(TIMEOUT)
    }

    fn open(filter: &str, flags: OpenFlags) -> Result<Arc<dyn DriverHandle>, OpenError> {
        let filter = Filter::compile(filter, Layer::Network).unwrap();
        driver().open(&filter, 0, flags)
    }

    fn skip_if_permission_error<T>(result: Result<T, OpenError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(OpenError::PermissionDenied) => {
                eprintln!("Skipping test due to insufficient permissions");
                None
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    /// A UDP datagram from 127.0.0.1 to 127.0.0.1 on `port`.
    fn loopback_datagram(port: u16) -> Vec<u8> {
        let mut packet = DNS_REQUEST.to_vec();
        packet[12..16].copy_from_slice(&[127, 0, 0, 1]);
        packet[16..20].copy_from_slice(&[127, 0, 0, 1]);
        packet[22..24].copy_from_slice(&port.to_be_bytes());
        checksum::calculate(&mut packet, ChecksumFlags::empty());
        packet
    }

    #[test]
    fn test_parse_link_info() {
        // AF_PACKET, ETH_P_IP, ifindex 3, ARPHRD_ETHER, PACKET_OUTGOING, halen 6.
        let mut raw = [0u8; 20];
        raw[..2].copy_from_slice(&17u16.to_ne_bytes());
        raw[2..4].copy_from_slice(&0x0800u16.to_be_bytes());
        raw[4..8].copy_from_slice(&3i32.to_ne_bytes());
        raw[8..10].copy_from_slice(&1u16.to_ne_bytes());
        raw[10] = PACKET_OUTGOING;
        raw[11] = 6;
        assert_eq!(parse_link_info(&raw), (3, PACKET_OUTGOING));

        raw[4..8].copy_from_slice(&(-1i32).to_ne_bytes());
        assert_eq!(parse_link_info(&raw), (0, PACKET_OUTGOING));
        assert_eq!(parse_link_info(&raw[..10]), (0, 0));
        assert_eq!(parse_link_info(&[]), (0, 0));
    }

    #[test]
    fn test_rejects_diverting_handles() {
        assert!(matches!(open("true", OpenFlags::empty()), Err(OpenError::Unsupported(_))));
        assert!(matches!(open("true", OpenFlags::DROP), Err(OpenError::Unsupported(_))));
    }

    #[test]
    fn test_rejects_other_layers() {
        let filter = Filter::compile("true", Layer::NetworkForward).unwrap();
        assert_eq!(
            driver().open(&filter, 0, OpenFlags::SNIFF).err(),
            Some(OpenError::InvalidLayer(Layer::NetworkForward))
        );
    }

    #[test]
    fn test_sniff_handle_lifecycle() {
        let handle = match skip_if_permission_error(open("udp.DstPort == 9", OpenFlags::SNIFF)) {
            Some(h) => h,
            None => return,
        };

        assert!(matches!(handle.try_recv(&mut []), Err(DivertError::EmptyBuffer)));
        let mut buffer = vec![0u8; 2048];
        assert!(handle.try_recv(&mut buffer).is_ok());
        assert_eq!(handle.param(Param::QueueTime).unwrap(), 512);
        handle.set_param(Param::QueueTime, 256).unwrap();
        assert_eq!(handle.param(Param::QueueTime).unwrap(), 256);

        assert!(handle.close().unwrap());
        assert!(!handle.close().unwrap());
        assert!(matches!(handle.recv(&mut buffer), Err(DivertError::HandleClosed)));
    }

    #[test]
    fn test_close_unblocks_recv() {
        let handle = match skip_if_permission_error(open("udp.DstPort == 9", OpenFlags::SNIFF)) {
            Some(h) => h,
            None => return,
        };
        let blocked = {
            let handle = handle.clone();
            std::thread::spawn(move || {
                let mut buffer = vec![0u8; 2048];
                handle.recv(&mut buffer)
            })
        };
        std::thread::sleep(TIMEOUT * 2);
        handle.close().unwrap();
        assert!(matches!(blocked.join().unwrap(), Err(DivertError::HandleClosed)));
    }

    #[test]
    fn test_send_only_cannot_receive() {
        let handle = match skip_if_permission_error(open("false", OpenFlags::SEND_ONLY)) {
            Some(h) => h,
            None => return,
        };
        let mut buffer = vec![0u8; 2048];
        assert!(matches!(handle.try_recv(&mut buffer), Err(DivertError::InvalidOperation(_))));
        assert!(matches!(
            handle.send(&[0u8; 8], &Address::outbound()),
            Err(DivertError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_inject_and_sniff_loopback() {
        let port = 40404;
        let filter = format!("udp.DstPort == {} and ip.SrcAddr == 127.0.0.1", port);
        let sniffer = match skip_if_permission_error(open(&filter, OpenFlags::SNIFF)) {
            Some(h) => h,
            None => return,
        };
        let injector = match skip_if_permission_error(open("false", OpenFlags::SEND_ONLY)) {
            Some(h) => h,
            None => return,
        };

        let packet = loopback_datagram(port);
        match injector.send(&packet, &Address::outbound()) {
            Ok(sent) => assert_eq!(sent, packet.len()),
            Err(e) => {
                eprintln!("Send error (might be expected): {:?}", e);
                return;
            }
        }

        let deadline = Instant::now() + Duration::from_secs(1);
        let mut buffer = vec![0u8; 2048];
        while Instant::now() < deadline {
            if let Some((n, address)) = sniffer.try_recv(&mut buffer).unwrap() {
                assert_eq!(n, packet.len());
                assert!(address.loopback);
                return;
            }
            std::thread::sleep(TIMEOUT);
        }
        eprintln!("Injected packet was not observed (might be expected)");
    }
}
