//! Maps packets to the process that owns their local endpoint.
//!
//! The lookup itself belongs to the platform: a [`ProcessTable`] answers
//! which process holds a port and what that process is called.
//! [`process_owner`] picks the right port out of a packet and applies the
//! `SYSTEM` fallback for kernel-owned and unknown flows.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::ip::IpProtocol;
use crate::packet::{NetworkHeader, TransportHeader};

/// PIDs that belong to the kernel rather than to a user process.
pub const SYSTEM_PIDS: [u32; 2] = [0, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpFamily {
    V4,
    V6,
}

/// Connection and process tables of the host.
pub trait ProcessTable: Send + Sync {
    /// PID holding `local_port` for `protocol` over `family`, if any.
    fn owning_pid(&self, protocol: IpProtocol, family: IpFamily, local_port: u16) -> Option<u32>;

    /// Executable name of `pid`, if it can be resolved.
    fn process_name(&self, pid: u32) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessName {
    /// Kernel-owned or unresolvable.
    System,
    Named(String),
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessName::System => f.write_str("SYSTEM"),
            ProcessName::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOwner {
    pub pid: u32,
    pub name: ProcessName,
}

impl ProcessOwner {
    pub fn system(pid: u32) -> Self {
        Self {
            pid,
            name: ProcessName::System,
        }
    }

    pub fn is_system(&self) -> bool {
        self.name == ProcessName::System
    }
}

/// Resolves the process behind a TCP or UDP packet.
///
/// The local port is the source port of outbound packets and the destination
/// port of inbound ones.
///
/// # Returns
/// - `Some(ProcessOwner)` - The owner, or the `SYSTEM` sentinel when the port
///   is unowned, the PID is a kernel PID, or the process has no name
/// - `None` - If the transport carries no ports
pub fn process_owner(
    address: &Address,
    network: &NetworkHeader<'_>,
    transport: &TransportHeader<'_>,
    table: &dyn ProcessTable,
) -> Option<ProcessOwner> {
    let (protocol, src_port, dst_port) = match transport {
        TransportHeader::Tcp(tcp) => (IpProtocol::TCP, tcp.src_port(), tcp.dst_port()),
        TransportHeader::Udp(udp) => (IpProtocol::UDP, udp.src_port(), udp.dst_port()),
        TransportHeader::Icmp(_) | TransportHeader::Icmpv6(_) => return None,
    };
    let family = match network {
        NetworkHeader::Ipv4(_) => IpFamily::V4,
        NetworkHeader::Ipv6(_) => IpFamily::V6,
    };
    let local_port = if address.is_outbound() { src_port } else { dst_port };

    let Some(pid) = table.owning_pid(protocol, family, local_port) else {
        return Some(ProcessOwner::system(0));
    };
    if SYSTEM_PIDS.contains(&pid) {
        return Some(ProcessOwner::system(pid));
    }
    let name = match table.process_name(pid) {
        Some(name) if !name.is_empty() => ProcessName::Named(name),
        _ => ProcessName::System,
    };
    Some(ProcessOwner { pid, name })
}

/// An in-memory [`ProcessTable`], filled by hand.
#[derive(Debug, Clone, Default)]
pub struct StaticProcessTable {
    ports: HashMap<(IpProtocol, IpFamily, u16), u32>,
    names: HashMap<u32, String>,
}

impl StaticProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, protocol: IpProtocol, family: IpFamily, local_port: u16, pid: u32) -> &mut Self {
        self.ports.insert((protocol, family, local_port), pid);
        self
    }

    pub fn name(&mut self, pid: u32, name: impl Into<String>) -> &mut Self {
        self.names.insert(pid, name.into());
        self
    }
}

impl ProcessTable for StaticProcessTable {
    fn owning_pid(&self, protocol: IpProtocol, family: IpFamily, local_port: u16) -> Option<u32> {
        self.ports.get(&(protocol, family, local_port)).copied()
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.names.get(&pid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::parse;
    use crate::test_vectors::*;

    fn owner(vector: &[u8], address: Address, table: &StaticProcessTable) -> Option<ProcessOwner> {
        let packet = parse(vector);
        process_owner(&address, &packet.network()?, &packet.transport()?, table)
    }

    #[test]
    fn test_outbound_uses_source_port() {
        let src_port = parse(HTTP_REQUEST).tcp().unwrap().src_port();
        let mut table = StaticProcessTable::new();
        table
            .bind(IpProtocol::TCP, IpFamily::V4, src_port, 1312)
            .name(1312, "firefox");

        let found = owner(HTTP_REQUEST, Address::outbound(), &table).unwrap();
        assert_eq!(found.pid, 1312);
        assert_eq!(found.name.to_string(), "firefox");

        // Inbound looks at port 80 instead, which nobody owns.
        let inbound = owner(HTTP_REQUEST, Address::inbound(), &table).unwrap();
        assert!(inbound.is_system());
    }

    #[test]
    fn test_system_sentinel() {
        let udp = parse(DNS_REQUEST).udp().unwrap();
        let mut table = StaticProcessTable::new();
        table.bind(IpProtocol::UDP, IpFamily::V4, udp.src_port(), 4).name(4, "kernel");
        let found = owner(DNS_REQUEST, Address::outbound(), &table).unwrap();
        assert_eq!(found, ProcessOwner::system(4));
        assert_eq!(found.name.to_string(), "SYSTEM");

        let mut table = StaticProcessTable::new();
        table.bind(IpProtocol::UDP, IpFamily::V4, udp.src_port(), 900);
        let unnamed = owner(DNS_REQUEST, Address::outbound(), &table).unwrap();
        assert_eq!(unnamed.pid, 900);
        assert!(unnamed.is_system());
    }

    #[test]
    fn test_family_is_part_of_the_key() {
        let src_port = parse(IPV6_TCP_SYN).tcp().unwrap().src_port();
        let mut table = StaticProcessTable::new();
        table.bind(IpProtocol::TCP, IpFamily::V4, src_port, 77).name(77, "v4only");
        assert!(owner(IPV6_TCP_SYN, Address::outbound(), &table).unwrap().is_system());

        table.bind(IpProtocol::TCP, IpFamily::V6, src_port, 78).name(78, "v6");
        assert_eq!(owner(IPV6_TCP_SYN, Address::outbound(), &table).unwrap().pid, 78);
    }

    #[test]
    fn test_icmp_has_no_owner() {
        let table = StaticProcessTable::new();
        assert_eq!(owner(ECHO_REQUEST, Address::outbound(), &table), None);
    }
}
