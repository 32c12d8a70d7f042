//! An in-process interception driver.
//!
//! `LoopbackNetwork` routes packets through open handles the way the kernel
//! driver does, without touching a real network: packets handed to
//! [`LoopbackNetwork::inject`] are offered to handles in ascending priority
//! order, and whatever no handle diverts or drops comes out of
//! [`LoopbackNetwork::egress`]. It backs the crate's tests and is useful for
//! exercising diversion code without privileges.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::address::{Address, Layer};
use crate::completion::lock;
use crate::driver::{Driver, DriverHandle, OpenFlags, Param};
use crate::error::{DivertError, OpenError, Result};
use crate::filter::Filter;
use crate::packet;

/// A packet that left the simulated network, with the metadata it had when
/// it passed the last handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPacket {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub address: Address,
}

struct Queued {
    data: Vec<u8>,
    address: Address,
    queued_at: Instant,
}

struct Inbox {
    packets: VecDeque<Queued>,
    closed: bool,
}

struct Endpoint {
    id: u64,
    filter: Filter,
    priority: i16,
    flags: OpenFlags,
    inbox: Mutex<Inbox>,
    arrived: Condvar,
    queue_length: AtomicU64,
    queue_time: AtomicU64,
}

impl Endpoint {
    /// Drops packets that waited longer than the queue time.
    fn expire(&self, inbox: &mut Inbox) {
        let max_age = Duration::from_millis(self.queue_time.load(Ordering::Relaxed));
        let before = inbox.packets.len();
        inbox.packets.retain(|queued| queued.queued_at.elapsed() <= max_age);
        let expired = before - inbox.packets.len();
        if expired > 0 {
            warn!("handle {} dropped {} expired packets", self.id, expired);
        }
    }

    fn enqueue(&self, data: Vec<u8>, address: Address) {
        let mut inbox = lock(&self.inbox);
        if inbox.closed {
            return;
        }
        self.expire(&mut inbox);
        if inbox.packets.len() as u64 >= self.queue_length.load(Ordering::Relaxed) {
            warn!("handle {} queue full, dropping {} byte packet", self.id, data.len());
            return;
        }
        inbox.packets.push_back(Queued {
            data,
            address,
            queued_at: Instant::now(),
        });
        drop(inbox);
        self.arrived.notify_one();
    }

    /// Copies the oldest packet into `buffer`, leaving it queued if it does
    /// not fit.
    fn pop_into(&self, inbox: &mut Inbox, buffer: &mut [u8]) -> Result<Option<(usize, Address)>> {
        if inbox.closed {
            return Err(DivertError::HandleClosed);
        }
        self.expire(inbox);
        let Some(front) = inbox.packets.front() else {
            return Ok(None);
        };
        if front.data.len() > buffer.len() {
            return Err(DivertError::BufferTooSmall {
                needed: front.data.len(),
                available: buffer.len(),
            });
        }
        let queued = inbox.packets.pop_front().ok_or(DivertError::HandleClosed)?;
        buffer[..queued.data.len()].copy_from_slice(&queued.data);
        Ok(Some((queued.data.len(), queued.address)))
    }
}

struct Network {
    endpoints: Mutex<Vec<Arc<Endpoint>>>,
    egress: Mutex<VecDeque<CapturedPacket>>,
    next_id: AtomicU64,
}

impl Network {
    /// Offers a packet to every handle with a priority greater than
    /// `injected_by`, lowest priority value first.
    fn route(&self, data: Vec<u8>, mut address: Address, injected_by: Option<i16>) {
        let endpoints: Vec<Arc<Endpoint>> = lock(&self.endpoints).clone();
        let parsed = packet::parse(&data);
        address.impostor = injected_by.is_some();
        address.fragment = parsed.is_fragment();

        for endpoint in endpoints {
            if injected_by.is_some_and(|priority| endpoint.priority <= priority) {
                continue;
            }
            if endpoint.flags.contains(OpenFlags::SEND_ONLY)
                || endpoint.filter.layer() != address.layer
                || (address.fragment && !endpoint.flags.contains(OpenFlags::FRAGMENTS))
                || !endpoint.filter.matches(&parsed, &address)
            {
                continue;
            }

            if endpoint.flags.contains(OpenFlags::DROP) {
                trace!("handle {} dropped {} byte packet", endpoint.id, data.len());
                return;
            }
            if endpoint.flags.contains(OpenFlags::SNIFF) {
                trace!("handle {} sniffed {} byte packet", endpoint.id, data.len());
                endpoint.enqueue(data.clone(), address);
                continue;
            }
            trace!("handle {} diverted {} byte packet", endpoint.id, data.len());
            endpoint.enqueue(data, address);
            return;
        }

        trace!("{} byte packet left the network", data.len());
        lock(&self.egress).push_back(CapturedPacket { data, address });
    }

    fn detach(&self, id: u64) {
        lock(&self.endpoints).retain(|endpoint| endpoint.id != id);
    }
}

/// The in-process network and driver. Cloning yields another reference to
/// the same network.
#[derive(Clone)]
pub struct LoopbackNetwork {
    network: Arc<Network>,
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            network: Arc::new(Network {
                endpoints: Mutex::new(Vec::new()),
                egress: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Feeds a packet into the network as if the host stack produced it
    /// (outbound) or it arrived on an interface (inbound).
    pub fn inject(&self, packet: &[u8], address: Address) {
        self.network.route(packet.to_vec(), address, None);
    }

    /// Drains the packets that passed every handle.
    pub fn egress(&self) -> Vec<CapturedPacket> {
        lock(&self.network.egress).drain(..).collect()
    }

    /// Number of handles currently open.
    pub fn handle_count(&self) -> usize {
        lock(&self.network.endpoints).len()
    }
}

impl Driver for LoopbackNetwork {
    fn open(
        &self,
        filter: &Filter,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<Arc<dyn DriverHandle>, OpenError> {
        if !matches!(filter.layer(), Layer::Network | Layer::NetworkForward) {
            return Err(OpenError::InvalidLayer(filter.layer()));
        }

        let endpoint = Arc::new(Endpoint {
            id: self.network.next_id.fetch_add(1, Ordering::Relaxed),
            filter: filter.clone(),
            priority,
            flags,
            inbox: Mutex::new(Inbox {
                packets: VecDeque::new(),
                closed: false,
            }),
            arrived: Condvar::new(),
            queue_length: AtomicU64::new(Param::QueueLength.default_value()),
            queue_time: AtomicU64::new(Param::QueueTime.default_value()),
        });

        {
            let mut endpoints = lock(&self.network.endpoints);
            // Stable: equal priorities keep their opening order.
            let index = endpoints.partition_point(|other| other.priority <= priority);
            endpoints.insert(index, endpoint.clone());
        }
        debug!(
            "opened loopback handle {} (priority {}, flags {:?}, filter \"{}\")",
            endpoint.id, priority, flags, filter
        );

        Ok(Arc::new(LoopbackHandle {
            endpoint,
            network: Arc::downgrade(&self.network),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LoopbackHandle {
    endpoint: Arc<Endpoint>,
    network: Weak<Network>,
    closed: AtomicBool,
}

impl LoopbackHandle {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DivertError::HandleClosed);
        }
        Ok(())
    }

    fn check_recv(&self, buffer: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if !self.endpoint.flags.can_receive() {
            return Err(DivertError::InvalidOperation(
                "handle was opened without receive access".to_string(),
            ));
        }
        if buffer.is_empty() {
            return Err(DivertError::EmptyBuffer);
        }
        Ok(())
    }
}

impl DriverHandle for LoopbackHandle {
    fn recv(&self, buffer: &mut [u8]) -> Result<(usize, Address)> {
        self.check_recv(buffer)?;
        let endpoint = &self.endpoint;
        let mut inbox = lock(&endpoint.inbox);
        loop {
            if let Some(received) = endpoint.pop_into(&mut inbox, buffer)? {
                return Ok(received);
            }
            inbox = endpoint
                .arrived
                .wait(inbox)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    fn try_recv(&self, buffer: &mut [u8]) -> Result<Option<(usize, Address)>> {
        self.check_recv(buffer)?;
        let mut inbox = lock(&self.endpoint.inbox);
        self.endpoint.pop_into(&mut inbox, buffer)
    }

    fn send(&self, packet: &[u8], address: &Address) -> Result<usize> {
        self.ensure_open()?;
        if !self.endpoint.flags.can_send() {
            return Err(DivertError::InvalidOperation(
                "handle was opened without send access".to_string(),
            ));
        }
        packet::check_network(packet)?;
        let network = self.network.upgrade().ok_or(DivertError::HandleClosed)?;
        network.route(packet.to_vec(), *address, Some(self.endpoint.priority));
        Ok(packet.len())
    }

    fn try_send(&self, packet: &[u8], address: &Address) -> Result<Option<usize>> {
        self.send(packet, address).map(Some)
    }

    fn set_param(&self, param: Param, value: u64) -> Result<()> {
        self.ensure_open()?;
        let value = param.validate(value)?;
        match param {
            Param::QueueLength => self.endpoint.queue_length.store(value, Ordering::Relaxed),
            Param::QueueTime => self.endpoint.queue_time.store(value, Ordering::Relaxed),
        }
        Ok(())
    }

    fn param(&self, param: Param) -> Result<u64> {
        self.ensure_open()?;
        let value = match param {
            Param::QueueLength => self.endpoint.queue_length.load(Ordering::Relaxed),
            Param::QueueTime => self.endpoint.queue_time.load(Ordering::Relaxed),
        };
        Ok(value)
    }

    fn close(&self) -> Result<bool> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Some(network) = self.network.upgrade() {
            network.detach(self.endpoint.id);
        }
        let dropped = {
            let mut inbox = lock(&self.endpoint.inbox);
            inbox.closed = true;
            std::mem::take(&mut inbox.packets).len()
        };
        self.endpoint.arrived.notify_all();
        debug!("closed loopback handle {} ({} queued packets dropped)", self.endpoint.id, dropped);
        Ok(true)
    }
}
