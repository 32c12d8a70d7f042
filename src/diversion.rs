//! The diversion handle: one open filter, layer, priority and flag set on a
//! driver.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::address::{Address, Layer};
use crate::checksum::{self, ChecksumFlags};
use crate::completion::{self, IoQueue, Submission, Transfer};
use crate::driver::{self, Driver, DriverHandle, OpenFlags, Param};
use crate::error::{DivertError, FilterError, OpenError, Result};
use crate::filter::{self, Filter};
use crate::packet::{self, ParsedPacket};
use crate::process::{self, ProcessOwner, ProcessTable};

/// A packet received through [`Diversion::receive_async`], in the buffer
/// that was handed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub buffer: Vec<u8>,
    pub length: usize,
    pub address: Address,
}

impl Received {
    pub fn packet(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn packet_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.length]
    }
}

impl Transfer for Received {
    fn transferred(&self) -> usize {
        self.length
    }
}

/// An open diversion handle.
///
/// Receives and sends may be issued from several threads at once. Each
/// direction has its own FIFO of pending asynchronous operations, served by
/// a worker thread that is spawned the first time an operation cannot
/// finish on the spot. Dropping the handle closes it.
pub struct Diversion {
    handle: Arc<dyn DriverHandle>,
    filter: Filter,
    priority: i16,
    flags: OpenFlags,
    receiver: Arc<IoQueue>,
    sender: Arc<IoQueue>,
}

impl std::fmt::Debug for Diversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diversion")
            .field("filter", &self.filter.text())
            .field("layer", &self.filter.layer())
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Diversion {
    /// Creates a new handle builder.
    pub fn builder() -> DiversionBuilder {
        DiversionBuilder::new()
    }

    /// Opens a handle on `driver`.
    ///
    /// # Returns
    /// - `Ok(Diversion)` - The open handle
    /// - `Err(OpenError)` - If the filter does not compile for `layer`, the
    ///   priority or flags are out of range, or the driver refuses
    pub fn open(
        driver: &dyn Driver,
        filter: &str,
        layer: Layer,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<Diversion, OpenError> {
        let filter = Filter::compile(filter, layer)?;
        driver::validate_priority(priority)?;
        let flags = OpenFlags::validate(flags.bits())?;

        let handle = driver.open(&filter, priority, flags)?;
        debug!(
            "opened diversion \"{}\" at {} (priority {}, flags {:?})",
            filter,
            layer.name(),
            priority,
            flags
        );
        Ok(Diversion {
            receiver: IoQueue::new("recv", handle.clone()),
            sender: IoQueue::new("send", handle.clone()),
            handle,
            filter,
            priority,
            flags,
        })
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn layer(&self) -> Layer {
        self.filter.layer()
    }

    pub fn priority(&self) -> i16 {
        self.priority
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Blocks until a matching packet arrives and copies it into `buffer`.
    ///
    /// # Returns
    /// - `Ok((len, address))` - The packet length and its metadata
    /// - `Err(DivertError)` - If `buffer` is empty or too small (the packet
    ///   stays queued), the handle cannot receive, or it was closed
    ///
    /// A receive issued while asynchronous receives are pending waits its
    /// turn behind them, so packets go out in issuance order.
    pub fn receive(&self, buffer: &mut [u8]) -> Result<(usize, Address)> {
        if buffer.is_empty() {
            return Err(DivertError::EmptyBuffer);
        }
        let lane = self.receiver.lock();
        if lane.is_closed() {
            return Err(DivertError::HandleClosed);
        }
        if lane.is_idle() {
            drop(lane);
            return self.handle.recv(buffer);
        }

        let (completer, token) = completion::pending();
        let mut owned = vec![0u8; buffer.len()];
        lane.push(Box::new(move |handle: &dyn DriverHandle| {
            let result = handle.recv(&mut owned).map(|(length, address)| Received {
                buffer: owned,
                length,
                address,
            });
            completer.complete(result);
        }))?;
        token.join()?;
        match token.take() {
            Some(Ok(received)) => {
                buffer[..received.length].copy_from_slice(received.packet());
                Ok((received.length, received.address))
            }
            Some(Err(e)) => Err(e),
            None => Err(DivertError::InvalidOperation(
                "queued receive finished without a packet".to_string(),
            )),
        }
    }

    /// Starts receiving into `buffer`.
    ///
    /// Completes on the spot when a packet is already waiting and no earlier
    /// asynchronous receive is still pending; otherwise returns a token that
    /// completes with the next packet in issuance order.
    pub fn receive_async(&self, mut buffer: Vec<u8>) -> Result<Submission<Received>> {
        if buffer.is_empty() {
            return Err(DivertError::EmptyBuffer);
        }
        let lane = self.receiver.lock();
        if lane.is_closed() {
            return Err(DivertError::HandleClosed);
        }
        if lane.is_idle() {
            if let Some((length, address)) = self.handle.try_recv(&mut buffer)? {
                return Ok(Submission::Ready(Received {
                    buffer,
                    length,
                    address,
                }));
            }
        }

        let (completer, token) = completion::pending();
        lane.push(Box::new(move |handle: &dyn DriverHandle| {
            let result = handle
                .recv(&mut buffer)
                .map(|(length, address)| Received {
                    buffer,
                    length,
                    address,
                });
            completer.complete(result);
        }))?;
        Ok(Submission::Pending(token))
    }

    /// Injects `packet` as described by `address`.
    pub fn send(&self, packet: &[u8], address: &Address) -> Result<usize> {
        self.handle.send(packet, address)
    }

    /// Starts injecting `packet`. The packet is copied only if the send has
    /// to wait behind earlier ones.
    pub fn send_async(&self, packet: &[u8], address: &Address) -> Result<Submission<usize>> {
        let lane = self.sender.lock();
        if lane.is_closed() {
            return Err(DivertError::HandleClosed);
        }
        if lane.is_idle() {
            if let Some(length) = self.handle.try_send(packet, address)? {
                return Ok(Submission::Ready(length));
            }
        }

        let (completer, token) = completion::pending();
        let packet = packet.to_vec();
        let address = *address;
        lane.push(Box::new(move |handle: &dyn DriverHandle| {
            completer.complete(handle.send(&packet, &address));
        }))?;
        Ok(Submission::Pending(token))
    }

    pub fn set_param(&self, param: Param, value: u64) -> Result<()> {
        self.handle.set_param(param, value)
    }

    pub fn param(&self, param: Param) -> Result<u64> {
        self.handle.param(param)
    }

    /// Releases the driver handle and fails every pending operation with
    /// [`DivertError::HandleClosed`].
    ///
    /// The pending operations fail even when the driver reports an error
    /// while releasing; that error is returned afterwards.
    ///
    /// # Returns
    /// - `Ok(true)` - This call closed the handle
    /// - `Ok(false)` - The handle was already closed
    /// - `Err(DivertError)` - The driver failed to release the handle
    pub fn close(&self) -> Result<bool> {
        let released = self.handle.close();
        // A worker blocked in a driver that did not close may never return.
        let join_workers = released.is_ok();
        self.receiver.close(join_workers);
        self.sender.close(join_workers);
        let released = released?;
        if released {
            debug!("closed diversion \"{}\"", self.filter);
        }
        Ok(released)
    }

    /// Recomputes the checksums of an outbound packet before re-injection.
    ///
    /// Inbound packets, and every packet of a handle opened with
    /// [`OpenFlags::NO_CHECKSUM`], are left alone.
    ///
    /// # Returns
    /// The number of checksums written
    pub fn calculate_checksums(&self, packet: &mut [u8], address: &Address, flags: ChecksumFlags) -> usize {
        if !address.is_outbound() || self.flags.contains(OpenFlags::NO_CHECKSUM) {
            return 0;
        }
        checksum::calculate(packet, flags)
    }

    /// Decomposes a packet into header views.
    pub fn parse(packet: &[u8]) -> ParsedPacket<'_> {
        packet::parse(packet)
    }

    pub fn validate_filter(filter: &str, layer: Layer) -> Result<(), FilterError> {
        filter::validate(filter, layer)
    }

    pub fn evaluate_filter(filter: &str, layer: Layer, packet: &[u8], address: &Address) -> Result<bool> {
        filter::evaluate(filter, layer, packet, address)
    }

    /// Looks up the process that owns a TCP or UDP packet's local port.
    ///
    /// Returns `None` for packets without a valid IP header or without ports.
    pub fn process_owner(packet: &[u8], address: &Address, table: &dyn ProcessTable) -> Option<ProcessOwner> {
        let parsed = packet::parse(packet);
        process::process_owner(address, &parsed.network()?, &parsed.transport()?, table)
    }
}

impl Drop for Diversion {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("error closing diversion \"{}\": {}", self.filter, e);
        }
    }
}

/// Builder for opening a [`Diversion`].
///
/// Only the filter is required; the layer defaults to
/// [`Layer::Network`], the priority to 0 and the flags to none.
#[derive(Debug, Default)]
pub struct DiversionBuilder {
    filter: Option<String>,
    layer: Option<Layer>,
    priority: Option<i16>,
    flags: Option<OpenFlags>,
    queue_length: Option<u64>,
    queue_time: Option<u64>,
}

impl DiversionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Sets [`Param::QueueLength`] right after opening.
    pub fn queue_length(mut self, packets: u64) -> Self {
        self.queue_length = Some(packets);
        self
    }

    /// Sets [`Param::QueueTime`] right after opening.
    pub fn queue_time(mut self, millis: u64) -> Self {
        self.queue_time = Some(millis);
        self
    }

    /// Opens the handle on `driver`.
    ///
    /// # Returns
    /// - `Ok(Diversion)` - The open handle with its parameters applied
    /// - `Err(DivertError)` - If the filter is missing, opening fails, or a
    ///   queue parameter is out of range
    pub fn open(self, driver: &dyn Driver) -> Result<Diversion> {
        let filter = self
            .filter
            .ok_or_else(|| OpenError::InvalidFilter(FilterError::new("no filter set", 0)))?;
        let diversion = Diversion::open(
            driver,
            &filter,
            self.layer.unwrap_or_default(),
            self.priority.unwrap_or(0),
            self.flags.unwrap_or_default(),
        )?;
        if let Some(packets) = self.queue_length {
            diversion.set_param(Param::QueueLength, packets)?;
        }
        if let Some(millis) = self.queue_time {
            diversion.set_param(Param::QueueTime, millis)?;
        }
        Ok(diversion)
    }
}

/// Open parameters in a serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversionConfig {
    pub filter: String,
    pub layer: Layer,
    pub priority: i16,
    pub flags: OpenFlags,
    pub queue_length: Option<u64>,
    pub queue_time: Option<u64>,
}

impl Default for DiversionConfig {
    fn default() -> Self {
        Self {
            filter: "true".to_string(),
            layer: Layer::Network,
            priority: 0,
            flags: OpenFlags::empty(),
            queue_length: None,
            queue_time: None,
        }
    }
}

impl DiversionConfig {
    pub fn builder(&self) -> DiversionBuilder {
        let mut builder = Diversion::builder()
            .filter(self.filter.clone())
            .layer(self.layer)
            .priority(self.priority)
            .flags(self.flags);
        if let Some(packets) = self.queue_length {
            builder = builder.queue_length(packets);
        }
        if let Some(millis) = self.queue_time {
            builder = builder.queue_time(millis);
        }
        builder
    }

    pub fn open(&self, driver: &dyn Driver) -> Result<Diversion> {
        self.builder().open(driver)
    }
}
