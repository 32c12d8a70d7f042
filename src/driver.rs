//! The boundary to the packet interception driver.
//!
//! A [`Driver`] opens handles; a [`DriverHandle`] moves packets. Everything
//! above this module talks to the driver only through these two traits, so
//! the in-process [`crate::loopback`] driver and the Linux
//! raw-socket driver are interchangeable.

use std::ops::RangeInclusive;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{DivertError, OpenError, Result};
use crate::filter::Filter;

/// Lowest accepted handle priority. Lower values see packets first.
pub const MIN_PRIORITY: i16 = -1000;
/// Highest accepted handle priority.
pub const MAX_PRIORITY: i16 = 1000;

pub fn validate_priority(priority: i16) -> Result<(), OpenError> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(OpenError::InvalidPriority(priority));
    }
    Ok(())
}

bitflags! {
    /// Flags that modify how a handle intercepts packets.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct OpenFlags: u64 {
        /// Copy matching packets instead of diverting them.
        const SNIFF = 0x0001;
        /// Silently drop matching packets; the handle cannot receive.
        const DROP = 0x0002;
        /// The handle only receives.
        const RECV_ONLY = 0x0004;
        /// The handle only injects.
        const SEND_ONLY = 0x0008;
        /// Also divert IP fragments.
        const FRAGMENTS = 0x0020;
        /// Never recompute checksums of packets sent through the handle.
        const NO_CHECKSUM = 0x0400;
    }
}

impl OpenFlags {
    /// Rejects unknown bits and contradictory combinations.
    pub fn validate(bits: u64) -> Result<OpenFlags, OpenError> {
        let flags = OpenFlags::from_bits(bits).ok_or(OpenError::InvalidFlags(bits))?;
        if flags.contains(OpenFlags::SNIFF | OpenFlags::DROP)
            || flags.contains(OpenFlags::RECV_ONLY | OpenFlags::SEND_ONLY)
        {
            return Err(OpenError::InvalidFlags(bits));
        }
        Ok(flags)
    }

    pub fn can_receive(self) -> bool {
        !self.intersects(OpenFlags::SEND_ONLY | OpenFlags::DROP)
    }

    pub fn can_send(self) -> bool {
        !self.contains(OpenFlags::RECV_ONLY)
    }
}

/// Tunable per-handle driver parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Param {
    /// Maximum number of packets waiting in the receive queue.
    QueueLength = 0,
    /// Minimum time in milliseconds a packet may wait before it is dropped.
    QueueTime = 1,
}

impl Param {
    pub fn range(self) -> RangeInclusive<u64> {
        match self {
            Param::QueueLength => 1..=8192,
            Param::QueueTime => 128..=2048,
        }
    }

    pub fn default_value(self) -> u64 {
        match self {
            Param::QueueLength => 512,
            Param::QueueTime => 512,
        }
    }

    pub fn validate(self, value: u64) -> Result<u64> {
        if !self.range().contains(&value) {
            return Err(DivertError::InvalidParam { param: self, value });
        }
        Ok(value)
    }
}

/// Opens handles on an interception mechanism.
pub trait Driver: Send + Sync {
    /// Opens a handle that intercepts packets matching `filter`.
    ///
    /// The filter is already compiled for its layer; priority and flags are
    /// already range-checked.
    fn open(
        &self,
        filter: &Filter,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<Arc<dyn DriverHandle>, OpenError>;
}

/// One open interception session.
///
/// All methods take `&self` and may be called from several threads at once.
pub trait DriverHandle: Send + Sync {
    /// Blocks until a packet is available and copies it into `buffer`.
    ///
    /// Fails with [`DivertError::BufferTooSmall`] without consuming the packet
    /// when it does not fit, and with [`DivertError::HandleClosed`] once the
    /// handle is closed, including while blocked.
    fn recv(&self, buffer: &mut [u8]) -> Result<(usize, Address)>;

    /// Like [`DriverHandle::recv`] but returns `Ok(None)` instead of blocking.
    fn try_recv(&self, buffer: &mut [u8]) -> Result<Option<(usize, Address)>>;

    /// Injects `packet`, blocking until the driver accepts it.
    fn send(&self, packet: &[u8], address: &Address) -> Result<usize>;

    /// Like [`DriverHandle::send`] but returns `Ok(None)` instead of blocking.
    fn try_send(&self, packet: &[u8], address: &Address) -> Result<Option<usize>>;

    fn set_param(&self, param: Param, value: u64) -> Result<()>;

    fn param(&self, param: Param) -> Result<u64>;

    /// Releases the session. Returns `false` if it was already closed.
    fn close(&self) -> Result<bool>;
}
