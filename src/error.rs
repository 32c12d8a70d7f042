use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::address::Layer;
use crate::driver::Param;

/// Reasons a header view rejects the bytes it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("Buffer too small for the fixed header")]
    Truncated,

    #[error("Invalid protocol version")]
    InvalidProtocolVersion,

    #[error("Invalid header length")]
    InvalidHeaderLength,

    #[error("Length field exceeds the buffer")]
    InvalidLength,

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(u8),
}

/// A filter string was rejected.
///
/// `position` is the byte offset into the filter text where the first error
/// was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct FilterError {
    pub message: String,
    pub position: usize,
}

impl FilterError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at position {})", self.message, self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("Layer {0:?} is not supported by this driver")]
    InvalidLayer(Layer),

    #[error("Priority {0} is outside the accepted range")]
    InvalidPriority(i16),

    #[error("Invalid flag combination: {0:#x}")]
    InvalidFlags(u64),

    #[error("Driver is not available")]
    DriverNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Unsupported by this driver: {0}")]
    Unsupported(String),

    #[error("Driver error: {0}")]
    Driver(String),
}

/// Errors returned by diversion handles, drivers and async tokens.
#[derive(Debug, Clone, Error)]
pub enum DivertError {
    #[error("Failed to open diversion: {0}")]
    Open(#[from] OpenError),

    #[error("Handle is closed")]
    HandleClosed,

    #[error("Buffer of {available} bytes is too small for a {needed} byte packet")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Supplied buffer is empty")]
    EmptyBuffer,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid value {value} for parameter {param:?}")]
    InvalidParam { param: Param, value: u64 },

    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("Invalid packet: {0}")]
    InvalidPacket(#[from] PacketError),

    #[error("IO error: {0}")]
    IoError(Arc<io::Error>),
}

impl From<io::Error> for DivertError {
    fn from(error: io::Error) -> Self {
        DivertError::IoError(Arc::new(error))
    }
}

pub type Result<T, E = DivertError> = std::result::Result<T, E>;
