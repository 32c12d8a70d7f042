//! Per-packet metadata delivered alongside every captured packet.

use serde::{Deserialize, Serialize};

/// Direction of a packet relative to the local host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Outbound = 0,
    Inbound = 1,
}

/// Interception point a handle is attached to.
///
/// Only [`Layer::Network`] and [`Layer::NetworkForward`] carry packet data; the
/// remaining layers observe events and can only be validated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Layer {
    #[default]
    Network = 0,
    NetworkForward = 1,
    Flow = 2,
    Socket = 3,
    Reflect = 4,
}

impl Layer {
    /// Whether packets captured at this layer carry IP packet bytes.
    pub fn carries_packets(self) -> bool {
        matches!(self, Layer::Network | Layer::NetworkForward)
    }

    pub fn name(self) -> &'static str {
        match self {
            Layer::Network => "NETWORK",
            Layer::NetworkForward => "NETWORK_FORWARD",
            Layer::Flow => "FLOW",
            Layer::Socket => "SOCKET",
            Layer::Reflect => "REFLECT",
        }
    }

    /// Looks up a layer by its filter-language name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Layer::Network,
            Layer::NetworkForward,
            Layer::Flow,
            Layer::Socket,
            Layer::Reflect,
        ]
        .into_iter()
        .find(|layer| layer.name().eq_ignore_ascii_case(name))
    }
}

/// Out-of-band metadata for one packet.
///
/// A receive fills in a fresh record; the same record is handed back to
/// `send` so the packet is re-injected where it was diverted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub layer: Layer,
    pub direction: Direction,
    /// Index of the network interface the packet arrived on or leaves from.
    pub interface_index: u32,
    pub subinterface_index: u32,
    pub loopback: bool,
    /// Set when the packet was injected by another handle.
    pub impostor: bool,
    pub fragment: bool,
}

impl Address {
    pub fn outbound() -> Self {
        Self {
            direction: Direction::Outbound,
            ..Default::default()
        }
    }

    pub fn inbound() -> Self {
        Self {
            direction: Direction::Inbound,
            ..Default::default()
        }
    }

    pub fn with_interface(mut self, interface_index: u32, subinterface_index: u32) -> Self {
        self.interface_index = interface_index;
        self.subinterface_index = subinterface_index;
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == Direction::Outbound
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_names() {
        assert_eq!(Layer::from_name("network_forward"), Some(Layer::NetworkForward));
        assert_eq!(Layer::from_name("REFLECT"), Some(Layer::Reflect));
        assert_eq!(Layer::from_name("transport"), None);
        assert!(Layer::Network.carries_packets());
        assert!(!Layer::Socket.carries_packets());
    }

    #[test]
    fn test_address_direction() {
        let address = Address::inbound().with_interface(7, 1);
        assert!(address.is_inbound());
        assert!(!address.is_outbound());
        assert_eq!(address.interface_index, 7);
        assert_eq!(Address::default().direction, Direction::Outbound);
    }
}
