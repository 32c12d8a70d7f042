//! User-space evaluator for the driver's filter language.
//!
//! A filter is a boolean expression over packet and metadata fields:
//!
//! ```text
//! outbound and (tcp.DstPort == 80 or udp.DstPort == 53)
//! ip.DstAddr == 8.8.8.8 && !icmp
//! ```
//!
//! Comparisons are `==` (or `=`), `!=`, `<`, `<=`, `>` and `>=`; `not` binds
//! tighter than `and`, which binds tighter than `or`. A bare field is true
//! when non-zero. A comparison on a field the packet does not have (say
//! `tcp.DstPort` on a UDP packet) is false, and `not` inverts that as usual.
//! Field names and keywords are matched case-insensitively.

mod eval;
mod lexer;
mod parser;

use std::fmt;

use crate::address::{Address, Layer};
use crate::error::{DivertError, FilterError, Result};
use crate::packet::{self, ParsedPacket};

/// A filter compiled for one layer.
///
/// Compiling validates syntax, field names, literal types and ranges, and
/// whether each field exists at the layer. A compiled filter can then be
/// evaluated any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    text: String,
    layer: Layer,
    expr: parser::Expr,
}

impl Filter {
    /// Compiles `text` for `layer`, reporting the first error found.
    pub fn compile(text: &str, layer: Layer) -> Result<Filter, FilterError> {
        let expr = parser::parse(text, layer)?;
        Ok(Filter {
            text: text.to_string(),
            layer,
            expr,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Tests an already parsed packet. Drivers call this for every packet
    /// they see, so it never fails: a packet without an IP header has no
    /// protocol fields and is matched on its metadata alone.
    pub fn matches(&self, packet: &ParsedPacket<'_>, address: &Address) -> bool {
        eval::eval(&self.expr, packet, address)
    }

    /// Parses `packet` and tests it against the filter.
    ///
    /// # Returns
    /// - `Ok(bool)` - Whether the packet matches
    /// - `Err(DivertError)` - If the filter's layer carries no packets, or
    ///   the packet has no valid IPv4 or IPv6 header
    pub fn evaluate(&self, packet: &[u8], address: &Address) -> Result<bool> {
        if !self.layer.carries_packets() {
            return Err(DivertError::InvalidOperation(format!(
                "filters at layer {} cannot be evaluated against packets",
                self.layer.name()
            )));
        }
        packet::check_network(packet)?;
        Ok(self.matches(&packet::parse(packet), address))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Checks that `text` is a well-formed filter for `layer`.
pub fn validate(text: &str, layer: Layer) -> Result<(), FilterError> {
    parser::parse(text, layer).map(|_| ())
}

/// Compiles `text` and evaluates it against one packet.
pub fn evaluate(text: &str, layer: Layer, packet: &[u8], address: &Address) -> Result<bool> {
    Filter::compile(text, layer)?.evaluate(packet, address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PacketError;
    use crate::test_vectors::*;

    #[test]
    fn test_evaluate_filter_cases() {
        for &(filter, vector, expected) in FILTER_CASES {
            assert!(validate(filter, Layer::Network).is_ok(), "{filter}");
            let result = evaluate(filter, Layer::Network, vector, &Address::outbound()).unwrap();
            assert_eq!(result, expected, "{filter}");
        }
    }

    #[test]
    fn test_validate_independent_of_packet() {
        for filter in INVALID_FILTERS {
            let error = validate(filter, Layer::Network).unwrap_err();
            assert!(error.position <= filter.len(), "{filter:?}");
            assert!(evaluate(filter, Layer::Network, DNS_REQUEST, &Address::outbound()).is_err());
        }
    }

    #[test]
    fn test_evaluate_rejects_bad_packets() {
        let filter = Filter::compile("udp", Layer::Network).unwrap();
        assert!(matches!(
            filter.evaluate(&DNS_REQUEST[..10], &Address::outbound()),
            Err(DivertError::InvalidPacket(PacketError::Truncated))
        ));
        assert!(matches!(
            filter.evaluate(&[], &Address::outbound()),
            Err(DivertError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_evaluate_rejects_event_layers() {
        let filter = Filter::compile("tcp", Layer::Flow).unwrap();
        assert!(matches!(
            filter.evaluate(HTTP_REQUEST, &Address::outbound()),
            Err(DivertError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_filter_reuse() {
        let filter = Filter::compile("tcp.DstPort == 80 or udp.DstPort == 53", Layer::Network).unwrap();
        assert_eq!(filter.to_string(), "tcp.DstPort == 80 or udp.DstPort == 53");
        assert_eq!(filter.layer(), Layer::Network);
        let address = Address::outbound();
        assert!(filter.evaluate(HTTP_REQUEST, &address).unwrap());
        assert!(filter.evaluate(DNS_REQUEST, &address).unwrap());
        assert!(!filter.evaluate(ECHO_REQUEST, &address).unwrap());
        assert!(!filter.matches(&packet::parse(&[]), &address));
    }
}
