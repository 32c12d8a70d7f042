use std::net::{Ipv4Addr, Ipv6Addr};

use crate::address::Layer;
use crate::error::FilterError;
use crate::filter::lexer::{Token, TokenKind, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    True,
    False,
    Outbound,
    Inbound,
    IfIdx,
    SubIfIdx,
    Loopback,
    Impostor,
    Fragment,
    Layer,
    Ip,
    Ipv6,
    Icmp,
    Icmpv6,
    Tcp,
    Udp,
    IpHdrLength,
    IpTos,
    IpLength,
    IpId,
    IpDf,
    IpMf,
    IpFragOff,
    IpTtl,
    IpProtocol,
    IpChecksum,
    IpSrcAddr,
    IpDstAddr,
    Ipv6TrafficClass,
    Ipv6FlowLabel,
    Ipv6Length,
    Ipv6NextHdr,
    Ipv6HopLimit,
    Ipv6SrcAddr,
    Ipv6DstAddr,
    IcmpType,
    IcmpCode,
    IcmpChecksum,
    IcmpBody,
    Icmpv6Type,
    Icmpv6Code,
    Icmpv6Checksum,
    Icmpv6Body,
    TcpSrcPort,
    TcpDstPort,
    TcpSeqNum,
    TcpAckNum,
    TcpHdrLength,
    TcpUrg,
    TcpAck,
    TcpPsh,
    TcpRst,
    TcpSyn,
    TcpFin,
    TcpWindow,
    TcpChecksum,
    TcpUrgPtr,
    TcpPayloadLength,
    UdpSrcPort,
    UdpDstPort,
    UdpLength,
    UdpChecksum,
    UdpPayloadLength,
}

/// What a field compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    /// An unsigned integer of the given bit width.
    Number(u32),
    Ipv4Addr,
    Ipv6Addr,
    Layer,
}

const FIELDS: &[(&str, Field, FieldKind)] = &[
    ("true", Field::True, FieldKind::Number(1)),
    ("false", Field::False, FieldKind::Number(1)),
    ("outbound", Field::Outbound, FieldKind::Number(1)),
    ("inbound", Field::Inbound, FieldKind::Number(1)),
    ("ifIdx", Field::IfIdx, FieldKind::Number(32)),
    ("subIfIdx", Field::SubIfIdx, FieldKind::Number(32)),
    ("loopback", Field::Loopback, FieldKind::Number(1)),
    ("impostor", Field::Impostor, FieldKind::Number(1)),
    ("fragment", Field::Fragment, FieldKind::Number(1)),
    ("layer", Field::Layer, FieldKind::Layer),
    ("ip", Field::Ip, FieldKind::Number(1)),
    ("ipv6", Field::Ipv6, FieldKind::Number(1)),
    ("icmp", Field::Icmp, FieldKind::Number(1)),
    ("icmpv6", Field::Icmpv6, FieldKind::Number(1)),
    ("tcp", Field::Tcp, FieldKind::Number(1)),
    ("udp", Field::Udp, FieldKind::Number(1)),
    ("ip.HdrLength", Field::IpHdrLength, FieldKind::Number(4)),
    ("ip.TOS", Field::IpTos, FieldKind::Number(8)),
    ("ip.Length", Field::IpLength, FieldKind::Number(16)),
    ("ip.Id", Field::IpId, FieldKind::Number(16)),
    ("ip.DF", Field::IpDf, FieldKind::Number(1)),
    ("ip.MF", Field::IpMf, FieldKind::Number(1)),
    ("ip.FragOff", Field::IpFragOff, FieldKind::Number(13)),
    ("ip.TTL", Field::IpTtl, FieldKind::Number(8)),
    ("ip.Protocol", Field::IpProtocol, FieldKind::Number(8)),
    ("ip.Checksum", Field::IpChecksum, FieldKind::Number(16)),
    ("ip.SrcAddr", Field::IpSrcAddr, FieldKind::Ipv4Addr),
    ("ip.DstAddr", Field::IpDstAddr, FieldKind::Ipv4Addr),
    ("ipv6.TrafficClass", Field::Ipv6TrafficClass, FieldKind::Number(8)),
    ("ipv6.FlowLabel", Field::Ipv6FlowLabel, FieldKind::Number(20)),
    ("ipv6.Length", Field::Ipv6Length, FieldKind::Number(16)),
    ("ipv6.NextHdr", Field::Ipv6NextHdr, FieldKind::Number(8)),
    ("ipv6.HopLimit", Field::Ipv6HopLimit, FieldKind::Number(8)),
    ("ipv6.SrcAddr", Field::Ipv6SrcAddr, FieldKind::Ipv6Addr),
    ("ipv6.DstAddr", Field::Ipv6DstAddr, FieldKind::Ipv6Addr),
    ("icmp.Type", Field::IcmpType, FieldKind::Number(8)),
    ("icmp.Code", Field::IcmpCode, FieldKind::Number(8)),
    ("icmp.Checksum", Field::IcmpChecksum, FieldKind::Number(16)),
    ("icmp.Body", Field::IcmpBody, FieldKind::Number(32)),
    ("icmpv6.Type", Field::Icmpv6Type, FieldKind::Number(8)),
    ("icmpv6.Code", Field::Icmpv6Code, FieldKind::Number(8)),
    ("icmpv6.Checksum", Field::Icmpv6Checksum, FieldKind::Number(16)),
    ("icmpv6.Body", Field::Icmpv6Body, FieldKind::Number(32)),
    ("tcp.SrcPort", Field::TcpSrcPort, FieldKind::Number(16)),
    ("tcp.DstPort", Field::TcpDstPort, FieldKind::Number(16)),
    ("tcp.SeqNum", Field::TcpSeqNum, FieldKind::Number(32)),
    ("tcp.AckNum", Field::TcpAckNum, FieldKind::Number(32)),
    ("tcp.HdrLength", Field::TcpHdrLength, FieldKind::Number(4)),
    ("tcp.Urg", Field::TcpUrg, FieldKind::Number(1)),
    ("tcp.Ack", Field::TcpAck, FieldKind::Number(1)),
    ("tcp.Psh", Field::TcpPsh, FieldKind::Number(1)),
    ("tcp.Rst", Field::TcpRst, FieldKind::Number(1)),
    ("tcp.Syn", Field::TcpSyn, FieldKind::Number(1)),
    ("tcp.Fin", Field::TcpFin, FieldKind::Number(1)),
    ("tcp.Window", Field::TcpWindow, FieldKind::Number(16)),
    ("tcp.Checksum", Field::TcpChecksum, FieldKind::Number(16)),
    ("tcp.UrgPtr", Field::TcpUrgPtr, FieldKind::Number(16)),
    ("tcp.PayloadLength", Field::TcpPayloadLength, FieldKind::Number(16)),
    ("udp.SrcPort", Field::UdpSrcPort, FieldKind::Number(16)),
    ("udp.DstPort", Field::UdpDstPort, FieldKind::Number(16)),
    ("udp.Length", Field::UdpLength, FieldKind::Number(16)),
    ("udp.Checksum", Field::UdpChecksum, FieldKind::Number(16)),
    ("udp.PayloadLength", Field::UdpPayloadLength, FieldKind::Number(16)),
];

impl Field {
    fn lookup(name: &str) -> Option<(Field, FieldKind)> {
        FIELDS
            .iter()
            .find(|(field_name, _, _)| field_name.eq_ignore_ascii_case(name))
            .map(|&(_, field, kind)| (field, kind))
    }

    /// Whether the field can be tested by a filter opened at `layer`.
    fn available_at(self, layer: Layer) -> bool {
        match layer {
            Layer::Network => true,
            Layer::NetworkForward => !matches!(self, Field::Outbound | Field::Inbound),
            Layer::Flow | Layer::Socket | Layer::Reflect => matches!(
                self,
                Field::True
                    | Field::False
                    | Field::Outbound
                    | Field::Inbound
                    | Field::Loopback
                    | Field::Layer
                    | Field::Ip
                    | Field::Ipv6
                    | Field::Icmp
                    | Field::Icmpv6
                    | Field::Tcp
                    | Field::Udp
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Value {
    Number(u64),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expr {
    Test { field: Field, op: CmpOp, value: Value },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Longest filter accepted, in tokens (the trailing `End` excluded).
pub(crate) const MAX_TOKENS: usize = 1024;

/// Deepest nesting of parentheses and `not` accepted.
pub(crate) const MAX_DEPTH: usize = 64;

/// Parses and type-checks filter text for `layer`.
pub(crate) fn parse(text: &str, layer: Layer) -> Result<Expr, FilterError> {
    let tokens = tokenize(text)?;
    // Keeps the left-leaning `and`/`or` chains shallow enough to evaluate and drop.
    if tokens.len() > MAX_TOKENS + 1 {
        return Err(FilterError::new(
            format!("filter too long (more than {MAX_TOKENS} tokens)"),
            tokens[MAX_TOKENS].position,
        ));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        layer,
    };

    if parser.peek().kind == TokenKind::End {
        return Err(FilterError::new("empty filter", 0));
    }
    let expr = parser.or_expr()?;
    let token = parser.peek();
    if token.kind != TokenKind::End {
        return Err(FilterError::new(
            format!("unexpected {} after expression", token.kind.describe()),
            token.position,
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    layer: Layer,
}

impl Parser {
    fn peek(&self) -> &Token {
        // `tokenize` always ends with `End`, and `advance` never moves past it.
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::End {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<Expr, FilterError> {
        let mut expr = self.and_expr()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let rhs = self.and_expr()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, FilterError> {
        let mut expr = self.unary()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let rhs = self.unary()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn enter(&mut self, position: usize) -> Result<(), FilterError> {
        if self.depth == MAX_DEPTH {
            return Err(FilterError::new(
                format!("filter nested too deeply (more than {MAX_DEPTH} levels)"),
                position,
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn unary(&mut self) -> Result<Expr, FilterError> {
        if self.peek().kind == TokenKind::Not {
            let token = self.advance();
            self.enter(token.position)?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FilterError> {
        let token = self.advance();
        match token.kind {
            TokenKind::LParen => {
                self.enter(token.position)?;
                let expr = self.or_expr()?;
                self.depth -= 1;
                let close = self.advance();
                if close.kind != TokenKind::RParen {
                    return Err(FilterError::new(
                        format!("expected ')' but found {}", close.kind.describe()),
                        close.position,
                    ));
                }
                Ok(expr)
            }
            TokenKind::Word(name) => self.test(&name, token.position),
            other => Err(FilterError::new(
                format!("expected a field but found {}", other.describe()),
                token.position,
            )),
        }
    }

    fn test(&mut self, name: &str, position: usize) -> Result<Expr, FilterError> {
        let (field, kind) = Field::lookup(name)
            .ok_or_else(|| FilterError::new(format!("unknown field '{name}'"), position))?;
        if !field.available_at(self.layer) {
            return Err(FilterError::new(
                format!("field '{name}' is not available at layer {}", self.layer.name()),
                position,
            ));
        }

        let op = match self.peek().kind {
            TokenKind::Eq => CmpOp::Eq,
            TokenKind::Ne => CmpOp::Ne,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Le => CmpOp::Le,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::Ge => CmpOp::Ge,
            _ => {
                // A bare field tests for non-zero.
                if !matches!(kind, FieldKind::Number(_)) {
                    return Err(FilterError::new(
                        format!("field '{name}' needs a comparison"),
                        position,
                    ));
                }
                return Ok(Expr::Test {
                    field,
                    op: CmpOp::Ne,
                    value: Value::Number(0),
                });
            }
        };
        self.advance();

        let token = self.advance();
        let value = literal(&token, kind)?;
        Ok(Expr::Test { field, op, value })
    }
}

fn literal(token: &Token, kind: FieldKind) -> Result<Value, FilterError> {
    let mismatch = || {
        FilterError::new(
            format!("type mismatch: {} cannot be compared here", token.kind.describe()),
            token.position,
        )
    };

    let value = match &token.kind {
        TokenKind::Number(number) => Value::Number(*number),
        TokenKind::Ipv4(addr) => Value::Ipv4(*addr),
        TokenKind::Ipv6(addr) => Value::Ipv6(*addr),
        TokenKind::Word(word) if word.eq_ignore_ascii_case("true") => Value::Number(1),
        TokenKind::Word(word) if word.eq_ignore_ascii_case("false") => Value::Number(0),
        TokenKind::Word(word) => match Layer::from_name(word) {
            Some(layer) if kind == FieldKind::Layer => Value::Number(layer as u64),
            Some(_) => return Err(mismatch()),
            None => {
                return Err(FilterError::new(
                    format!("expected a value but found {}", token.kind.describe()),
                    token.position,
                ));
            }
        },
        other => {
            return Err(FilterError::new(
                format!("expected a value but found {}", other.describe()),
                token.position,
            ));
        }
    };

    match (kind, value) {
        (FieldKind::Number(bits), Value::Number(number)) => {
            if bits < 64 && number >> bits != 0 {
                return Err(FilterError::new(
                    format!("value {number} out of range for a {bits}-bit field"),
                    token.position,
                ));
            }
        }
        (FieldKind::Layer, Value::Number(number)) => {
            if number > Layer::Reflect as u64 {
                return Err(FilterError::new(format!("unknown layer {number}"), token.position));
            }
        }
        (FieldKind::Ipv4Addr, Value::Ipv4(_)) | (FieldKind::Ipv6Addr, Value::Ipv6(_)) => {}
        _ => return Err(mismatch()),
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::INVALID_FILTERS;
    use crate::filter::validate;

    fn test(field: Field, op: CmpOp, value: Value) -> Expr {
        Expr::Test { field, op, value }
    }

    #[test]
    fn test_parse_precedence() {
        // `and` binds tighter than `or`; `not` tighter than both.
        let expr = parse("tcp or not udp and ip", Layer::Network).unwrap();
        let tcp = test(Field::Tcp, CmpOp::Ne, Value::Number(0));
        let udp = test(Field::Udp, CmpOp::Ne, Value::Number(0));
        let ip = test(Field::Ip, CmpOp::Ne, Value::Number(0));
        assert_eq!(
            expr,
            Expr::Or(
                Box::new(tcp),
                Box::new(Expr::And(Box::new(Expr::Not(Box::new(udp))), Box::new(ip)))
            )
        );
    }

    #[test]
    fn test_parse_case_insensitive() {
        let expr = parse("TCP.dstport = 80", Layer::Network).unwrap();
        assert_eq!(expr, test(Field::TcpDstPort, CmpOp::Eq, Value::Number(80)));
        assert!(parse("Layer == network_forward", Layer::Network).is_ok());
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            parse("ip.DstAddr != 8.8.8.8", Layer::Network).unwrap(),
            test(Field::IpDstAddr, CmpOp::Ne, Value::Ipv4(Ipv4Addr::new(8, 8, 8, 8)))
        );
        assert_eq!(
            parse("tcp.Syn == true", Layer::Network).unwrap(),
            test(Field::TcpSyn, CmpOp::Eq, Value::Number(1))
        );
        assert_eq!(
            parse("layer == FLOW", Layer::Network).unwrap(),
            test(Field::Layer, CmpOp::Eq, Value::Number(2))
        );
        assert!(parse("ipv6.SrcAddr >= ::1", Layer::Network).is_ok());
        assert!(parse("tcp.SeqNum == 0xffffffff", Layer::Network).is_ok());
    }

    #[test]
    fn test_parse_invalid_filters() {
        for filter in INVALID_FILTERS {
            assert!(parse(filter, Layer::Network).is_err(), "{filter:?}");
        }
    }

    #[test]
    fn test_parse_error_positions() {
        let error = parse("tcp and tcp.Bogus == 1", Layer::Network).unwrap_err();
        assert_eq!(error.position, 8);
        assert!(error.message.contains("unknown field"));

        let error = parse("(tcp", Layer::Network).unwrap_err();
        assert_eq!(error.position, 4);

        let error = parse("ip.SrcAddr == ::1", Layer::Network).unwrap_err();
        assert!(error.message.contains("type mismatch"));

        let error = parse("tcp.Syn == 2", Layer::Network).unwrap_err();
        assert!(error.message.contains("out of range"));

        let error = parse("", Layer::Network).unwrap_err();
        assert_eq!(error.message, "empty filter");

        let error = parse("tcp.DstPort == NETWORK", Layer::Network).unwrap_err();
        assert!(error.message.contains("type mismatch"));

        let error = parse("layer", Layer::Network).unwrap_err();
        assert!(error.message.contains("needs a comparison"));
    }

    #[test]
    fn test_parse_layer_availability() {
        assert!(parse("outbound", Layer::NetworkForward).is_err());
        assert!(parse("tcp.DstPort == 80", Layer::NetworkForward).is_ok());
        assert!(parse("tcp and outbound", Layer::Flow).is_ok());
        let error = parse("tcp.DstPort == 80", Layer::Socket).unwrap_err();
        assert!(error.message.contains("not available at layer SOCKET"));
    }

    #[test]
    fn test_parse_rejects_deep_nesting() {
        let error = parse(&"(".repeat(200_000), Layer::Network).unwrap_err();
        assert!(error.message.contains("too long"), "{}", error.message);

        let nested = format!("{}tcp{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        let error = parse(&nested, Layer::Network).unwrap_err();
        assert!(error.message.contains("nested too deeply"));
        assert_eq!(error.position, MAX_DEPTH);

        let negated = format!("{}true", "not ".repeat(MAX_DEPTH + 1));
        let error = parse(&negated, Layer::Network).unwrap_err();
        assert!(error.message.contains("nested too deeply"));

        assert!(validate(&format!("{}true", "not ".repeat(200_000)), Layer::Network).is_err());
        assert!(validate(&format!("{}true", "! ".repeat(200_000)), Layer::Network).is_err());
    }

    #[test]
    fn test_parse_rejects_long_chains() {
        let chain = format!("{}true", "true or ".repeat(100_000));
        let error = parse(&chain, Layer::Network).unwrap_err();
        assert!(error.message.contains("too long"));
        assert!(validate(&format!("{}tcp", "tcp and ".repeat(100_000)), Layer::Network).is_err());
    }

    #[test]
    fn test_parse_accepts_moderate_nesting() {
        let nested = format!("{}tcp{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(parse(&nested, Layer::Network).is_ok());
        assert!(parse(&format!("{}true", "not ".repeat(MAX_DEPTH)), Layer::Network).is_ok());
        assert!(parse("not (tcp and not (udp or not (icmp)))", Layer::Network).is_ok());

        // 512 comparisons joined by `or` still fit.
        let chain = vec!["tcp"; 512].join(" or ");
        assert!(parse(&chain, Layer::Network).is_ok());
    }
}
