use std::cmp::Ordering;

use crate::address::Address;
use crate::filter::parser::{CmpOp, Expr, Field, Value};
use crate::packet::ParsedPacket;

/// Walks `expr` against one packet. Short-circuits left to right.
pub(crate) fn eval(expr: &Expr, packet: &ParsedPacket<'_>, address: &Address) -> bool {
    match expr {
        Expr::Test { field, op, value } => match field_value(*field, packet, address) {
            Some(actual) => compare(actual, *op, *value),
            // The field does not exist in this packet.
            None => false,
        },
        Expr::Not(inner) => !eval(inner, packet, address),
        Expr::And(lhs, rhs) => eval(lhs, packet, address) && eval(rhs, packet, address),
        Expr::Or(lhs, rhs) => eval(lhs, packet, address) || eval(rhs, packet, address),
    }
}

fn compare(actual: Value, op: CmpOp, expected: Value) -> bool {
    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.cmp(&b),
        (Value::Ipv4(a), Value::Ipv4(b)) => u32::from(a).cmp(&u32::from(b)),
        (Value::Ipv6(a), Value::Ipv6(b)) => u128::from(a).cmp(&u128::from(b)),
        _ => return false,
    };
    match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    }
}

fn flag(set: bool) -> Option<Value> {
    Some(Value::Number(set as u64))
}

fn number(value: impl Into<u64>) -> Option<Value> {
    Some(Value::Number(value.into()))
}

fn field_value(field: Field, packet: &ParsedPacket<'_>, address: &Address) -> Option<Value> {
    match field {
        Field::True => flag(true),
        Field::False => flag(false),
        Field::Outbound => flag(address.is_outbound()),
        Field::Inbound => flag(address.is_inbound()),
        Field::IfIdx => number(address.interface_index),
        Field::SubIfIdx => number(address.subinterface_index),
        Field::Loopback => flag(address.loopback),
        Field::Impostor => flag(address.impostor),
        Field::Fragment => flag(address.fragment || packet.is_fragment()),
        Field::Layer => number(address.layer as u8),
        Field::Ip => flag(packet.ipv4().is_some()),
        Field::Ipv6 => flag(packet.ipv6().is_some()),
        Field::Icmp => flag(packet.icmp().is_some()),
        Field::Icmpv6 => flag(packet.icmpv6().is_some()),
        Field::Tcp => flag(packet.tcp().is_some()),
        Field::Udp => flag(packet.udp().is_some()),

        Field::IpHdrLength => packet.ipv4().and_then(|ip| number(ip.header_len() as u64 / 4)),
        Field::IpTos => packet.ipv4().and_then(|ip| number(ip.tos())),
        Field::IpLength => packet.ipv4().and_then(|ip| number(ip.total_len())),
        Field::IpId => packet.ipv4().and_then(|ip| number(ip.identification())),
        Field::IpDf => packet.ipv4().and_then(|ip| flag(ip.dont_fragment())),
        Field::IpMf => packet.ipv4().and_then(|ip| flag(ip.more_fragments())),
        Field::IpFragOff => packet.ipv4().and_then(|ip| number(ip.fragment_offset())),
        Field::IpTtl => packet.ipv4().and_then(|ip| number(ip.ttl())),
        Field::IpProtocol => packet.ipv4().and_then(|ip| number(u8::from(ip.protocol()))),
        Field::IpChecksum => packet.ipv4().and_then(|ip| number(ip.checksum())),
        Field::IpSrcAddr => packet.ipv4().map(|ip| Value::Ipv4(ip.src_addr())),
        Field::IpDstAddr => packet.ipv4().map(|ip| Value::Ipv4(ip.dst_addr())),

        Field::Ipv6TrafficClass => packet.ipv6().and_then(|ip| number(ip.traffic_class())),
        Field::Ipv6FlowLabel => packet.ipv6().and_then(|ip| number(ip.flow_label())),
        Field::Ipv6Length => packet.ipv6().and_then(|ip| number(ip.payload_len())),
        Field::Ipv6NextHdr => packet.ipv6().and_then(|ip| number(u8::from(ip.next_header()))),
        Field::Ipv6HopLimit => packet.ipv6().and_then(|ip| number(ip.hop_limit())),
        Field::Ipv6SrcAddr => packet.ipv6().map(|ip| Value::Ipv6(ip.src_addr())),
        Field::Ipv6DstAddr => packet.ipv6().map(|ip| Value::Ipv6(ip.dst_addr())),

        Field::IcmpType => packet.icmp().and_then(|icmp| number(icmp.msg_type())),
        Field::IcmpCode => packet.icmp().and_then(|icmp| number(icmp.code())),
        Field::IcmpChecksum => packet.icmp().and_then(|icmp| number(icmp.checksum())),
        Field::IcmpBody => packet.icmp().and_then(|icmp| number(icmp.body())),

        Field::Icmpv6Type => packet.icmpv6().and_then(|icmp| number(icmp.msg_type())),
        Field::Icmpv6Code => packet.icmpv6().and_then(|icmp| number(icmp.code())),
        Field::Icmpv6Checksum => packet.icmpv6().and_then(|icmp| number(icmp.checksum())),
        Field::Icmpv6Body => packet.icmpv6().and_then(|icmp| number(icmp.body())),

        Field::TcpSrcPort => packet.tcp().and_then(|tcp| number(tcp.src_port())),
        Field::TcpDstPort => packet.tcp().and_then(|tcp| number(tcp.dst_port())),
        Field::TcpSeqNum => packet.tcp().and_then(|tcp| number(tcp.seq_number())),
        Field::TcpAckNum => packet.tcp().and_then(|tcp| number(tcp.ack_number())),
        Field::TcpHdrLength => packet.tcp().and_then(|tcp| number(tcp.header_len() as u64 / 4)),
        Field::TcpUrg => packet.tcp().and_then(|tcp| flag(tcp.flags().urg)),
        Field::TcpAck => packet.tcp().and_then(|tcp| flag(tcp.flags().ack)),
        Field::TcpPsh => packet.tcp().and_then(|tcp| flag(tcp.flags().psh)),
        Field::TcpRst => packet.tcp().and_then(|tcp| flag(tcp.flags().rst)),
        Field::TcpSyn => packet.tcp().and_then(|tcp| flag(tcp.flags().syn)),
        Field::TcpFin => packet.tcp().and_then(|tcp| flag(tcp.flags().fin)),
        Field::TcpWindow => packet.tcp().and_then(|tcp| number(tcp.window_size())),
        Field::TcpChecksum => packet.tcp().and_then(|tcp| number(tcp.checksum())),
        Field::TcpUrgPtr => packet.tcp().and_then(|tcp| number(tcp.urgent_pointer())),
        Field::TcpPayloadLength => packet.tcp().and_then(|tcp| number(tcp.payload().len() as u64)),

        Field::UdpSrcPort => packet.udp().and_then(|udp| number(udp.src_port())),
        Field::UdpDstPort => packet.udp().and_then(|udp| number(udp.dst_port())),
        Field::UdpLength => packet.udp().and_then(|udp| number(udp.length())),
        Field::UdpChecksum => packet.udp().and_then(|udp| number(udp.checksum())),
        Field::UdpPayloadLength => packet.udp().and_then(|udp| number(udp.payload().len() as u64)),
    }
}
