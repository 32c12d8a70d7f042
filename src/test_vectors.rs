//! Canonical packets shared by the tests of every module.
//!
//! Checksums in these packets were computed independently and are correct.

/// ICMP echo request, 10.10.10.10 -> 8.8.8.8.
pub const ECHO_REQUEST: &[u8] = &[
    0x45, 0x00, 0x00, 0x3c, 0x3a, 0x1c, 0x40, 0x00, 0x80, 0x01, 0x9c, 0x81,
    0x0a, 0x0a, 0x0a, 0x0a, 0x08, 0x08, 0x08, 0x08, 0x08, 0x00, 0x4d, 0x31,
    0x00, 0x01, 0x00, 0x2a, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68,
    0x69, 0x6a, 0x6b, 0x6c, 0x6d, 0x6e, 0x6f, 0x70, 0x71, 0x72, 0x73, 0x74,
    0x75, 0x76, 0x77, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69,
];

/// HTTP GET over TCP (PSH|ACK), 10.0.0.1:40000 -> 93.184.216.34:80, odd payload length.
pub const HTTP_REQUEST: &[u8] = &[
    0x45, 0x00, 0x00, 0x62, 0x04, 0xd2, 0x40, 0x00, 0x40, 0x06, 0xf5, 0xe8,
    0x0a, 0x00, 0x00, 0x01, 0x5d, 0xb8, 0xd8, 0x22, 0x9c, 0x40, 0x00, 0x50,
    0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f, 0x70, 0x81, 0x50, 0x18, 0xfa, 0xf0,
    0xfb, 0xb3, 0x00, 0x00, 0x47, 0x45, 0x54, 0x20, 0x2f, 0x20, 0x48, 0x54,
    0x54, 0x50, 0x2f, 0x31, 0x2e, 0x31, 0x0d, 0x0a, 0x48, 0x6f, 0x73, 0x74,
    0x3a, 0x20, 0x65, 0x78, 0x61, 0x6d, 0x70, 0x6c, 0x65, 0x2e, 0x63, 0x6f,
    0x6d, 0x0d, 0x0a, 0x55, 0x73, 0x65, 0x72, 0x2d, 0x41, 0x67, 0x65, 0x6e,
    0x74, 0x3a, 0x20, 0x64, 0x69, 0x76, 0x65, 0x72, 0x74, 0x0d, 0x0a, 0x0d,
    0x0a, 0x21,
];

/// DNS query over UDP, 10.0.0.1:53000 -> 8.8.4.4:53.
pub const DNS_REQUEST: &[u8] = &[
    0x45, 0x00, 0x00, 0x3d, 0x9e, 0x21, 0x40, 0x00, 0x40, 0x11, 0x86, 0x82,
    0x0a, 0x00, 0x00, 0x01, 0x08, 0x08, 0x04, 0x04, 0xcf, 0x08, 0x00, 0x35,
    0x00, 0x29, 0xbd, 0xc1, 0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x03, 0x77, 0x77, 0x77, 0x07, 0x65, 0x78, 0x61,
    0x6d, 0x70, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, 0x00, 0x01, 0x00,
    0x01,
];

/// TCP SYN with an MSS option, [2001:db8::1]:49152 -> [2001:db8::2]:443.
pub const IPV6_TCP_SYN: &[u8] = &[
    0x60, 0x01, 0x23, 0x45, 0x00, 0x18, 0x06, 0x40, 0x20, 0x01, 0x0d, 0xb8,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
    0x20, 0x01, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x02, 0xc0, 0x00, 0x01, 0xbb, 0xde, 0xad, 0xbe, 0xef,
    0x00, 0x00, 0x00, 0x00, 0x60, 0x02, 0xff, 0xff, 0xdd, 0x6c, 0x00, 0x00,
    0x02, 0x04, 0x05, 0xa0,
];

/// ICMPv6 echo reply, 2001:4860:4860::8888 -> 2001:db8::1.
pub const IPV6_ECHO_REPLY: &[u8] = &[
    0x60, 0x01, 0x23, 0x45, 0x00, 0x28, 0x3a, 0x39, 0x20, 0x01, 0x48, 0x60,
    0x48, 0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x88, 0x88,
    0x20, 0x01, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x01, 0x81, 0x00, 0x69, 0x32, 0x0b, 0xad, 0x00, 0x07,
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x61, 0x62,
    0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6a, 0x6b, 0x6c, 0x6d, 0x6e,
    0x6f, 0x70, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76,
];

/// mDNS over UDP behind hop-by-hop, routing and destination options headers.
pub const IPV6_EXTHDRS_UDP: &[u8] = &[
    0x60, 0x01, 0x23, 0x45, 0x00, 0x46, 0x00, 0xff, 0xfe, 0x80, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
    0xff, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0xfb, 0x2b, 0x00, 0x01, 0x04, 0x00, 0x00, 0x00, 0x00,
    0x3c, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x01, 0x0d, 0xb8,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x99,
    0x11, 0x00, 0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x14, 0xe9, 0x14, 0xe9,
    0x00, 0x1e, 0x33, 0x88, 0x00, 0x00, 0x84, 0x00, 0x00, 0x00, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x2d, 0x6d, 0x64,
    0x6e, 0x73,
];

pub const ALL_VECTORS: &[(&str, &[u8])] = &[
    ("echo request", ECHO_REQUEST),
    ("http request", HTTP_REQUEST),
    ("dns request", DNS_REQUEST),
    ("ipv6 tcp syn", IPV6_TCP_SYN),
    ("ipv6 echo reply", IPV6_ECHO_REPLY),
    ("ipv6 exthdrs udp", IPV6_EXTHDRS_UDP),
];

/// Offset of the transport checksum field in each vector, paired with the
/// correct value.
pub const TRANSPORT_CHECKSUMS: &[(&[u8], usize, u16)] = &[
    (ECHO_REQUEST, 22, 0x4d31),
    (HTTP_REQUEST, 36, 0xfbb3),
    (DNS_REQUEST, 26, 0xbdc1),
    (IPV6_TCP_SYN, 56, 0xdd6c),
    (IPV6_ECHO_REPLY, 42, 0x6932),
    (IPV6_EXTHDRS_UDP, 86, 0x3388),
];

/// Filters evaluated against an outbound address, with the expected verdict.
pub const FILTER_CASES: &[(&str, &[u8], bool)] = &[
    ("icmp", ECHO_REQUEST, true),
    ("icmp.Type == 8 and ip.DstAddr == 8.8.8.8", ECHO_REQUEST, true),
    ("outbound and icmp.Code == 0", ECHO_REQUEST, true),
    ("icmp.Type == 0", ECHO_REQUEST, false),
    ("tcp", ECHO_REQUEST, false),
    ("not tcp", ECHO_REQUEST, true),
    ("tcp.DstPort == 80 and tcp.Psh", HTTP_REQUEST, true),
    ("tcp.Syn", HTTP_REQUEST, false),
    ("tcp.PayloadLength > 50", HTTP_REQUEST, true),
    ("ip.SrcAddr == 10.0.0.1 && tcp.SrcPort >= 40000", HTTP_REQUEST, true),
    ("udp.DstPort == 80", HTTP_REQUEST, false),
    ("not udp.DstPort == 80", HTTP_REQUEST, true),
    ("udp.DstPort == 53", DNS_REQUEST, true),
    ("udp.Length == 41", DNS_REQUEST, true),
    ("udp and (tcp or ip.TTL < 64)", DNS_REQUEST, false),
    ("inbound", DNS_REQUEST, false),
    ("ipv6 and tcp.Syn and not tcp.Ack", IPV6_TCP_SYN, true),
    ("tcp.DstPort == 443 and ipv6.DstAddr == 2001:db8::2", IPV6_TCP_SYN, true),
    ("ip", IPV6_TCP_SYN, false),
    ("tcp.HdrLength == 6", IPV6_TCP_SYN, true),
    ("icmpv6.Type == 129", IPV6_ECHO_REPLY, true),
    ("icmp", IPV6_ECHO_REPLY, false),
    ("ipv6.HopLimit == 57 or tcp", IPV6_ECHO_REPLY, true),
    ("udp.SrcPort == 5353 and ipv6.DstAddr == ff02::fb", IPV6_EXTHDRS_UDP, true),
    ("ipv6.NextHdr == 0", IPV6_EXTHDRS_UDP, true),
    ("ipv6.Length == 70", IPV6_EXTHDRS_UDP, true),
    ("udp.PayloadLength == 22", IPV6_EXTHDRS_UDP, true),
];

/// Filter strings that must fail validation at the network layer.
pub const INVALID_FILTERS: &[&str] = &[
    "",
    "tcp.DstPort ==",
    "tcp.Bogus == 1",
    "ip.SrcAddr == 2001:db8::1",
    "tcp.DstPort == 70000",
    "(tcp",
    "tcp)",
    "tcp and and udp",
    "udp.SrcPort == 53 53",
];
