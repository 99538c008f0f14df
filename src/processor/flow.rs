use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol { Tcp, Udp }

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// Direction of a single packet relative to the configured local address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowDirection { Forward, Backward }

/// Direction filter applied by the feature functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DirectionFilter {
    Forward,
    Backward,
    #[default]
    Bidirectional,
}

impl DirectionFilter {
    #[inline]
    pub fn accepts(self, direction: FlowDirection) -> bool {
        match self {
            DirectionFilter::Bidirectional => true,
            DirectionFilter::Forward => direction == FlowDirection::Forward,
            DirectionFilter::Backward => direction == FlowDirection::Backward,
        }
    }
}

/// TCP control flags, bit layout as in the TCP header (CWR is the high bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpFlag { Fin, Syn, Rst, Psh, Ack, Urg, Ece, Cwr }

impl TcpFlag {
    pub const ALL: [TcpFlag; 8] = [
        TcpFlag::Fin, TcpFlag::Syn, TcpFlag::Rst, TcpFlag::Psh,
        TcpFlag::Ack, TcpFlag::Urg, TcpFlag::Ece, TcpFlag::Cwr,
    ];

    #[inline]
    pub fn bit(self) -> u8 {
        match self {
            TcpFlag::Fin => 0x01,
            TcpFlag::Syn => 0x02,
            TcpFlag::Rst => 0x04,
            TcpFlag::Psh => 0x08,
            TcpFlag::Ack => 0x10,
            TcpFlag::Urg => 0x20,
            TcpFlag::Ece => 0x40,
            TcpFlag::Cwr => 0x80,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TcpFlag::Fin => "FIN",
            TcpFlag::Syn => "SYN",
            TcpFlag::Rst => "RST",
            TcpFlag::Psh => "PSH",
            TcpFlag::Ack => "ACK",
            TcpFlag::Urg => "URG",
            TcpFlag::Ece => "ECE",
            TcpFlag::Cwr => "CWR",
        }
    }
}

impl FromStr for TcpFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TcpFlag::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown TCP flag '{s}'"))
    }
}

/// Set of TCP flags observed on one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const NONE: TcpFlags = TcpFlags(0);

    pub fn from_bits(bits: u8) -> Self { TcpFlags(bits) }

    pub fn bits(self) -> u8 { self.0 }

    #[inline]
    pub fn contains(self, flag: TcpFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn with(self, flag: TcpFlag) -> Self {
        TcpFlags(self.0 | flag.bit())
    }
}

impl FromIterator<TcpFlag> for TcpFlags {
    fn from_iter<I: IntoIterator<Item = TcpFlag>>(iter: I) -> Self {
        iter.into_iter().fold(TcpFlags::NONE, TcpFlags::with)
    }
}

/// Canonical identity of a bidirectional conversation.
///
/// Both directions of one conversation map to the same key: forward packets
/// keep their tuple as-is, backward packets have it swapped.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowKey {
    pub protocol: Protocol,
    pub ip_a: Ipv4Addr,
    pub ip_b: Ipv4Addr,
    pub port_a: u16,
    pub port_b: u16,
}

impl FlowKey {
    pub fn new(
        protocol: Protocol,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        direction: FlowDirection,
    ) -> Self {
        match direction {
            FlowDirection::Forward => Self {
                protocol,
                ip_a: src_ip,
                ip_b: dst_ip,
                port_a: src_port,
                port_b: dst_port,
            },
            FlowDirection::Backward => Self {
                protocol,
                ip_a: dst_ip,
                ip_b: src_ip,
                port_a: dst_port,
                port_b: src_port,
            },
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{} <-> {}:{}", self.protocol, self.ip_a, self.port_a, self.ip_b, self.port_b)
    }
}

/// One observed packet. Never mutated after the reconstructor builds it.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub protocol: Protocol,
    pub direction: FlowDirection,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Arrival time in microseconds.
    pub timestamp: u64,
    /// Total wire length.
    pub size: u32,
    /// Payload length without network and transport headers.
    pub segment_size: u32,
    pub flags: TcpFlags,
}

/// Accumulated packets of one conversation.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub key: FlowKey,

    // Endpoints, fixed from the key at creation
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,

    pub flow_start_time: u64,
    pub flow_last_time: u64,

    pub packets: Vec<PacketRecord>,
}

impl FlowRecord {
    pub fn new(key: FlowKey, start_time: u64) -> Self {
        Self {
            key,
            src_ip: key.ip_a,
            dst_ip: key.ip_b,
            src_port: key.port_a,
            dst_port: key.port_b,
            flow_start_time: start_time,
            flow_last_time: start_time,
            packets: Vec::new(),
        }
    }

    pub fn push(&mut self, packet: PacketRecord) {
        self.flow_last_time = packet.timestamp;
        self.packets.push(packet);
    }

    #[inline]
    pub fn last_seen_micros(&self) -> u64 {
        self.flow_last_time
    }

    pub fn total_packets(&self) -> usize {
        self.packets.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.packets.iter().map(|p| p.size as u64).sum()
    }
}
