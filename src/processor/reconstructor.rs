use etherparse::{LaxPacketHeaders, NetHeaders, TransportHeader};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::flow::{FlowDirection, FlowKey, PacketRecord, Protocol, TcpFlags};
use super::table::FlowTable;

const UDP_HEADER_LEN: u32 = 8;

/// Link layer the packet source delivers frames in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkLayer {
    #[default]
    Ethernet,
    RawIp,
}

/// One frame as handed over by the packet source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Capture timestamp in microseconds.
    pub timestamp: u64,
    /// Length on the wire; may exceed `data.len()` for truncated captures.
    pub wire_len: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(timestamp: u64, data: Vec<u8>) -> Self {
        Self { timestamp, wire_len: data.len() as u32, data }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub dropped: u64,
}

/// Turns raw frames into packet records and files them into the flow table.
pub struct FlowReconstructor {
    table: Arc<FlowTable>,
    local_addr: Ipv4Addr,
    link: LinkLayer,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl FlowReconstructor {
    pub fn new(table: Arc<FlowTable>, local_addr: Ipv4Addr, link: LinkLayer) -> Self {
        Self {
            table,
            local_addr,
            link,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn table(&self) -> &Arc<FlowTable> {
        &self.table
    }

    /// Ingests one frame. Anything that is not IPv4 carrying TCP or UDP is
    /// counted as dropped and otherwise ignored.
    pub fn ingest(&self, frame: &RawFrame) {
        let Some(packet) = self.parse_packet(frame.timestamp, frame.wire_len, &frame.data) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let key = FlowKey::new(
            packet.protocol,
            packet.src_ip,
            packet.dst_ip,
            packet.src_port,
            packet.dst_port,
            packet.direction,
        );
        if self.table.append(key, packet) {
            trace!(flow = %key, "new flow");
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn parse_packet(&self, timestamp: u64, wire_len: u32, data: &[u8]) -> Option<PacketRecord> {
        // Lax parsing keeps snaplen-truncated frames: only the headers have to
        // be complete, segment size still comes from the IPv4 total length.
        let parsed = match self.link {
            LinkLayer::Ethernet => LaxPacketHeaders::from_ethernet(data).ok()?,
            LinkLayer::RawIp => LaxPacketHeaders::from_ip(data).ok()?,
        };

        let (src_ip, dst_ip, ip_header_len, ip_total_len) = match &parsed.net {
            Some(NetHeaders::Ipv4(ipv4, _)) => (
                Ipv4Addr::from(ipv4.source),
                Ipv4Addr::from(ipv4.destination),
                ipv4.ihl() as u32 * 4,
                ipv4.total_len as u32,
            ),
            _ => return None,
        };

        let (protocol, src_port, dst_port, flags, transport_len) = match &parsed.transport {
            Some(TransportHeader::Tcp(tcp)) => {
                let flags = (tcp.cwr as u8) << 7
                    | (tcp.ece as u8) << 6
                    | (tcp.urg as u8) << 5
                    | (tcp.ack as u8) << 4
                    | (tcp.psh as u8) << 3
                    | (tcp.rst as u8) << 2
                    | (tcp.syn as u8) << 1
                    | (tcp.fin as u8);
                (
                    Protocol::Tcp,
                    tcp.source_port,
                    tcp.destination_port,
                    TcpFlags::from_bits(flags),
                    tcp.data_offset() as u32 * 4,
                )
            }
            Some(TransportHeader::Udp(udp)) => (
                Protocol::Udp,
                udp.source_port,
                udp.destination_port,
                TcpFlags::NONE,
                UDP_HEADER_LEN,
            ),
            _ => return None,
        };

        let direction = if dst_ip == self.local_addr {
            FlowDirection::Forward
        } else {
            FlowDirection::Backward
        };

        Some(PacketRecord {
            protocol,
            direction,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            timestamp,
            size: wire_len,
            segment_size: ip_total_len.saturating_sub(ip_header_len + transport_len),
            flags,
        })
    }
}
