use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::ClassifierError;
use crate::processor::{FlowRecord, Protocol};

/// Owned view of a flow, copied out of the table during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    pub protocol: Protocol,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub start_us: u64,
    pub last_us: u64,
    pub total_packets: u64,
    pub total_bytes: u64,
}

impl From<&FlowRecord> for FlowSummary {
    fn from(flow: &FlowRecord) -> Self {
        Self {
            protocol: flow.key.protocol,
            src_ip: flow.src_ip,
            dst_ip: flow.dst_ip,
            src_port: flow.src_port,
            dst_port: flow.dst_port,
            start_us: flow.flow_start_time,
            last_us: flow.flow_last_time,
            total_packets: flow.total_packets() as u64,
            total_bytes: flow.total_bytes(),
        }
    }
}

impl fmt::Display for FlowSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            self.protocol, self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// Outcome of scoring one flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "p_attack", rename_all = "snake_case")]
pub enum Prediction {
    Scored(f64),
    /// Not enough packets yet for at least one statistic.
    Unavailable,
}

/// One row of a scan: a flow and what the classifier made of it.
#[derive(Debug)]
pub struct ScanEntry {
    pub flow: FlowSummary,
    pub prediction: Result<Prediction, ClassifierError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub probability: f64,
    pub flow: FlowSummary,
}

/// Counters reported after every scan.
#[derive(Clone, Serialize, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub flow_count: u64,
    pub scored: u64,
    pub unavailable: u64,
    pub failed: u64,
    pub alerts: u64,
    pub elapsed_us: u64,
}

/// Everything a single scan produced.
#[derive(Debug)]
pub struct ScanReport {
    pub entries: Vec<ScanEntry>,
    pub alerts: Vec<Alert>,
    pub stats: ScanStats,
}
