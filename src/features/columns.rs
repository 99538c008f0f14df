//! Feature column catalogue and feature-vector assembly.
//!
//! A classifier is trained against a fixed, ordered list of column names. Each
//! name resolves to one statistic over one direction of the flow; resolution
//! happens once at load time so an unknown column never surfaces mid-scan.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use super::metrics::{
    flag_count, header_length, idle_time, interarrival_time, packet_count, packet_length, segment_size,
    IdleStats, InterarrivalStats, PacketLengthStats, DEFAULT_IDLE_THRESHOLD_US,
};
use crate::error::{ConfigError, FeatureError};
use crate::processor::{DirectionFilter, FlowRecord, TcpFlag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthStat { Sum, Max, Mean, Variance, Stdev }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IatStat { Mean, Stdev, Max }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStat { Mean, Min }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    PacketLength(LengthStat),
    InterarrivalTime(IatStat),
    SegmentSizeMean,
    IdleTime(IdleStat),
    HeaderLength,
    FlagCount(TcpFlag),
    PacketCount,
    DestinationPort,
}

use DirectionFilter::{Backward as BWD, Bidirectional as ALL, Forward as FWD};
use Statistic::*;

const CATALOGUE: &[(&str, Statistic, DirectionFilter)] = &[
    ("Destination_Port", DestinationPort, ALL),
    // segment size
    ("Avg_Fwd_Segment_Size", SegmentSizeMean, FWD),
    ("Avg_Bwd_Segment_Size", SegmentSizeMean, BWD),
    // packet length
    ("Total_Length_of_Fwd_Packets", PacketLength(LengthStat::Sum), FWD),
    ("Total_Length_of_Bwd_Packets", PacketLength(LengthStat::Sum), BWD),
    ("Fwd_Packet_Length_Max", PacketLength(LengthStat::Max), FWD),
    ("Fwd_Packet_Length_Mean", PacketLength(LengthStat::Mean), FWD),
    ("Fwd_Packet_Length_Std", PacketLength(LengthStat::Stdev), FWD),
    ("Bwd_Packet_Length_Max", PacketLength(LengthStat::Max), BWD),
    ("Bwd_Packet_Length_Mean", PacketLength(LengthStat::Mean), BWD),
    ("Bwd_Packet_Length_Std", PacketLength(LengthStat::Stdev), BWD),
    ("Max_Packet_Length", PacketLength(LengthStat::Max), ALL),
    ("Packet_Length_Mean", PacketLength(LengthStat::Mean), ALL),
    ("Packet_Length_Std", PacketLength(LengthStat::Stdev), ALL),
    ("Packet_Length_Variance", PacketLength(LengthStat::Variance), ALL),
    ("Average_Packet_Size", PacketLength(LengthStat::Mean), ALL),
    // inter-arrival time
    ("Flow_IAT_Mean", InterarrivalTime(IatStat::Mean), ALL),
    ("Flow_IAT_Std", InterarrivalTime(IatStat::Stdev), ALL),
    ("Flow_IAT_Max", InterarrivalTime(IatStat::Max), ALL),
    ("Fwd_IAT_Mean", InterarrivalTime(IatStat::Mean), FWD),
    ("Fwd_IAT_Std", InterarrivalTime(IatStat::Stdev), FWD),
    ("Fwd_IAT_Max", InterarrivalTime(IatStat::Max), FWD),
    ("Bwd_IAT_Mean", InterarrivalTime(IatStat::Mean), BWD),
    ("Bwd_IAT_Std", InterarrivalTime(IatStat::Stdev), BWD),
    ("Bwd_IAT_Max", InterarrivalTime(IatStat::Max), BWD),
    // idle
    ("Idle_Mean", IdleTime(IdleStat::Mean), ALL),
    ("Idle_Min", IdleTime(IdleStat::Min), ALL),
    // headers
    ("Fwd_Header_Length", HeaderLength, FWD),
    ("Fwd_Header_Length.1", HeaderLength, FWD),
    ("Bwd_Header_Length", HeaderLength, BWD),
    // counts
    ("Total_Fwd_Packets", PacketCount, FWD),
    ("Total_Backward_Packets", PacketCount, BWD),
    ("act_data_pkt_fwd", PacketCount, FWD),
    // flags
    ("FIN_Flag_Count", FlagCount(TcpFlag::Fin), ALL),
    ("SYN_Flag_Count", FlagCount(TcpFlag::Syn), ALL),
    ("RST_Flag_Count", FlagCount(TcpFlag::Rst), ALL),
    ("PSH_Flag_Count", FlagCount(TcpFlag::Psh), ALL),
    ("ACK_Flag_Count", FlagCount(TcpFlag::Ack), ALL),
    ("URG_Flag_Count", FlagCount(TcpFlag::Urg), ALL),
    ("ECE_Flag_Count", FlagCount(TcpFlag::Ece), ALL),
    ("CWE_Flag_Count", FlagCount(TcpFlag::Cwr), ALL),
    ("CWR_Flag_Count", FlagCount(TcpFlag::Cwr), ALL),
    ("Fwd_PSH_Flags", FlagCount(TcpFlag::Psh), FWD),
    ("Bwd_PSH_Flags", FlagCount(TcpFlag::Psh), BWD),
    ("Fwd_URG_Flags", FlagCount(TcpFlag::Urg), FWD),
    ("Bwd_URG_Flags", FlagCount(TcpFlag::Urg), BWD),
];

/// Column order of the bundled random-forest model.
pub const DEFAULT_COLUMNS: [&str; 17] = [
    "Avg_Bwd_Segment_Size",
    "Packet_Length_Variance",
    "Total_Length_of_Bwd_Packets",
    "Destination_Port",
    "PSH_Flag_Count",
    "Total_Length_of_Fwd_Packets",
    "Bwd_Header_Length",
    "Fwd_Packet_Length_Max",
    "act_data_pkt_fwd",
    "Fwd_Header_Length.1",
    "Fwd_IAT_Max",
    "Fwd_Packet_Length_Mean",
    "Flow_IAT_Mean",
    "Packet_Length_Std",
    "Flow_IAT_Std",
    "Average_Packet_Size",
    "Fwd_IAT_Std",
];

// Dataset exports disagree on spacing and case ("Flow IAT Mean", " flow_iat_mean")
fn normalize(name: &str) -> String {
    name.trim().replace(' ', "_").to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub statistic: Statistic,
    pub direction: DirectionFilter,
}

impl FromStr for FeatureColumn {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(name);
        CATALOGUE
            .iter()
            .find(|(known, _, _)| normalize(known) == wanted)
            .map(|&(_, statistic, direction)| FeatureColumn {
                name: name.trim().to_string(),
                statistic,
                direction,
            })
            .ok_or_else(|| ConfigError::UnknownFeature(name.to_string()))
    }
}

/// Numeric input for one flow, in the classifier's declared column order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    names: Arc<[String]>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|i| self.values[i])
    }
}

#[derive(Debug, Deserialize)]
struct ColumnFile {
    columns: Vec<String>,
}

/// Ordered, resolved feature columns plus the parameters they need.
#[derive(Debug, Clone)]
pub struct FeatureLayout {
    columns: Vec<FeatureColumn>,
    names: Arc<[String]>,
    idle_threshold: u64,
}

impl Default for FeatureLayout {
    fn default() -> Self {
        // the built-in names are all in the catalogue
        Self::from_names(DEFAULT_COLUMNS).unwrap_or_else(|_| Self::from_columns(Vec::new()))
    }
}

impl FeatureLayout {
    pub fn from_names<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = names
            .into_iter()
            .map(|n| n.as_ref().parse::<FeatureColumn>())
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(ConfigError::NoFeatures);
        }
        Ok(Self::from_columns(columns))
    }

    fn from_columns(columns: Vec<FeatureColumn>) -> Self {
        let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
        Self { columns, names, idle_threshold: DEFAULT_IDLE_THRESHOLD_US }
    }

    /// Loads `{"columns": [...]}` as shipped next to a model.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature columns: {}", path.display()))?;
        let file: ColumnFile = serde_json::from_str(&s)
            .with_context(|| format!("Failed to parse feature columns: {}", path.display()))?;
        Ok(Self::from_names(&file.columns)?)
    }

    pub fn with_idle_threshold(mut self, idle_threshold: u64) -> Self {
        self.idle_threshold = idle_threshold;
        self
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Computes every column for `flow`. The first statistic that lacks
    /// samples fails the whole vector.
    pub fn extract(&self, flow: &FlowRecord) -> Result<FeatureVector, FeatureError> {
        let mut stats = StatCache::new(flow, self.idle_threshold);
        let values = self
            .columns
            .iter()
            .map(|c| stats.value(c.statistic, c.direction))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeatureVector { names: self.names.clone(), values })
    }
}

/// Per-flow memo so that columns sharing a statistic and direction compute it
/// once. Indexed by direction filter.
struct StatCache<'a> {
    flow: &'a FlowRecord,
    idle_threshold: u64,
    length: [Option<PacketLengthStats>; 3],
    iat: [Option<InterarrivalStats>; 3],
    idle: [Option<IdleStats>; 3],
}

#[inline]
fn slot(direction: DirectionFilter) -> usize {
    match direction {
        DirectionFilter::Forward => 0,
        DirectionFilter::Backward => 1,
        DirectionFilter::Bidirectional => 2,
    }
}

impl<'a> StatCache<'a> {
    fn new(flow: &'a FlowRecord, idle_threshold: u64) -> Self {
        Self { flow, idle_threshold, length: [None; 3], iat: [None; 3], idle: [None; 3] }
    }

    fn length(&mut self, direction: DirectionFilter) -> Result<PacketLengthStats, FeatureError> {
        if let Some(s) = self.length[slot(direction)] {
            return Ok(s);
        }
        let s = packet_length(&self.flow.packets, direction)?;
        self.length[slot(direction)] = Some(s);
        Ok(s)
    }

    fn iat(&mut self, direction: DirectionFilter) -> Result<InterarrivalStats, FeatureError> {
        if let Some(s) = self.iat[slot(direction)] {
            return Ok(s);
        }
        let s = interarrival_time(&self.flow.packets, direction)?;
        self.iat[slot(direction)] = Some(s);
        Ok(s)
    }

    fn idle(&mut self, direction: DirectionFilter) -> Result<IdleStats, FeatureError> {
        if let Some(s) = self.idle[slot(direction)] {
            return Ok(s);
        }
        let s = idle_time(&self.flow.packets, direction, self.idle_threshold)?;
        self.idle[slot(direction)] = Some(s);
        Ok(s)
    }

    fn value(&mut self, statistic: Statistic, direction: DirectionFilter) -> Result<f64, FeatureError> {
        let flow = self.flow;
        let packets = &flow.packets;
        let v = match statistic {
            PacketLength(field) => {
                let s = self.length(direction)?;
                match field {
                    LengthStat::Sum => s.sum as f64,
                    LengthStat::Max => s.max as f64,
                    LengthStat::Mean => s.mean,
                    LengthStat::Variance => s.variance,
                    LengthStat::Stdev => s.stdev,
                }
            }
            InterarrivalTime(field) => {
                let s = self.iat(direction)?;
                match field {
                    IatStat::Mean => s.mean,
                    IatStat::Stdev => s.stdev,
                    IatStat::Max => s.max as f64,
                }
            }
            IdleTime(field) => {
                let s = self.idle(direction)?;
                match field {
                    IdleStat::Mean => s.mean,
                    IdleStat::Min => s.min as f64,
                }
            }
            SegmentSizeMean => segment_size(packets, direction)?.mean,
            HeaderLength => header_length(packets, direction)? as f64,
            FlagCount(flag) => flag_count(packets, flag, direction) as f64,
            PacketCount => packet_count(packets, direction) as f64,
            DestinationPort => flow.dst_port as f64,
        };
        Ok(v)
    }
}
