pub mod columns;
pub mod metrics;

pub use columns::{
    FeatureColumn, FeatureLayout, FeatureVector, IatStat, IdleStat, LengthStat, Statistic, DEFAULT_COLUMNS,
};
pub use metrics::{
    filter_packets, flag_count, header_length, idle_time, interarrival_time, packet_count, packet_length,
    segment_size, IdleStats, InterarrivalStats, PacketLengthStats, SegmentSizeStats, DEFAULT_IDLE_THRESHOLD_US,
};
