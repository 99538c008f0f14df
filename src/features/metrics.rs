//! Flow statistics over an ordered packet sequence.
//!
//! Every function applies the direction filter first and then checks the
//! minimum sample count of the filtered sequence. Timestamp deltas are plain
//! integer differences in the capture's microsecond unit.

use serde::Serialize;

use crate::error::FeatureError;
use crate::processor::{DirectionFilter, PacketRecord, TcpFlag};

/// Default gap (µs) above which an inter-arrival interval counts as idle.
pub const DEFAULT_IDLE_THRESHOLD_US: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PacketLengthStats {
    pub sum: u64,
    pub max: u32,
    pub mean: f64,
    pub variance: f64,
    pub stdev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InterarrivalStats {
    pub mean: f64,
    pub stdev: f64,
    pub max: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentSizeStats {
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IdleStats {
    pub mean: f64,
    pub min: i64,
}

#[inline]
pub fn filter_packets(
    packets: &[PacketRecord],
    direction: DirectionFilter,
) -> impl Iterator<Item = &PacketRecord> + Clone {
    packets.iter().filter(move |p| direction.accepts(p.direction))
}

fn require(actual: usize, required: usize) -> Result<(), FeatureError> {
    if actual < required {
        return Err(FeatureError::InsufficientSamples { required, actual });
    }
    Ok(())
}

/// Two-pass mean and unbiased (n-1) variance. Callers guarantee `n >= 2`.
fn mean_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (mean, ss / (n - 1.0))
}

fn deltas(packets: &[PacketRecord], direction: DirectionFilter) -> Vec<i64> {
    let timestamps: Vec<i64> = filter_packets(packets, direction)
        .map(|p| p.timestamp as i64)
        .collect();
    timestamps.windows(2).map(|w| w[1] - w[0]).collect()
}

pub fn packet_length(
    packets: &[PacketRecord],
    direction: DirectionFilter,
) -> Result<PacketLengthStats, FeatureError> {
    let sizes: Vec<u32> = filter_packets(packets, direction).map(|p| p.size).collect();
    require(sizes.len(), 2)?;

    let values: Vec<f64> = sizes.iter().map(|&s| s as f64).collect();
    let (mean, variance) = mean_variance(&values);
    Ok(PacketLengthStats {
        sum: sizes.iter().map(|&s| s as u64).sum(),
        max: sizes.iter().copied().max().unwrap_or(0),
        mean,
        variance,
        stdev: variance.sqrt(),
    })
}

/// Needs three packets: two intervals are the minimum for a sample stdev.
pub fn interarrival_time(
    packets: &[PacketRecord],
    direction: DirectionFilter,
) -> Result<InterarrivalStats, FeatureError> {
    require(filter_packets(packets, direction).count(), 3)?;

    let iats = deltas(packets, direction);
    let values: Vec<f64> = iats.iter().map(|&d| d as f64).collect();
    let (mean, variance) = mean_variance(&values);
    Ok(InterarrivalStats {
        mean,
        stdev: variance.sqrt(),
        max: iats.iter().copied().max().unwrap_or(0),
    })
}

pub fn segment_size(
    packets: &[PacketRecord],
    direction: DirectionFilter,
) -> Result<SegmentSizeStats, FeatureError> {
    let filtered = filter_packets(packets, direction);
    let count = filtered.clone().count();
    require(count, 1)?;

    let total: u64 = filtered.map(|p| p.segment_size as u64).sum();
    Ok(SegmentSizeStats { mean: total as f64 / count as f64 })
}

/// Mean and minimum of the inter-arrival gaps at or above `idle_threshold`.
/// Fails when no gap qualifies.
pub fn idle_time(
    packets: &[PacketRecord],
    direction: DirectionFilter,
    idle_threshold: u64,
) -> Result<IdleStats, FeatureError> {
    require(filter_packets(packets, direction).count(), 1)?;

    let idle: Vec<i64> = deltas(packets, direction)
        .into_iter()
        .filter(|&d| d >= 0 && d as u64 >= idle_threshold)
        .collect();
    require(idle.len(), 1)?;

    Ok(IdleStats {
        mean: idle.iter().sum::<i64>() as f64 / idle.len() as f64,
        min: idle.iter().copied().min().unwrap_or(0),
    })
}

/// Sum over packets of the bytes that are not segment payload.
pub fn header_length(packets: &[PacketRecord], direction: DirectionFilter) -> Result<u64, FeatureError> {
    let filtered = filter_packets(packets, direction);
    require(filtered.clone().count(), 1)?;

    Ok(filtered
        .map(|p| p.size.saturating_sub(p.segment_size) as u64)
        .sum())
}

pub fn flag_count(packets: &[PacketRecord], flag: TcpFlag, direction: DirectionFilter) -> usize {
    filter_packets(packets, direction)
        .filter(|p| p.flags.contains(flag))
        .count()
}

pub fn packet_count(packets: &[PacketRecord], direction: DirectionFilter) -> usize {
    filter_packets(packets, direction).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{FlowDirection, Protocol, TcpFlags};
    use std::net::Ipv4Addr;

    use FlowDirection::{Backward, Forward};

    fn pkt(direction: FlowDirection, timestamp: u64, size: u32, segment_size: u32, flags: &[TcpFlag]) -> PacketRecord {
        PacketRecord {
            protocol: Protocol::Tcp,
            direction,
            src_ip: Ipv4Addr::new(10, 0, 0, 2),
            dst_ip: Ipv4Addr::new(10, 0, 0, 1),
            src_port: 55555,
            dst_port: 55555,
            timestamp,
            size,
            segment_size,
            flags: flags.iter().copied().collect::<TcpFlags>(),
        }
    }

    fn three_packets() -> Vec<PacketRecord> {
        vec![
            pkt(Forward, 0, 100, 10, &[TcpFlag::Fin, TcpFlag::Syn]),
            pkt(Backward, 1, 100, 20, &[TcpFlag::Syn, TcpFlag::Rst]),
            pkt(Forward, 2, 100, 30, &[TcpFlag::Fin, TcpFlag::Rst]),
        ]
    }

    #[test]
    fn test_filter_packets() {
        let packets = three_packets();
        let forward: Vec<_> = filter_packets(&packets, DirectionFilter::Forward).collect();
        assert_eq!(forward.len(), 2);
        assert!(forward.iter().all(|p| p.direction == Forward));
        assert_eq!(filter_packets(&packets, DirectionFilter::Bidirectional).count(), 3);
    }

    #[test]
    fn test_packet_length_requires_two_samples() {
        assert_eq!(
            packet_length(&[], DirectionFilter::Bidirectional),
            Err(FeatureError::InsufficientSamples { required: 2, actual: 0 })
        );
        let packets = three_packets();
        // only one backward packet
        assert_eq!(
            packet_length(&packets, DirectionFilter::Backward),
            Err(FeatureError::InsufficientSamples { required: 2, actual: 1 })
        );
    }

    #[test]
    fn test_packet_length_uses_sample_variance() {
        let packets = vec![
            pkt(Forward, 0, 2, 0, &[]),
            pkt(Forward, 1, 4, 0, &[]),
            pkt(Backward, 2, 4, 0, &[]),
            pkt(Forward, 3, 6, 0, &[]),
        ];
        let stats = packet_length(&packets, DirectionFilter::Bidirectional).unwrap();
        assert_eq!(stats.sum, 16);
        assert_eq!(stats.max, 6);
        assert_eq!(stats.mean, 4.0);
        // squared deviations 4+0+0+4 over n-1 = 3
        assert!((stats.variance - 8.0 / 3.0).abs() < 1e-12);
        assert!((stats.stdev - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let fwd = packet_length(&packets, DirectionFilter::Forward).unwrap();
        assert_eq!(fwd.sum, 12);
        assert_eq!(fwd.variance, 4.0);
    }

    #[test]
    fn test_interarrival_time() {
        let iat = interarrival_time(&three_packets(), DirectionFilter::Bidirectional).unwrap();
        assert_eq!(iat.mean, 1.0);
        assert_eq!(iat.stdev, 0.0);
        assert_eq!(iat.max, 1);
    }

    #[test]
    fn test_interarrival_time_requires_three_packets() {
        let packets = three_packets();
        assert_eq!(
            interarrival_time(&packets, DirectionFilter::Forward),
            Err(FeatureError::InsufficientSamples { required: 3, actual: 2 })
        );
    }

    #[test]
    fn test_flag_count() {
        let packets = three_packets();
        assert_eq!(flag_count(&packets, TcpFlag::Fin, DirectionFilter::Bidirectional), 2);
        assert_eq!(flag_count(&packets, TcpFlag::Syn, DirectionFilter::Forward), 1);
        assert_eq!(flag_count(&packets, TcpFlag::Psh, DirectionFilter::Bidirectional), 0);
        assert_eq!(flag_count(&[], TcpFlag::Psh, DirectionFilter::Bidirectional), 0);
    }

    #[test]
    fn test_segment_size() {
        let packets = three_packets();
        assert_eq!(segment_size(&packets, DirectionFilter::Bidirectional).unwrap().mean, 20.0);
        assert_eq!(segment_size(&packets, DirectionFilter::Backward).unwrap().mean, 20.0);
        assert!(segment_size(&[], DirectionFilter::Bidirectional).is_err());
    }

    #[test]
    fn test_header_length() {
        let packets = three_packets();
        assert_eq!(header_length(&packets, DirectionFilter::Bidirectional), Ok(240));
        assert_eq!(header_length(&packets, DirectionFilter::Forward), Ok(160));
        assert!(header_length(&[], DirectionFilter::Backward).is_err());
    }

    #[test]
    fn test_idle_time() {
        let packets = vec![
            pkt(Forward, 0, 60, 0, &[]),
            pkt(Forward, 100, 60, 0, &[]),
            pkt(Backward, 2_100_100, 60, 0, &[]),
            pkt(Forward, 2_100_200, 60, 0, &[]),
            pkt(Forward, 3_100_200, 60, 0, &[]),
        ];
        let idle = idle_time(&packets, DirectionFilter::Bidirectional, DEFAULT_IDLE_THRESHOLD_US).unwrap();
        assert_eq!(idle.min, 1_000_000);
        assert_eq!(idle.mean, 1_550_000.0);

        // forward gaps: 100, 2_100_100, 1_000_000
        let fwd = idle_time(&packets, DirectionFilter::Forward, DEFAULT_IDLE_THRESHOLD_US).unwrap();
        assert_eq!(fwd.min, 1_000_000);
        assert_eq!(fwd.mean, 1_550_050.0);
    }

    #[test]
    fn test_idle_time_without_idle_gap_fails() {
        let packets = three_packets();
        assert_eq!(
            idle_time(&packets, DirectionFilter::Bidirectional, DEFAULT_IDLE_THRESHOLD_US),
            Err(FeatureError::InsufficientSamples { required: 1, actual: 0 })
        );
    }

    #[test]
    fn test_packet_count() {
        let packets = three_packets();
        assert_eq!(packet_count(&packets, DirectionFilter::Forward), 2);
        assert_eq!(packet_count(&packets, DirectionFilter::Backward), 1);
        assert_eq!(packet_count(&[], DirectionFilter::Bidirectional), 0);
    }
}
