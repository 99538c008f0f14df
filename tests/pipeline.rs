use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use etherparse::PacketBuilder;

use flowscan::classifier::Predictor;
use flowscan::error::ClassifierError;
use flowscan::features::{FeatureLayout, FeatureVector};
use flowscan::processor::{
    ChannelSink, FeatureProcessor, FlowReconstructor, FlowTable, LinkLayer, LogSink, RawFrame, ScanEvent, ScanSink,
    Scanner,
};
use flowscan::types::{FlowSummary, Prediction, ScanReport};

const LOCAL: [u8; 4] = [192, 168, 1, 10];
const ALERT_PORT: u16 = 4444;
const BROKEN_PORT: u16 = 9999;

fn tcp(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, payload_len: usize) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([0; 6], [1; 6])
        .ipv4(src, dst, 64)
        .tcp(sport, dport, 1, 65535)
        .ack(1);
    let mut out = Vec::with_capacity(builder.size(payload_len));
    builder.write(&mut out, &vec![0u8; payload_len]).unwrap();
    out
}

/// Alternating inbound/outbound packets, starting inbound, 1ms apart.
fn conversation(remote: [u8; 4], remote_port: u16, local_port: u16, packets: usize, start: u64) -> Vec<RawFrame> {
    (0..packets)
        .map(|i| {
            let ts = start + i as u64 * 1_000;
            let data = if i % 2 == 0 {
                tcp(remote, LOCAL, remote_port, local_port, 100 + i)
            } else {
                tcp(LOCAL, remote, local_port, remote_port, 200 + i)
            };
            RawFrame::new(ts, data)
        })
        .collect()
}

fn by_destination_port(features: &FeatureVector) -> Result<f64, ClassifierError> {
    match features.get("Destination_Port").map(|p| p as u16) {
        Some(ALERT_PORT) => Ok(0.99),
        Some(BROKEN_PORT) => Err(ClassifierError::MissingOutput),
        _ => Ok(0.10),
    }
}

fn engine(predictor: Box<dyn Predictor>) -> (FlowReconstructor, Scanner) {
    let table = Arc::new(FlowTable::new());
    let reconstructor = FlowReconstructor::new(table.clone(), Ipv4Addr::from(LOCAL), LinkLayer::Ethernet);
    let scanner = Scanner::new(table, FeatureLayout::default(), predictor, 0.95);
    (reconstructor, scanner)
}

fn outcomes(report: &ScanReport) -> Vec<(FlowSummary, Option<Prediction>)> {
    report
        .entries
        .iter()
        .map(|e| (e.flow.clone(), e.prediction.as_ref().ok().copied()))
        .collect()
}

fn find(report: &ScanReport, local_port: u16) -> &flowscan::types::ScanEntry {
    report.entries.iter().find(|e| e.flow.dst_port == local_port).unwrap()
}

#[test]
fn test_table_growth_matches_conversations() {
    let (r, _) = engine(Box::new(by_destination_port));
    let mut frames = Vec::new();
    frames.extend(conversation([8, 8, 8, 8], 443, 50001, 7, 0));
    frames.extend(conversation([1, 1, 1, 1], 443, 50002, 4, 10));
    frames.extend(conversation([8, 8, 8, 8], 443, 50003, 1, 20));
    // not IP
    frames.push(RawFrame::new(30, vec![0u8; 20]));

    for f in &frames {
        r.ingest(f);
    }

    assert_eq!(r.table().len(), 3);
    assert_eq!(r.table().packet_count(), 12);
    assert_eq!(r.stats().accepted, 12);
    assert_eq!(r.stats().dropped, 1);
}

#[test]
fn test_scan_scores_short_flows_as_unavailable() {
    let (r, scanner) = engine(Box::new(by_destination_port));
    for f in conversation([8, 8, 8, 8], 443, 50001, 6, 0)
        .into_iter()
        .chain(conversation([8, 8, 4, 4], 443, 50002, 2, 0))
    {
        r.ingest(&f);
    }

    let report = scanner.scan();
    assert_eq!(report.stats.flow_count, 2);
    assert_eq!(report.stats.scored, 1);
    assert_eq!(report.stats.unavailable, 1);

    assert_eq!(find(&report, 50001).prediction.as_ref().unwrap(), &Prediction::Scored(0.10));
    assert_eq!(find(&report, 50002).prediction.as_ref().unwrap(), &Prediction::Unavailable);
    assert!(report.alerts.is_empty());

    // the short flow stays and is scored once it has enough packets
    for f in conversation([8, 8, 4, 4], 443, 50002, 6, 2_000).into_iter().skip(2) {
        r.ingest(&f);
    }
    let report = scanner.scan();
    assert_eq!(report.stats.scored, 2);
    assert_eq!(find(&report, 50002).flow.total_packets, 6);
}

#[test]
fn test_scan_is_idempotent_without_new_packets() {
    let (r, scanner) = engine(Box::new(by_destination_port));
    for f in conversation([8, 8, 8, 8], 443, 50001, 6, 0)
        .into_iter()
        .chain(conversation([9, 9, 9, 9], 80, ALERT_PORT, 8, 5))
        .chain(conversation([7, 7, 7, 7], 80, 50003, 2, 9))
    {
        r.ingest(&f);
    }

    let first = scanner.scan();
    let second = scanner.scan();
    assert_eq!(outcomes(&first), outcomes(&second));
    assert_eq!(first.stats.alerts, second.stats.alerts);
}

#[test]
fn test_alert_raised_at_threshold() {
    let (r, scanner) = engine(Box::new(by_destination_port));
    for f in conversation([6, 6, 6, 6], 31337, ALERT_PORT, 6, 100) {
        r.ingest(&f);
    }

    let report = scanner.scan();
    assert_eq!(report.alerts.len(), 1);
    let alert = &report.alerts[0];
    assert_eq!(alert.probability, 0.99);
    assert_eq!(alert.flow.src_ip, Ipv4Addr::new(6, 6, 6, 6));
    assert_eq!(alert.flow.dst_port, ALERT_PORT);
    assert_eq!(alert.flow.start_us, 100);
    assert_eq!(alert.flow.last_us, 5_100);
}

#[derive(Clone, Default)]
struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_alert_logged_once_through_log_sink() {
    let (r, scanner) = engine(Box::new(by_destination_port));
    for f in conversation([6, 6, 6, 6], 31337, ALERT_PORT, 6, 0) {
        r.ingest(&f);
    }

    let out = Captured::default();
    let writer = out.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let report = scanner.scan();
        assert_eq!(report.alerts.len(), 1);
        for alert in &report.alerts {
            LogSink.alert_generated(alert);
        }
        LogSink.update_flows(&report.entries, &report.stats);
    });

    let text = String::from_utf8(out.0.lock().clone()).unwrap();
    assert_eq!(text.matches("WARN").count(), 1, "{text}");
}

#[test]
fn test_unavailable_flow_never_alerts() {
    let always = |_: &FeatureVector| Ok::<_, ClassifierError>(1.0);
    let (r, scanner) = engine(Box::new(always));
    for f in conversation([6, 6, 6, 6], 31337, ALERT_PORT, 3, 0) {
        r.ingest(&f);
    }

    let report = scanner.scan();
    assert_eq!(report.stats.unavailable, 1);
    assert!(report.alerts.is_empty());
}

#[test]
fn test_classifier_failure_is_isolated_to_its_flow() {
    let (r, scanner) = engine(Box::new(by_destination_port));
    for f in conversation([5, 5, 5, 5], 443, BROKEN_PORT, 6, 0)
        .into_iter()
        .chain(conversation([6, 6, 6, 6], 443, ALERT_PORT, 6, 1))
        .chain(conversation([7, 7, 7, 7], 443, 50003, 6, 2))
    {
        r.ingest(&f);
    }

    let report = scanner.scan();
    assert_eq!(report.stats.flow_count, 3);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.scored, 2);
    assert_eq!(report.alerts.len(), 1);
    assert!(matches!(
        find(&report, BROKEN_PORT).prediction,
        Err(ClassifierError::MissingOutput)
    ));
}

#[test]
fn test_scan_during_ingest_sees_whole_packets_only() {
    const PACKETS: usize = 400;
    let (r, scanner) = engine(Box::new(by_destination_port));
    let frames = conversation([8, 8, 8, 8], 443, 50001, PACKETS, 0);

    // bytes held by the flow after the first k packets
    let mut prefix_bytes = vec![0u64];
    for f in &frames {
        prefix_bytes.push(prefix_bytes.last().unwrap() + f.wire_len as u64);
    }

    let done = Arc::new(AtomicBool::new(false));
    let scanning = {
        let done = done.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                let finished = done.load(Ordering::Acquire);
                for entry in scanner.scan().entries {
                    seen.push((entry.flow.total_packets, entry.flow.start_us, entry.flow.last_us, entry.flow.total_bytes));
                }
                if finished {
                    return seen;
                }
            }
        })
    };

    for f in &frames {
        r.ingest(f);
    }
    done.store(true, Ordering::Release);
    let seen = scanning.join().unwrap();

    assert!(!seen.is_empty());
    let mut previous = 0;
    for &(packets, start_us, last_us, bytes) in &seen {
        assert!(packets >= previous, "packet count went backwards");
        assert_eq!(start_us, 0);
        assert_eq!(last_us, (packets - 1) * 1_000);
        assert_eq!(bytes, prefix_bytes[packets as usize]);
        previous = packets;
    }
    assert_eq!(seen.last().unwrap().0, PACKETS as u64);
}

#[test]
fn test_processor_runs_final_scan_on_stop() {
    let table = Arc::new(FlowTable::new());
    let reconstructor = Arc::new(FlowReconstructor::new(table.clone(), Ipv4Addr::from(LOCAL), LinkLayer::Ethernet));
    let scanner = Scanner::new(table.clone(), FeatureLayout::default(), Box::new(by_destination_port), 0.95);

    let (event_tx, event_rx) = unbounded();
    let mut processor = FeatureProcessor::new(reconstructor);
    processor
        .start_processor(scanner, Duration::from_secs(3600), Box::new(ChannelSink::new(event_tx)))
        .unwrap();
    assert!(processor.start_processor(
        Scanner::new(table.clone(), FeatureLayout::default(), Box::new(by_destination_port), 0.95),
        Duration::from_secs(1),
        Box::new(LogSink),
    )
    .is_err());

    let frames = processor.get_sender().unwrap();
    for f in conversation([6, 6, 6, 6], 443, ALERT_PORT, 6, 0)
        .into_iter()
        .chain(conversation([7, 7, 7, 7], 443, 50003, 6, 0))
    {
        frames.send(f).unwrap();
    }
    drop(frames);

    processor.stop_processor().unwrap();
    assert!(!processor.is_running());
    assert_eq!(table.packet_count(), 12);

    let events: Vec<ScanEvent> = event_rx.iter().collect();
    let alerts = events.iter().filter(|e| matches!(e, ScanEvent::Alert(_))).count();
    assert_eq!(alerts, 1);
    match events.last() {
        Some(ScanEvent::Flows { stats, flows }) => {
            assert_eq!(stats.flow_count, 2);
            assert_eq!(flows.len(), 2);
            assert!(flows.iter().all(|f| f.prediction.is_some()));
        }
        other => panic!("expected a flows event last, got {other:?}"),
    }
}

#[test]
fn test_scan_now_requires_running_processor() {
    let table = Arc::new(FlowTable::new());
    let reconstructor = Arc::new(FlowReconstructor::new(table, Ipv4Addr::from(LOCAL), LinkLayer::Ethernet));
    let mut processor = FeatureProcessor::new(reconstructor);
    assert!(processor.scan_now().is_err());
    assert!(processor.stop_processor().is_err());
}
