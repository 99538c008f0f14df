use crossbeam_channel::{select, tick, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::publisher::{publish, ScanSink};
use super::reconstructor::{FlowReconstructor, RawFrame};
use super::scanner::Scanner;

const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Producer side: files every frame from the packet source into the table.
///
/// Exits when the frame channel disconnects, or when `done_rx` fires, in
/// which case frames already queued are ingested first.
pub fn ingest_loop(reconstructor: Arc<FlowReconstructor>, frame_rx: Receiver<RawFrame>, done_rx: Receiver<()>) {
    let stats_tick = tick(STATS_INTERVAL);
    let mut last = reconstructor.stats();

    loop {
        select! {
            recv(frame_rx) -> msg => match msg {
                Ok(frame) => reconstructor.ingest(&frame),
                Err(_) => break,
            },
            recv(done_rx) -> _ => {
                for frame in frame_rx.try_iter() {
                    reconstructor.ingest(&frame);
                }
                break;
            },
            recv(stats_tick) -> _ => {
                let now = reconstructor.stats();
                if now != last {
                    debug!(
                        accepted = now.accepted - last.accepted,
                        dropped = now.dropped - last.dropped,
                        flows = reconstructor.table().len(),
                        "ingest"
                    );
                    last = now;
                }
            },
        }
    }

    let stats = reconstructor.stats();
    info!(accepted = stats.accepted, dropped = stats.dropped, "ingest loop exiting");
}

/// Consumer side: scans on every tick of `interval` and whenever a trigger
/// arrives. Exits once the trigger channel disconnects.
pub fn scan_loop(scanner: Scanner, interval: Duration, trigger_rx: Receiver<()>, sink: Box<dyn ScanSink>) {
    let scan_tick = tick(interval);

    loop {
        select! {
            recv(scan_tick) -> _ => publish(&scanner.scan(), sink.as_ref()),
            recv(trigger_rx) -> msg => match msg {
                Ok(()) => publish(&scanner.scan(), sink.as_ref()),
                Err(_) => break,
            },
        }
    }

    info!("scan loop exiting");
}
