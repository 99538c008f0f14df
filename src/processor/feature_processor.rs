use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

use super::engine;
use super::publisher::ScanSink;
use super::reconstructor::{FlowReconstructor, RawFrame};
use super::scanner::Scanner;

/// Runs ingestion and periodic scanning on two threads that share the flow
/// table.
pub struct FeatureProcessor {
    running: Arc<AtomicBool>,
    reconstructor: Arc<FlowReconstructor>,
    ingest_thread: Option<JoinHandle<()>>,
    scan_thread: Option<JoinHandle<()>>,
    frame_tx: Option<Sender<RawFrame>>,
    done_tx: Option<Sender<()>>,
    trigger_tx: Option<Sender<()>>,
}

impl FeatureProcessor {
    pub fn new(reconstructor: Arc<FlowReconstructor>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            reconstructor,
            ingest_thread: None,
            scan_thread: None,
            frame_tx: None,
            done_tx: None,
            trigger_tx: None,
        }
    }

    pub fn reconstructor(&self) -> &Arc<FlowReconstructor> {
        &self.reconstructor
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Handle the packet source pushes frames into. Only valid while running.
    pub fn get_sender(&self) -> Option<Sender<RawFrame>> {
        self.frame_tx.clone()
    }

    pub fn start_processor(&mut self, scanner: Scanner, interval: Duration, sink: Box<dyn ScanSink>) -> Result<()> {
        if self.running.swap(true, Ordering::Relaxed) {
            bail!("Processor is already running");
        }

        let (frame_tx, frame_rx) = unbounded();
        let (done_tx, done_rx) = bounded(0);
        let (trigger_tx, trigger_rx) = unbounded();

        let ingest = {
            let reconstructor = self.reconstructor.clone();
            thread::Builder::new()
                .name("flow-ingest".into())
                .spawn(move || engine::ingest_loop(reconstructor, frame_rx, done_rx))?
        };

        let scan = thread::Builder::new()
            .name("flow-scan".into())
            .spawn(move || engine::scan_loop(scanner, interval, trigger_rx, sink))?;

        self.frame_tx = Some(frame_tx);
        self.done_tx = Some(done_tx);
        self.trigger_tx = Some(trigger_tx);
        self.ingest_thread = Some(ingest);
        self.scan_thread = Some(scan);
        info!(interval_secs = interval.as_secs_f64(), "processor started");
        Ok(())
    }

    /// Requests a scan outside the regular interval.
    pub fn scan_now(&self) -> Result<()> {
        let tx = self.trigger_tx.as_ref().ok_or_else(|| anyhow!("Processor isn't running"))?;
        tx.send(()).map_err(|_| anyhow!("Scan thread has exited"))
    }

    /// Stops both threads. Frames already queued are ingested and one final
    /// scan runs over the complete table before the scan thread exits.
    pub fn stop_processor(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::Relaxed) {
            bail!("Processor isn't running");
        }

        self.frame_tx = None;
        self.done_tx = None;
        if let Some(h) = self.ingest_thread.take() { let _ = h.join(); }

        if let Some(tx) = self.trigger_tx.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.scan_thread.take() { let _ = h.join(); }

        info!("processor stopped");
        Ok(())
    }
}

impl Drop for FeatureProcessor {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop_processor();
        }
    }
}
