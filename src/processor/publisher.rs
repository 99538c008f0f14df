use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::{Alert, FlowSummary, Prediction, ScanEntry, ScanReport, ScanStats};

/// Receiver of scan results: the display/alert side of the pipeline.
pub trait ScanSink: Send {
    /// Called once per flow that crossed the threshold, before `update_flows`.
    fn alert_generated(&self, alert: &Alert);

    /// Called once per scan with every flow, scored or not.
    fn update_flows(&self, entries: &[ScanEntry], stats: &ScanStats);
}

pub fn publish(report: &ScanReport, sink: &dyn ScanSink) {
    for alert in &report.alerts {
        sink.alert_generated(alert);
    }
    sink.update_flows(&report.entries, &report.stats);
}

/// Writes scan results to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ScanSink for LogSink {
    fn alert_generated(&self, alert: &Alert) {
        warn!(
            flow = %alert.flow,
            p_attack = alert.probability,
            first_us = alert.flow.start_us,
            last_us = alert.flow.last_us,
            "ALERT"
        );
    }

    fn update_flows(&self, entries: &[ScanEntry], stats: &ScanStats) {
        for entry in entries {
            match &entry.prediction {
                Ok(Prediction::Scored(p)) => debug!(flow = %entry.flow, p_attack = *p, "scored"),
                Ok(Prediction::Unavailable) => debug!(flow = %entry.flow, "not yet available"),
                Err(e) => debug!(flow = %entry.flow, "failed: {e}"),
            }
        }
        info!(
            flows = stats.flow_count,
            scored = stats.scored,
            unavailable = stats.unavailable,
            failed = stats.failed,
            alerts = stats.alerts,
            elapsed_us = stats.elapsed_us,
            "scan complete"
        );
    }
}

/// Display row for one flow; classifier errors are flattened to text.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRow {
    pub flow: FlowSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ScanEntry> for FlowRow {
    fn from(entry: &ScanEntry) -> Self {
        let (prediction, error) = match &entry.prediction {
            Ok(p) => (Some(*p), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self { flow: entry.flow.clone(), prediction, error }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Alert(Alert),
    Flows { stats: ScanStats, flows: Vec<FlowRow> },
}

/// Forwards scan results over a channel to a consumer thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ScanEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<ScanEvent>) -> Self {
        Self { tx }
    }
}

impl ScanSink for ChannelSink {
    fn alert_generated(&self, alert: &Alert) {
        let _ = self.tx.send(ScanEvent::Alert(alert.clone()));
    }

    fn update_flows(&self, entries: &[ScanEntry], stats: &ScanStats) {
        let flows = entries.iter().map(FlowRow::from).collect();
        let _ = self.tx.send(ScanEvent::Flows { stats: stats.clone(), flows });
    }
}
