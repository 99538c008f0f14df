use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use super::table::FlowTable;
use crate::classifier::Predictor;
use crate::error::FeatureError;
use crate::features::{FeatureLayout, FeatureVector};
use crate::types::{Alert, FlowSummary, Prediction, ScanEntry, ScanReport, ScanStats};

/// Periodic evaluation pass over every flow in the table.
pub struct Scanner {
    table: Arc<FlowTable>,
    layout: FeatureLayout,
    predictor: Box<dyn Predictor>,
    threshold: f64,
}

impl Scanner {
    pub fn new(table: Arc<FlowTable>, layout: FeatureLayout, predictor: Box<dyn Predictor>, threshold: f64) -> Self {
        Self { table, layout, predictor, threshold }
    }

    /// Scores every flow currently in the table.
    ///
    /// Summaries and feature vectors are built while the table lock is held,
    /// so the scan sees each flow exactly as it stood when the lock was taken
    /// and no append can interleave with a statistic. Inference runs after
    /// the lock is released, on the owned vectors.
    pub fn scan(&self) -> ScanReport {
        let t0 = Instant::now();

        let mut rows: Vec<(FlowSummary, Result<FeatureVector, FeatureError>)> = self.table.with_flows(|flows| {
            flows
                .values()
                .map(|flow| (FlowSummary::from(flow), self.layout.extract(flow)))
                .collect()
        });
        rows.sort_by_key(|(f, _)| (f.start_us, f.src_ip, f.src_port, f.dst_ip, f.dst_port, f.protocol));

        let mut stats = ScanStats { flow_count: rows.len() as u64, ..ScanStats::default() };
        let mut alerts = Vec::new();
        let mut entries = Vec::with_capacity(rows.len());

        for (flow, features) in rows {
            let prediction = match features {
                Ok(v) => self.predictor.predict(&v).map(Prediction::Scored),
                Err(FeatureError::InsufficientSamples { required, actual }) => {
                    debug!(flow = %flow, required, actual, "features not yet available");
                    Ok(Prediction::Unavailable)
                }
            };

            match &prediction {
                Ok(Prediction::Scored(p)) => {
                    stats.scored += 1;
                    if *p >= self.threshold {
                        debug!(flow = %flow, p_attack = *p, "attack probability above threshold");
                        alerts.push(Alert { timestamp: Utc::now(), probability: *p, flow: flow.clone() });
                    }
                }
                Ok(Prediction::Unavailable) => stats.unavailable += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(flow = %flow, "classification failed: {e:#}");
                }
            }

            entries.push(ScanEntry { flow, prediction });
        }

        stats.alerts = alerts.len() as u64;
        stats.elapsed_us = t0.elapsed().as_micros() as u64;
        ScanReport { entries, alerts, stats }
    }
}
