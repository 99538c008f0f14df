//! Live flow reconstruction and feature extraction for ML-based intrusion
//! detection.
//!
//! ```text
//! frames ──> FlowReconstructor ──> FlowTable ──> Scanner ──> Predictor ──> ScanSink
//!            (ingest thread)       (mutex)       (scan thread, on a tick)
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod processor;
pub mod source;
pub mod types;

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::info;

use classifier::{OnnxClassifier, Predictor};
use config::Config;
use features::FeatureLayout;
use processor::{FeatureProcessor, FlowReconstructor, FlowTable, LinkLayer, ScanSink, Scanner};

/// Loads the ONNX model named in the configuration, sized for `layout`.
pub fn load_classifier(config: &Config, layout: &FeatureLayout) -> Result<Box<dyn Predictor>> {
    let path = config
        .model
        .path
        .as_ref()
        .ok_or_else(|| anyhow!("No model configured, set [model] path"))?;
    let model = OnnxClassifier::load(path, layout.len())
        .with_context(|| format!("Failed to start classifier from {}", path.display()))?;
    Ok(Box::new(model))
}

/// Wires table, reconstructor, scanner and sink together and starts the
/// ingest and scan threads. Frames go in through `get_sender()` on the
/// returned processor.
pub fn start_system(
    config: &Config,
    layout: FeatureLayout,
    link: LinkLayer,
    predictor: Box<dyn Predictor>,
    sink: Box<dyn ScanSink>,
) -> Result<FeatureProcessor> {
    config.validate()?;
    info!(columns = ?layout.names(), "feature layout");

    let table = Arc::new(FlowTable::new());
    let reconstructor = Arc::new(FlowReconstructor::new(table.clone(), config.engine.local_address, link));
    let scanner = Scanner::new(table, layout, predictor, config.scan.attack_threshold);

    let mut processor = FeatureProcessor::new(reconstructor);
    processor.start_processor(scanner, config.scan.interval(), sink)?;

    info!(
        local_address = %config.engine.local_address,
        threshold = config.scan.attack_threshold,
        "system started"
    );
    Ok(processor)
}

/// Drains pending frames, runs a last scan and joins both threads.
pub fn stop_system(mut processor: FeatureProcessor) -> Result<()> {
    processor.stop_processor()?;
    let stats = processor.reconstructor().stats();
    info!(
        flows = processor.reconstructor().table().len(),
        accepted = stats.accepted,
        dropped = stats.dropped,
        "system stopped"
    );
    Ok(())
}
