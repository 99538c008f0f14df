use anyhow::{anyhow, Context, Result};
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::ClassifierError;
use crate::features::FeatureVector;

/// Default probability at or above which a flow raises an alert.
pub const ATTACK_THRESHOLD: f64 = 0.95;

/// Anything that maps a feature vector to an attack probability in [0, 1].
///
/// The scanner only depends on this capability, so a model can be swapped
/// along with its feature layout without touching reconstruction or
/// extraction.
pub trait Predictor: Send {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ClassifierError>;
}

impl<F> Predictor for F
where
    F: Fn(&FeatureVector) -> Result<f64, ClassifierError> + Send,
{
    fn predict(&self, features: &FeatureVector) -> Result<f64, ClassifierError> {
        self(features)
    }
}

/// Binary ONNX model whose probability output has the attack class at index 1.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    n_features: usize,
}

impl OnnxClassifier {
    pub fn load<P: AsRef<Path>>(model_path: P, n_features: usize) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model from {}", model_path.display()))?;

        info!(path = %model_path.display(), n_features, "model loaded");
        Ok(Self {
            session: Mutex::new(session),
            n_features,
        })
    }

    fn run(&self, feats: Vec<f32>) -> Result<Vec<f32>> {
        let input = Array2::from_shape_vec((1, self.n_features), feats)
            .context("Failed to create input array")?;
        let tensor = Value::from_array(input).context("Failed to create input tensor")?;

        let t0 = Instant::now();
        let mut session = self.session.lock();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let outputs = session.run(ort::inputs![tensor]).context("Failed to run model")?;

        // sklearn exports put the label first; take the first float tensor
        let probs = output_names
            .iter()
            .filter_map(|name| outputs.get(name.as_str()))
            .find_map(|o| o.try_extract_tensor::<f32>().ok())
            .map(|(_, data)| data.to_vec())
            .ok_or_else(|| anyhow!("No probability output from model"))?;

        debug!(micros = t0.elapsed().as_micros() as u64, "inference");
        Ok(probs)
    }
}

#[inline]
fn as_f32(v: f64) -> f32 {
    let f = v as f32;
    if f.is_finite() { f } else { 0.0 }
}

impl Predictor for OnnxClassifier {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ClassifierError> {
        if features.len() != self.n_features {
            return Err(ClassifierError::FeatureCount { expected: self.n_features, actual: features.len() });
        }

        let feats = features.values().iter().map(|&v| as_f32(v)).collect();
        let probs = self.run(feats)?;
        let p_attack = *probs.get(1).ok_or(ClassifierError::MissingOutput)? as f64;
        if !(0.0..=1.0).contains(&p_attack) {
            return Err(ClassifierError::ProbabilityOutOfRange(p_attack));
        }
        Ok(p_attack)
    }
}
