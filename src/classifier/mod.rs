pub mod classifier;

pub use classifier::{OnnxClassifier, Predictor, ATTACK_THRESHOLD};
