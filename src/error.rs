//! Error types for the flow engine.
//!
//! Typed errors live here; application plumbing (model loading, file IO,
//! the CLI) uses `anyhow` on top of them.

use thiserror::Error;

/// Raised by the feature functions when a flow is too short to compute a
/// statistic. Recoverable: the flow is retried on the next scan.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureError {
    #[error("insufficient samples (need at least {required}, got {actual})")]
    InsufficientSamples { required: usize, actual: usize },
}

/// Errors produced while scoring a single flow.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("feature vector has {actual} columns, model expects {expected}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("model returned probability {0} outside [0, 1]")]
    ProbabilityOutOfRange(f64),

    #[error("model produced no probability output")]
    MissingOutput,

    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

/// Errors found while validating configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown feature column '{0}'")]
    UnknownFeature(String),

    #[error("feature column list is empty")]
    NoFeatures,

    #[error("attack_threshold must be within [0, 1], got {0}")]
    Threshold(f64),

    #[error("scan interval must be greater than 0")]
    ZeroInterval,

    #[error("local_address is not set; packet direction depends on it")]
    NoLocalAddress,
}

/// Errors from the recorded-traffic packet source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open capture file '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Unsupported link type {0} (expected Ethernet or raw IP)")]
    UnsupportedLinkType(i32),

    #[error("Failed to read packet: {0}")]
    Read(#[from] pcap::Error),
}
