//! Error types for the prediction pipeline

use crate::types::domain::Domain;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised inside a single prediction attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raw input length does not match the domain's field count
    #[error("{domain}: expected {expected} raw features, got {actual}")]
    InvalidFeatureShape {
        domain: Domain,
        expected: usize,
        actual: usize,
    },

    /// Input value, or a feature derived from it, is NaN or infinite.
    /// `index` points into the engineered vector (raw fields come first).
    #[error("{domain}: feature at index {index} is not a finite number")]
    InvalidFeatureValue { domain: Domain, index: usize },

    /// No usable artifacts for the domain
    #[error("{domain}: artifacts unavailable: {reason}")]
    ArtifactsUnavailable { domain: Domain, reason: String },

    /// Scaling or model invocation failed
    #[error("{domain}: inference failed: {reason}")]
    Inference { domain: Domain, reason: String },

    /// The recovery path could not produce replacement artifacts
    #[error("{domain}: retraining failed: {reason}")]
    RetrainFailed { domain: Domain, reason: String },
}

impl PipelineError {
    /// Errors caused by the caller's input; these are never retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidFeatureShape { .. } | PipelineError::InvalidFeatureValue { .. }
        )
    }

    /// Errors the retrain-and-retry path may fix
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ArtifactsUnavailable { .. } | PipelineError::Inference { .. }
        )
    }

    /// Short machine-readable label
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidFeatureShape { .. } => "invalid_feature_shape",
            PipelineError::InvalidFeatureValue { .. } => "invalid_feature_value",
            PipelineError::ArtifactsUnavailable { .. } => "artifacts_unavailable",
            PipelineError::Inference { .. } => "inference_error",
            PipelineError::RetrainFailed { .. } => "retrain_failed",
        }
    }
}

/// Terminal error surfaced by [`crate::service::PredictionService::predict`].
#[derive(Debug, Error)]
#[error("prediction failed for {domain} (retried: {retried}): {source}")]
pub struct PredictionError {
    pub domain: Domain,
    /// Whether a retrain-and-retry cycle ran before giving up
    pub retried: bool,
    #[source]
    pub source: PipelineError,
}

impl PredictionError {
    pub fn new(domain: Domain, source: PipelineError) -> Self {
        Self {
            domain,
            retried: false,
            source,
        }
    }

    pub fn after_retry(domain: Domain, source: PipelineError) -> Self {
        Self {
            domain,
            retried: true,
            source,
        }
    }

    /// The underlying failure
    pub fn cause(&self) -> &PipelineError {
        &self.source
    }

    pub fn is_client_error(&self) -> bool {
        self.source.is_client_error()
    }
}

/// Failures of the artifact persistence collaborator.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{domain}: artifact not found at {}", .path.display())]
    NotFound { domain: Domain, path: PathBuf },

    #[error("artifact I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact {}: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("ONNX runtime error: {0}")]
    Onnx(String),

    #[error("{domain}: {what} has width {actual}, expected {expected}")]
    DimensionMismatch {
        domain: Domain,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{domain}: invalid artifact: {reason}")]
    Invalid { domain: Domain, reason: String },

    #[error("model '{0}' cannot be serialized")]
    Unsupported(String),
}

impl ArtifactError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArtifactError::NotFound { .. })
    }
}

/// Failures of the training collaborator.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("{0}: training data cannot be regenerated on demand")]
    UnsupportedDomain(Domain),

    #[error("degenerate training data: {0}")]
    Degenerate(String),

    #[error("failed to build artifacts: {0}")]
    Artifact(#[from] ArtifactError),
}
