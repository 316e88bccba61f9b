//! Model seam and the ONNX Runtime backed classifier

use crate::error::ArtifactError;
use thiserror::Error;

/// Failure raised by a model while scoring one vector
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

/// A trained binary classifier taking a scaled feature vector.
///
/// Implementations are immutable once loaded; the artifact store swaps whole
/// models instead of mutating them.
pub trait RiskModel: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Expected input width, when the model format exposes it
    fn input_dim(&self) -> Option<usize>;

    /// Probability of the positive class for one scaled vector
    fn predict_proba(&self, features: &[f64]) -> Result<f64, ModelError>;

    /// Serialized form written by the artifact loader
    fn serialize_model(&self) -> Result<Vec<u8>, ArtifactError> {
        Err(ArtifactError::Unsupported(self.name().to_string()))
    }
}

/// Pick the positive-class probability out of a classifier output tensor.
///
/// Handles `[batch, 2]`, `[batch, 1]`, `[2]` and `[1]` layouts.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub(crate) fn positive_class_probability(dims: &[i64], data: &[f32]) -> Option<f64> {
    let classes = match dims {
        [_, classes] => *classes,
        [classes] => *classes,
        _ => return data.last().map(|&v| v as f64),
    };

    match classes {
        c if c >= 2 => data.get(1).map(|&v| v as f64),
        1 => data.first().map(|&v| v as f64),
        _ => None,
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{positive_class_probability, ModelError, RiskModel};
    use crate::error::ArtifactError;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;
    use std::path::Path;
    use std::sync::Mutex;
    use tracing::{debug, info};

    fn onnx_err<E: std::fmt::Display>(e: E) -> ArtifactError {
        ArtifactError::Onnx(e.to_string())
    }

    /// Exported network executed through ONNX Runtime
    pub struct OnnxModel {
        name: String,
        /// Sessions need exclusive access to run
        session: Mutex<Session>,
        input_name: String,
        output_name: String,
    }

    impl OnnxModel {
        /// Load an ONNX model from file
        pub fn load<P: AsRef<Path>>(
            path: P,
            name: &str,
            onnx_threads: usize,
        ) -> Result<Self, ArtifactError> {
            let path = path.as_ref();

            info!(model = %name, path = %path.display(), threads = onnx_threads, "Loading ONNX model");

            let session = Session::builder()
                .map_err(onnx_err)?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(onnx_err)?
                .with_intra_threads(onnx_threads)
                .map_err(onnx_err)?
                .commit_from_file(path)
                .map_err(onnx_err)?;

            let input_name = session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .unwrap_or_else(|| "input".to_string());

            let output_name = session
                .outputs
                .iter()
                .find(|o| o.name.contains("prob") || o.name.contains("output"))
                .or_else(|| session.outputs.last())
                .map(|o| o.name.clone())
                .unwrap_or_else(|| "output".to_string());

            info!(
                model = %name,
                input = %input_name,
                output = %output_name,
                "Model loaded successfully"
            );

            Ok(Self {
                name: name.to_string(),
                session: Mutex::new(session),
                input_name,
                output_name,
            })
        }
    }

    impl RiskModel for OnnxModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn input_dim(&self) -> Option<usize> {
            None
        }

        fn predict_proba(&self, features: &[f64]) -> Result<f64, ModelError> {
            // Shape [1, num_features]
            let shape = vec![1_i64, features.len() as i64];
            let data: Vec<f32> = features.iter().map(|&v| v as f32).collect();
            let input_tensor = Tensor::from_array((shape, data))
                .map_err(|e| ModelError(format!("Failed to create input tensor: {}", e)))?;

            let mut session = self
                .session
                .lock()
                .map_err(|e| ModelError(format!("Lock error: {}", e)))?;

            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => input_tensor])
                .map_err(|e| ModelError(format!("Session run failed: {}", e)))?;

            let output = outputs
                .get(self.output_name.as_str())
                .ok_or_else(|| ModelError(format!("Missing output '{}'", self.output_name)))?;

            let (shape, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError(format!("Unexpected output type: {}", e)))?;
            let dims: Vec<i64> = shape.iter().copied().collect();

            let prob = positive_class_probability(&dims, data)
                .ok_or_else(|| ModelError(format!("Empty output tensor {:?}", dims)))?;

            debug!(model = %self.name, prob = prob, "Extracted from tensor");
            Ok(prob)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_class_probability_layouts() {
        assert_eq!(positive_class_probability(&[1, 2], &[0.25, 0.75]), Some(0.75));
        assert_eq!(positive_class_probability(&[1, 1], &[0.5]), Some(0.5));
        assert_eq!(positive_class_probability(&[2], &[0.25, 0.75]), Some(0.75));
        assert_eq!(positive_class_probability(&[1], &[0.5]), Some(0.5));
        assert_eq!(positive_class_probability(&[1, 2], &[]), None);
        assert_eq!(positive_class_probability(&[1, 1, 1], &[0.125]), Some(0.125));
    }

    struct Fixed;

    impl RiskModel for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn input_dim(&self) -> Option<usize> {
            Some(1)
        }

        fn predict_proba(&self, _features: &[f64]) -> Result<f64, ModelError> {
            Ok(0.5)
        }
    }

    #[test]
    fn test_default_serialization_is_unsupported() {
        let err = Fixed.serialize_model().unwrap_err();
        assert!(matches!(err, ArtifactError::Unsupported(name) if name == "fixed"));
    }
}
