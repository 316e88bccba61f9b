//! Model artifacts: scaling, classifiers, calibration and their storage

pub mod calibration;
pub mod inference;
pub mod loader;
pub mod network;
pub mod scaler;
pub mod store;

pub use calibration::Calibrator;
pub use inference::{ModelError, RiskModel};
pub use loader::{ArtifactRepository, FileArtifactRepository};
pub use network::DenseNetwork;
pub use scaler::StandardScaler;
pub use store::{ArtifactStore, ArtifactTriple, LoadReport};

#[cfg(feature = "onnx")]
pub use inference::OnnxModel;
