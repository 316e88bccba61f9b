//! Health Risk Pipeline Library
//!
//! Disease-risk scoring for four clinical domains (heart, lung, liver,
//! diabetes): feature engineering, standardized inference against trained
//! artifacts, calibration and risk classification, with on-demand
//! retraining for domains whose training data can be regenerated.

pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod service;
pub mod training;
pub mod types;

pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use error::{ArtifactError, PipelineError, PredictionError, TrainingError};
pub use feature_extractor::FeatureExtractor;
pub use models::{ArtifactStore, ArtifactTriple, Calibrator};
pub use producer::ResponseProducer;
pub use service::PredictionService;
pub use training::{Retrainer, SyntheticLungTrainer};
pub use types::{
    domain::Domain,
    prediction::{PredictionRequest, PredictionResponse, PredictionResult, RiskCategory},
};
