//! Type definitions for the prediction pipeline

pub mod domain;
pub mod prediction;

pub use domain::Domain;
pub use prediction::{
    PredictionRecord, PredictionRequest, PredictionResponse, PredictionResult, RiskCategory,
};
