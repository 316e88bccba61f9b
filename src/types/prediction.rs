//! Prediction results and the records handed to persistence

use crate::error::PredictionError;
use crate::types::domain::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Percentage strictly above which a result is high risk
pub const HIGH_RISK_ABOVE: f64 = 60.0;

/// Percentage at or above which a result is at least moderate risk
pub const MODERATE_RISK_FROM: f64 = 30.0;

/// Three-tier risk classification, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskCategory {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Moderate Risk")]
    Moderate,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskCategory {
    /// Determine the category from a rounded risk percentage
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage > HIGH_RISK_ABOVE {
            RiskCategory::High
        } else if percentage >= MODERATE_RISK_FROM {
            RiskCategory::Moderate
        } else {
            RiskCategory::Low
        }
    }

    /// Fixed advisory text shown with the category
    pub fn advice(&self) -> &'static str {
        match self {
            RiskCategory::High => {
                "Immediate medical attention is advised. Consult a specialist as soon as possible."
            }
            RiskCategory::Moderate => {
                "It's recommended to schedule a health check-up. Consider lifestyle changes and follow a balanced diet."
            }
            RiskCategory::Low => {
                "You are at low risk. Maintain a healthy lifestyle and regular check-ups."
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::Low => "Low Risk",
            RiskCategory::Moderate => "Moderate Risk",
            RiskCategory::High => "High Risk",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Round to two decimal places, half away from zero
fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Output of the scoring pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Calibrated risk as a percentage (0.0 - 100.0, two decimals)
    pub risk_percentage: f64,
    pub category: RiskCategory,
    pub advice: String,
}

impl PredictionResult {
    /// Classify a calibrated probability.
    ///
    /// The category is decided on the rounded percentage, so 0.6 lands on
    /// exactly 60.0 and stays moderate.
    pub fn classify(calibrated: f64) -> Self {
        let risk_percentage = round_2dp(calibrated * 100.0);
        let category = RiskCategory::from_percentage(risk_percentage);

        Self {
            risk_percentage,
            category,
            advice: category.advice().to_string(),
        }
    }
}

/// Scoring request as it arrives from the request layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub request_id: String,
    pub user_id: String,
    pub domain: Domain,
    /// Raw measurements in the domain's fixed field order
    pub features: Vec<f64>,
}

/// Completed prediction, shaped for the history store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub record_id: String,
    pub request_id: String,
    pub user_id: String,
    pub domain: Domain,
    pub risk_percentage: f64,
    pub category: RiskCategory,
    pub advice: String,
    /// Raw input as submitted
    pub input_data: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(request: &PredictionRequest, result: PredictionResult) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            domain: request.domain,
            risk_percentage: result.risk_percentage,
            category: result.category,
            advice: result.advice,
            input_data: request.features.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Message published for every processed request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PredictionResponse {
    Completed(PredictionRecord),
    Failed {
        request_id: String,
        user_id: String,
        domain: Domain,
        error_kind: String,
        message: String,
    },
}

impl PredictionResponse {
    /// Generic message for failures that are not the caller's fault
    pub const RETRY_LATER: &'static str =
        "An error occurred during prediction. Please try again later.";

    pub const INTERNAL_ERROR: &'static str = "internal_error";

    pub fn failed(request: &PredictionRequest, error: &PredictionError) -> Self {
        let message = if error.is_client_error() {
            error.cause().to_string()
        } else {
            Self::RETRY_LATER.to_string()
        };

        PredictionResponse::Failed {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            domain: request.domain,
            error_kind: error.cause().kind().to_string(),
            message,
        }
    }

    /// Failure not tied to any pipeline error, e.g. a crashed scoring task
    pub fn internal_failure(request: &PredictionRequest) -> Self {
        PredictionResponse::Failed {
            request_id: request.request_id.clone(),
            user_id: request.user_id.clone(),
            domain: request.domain,
            error_kind: Self::INTERNAL_ERROR.to_string(),
            message: Self::RETRY_LATER.to_string(),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            PredictionResponse::Completed(record) => &record.request_id,
            PredictionResponse::Failed { request_id, .. } => request_id,
        }
    }
}
