//! Disease domains served by the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the fixed disease-risk scoring pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Heart,
    Lung,
    Liver,
    Diabetes,
}

impl Domain {
    /// All domains, in a stable order
    pub const ALL: [Domain; 4] = [Domain::Heart, Domain::Lung, Domain::Liver, Domain::Diabetes];

    /// Lowercase identifier used in file names, config keys and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Heart => "heart",
            Domain::Lung => "lung",
            Domain::Liver => "liver",
            Domain::Diabetes => "diabetes",
        }
    }

    /// Number of user-supplied measurements the domain expects
    pub fn raw_feature_count(&self) -> usize {
        match self {
            Domain::Heart => 13,
            Domain::Lung => 8,
            Domain::Liver => 10,
            Domain::Diabetes => 8,
        }
    }

    /// Number of derived features appended by the feature extractor
    pub fn derived_feature_count(&self) -> usize {
        match self {
            Domain::Heart => 5,
            Domain::Lung => 4,
            Domain::Liver => 5,
            Domain::Diabetes => 5,
        }
    }

    /// Width of the engineered vector the scaler and model are fit on
    pub fn engineered_feature_count(&self) -> usize {
        self.raw_feature_count() + self.derived_feature_count()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown domain name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown domain: {0}")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heart" => Ok(Domain::Heart),
            "lung" => Ok(Domain::Lung),
            "liver" => Ok(Domain::Liver),
            "diabetes" => Ok(Domain::Diabetes),
            other => Err(UnknownDomain(other.to_string())),
        }
    }
}
