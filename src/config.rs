//! Configuration management for the prediction pipeline

use crate::types::domain::Domain;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub domains: DomainsConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    pub nats: NatsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory holding scaler, model and feature-name files
    pub dir: String,
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_onnx_threads() -> usize {
    1
}

/// Recovery and startup policy for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainPolicy {
    /// Whether a failed prediction may retrain the artifacts and retry once
    pub retrainable: bool,
    /// Whether the worker refuses to start without this domain's artifacts
    pub required: bool,
}

impl DomainPolicy {
    /// Artifacts come from an external dataset: must load, never retrained
    pub const FIXED: DomainPolicy = DomainPolicy {
        retrainable: false,
        required: true,
    };

    /// Artifacts can be regenerated on demand
    pub const REGENERABLE: DomainPolicy = DomainPolicy {
        retrainable: true,
        required: false,
    };
}

fn fixed_policy() -> DomainPolicy {
    DomainPolicy::FIXED
}

fn regenerable_policy() -> DomainPolicy {
    DomainPolicy::REGENERABLE
}

/// Keys set in a `[domains.<d>]` table; absent keys keep the domain default
#[derive(Debug, Deserialize)]
struct PolicyOverride {
    retrainable: Option<bool>,
    required: Option<bool>,
}

impl PolicyOverride {
    fn apply(self, base: DomainPolicy) -> DomainPolicy {
        DomainPolicy {
            retrainable: self.retrainable.unwrap_or(base.retrainable),
            required: self.required.unwrap_or(base.required),
        }
    }
}

fn fixed_override<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DomainPolicy, D::Error> {
    Ok(PolicyOverride::deserialize(deserializer)?.apply(DomainPolicy::FIXED))
}

fn regenerable_override<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DomainPolicy, D::Error> {
    Ok(PolicyOverride::deserialize(deserializer)?.apply(DomainPolicy::REGENERABLE))
}

/// Per-domain policies
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DomainsConfig {
    #[serde(default = "fixed_policy", deserialize_with = "fixed_override")]
    pub heart: DomainPolicy,
    #[serde(default = "regenerable_policy", deserialize_with = "regenerable_override")]
    pub lung: DomainPolicy,
    #[serde(default = "fixed_policy", deserialize_with = "fixed_override")]
    pub liver: DomainPolicy,
    #[serde(default = "fixed_policy", deserialize_with = "fixed_override")]
    pub diabetes: DomainPolicy,
}

impl DomainsConfig {
    pub fn policy(&self, domain: Domain) -> DomainPolicy {
        match domain {
            Domain::Heart => self.heart,
            Domain::Lung => self.lung,
            Domain::Liver => self.liver,
            Domain::Diabetes => self.diabetes,
        }
    }

    pub fn required(&self) -> impl Iterator<Item = Domain> + '_ {
        Domain::ALL
            .into_iter()
            .filter(move |d| self.policy(*d).required)
    }
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            heart: DomainPolicy::FIXED,
            lung: DomainPolicy::REGENERABLE,
            liver: DomainPolicy::FIXED,
            diabetes: DomainPolicy::FIXED,
        }
    }
}

/// Calibration configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalibrationConfig {
    /// Cap the low branch at its knee instead of letting it overshoot
    #[serde(default)]
    pub clamp_low_branch: bool,
}

/// Synthetic retraining hyperparameters
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seed for data generation, splitting and weight initialization
    pub seed: u64,
    /// Number of synthetic patients
    pub samples: usize,
    pub hidden_layers: Vec<usize>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// L2 penalty on weights
    pub l2: f64,
    /// Held-out share used for the evaluation report
    pub test_split: f64,
    /// Share of the training part used for early stopping
    pub validation_split: f64,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
    /// Loss weight of the positive class (negative class is 1.0)
    pub positive_class_weight: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            samples: 1000,
            hidden_layers: vec![24, 12, 6],
            epochs: 100,
            batch_size: 16,
            learning_rate: 0.001,
            l2: 0.001,
            test_split: 0.2,
            validation_split: 0.2,
            patience: 10,
            positive_class_weight: 3.0,
        }
    }
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming prediction requests
    pub request_subject: String,
    /// Subject for outgoing prediction results
    pub result_subject: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of requests scored concurrently
    pub workers: usize,
    /// Seconds between metrics summaries (0 disables them)
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, then apply
    /// `HEALTH_RISK__SECTION__KEY` environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("HEALTH_RISK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactsConfig {
                dir: "artifacts".to_string(),
                onnx_threads: 1,
            },
            domains: DomainsConfig::default(),
            calibration: CalibrationConfig::default(),
            training: TrainingConfig::default(),
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                request_subject: "predictions.requests".to_string(),
                result_subject: "predictions.results".to_string(),
            },
            pipeline: PipelineConfig {
                workers: 4,
                metrics_interval_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.artifacts.dir, "artifacts");
        assert!(!config.calibration.clamp_low_branch);
        assert_eq!(config.training.hidden_layers, vec![24, 12, 6]);
        assert_eq!(config.training.seed, 42);
    }

    #[test]
    fn test_only_lung_is_retrainable_by_default() {
        let domains = DomainsConfig::default();
        assert!(domains.policy(Domain::Lung).retrainable);
        assert!(!domains.policy(Domain::Lung).required);
        for domain in [Domain::Heart, Domain::Liver, Domain::Diabetes] {
            assert!(!domains.policy(domain).retrainable);
            assert!(domains.policy(domain).required);
        }

        let required: Vec<Domain> = domains.required().collect();
        assert_eq!(required, vec![Domain::Heart, Domain::Liver, Domain::Diabetes]);
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[artifacts]
dir = "/var/lib/health-risk"

[domains.heart]
retrainable = true
required = false

[training]
epochs = 5

[nats]
url = "nats://nats:4222"
request_subject = "req"
result_subject = "res"

[pipeline]
workers = 2

[logging]
level = "debug"
format = "pretty"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.artifacts.dir, "/var/lib/health-risk");
        assert_eq!(config.artifacts.onnx_threads, 1);
        assert!(config.domains.heart.retrainable);
        // Sections and keys left out keep their defaults
        assert_eq!(config.domains.lung, DomainPolicy::REGENERABLE);
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.pipeline.metrics_interval_secs, 30);
    }

    #[test]
    fn test_partial_domain_table_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[artifacts]
dir = "artifacts"

[domains.heart]
retrainable = true

[domains.lung]
required = true

[nats]
url = "nats://localhost:4222"
request_subject = "req"
result_subject = "res"

[pipeline]
workers = 1

[logging]
level = "info"
format = "json"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert!(config.domains.heart.retrainable);
        assert!(config.domains.heart.required);
        assert!(config.domains.lung.retrainable);
        assert!(config.domains.lung.required);
        assert_eq!(config.domains.liver, DomainPolicy::FIXED);
        assert_eq!(config.domains.diabetes, DomainPolicy::FIXED);
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.toml");
        let config = AppConfig::load_from_path(path).unwrap();
        assert_eq!(config.domains, DomainsConfig::default());
        assert_eq!(config.training, TrainingConfig::default());
    }
}
