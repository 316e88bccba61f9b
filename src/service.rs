//! Prediction service: feature engineering, scaling, inference,
//! calibration and classification, plus the retrain-and-retry recovery
//! path for domains whose artifacts can be regenerated.

use crate::config::DomainsConfig;
use crate::error::{PipelineError, PredictionError};
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::PipelineMetrics;
use crate::models::calibration::Calibrator;
use crate::models::store::{ArtifactStore, ArtifactTriple};
use crate::training::Retrainer;
use crate::types::domain::Domain;
use crate::types::prediction::PredictionResult;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Scores raw measurements for one domain at a time.
///
/// Safe to share across threads. Requests never mutate artifacts except
/// through the recovery path, which swaps a whole new triple into the store.
pub struct PredictionService {
    store: Arc<ArtifactStore>,
    retrainer: Option<Arc<dyn Retrainer>>,
    domains: DomainsConfig,
    calibrator: Calibrator,
    /// Serializes retrains per domain
    retrain_locks: [Mutex<()>; 4],
    metrics: Arc<PipelineMetrics>,
}

impl PredictionService {
    pub fn new(store: Arc<ArtifactStore>, domains: DomainsConfig, calibrator: Calibrator) -> Self {
        Self {
            store,
            retrainer: None,
            domains,
            calibrator,
            retrain_locks: Default::default(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Collaborator used to regenerate artifacts for retrainable domains
    pub fn with_retrainer(mut self, retrainer: Arc<dyn Retrainer>) -> Self {
        self.retrainer = Some(retrainer);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Score one raw vector.
    ///
    /// Input errors fail immediately. Artifact and inference failures fail
    /// immediately unless the domain is retrainable, in which case the
    /// artifacts are retrained once and the prediction retried once.
    pub fn predict(&self, domain: Domain, raw: &[f64]) -> Result<PredictionResult, PredictionError> {
        let started = Instant::now();
        let outcome = self.predict_with_recovery(domain, raw);

        match &outcome {
            Ok(result) => {
                debug!(
                    domain = %domain,
                    risk_percentage = result.risk_percentage,
                    category = %result.category,
                    "Prediction completed"
                );
                self.metrics
                    .record_prediction(domain, result.category, started.elapsed());
            }
            Err(e) => {
                debug!(domain = %domain, error = %e, "Prediction failed");
                self.metrics.record_failure(e.cause().kind(), started.elapsed());
            }
        }

        outcome
    }

    fn predict_with_recovery(
        &self,
        domain: Domain,
        raw: &[f64],
    ) -> Result<PredictionResult, PredictionError> {
        // Validated before any artifact is touched, so bad input never
        // reaches the scaler or triggers a retrain
        let engineered = FeatureExtractor::new(domain)
            .extract(raw)
            .map_err(|e| PredictionError::new(domain, e))?;

        let current = self.store.try_get(domain);
        let first = match &current {
            Some(triple) => self.score(domain, triple, &engineered),
            None => Err(PipelineError::ArtifactsUnavailable {
                domain,
                reason: "no artifacts loaded".to_string(),
            }),
        };

        let failure = match first {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !failure.is_recoverable() || !self.domains.policy(domain).retrainable {
            return Err(PredictionError::new(domain, failure));
        }
        if self.retrainer.is_none() {
            warn!(domain = %domain, "Domain is retrainable but no retrainer is configured");
            return Err(PredictionError::new(domain, failure));
        }

        warn!(domain = %domain, error = %failure, "Prediction failed, retraining artifacts");
        self.recover(domain, current.as_ref())
            .map_err(|e| PredictionError::after_retry(domain, e))?;

        let triple = self
            .store
            .get(domain)
            .map_err(|e| PredictionError::after_retry(domain, e))?;
        let retried = self.score(domain, &triple, &engineered);

        match &retried {
            Ok(_) => info!(domain = %domain, "Prediction succeeded after retraining"),
            Err(e) => error!(domain = %domain, error = %e, "Prediction failed after retraining"),
        }
        retried.map_err(|e| PredictionError::after_retry(domain, e))
    }

    /// Scale, infer, calibrate and classify with one fixed triple
    fn score(
        &self,
        domain: Domain,
        triple: &ArtifactTriple,
        engineered: &[f64],
    ) -> Result<PredictionResult, PipelineError> {
        let inference = |reason: String| PipelineError::Inference { domain, reason };

        let scaled = triple.scaler().transform(engineered).ok_or_else(|| {
            inference(format!(
                "scaler expects {} features, got {}",
                triple.scaler().width(),
                engineered.len()
            ))
        })?;
        if scaled.iter().any(|v| !v.is_finite()) {
            return Err(inference("scaled features are not finite".to_string()));
        }

        let probability = triple
            .model()
            .predict_proba(&scaled)
            .map_err(|e| inference(e.to_string()))?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(inference(format!(
                "model '{}' returned {} outside [0, 1]",
                triple.model().name(),
                probability
            )));
        }

        let calibrated = self.calibrator.calibrate(probability);
        Ok(PredictionResult::classify(calibrated))
    }

    /// Retrain and install new artifacts, unless another caller already
    /// replaced the triple that failed
    fn recover(
        &self,
        domain: Domain,
        failed: Option<&Arc<ArtifactTriple>>,
    ) -> Result<(), PipelineError> {
        let retrain_failed = |reason: String| PipelineError::RetrainFailed { domain, reason };

        let retrainer = self
            .retrainer
            .as_ref()
            .ok_or_else(|| retrain_failed("no retrainer configured".to_string()))?;

        let _guard = self.retrain_locks[domain as usize]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(latest) = self.store.try_get(domain) {
            let replaced = failed.map_or(true, |f| !Arc::ptr_eq(f, &latest));
            if replaced {
                info!(domain = %domain, "Artifacts already replaced, skipping retrain");
                return Ok(());
            }
        }

        let started = Instant::now();
        let triple = match retrainer.retrain(domain) {
            Ok(triple) => triple,
            Err(e) => {
                self.metrics.record_retrain(false);
                error!(domain = %domain, error = %e, "Retraining failed");
                return Err(retrain_failed(e.to_string()));
            }
        };

        if let Err(e) = self.store.replace(domain, triple) {
            self.metrics.record_retrain(false);
            error!(domain = %domain, error = %e, "Retrained artifacts could not be saved");
            return Err(retrain_failed(e.to_string()));
        }

        self.metrics.record_retrain(true);
        info!(
            domain = %domain,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Artifacts retrained"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainPolicy;
    use crate::error::TrainingError;
    use crate::models::inference::{ModelError, RiskModel};
    use crate::models::scaler::StandardScaler;
    use crate::models::store::tests::constant_triple;
    use crate::types::prediction::RiskCategory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HEART_RAW: [f64; 13] = [63.0, 1.0, 3.0, 145.0, 233.0, 1.0, 0.0, 150.0, 0.0, 2.3, 0.0, 0.0, 1.0];
    const LUNG_RAW: [f64; 8] = [55.0, 1.0, 120.0, 0.0, 27.0, 1.0, 1.0, 0.0];

    /// Model returning a fixed outcome regardless of input
    struct FixedModel {
        width: usize,
        output: Result<f64, String>,
    }

    impl RiskModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn input_dim(&self) -> Option<usize> {
            Some(self.width)
        }

        fn predict_proba(&self, _features: &[f64]) -> Result<f64, ModelError> {
            self.output.clone().map_err(ModelError)
        }
    }

    fn fixed_triple(domain: Domain, output: Result<f64, String>) -> ArtifactTriple {
        let width = domain.engineered_feature_count();
        let scaler = StandardScaler::new(vec![0.0; width], vec![1.0; width]);
        let model = FixedModel { width, output };
        ArtifactTriple::with_default_names(domain, scaler, Box::new(model)).unwrap()
    }

    fn failing_triple(domain: Domain) -> ArtifactTriple {
        fixed_triple(domain, Err("runtime exploded".to_string()))
    }

    type Produce = Box<dyn Fn(Domain) -> Result<ArtifactTriple, TrainingError> + Send + Sync>;

    struct CountingRetrainer {
        calls: AtomicUsize,
        produce: Produce,
    }

    impl CountingRetrainer {
        fn new(produce: Produce) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                produce,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Retrainer for CountingRetrainer {
        fn retrain(&self, domain: Domain) -> Result<ArtifactTriple, TrainingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.produce)(domain)
        }
    }

    fn service(store: Arc<ArtifactStore>, retrainer: Arc<CountingRetrainer>) -> PredictionService {
        PredictionService::new(store, DomainsConfig::default(), Calibrator::default())
            .with_retrainer(retrainer)
    }

    #[test]
    fn test_heart_prediction() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Heart, constant_triple(Domain::Heart, 0.0));
        let svc = PredictionService::new(store, DomainsConfig::default(), Calibrator::default());

        let result = svc.predict(Domain::Heart, &HEART_RAW).unwrap();
        assert_eq!(result.risk_percentage, 50.0);
        assert_eq!(result.category, RiskCategory::Moderate);
        assert_eq!(result.advice, RiskCategory::Moderate.advice());
        assert_eq!(svc.metrics().predictions_completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_high_end_is_compressed() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Diabetes, fixed_triple(Domain::Diabetes, Ok(1.0)));
        let svc = PredictionService::new(store, DomainsConfig::default(), Calibrator::default());

        let raw = [2.0, 140.0, 70.0, 20.0, 80.0, 31.0, 0.4, 45.0];
        let result = svc.predict(Domain::Diabetes, &raw).unwrap();
        assert_eq!(result.risk_percentage, 94.0);
        assert_eq!(result.category, RiskCategory::High);
    }

    #[test]
    fn test_low_branch_clamp_is_configurable() {
        let p = 0.19;
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Liver, fixed_triple(Domain::Liver, Ok(p)));
        let raw = [45.0, 1.0, 0.8, 0.2, 190.0, 25.0, 30.0, 6.8, 3.4, 1.0];

        let default = PredictionService::new(Arc::clone(&store), DomainsConfig::default(), Calibrator::default());
        let result = default.predict(Domain::Liver, &raw).unwrap();
        assert_eq!(result.risk_percentage, 24.7);

        let clamped = PredictionService::new(store, DomainsConfig::default(), Calibrator::new(true));
        let result = clamped.predict(Domain::Liver, &raw).unwrap();
        assert_eq!(result.risk_percentage, 20.0);
        assert_eq!(result.category, RiskCategory::Low);
    }

    #[test]
    fn test_invalid_shape_never_reaches_artifacts() {
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 0.0))));
        let svc = service(Arc::new(ArtifactStore::in_memory()), Arc::clone(&retrainer));

        // No artifacts are loaded, yet the shape error wins
        let err = svc.predict(Domain::Heart, &HEART_RAW[..12]).unwrap_err();
        assert!(matches!(
            err.cause(),
            PipelineError::InvalidFeatureShape {
                expected: 13,
                actual: 12,
                ..
            }
        ));
        assert!(!err.retried);

        let err = svc.predict(Domain::Lung, &[1.0; 9]).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(retrainer.calls(), 0);
    }

    #[test]
    fn test_non_finite_input_is_rejected() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Lung, failing_triple(Domain::Lung));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 0.0))));
        let svc = service(store, Arc::clone(&retrainer));

        let mut raw = LUNG_RAW;
        raw[4] = f64::NAN;
        let err = svc.predict(Domain::Lung, &raw).unwrap_err();
        assert!(matches!(err.cause(), PipelineError::InvalidFeatureValue { index: 4, .. }));
        assert_eq!(retrainer.calls(), 0);
    }

    #[test]
    fn test_out_of_range_input_does_not_retrain() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Lung, constant_triple(Domain::Lung, 0.0));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 0.0))));
        let svc = service(Arc::clone(&store), Arc::clone(&retrainer));
        let before = store.get(Domain::Lung).unwrap();

        // Physical activity of -1 turns a derived ratio infinite
        let raw = [55.0, 1.0, 120.0, 0.0, 27.0, 1.0, -1.0, 0.0];
        let err = svc.predict(Domain::Lung, &raw).unwrap_err();

        assert!(err.is_client_error());
        assert!(!err.retried);
        assert_eq!(err.cause().kind(), "invalid_feature_value");
        assert_eq!(retrainer.calls(), 0);
        assert!(Arc::ptr_eq(&before, &store.get(Domain::Lung).unwrap()));
    }

    #[test]
    fn test_lung_inference_failure_retrains_once() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Lung, failing_triple(Domain::Lung));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 0.0))));
        let svc = service(Arc::clone(&store), Arc::clone(&retrainer));

        let result = svc.predict(Domain::Lung, &LUNG_RAW).unwrap();
        assert_eq!(result.risk_percentage, 50.0);
        assert_eq!(retrainer.calls(), 1);
        assert_eq!(svc.metrics().retrains_succeeded.load(Ordering::Relaxed), 1);

        // The new artifacts stay in place
        svc.predict(Domain::Lung, &LUNG_RAW).unwrap();
        assert_eq!(retrainer.calls(), 1);
    }

    #[test]
    fn test_unloaded_lung_is_trained_on_demand() {
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 2.0))));
        let svc = service(Arc::new(ArtifactStore::in_memory()), Arc::clone(&retrainer));

        let result = svc.predict(Domain::Lung, &LUNG_RAW).unwrap();
        // sigmoid(2) = 0.8808 -> 0.8 + 0.0808 * 0.7
        assert_eq!(result.risk_percentage, 85.66);
        assert_eq!(result.category, RiskCategory::High);
        assert_eq!(retrainer.calls(), 1);
    }

    #[test]
    fn test_failed_retry_surfaces_prediction_error() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Lung, failing_triple(Domain::Lung));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(failing_triple(d))));
        let svc = service(store, Arc::clone(&retrainer));

        let err = svc.predict(Domain::Lung, &LUNG_RAW).unwrap_err();
        assert!(err.retried);
        assert!(matches!(err.cause(), PipelineError::Inference { .. }));
        assert_eq!(retrainer.calls(), 1);
        assert_eq!(svc.metrics().predictions_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_retrain_error_is_surfaced() {
        let retrainer = CountingRetrainer::new(Box::new(|_| {
            Err(TrainingError::Degenerate("one class".to_string()))
        }));
        let svc = service(Arc::new(ArtifactStore::in_memory()), Arc::clone(&retrainer));

        let err = svc.predict(Domain::Lung, &LUNG_RAW).unwrap_err();
        assert!(err.retried);
        assert!(matches!(err.cause(), PipelineError::RetrainFailed { .. }));
        assert_eq!(retrainer.calls(), 1);
        assert_eq!(svc.metrics().retrains_succeeded.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_fixed_domains_fail_without_retraining() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Heart, failing_triple(Domain::Heart));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 0.0))));
        let svc = service(store, Arc::clone(&retrainer));

        let err = svc.predict(Domain::Heart, &HEART_RAW).unwrap_err();
        assert!(!err.retried);
        assert_eq!(err.cause().kind(), "inference_error");

        let raw = [2.0, 140.0, 70.0, 20.0, 80.0, 31.0, 0.4, 45.0];
        let err = svc.predict(Domain::Diabetes, &raw).unwrap_err();
        assert!(matches!(err.cause(), PipelineError::ArtifactsUnavailable { .. }));

        assert_eq!(retrainer.calls(), 0);
    }

    #[test]
    fn test_out_of_range_probability_is_an_inference_error() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Heart, fixed_triple(Domain::Heart, Ok(1.5)));
        let svc = PredictionService::new(store, DomainsConfig::default(), Calibrator::default());

        let err = svc.predict(Domain::Heart, &HEART_RAW).unwrap_err();
        assert!(matches!(err.cause(), PipelineError::Inference { .. }));
    }

    #[test]
    fn test_retrain_policy_follows_configuration() {
        let domains = DomainsConfig {
            heart: DomainPolicy::REGENERABLE,
            lung: DomainPolicy::FIXED,
            ..DomainsConfig::default()
        };
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Heart, failing_triple(Domain::Heart));
        store.install(Domain::Lung, failing_triple(Domain::Lung));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 0.0))));
        let svc = PredictionService::new(store, domains, Calibrator::default())
            .with_retrainer(retrainer.clone());

        assert!(svc.predict(Domain::Heart, &HEART_RAW).is_ok());
        assert_eq!(retrainer.calls(), 1);

        let err = svc.predict(Domain::Lung, &LUNG_RAW).unwrap_err();
        assert!(!err.retried);
        assert_eq!(retrainer.calls(), 1);
    }

    #[test]
    fn test_recover_skips_when_already_replaced() {
        let store = Arc::new(ArtifactStore::in_memory());
        let stale = store.install(Domain::Lung, failing_triple(Domain::Lung));
        store.install(Domain::Lung, constant_triple(Domain::Lung, 0.0));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 1.0))));
        let svc = service(Arc::clone(&store), Arc::clone(&retrainer));

        svc.recover(Domain::Lung, Some(&stale)).unwrap();
        assert_eq!(retrainer.calls(), 0);

        let current = store.get(Domain::Lung).unwrap();
        svc.recover(Domain::Lung, Some(&current)).unwrap();
        assert_eq!(retrainer.calls(), 1);
        assert!(!Arc::ptr_eq(&current, &store.get(Domain::Lung).unwrap()));
    }

    #[test]
    fn test_concurrent_failures_share_one_retrain() {
        let store = Arc::new(ArtifactStore::in_memory());
        store.install(Domain::Lung, failing_triple(Domain::Lung));
        let retrainer = CountingRetrainer::new(Box::new(|d| Ok(constant_triple(d, 0.0))));
        let svc = Arc::new(service(store, Arc::clone(&retrainer)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = Arc::clone(&svc);
                std::thread::spawn(move || svc.predict(Domain::Lung, &LUNG_RAW))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(retrainer.calls(), 1);
    }
}
