//! Process-wide owner of the active artifacts per domain.
//!
//! Each domain has one slot holding an `Arc` to an immutable
//! [`ArtifactTriple`]. Readers clone the `Arc` under a short read lock and
//! keep using that triple for the rest of their call; `replace` builds the
//! new triple completely before swapping the pointer, so a reader sees
//! either the old triple or the new one, never a mix.

use crate::error::{ArtifactError, PipelineError};
use crate::feature_extractor::FeatureExtractor;
use crate::models::inference::RiskModel;
use crate::models::loader::ArtifactRepository;
use crate::models::scaler::StandardScaler;
use crate::types::domain::Domain;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// Scaler, model and feature names trained together
pub struct ArtifactTriple {
    scaler: StandardScaler,
    model: Box<dyn RiskModel>,
    feature_names: Vec<String>,
}

impl ArtifactTriple {
    /// Assemble a triple, checking that all parts agree on the feature width
    pub fn new(
        domain: Domain,
        scaler: StandardScaler,
        model: Box<dyn RiskModel>,
        feature_names: Vec<String>,
    ) -> Result<Self, ArtifactError> {
        let expected = domain.engineered_feature_count();

        if !scaler.is_valid() {
            return Err(ArtifactError::Invalid {
                domain,
                reason: "scaler has mismatched or non-finite parameters".to_string(),
            });
        }
        if scaler.width() != expected {
            return Err(ArtifactError::DimensionMismatch {
                domain,
                what: "scaler",
                expected,
                actual: scaler.width(),
            });
        }
        if let Some(input_dim) = model.input_dim() {
            if input_dim != expected {
                return Err(ArtifactError::DimensionMismatch {
                    domain,
                    what: "model",
                    expected,
                    actual: input_dim,
                });
            }
        }
        if feature_names.len() != expected {
            return Err(ArtifactError::DimensionMismatch {
                domain,
                what: "feature name list",
                expected,
                actual: feature_names.len(),
            });
        }

        Ok(Self {
            scaler,
            model,
            feature_names,
        })
    }

    /// Triple with the domain's default feature names
    pub fn with_default_names(
        domain: Domain,
        scaler: StandardScaler,
        model: Box<dyn RiskModel>,
    ) -> Result<Self, ArtifactError> {
        let names = FeatureExtractor::new(domain)
            .feature_names()
            .into_iter()
            .map(String::from)
            .collect();
        Self::new(domain, scaler, model, names)
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn model(&self) -> &dyn RiskModel {
        self.model.as_ref()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

impl fmt::Debug for ArtifactTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactTriple")
            .field("model", &self.model.name())
            .field("width", &self.scaler.width())
            .finish()
    }
}

/// Outcome of the startup load
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<Domain>,
    pub failed: Vec<(Domain, ArtifactError)>,
}

impl LoadReport {
    pub fn is_loaded(&self, domain: Domain) -> bool {
        self.loaded.contains(&domain)
    }

    pub fn failure(&self, domain: Domain) -> Option<&ArtifactError> {
        self.failed.iter().find(|(d, _)| *d == domain).map(|(_, e)| e)
    }
}

type Slot = RwLock<Option<Arc<ArtifactTriple>>>;

/// Holder of the current artifact triple for every domain
pub struct ArtifactStore {
    slots: [Slot; 4],
    repository: Option<Arc<dyn ArtifactRepository>>,
}

impl ArtifactStore {
    /// Store backed by durable artifact storage
    pub fn new(repository: Arc<dyn ArtifactRepository>) -> Self {
        Self {
            slots: Default::default(),
            repository: Some(repository),
        }
    }

    /// Store without persistence; `replace` only swaps in memory
    pub fn in_memory() -> Self {
        Self {
            slots: Default::default(),
            repository: None,
        }
    }

    fn read_slot(&self, domain: Domain) -> RwLockReadGuard<'_, Option<Arc<ArtifactTriple>>> {
        // The slot only ever holds a whole Arc, so a poisoned lock still
        // guards a consistent value.
        self.slots[domain as usize]
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slot(&self, domain: Domain) -> RwLockWriteGuard<'_, Option<Arc<ArtifactTriple>>> {
        self.slots[domain as usize]
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load one domain from the repository into its slot
    pub fn load(&self, domain: Domain) -> Result<(), ArtifactError> {
        let repository = self.repository.as_ref().ok_or(ArtifactError::NotFound {
            domain,
            path: Default::default(),
        })?;

        let triple = repository.load(domain)?;
        info!(
            domain = %domain,
            model = %triple.model().name(),
            features = triple.scaler().width(),
            "Artifacts loaded"
        );
        self.install(domain, triple);
        Ok(())
    }

    /// Load every domain; failures are reported, not raised
    pub fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();

        for domain in Domain::ALL {
            match self.load(domain) {
                Ok(()) => report.loaded.push(domain),
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Artifacts not loaded");
                    report.failed.push((domain, e));
                }
            }
        }

        report
    }

    /// Current artifacts for a domain
    pub fn get(&self, domain: Domain) -> Result<Arc<ArtifactTriple>, PipelineError> {
        self.try_get(domain)
            .ok_or_else(|| PipelineError::ArtifactsUnavailable {
                domain,
                reason: "no artifacts loaded".to_string(),
            })
    }

    pub fn try_get(&self, domain: Domain) -> Option<Arc<ArtifactTriple>> {
        self.read_slot(domain).clone()
    }

    pub fn is_loaded(&self, domain: Domain) -> bool {
        self.read_slot(domain).is_some()
    }

    /// Persist a newly trained triple, then make it current.
    ///
    /// When persistence fails the previous triple stays active.
    pub fn replace(
        &self,
        domain: Domain,
        triple: ArtifactTriple,
    ) -> Result<Arc<ArtifactTriple>, ArtifactError> {
        if let Some(repository) = &self.repository {
            repository.save(domain, &triple)?;
        }

        let installed = self.install(domain, triple);
        info!(domain = %domain, model = %installed.model().name(), "Artifacts replaced");
        Ok(installed)
    }

    /// Swap a triple in without touching durable storage
    pub fn install(&self, domain: Domain, triple: ArtifactTriple) -> Arc<ArtifactTriple> {
        let triple = Arc::new(triple);
        *self.write_slot(domain) = Some(Arc::clone(&triple));
        triple
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
