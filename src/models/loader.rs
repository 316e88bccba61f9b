//! Durable artifact storage

use crate::error::ArtifactError;
use crate::feature_extractor::FeatureExtractor;
use crate::models::inference::RiskModel;
use crate::models::network::DenseNetwork;
use crate::models::scaler::StandardScaler;
use crate::models::store::ArtifactTriple;
use crate::types::domain::Domain;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Load/save collaborator used by the artifact store
pub trait ArtifactRepository: Send + Sync {
    fn load(&self, domain: Domain) -> Result<ArtifactTriple, ArtifactError>;

    fn save(&self, domain: Domain, artifacts: &ArtifactTriple) -> Result<(), ArtifactError>;
}

/// Artifacts stored as files in one directory:
///
/// ```text
/// <domain>_scaler.json          mean/scale vectors
/// <domain>_model_features.json  feature names
/// <domain>_model.onnx           exported network (preferred when present)
/// <domain>_model.json           dense network weights
/// ```
#[derive(Debug, Clone)]
pub struct FileArtifactRepository {
    dir: PathBuf,
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl FileArtifactRepository {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self::with_threads(dir, 1)
    }

    pub fn with_threads<P: AsRef<Path>>(dir: P, onnx_threads: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            onnx_threads: onnx_threads.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scaler_path(&self, domain: Domain) -> PathBuf {
        self.dir.join(format!("{}_scaler.json", domain))
    }

    pub fn features_path(&self, domain: Domain) -> PathBuf {
        self.dir.join(format!("{}_model_features.json", domain))
    }

    pub fn onnx_model_path(&self, domain: Domain) -> PathBuf {
        self.dir.join(format!("{}_model.onnx", domain))
    }

    pub fn json_model_path(&self, domain: Domain) -> PathBuf {
        self.dir.join(format!("{}_model.json", domain))
    }

    fn read_json<T: DeserializeOwned>(&self, domain: Domain, path: &Path) -> Result<T, ArtifactError> {
        let bytes = fs::read(path).map_err(|e| io_or_missing(domain, path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_model(&self, domain: Domain) -> Result<Box<dyn RiskModel>, ArtifactError> {
        let name = format!("{}_model", domain);

        let onnx_path = self.onnx_model_path(domain);
        if onnx_path.exists() {
            return self.load_onnx(&onnx_path, &name);
        }

        let json_path = self.json_model_path(domain);
        let bytes = fs::read(&json_path).map_err(|e| io_or_missing(domain, &json_path, e))?;
        let network = DenseNetwork::from_json(&bytes).map_err(|source| ArtifactError::Format {
            path: json_path.clone(),
            source,
        })?;
        network
            .validate()
            .map_err(|reason| ArtifactError::Invalid { domain, reason })?;

        debug!(domain = %domain, path = %json_path.display(), "Dense model loaded");
        Ok(Box::new(network))
    }

    #[cfg(feature = "onnx")]
    fn load_onnx(&self, path: &Path, name: &str) -> Result<Box<dyn RiskModel>, ArtifactError> {
        let model = crate::models::inference::OnnxModel::load(path, name, self.onnx_threads)?;
        Ok(Box::new(model))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_onnx(&self, path: &Path, _name: &str) -> Result<Box<dyn RiskModel>, ArtifactError> {
        Err(ArtifactError::Onnx(format!(
            "{} requires the `onnx` feature (threads configured: {})",
            path.display(),
            self.onnx_threads
        )))
    }
}

fn io_or_missing(domain: Domain, path: &Path, e: std::io::Error) -> ArtifactError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ArtifactError::NotFound {
            domain,
            path: path.to_path_buf(),
        }
    } else {
        ArtifactError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_err(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Files of one triple replaced together.
///
/// Every new file is written to a `.tmp` sibling before any target is
/// touched. On commit the current files move to `.bak`, the new ones are
/// renamed into place, and any failure restores the backups. The directory
/// holds either the complete old triple or the complete new one.
#[derive(Debug, Default)]
struct ArtifactBatch {
    /// (target, staged temp file)
    staged: Vec<(PathBuf, PathBuf)>,
    /// Files that must not survive the commit
    retired: Vec<PathBuf>,
}

impl ArtifactBatch {
    fn stage(&mut self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        let tmp = with_suffix(path, ".tmp");
        if let Err(source) = fs::write(&tmp, bytes) {
            self.discard();
            return Err(io_err(&tmp, source));
        }
        self.staged.push((path.to_path_buf(), tmp));
        Ok(())
    }

    fn retire(&mut self, path: PathBuf) {
        self.retired.push(path);
    }

    /// Drop staged files that were not renamed into place
    fn discard(&self) {
        for (_, tmp) in &self.staged {
            let _ = fs::remove_file(tmp);
        }
    }

    fn swap_in(
        &self,
        backups: &mut Vec<(PathBuf, PathBuf)>,
        placed: &mut Vec<PathBuf>,
    ) -> Result<(), ArtifactError> {
        let targets = self
            .staged
            .iter()
            .map(|(target, _)| target)
            .chain(&self.retired);
        for target in targets {
            if target.exists() {
                let backup = with_suffix(target, ".bak");
                fs::rename(target, &backup).map_err(|e| io_err(target, e))?;
                backups.push((target.clone(), backup));
            }
        }

        for (target, tmp) in &self.staged {
            fs::rename(tmp, target).map_err(|e| io_err(target, e))?;
            placed.push(target.clone());
        }
        Ok(())
    }

    fn commit(self) -> Result<(), ArtifactError> {
        let mut backups = Vec::new();
        let mut placed = Vec::new();

        match self.swap_in(&mut backups, &mut placed) {
            Ok(()) => {
                for (_, backup) in &backups {
                    if let Err(e) = fs::remove_file(backup) {
                        warn!(path = %backup.display(), error = %e, "Failed to remove artifact backup");
                    }
                }
                Ok(())
            }
            Err(e) => {
                for target in &placed {
                    let _ = fs::remove_file(target);
                }
                for (target, backup) in &backups {
                    if let Err(restore) = fs::rename(backup, target) {
                        error!(
                            path = %target.display(),
                            error = %restore,
                            "Failed to restore artifact from backup"
                        );
                    }
                }
                self.discard();
                Err(e)
            }
        }
    }
}

fn to_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, ArtifactError> {
    serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Format {
        path: path.to_path_buf(),
        source,
    })
}

impl ArtifactRepository for FileArtifactRepository {
    fn load(&self, domain: Domain) -> Result<ArtifactTriple, ArtifactError> {
        info!(domain = %domain, dir = %self.dir.display(), "Loading artifacts");

        let scaler: StandardScaler = self.read_json(domain, &self.scaler_path(domain))?;
        let model = self.load_model(domain)?;

        let features_path = self.features_path(domain);
        let feature_names: Vec<String> = match self.read_json(domain, &features_path) {
            Ok(names) => names,
            Err(e) if e.is_not_found() => {
                warn!(
                    domain = %domain,
                    path = %features_path.display(),
                    "Feature name list missing, using built-in names"
                );
                FeatureExtractor::new(domain)
                    .feature_names()
                    .into_iter()
                    .map(String::from)
                    .collect()
            }
            Err(e) => return Err(e),
        };

        ArtifactTriple::new(domain, scaler, model, feature_names)
    }

    fn save(&self, domain: Domain, artifacts: &ArtifactTriple) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(|source| io_err(&self.dir, source))?;

        let model_bytes = artifacts.model().serialize_model()?;
        let features_path = self.features_path(domain);
        let features_bytes = to_json(&features_path, &artifacts.feature_names())?;
        let scaler_path = self.scaler_path(domain);
        let scaler_bytes = to_json(&scaler_path, artifacts.scaler())?;

        let mut batch = ArtifactBatch::default();
        batch.stage(&self.json_model_path(domain), &model_bytes)?;
        batch.stage(&features_path, &features_bytes)?;
        batch.stage(&scaler_path, &scaler_bytes)?;

        // An older exported network would shadow the one just written
        let onnx_path = self.onnx_model_path(domain);
        if onnx_path.exists() {
            warn!(domain = %domain, path = %onnx_path.display(), "Removing superseded ONNX model");
            batch.retire(onnx_path);
        }

        batch.commit()?;

        info!(domain = %domain, dir = %self.dir.display(), "Artifacts saved");
        Ok(())
    }
}
