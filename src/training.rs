//! On-demand retraining from synthetic data.
//!
//! Only the lung domain can be regenerated: its training set is simulated
//! from fixed population assumptions, while the other domains depend on
//! external datasets. Everything here is deterministic for a given seed.

use crate::config::TrainingConfig;
use crate::error::TrainingError;
use crate::feature_extractor::FeatureExtractor;
use crate::models::network::DenseNetwork;
use crate::models::scaler::StandardScaler;
use crate::models::store::ArtifactTriple;
use crate::types::domain::Domain;
use ndarray::{Array, Array1, Array2, ArrayView1, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, info};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;
const LOSS_CLIP: f64 = 1e-7;

/// Produces a fresh artifact triple for a domain
pub trait Retrainer: Send + Sync {
    fn retrain(&self, domain: Domain) -> Result<ArtifactTriple, TrainingError>;
}

/// Engineered lung feature rows with binary labels
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y).count()
    }

    fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Held-out evaluation of a freshly trained model
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub samples: usize,
    pub positives: usize,
    pub epochs_run: usize,
    pub best_validation_loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Undefined when the test split holds a single class
    pub roc_auc: Option<f64>,
    /// Confusion matrix on the test split at the 0.5 threshold
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

/// Trains the lung classifier on simulated patients
#[derive(Debug, Clone)]
pub struct SyntheticLungTrainer {
    config: TrainingConfig,
}

impl SyntheticLungTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The synthetic dataset for the configured seed
    pub fn dataset(&self) -> Result<Dataset, TrainingError> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.synthesize(&mut rng)
    }

    fn synthesize<R: Rng>(&self, rng: &mut R) -> Result<Dataset, TrainingError> {
        let extractor = FeatureExtractor::new(Domain::Lung);
        let mut features = Vec::with_capacity(self.config.samples);
        let mut labels = Vec::with_capacity(self.config.samples);

        for _ in 0..self.config.samples {
            let age = gaussian(rng, 50.0, 15.0).clamp(20.0, 80.0);
            let smoking = bernoulli(rng, 0.3);
            let air_quality = gaussian(rng, 100.0, 50.0).clamp(20.0, 300.0);
            let alcohol = bernoulli(rng, 0.4);
            let bmi = gaussian(rng, 25.0, 5.0).clamp(18.0, 40.0);
            let family_history = bernoulli(rng, 0.2);
            let activity = rng.gen_range(0..4) as f64;
            let occupation = bernoulli(rng, 0.25);

            let base_risk = (age - 20.0) / 60.0 * 0.3
                + smoking * 0.3
                + (air_quality - 20.0) / 280.0 * 0.2
                + alcohol * 0.1
                + (bmi - 18.0) / 22.0 * 0.2
                + family_history * 0.2
                + (3.0 - activity) / 3.0 * 0.2
                + occupation * 0.2;
            let risk = (base_risk + gaussian(rng, 0.0, 0.1)).clamp(0.0, 1.0);

            let raw = [
                age,
                smoking,
                air_quality,
                alcohol,
                bmi,
                family_history,
                activity,
                occupation,
            ];
            let row = extractor
                .extract(&raw)
                .map_err(|e| TrainingError::Degenerate(e.to_string()))?;

            features.push(row);
            labels.push(rng.gen_bool(risk));
        }

        Ok(Dataset { features, labels })
    }

    /// Generate data, fit scaler and network, evaluate on the test split
    pub fn train(&self) -> Result<(ArtifactTriple, TrainingReport), TrainingError> {
        let config = &self.config;
        let mut rng = StdRng::seed_from_u64(config.seed);

        info!(
            samples = config.samples,
            seed = config.seed,
            hidden = ?config.hidden_layers,
            "Training lung model on synthetic data"
        );

        let data = self.synthesize(&mut rng)?;
        let all: Vec<usize> = (0..data.len()).collect();
        let (train_idx, test_idx) = stratified_split(&data.labels, &all, config.test_split, &mut rng)?;
        let (fit_idx, val_idx) =
            stratified_split(&data.labels, &train_idx, config.validation_split, &mut rng)?;

        let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| data.features[i].clone()).collect();
        let scaler = StandardScaler::fit(&train_rows)
            .ok_or_else(|| TrainingError::Degenerate("empty training split".to_string()))?;

        let scale = |set: Dataset| -> Result<Dataset, TrainingError> {
            let features = scaler
                .transform_rows(&set.features)
                .ok_or_else(|| TrainingError::Degenerate("feature width changed".to_string()))?;
            Ok(Dataset {
                features,
                labels: set.labels,
            })
        };
        let fit_set = scale(data.subset(&fit_idx))?;
        let val_set = scale(data.subset(&val_idx))?;
        let test_set = scale(data.subset(&test_idx))?;

        let width = Domain::Lung.engineered_feature_count();
        let mut network = DenseNetwork::new("lung_model", width, &config.hidden_layers, &mut rng);
        let (epochs_run, best_validation_loss) =
            fit_network(&mut network, &fit_set, &val_set, config, &mut rng);

        let probabilities: Vec<f64> = test_set
            .features
            .iter()
            .map(|x| network.forward(ArrayView1::from(x.as_slice())))
            .collect();
        let report = evaluate(
            &probabilities,
            &test_set.labels,
            data.len(),
            data.positives(),
            epochs_run,
            best_validation_loss,
        );

        info!(
            epochs = report.epochs_run,
            accuracy = report.accuracy,
            precision = report.precision,
            recall = report.recall,
            f1 = report.f1,
            roc_auc = ?report.roc_auc,
            true_positives = report.true_positives,
            false_positives = report.false_positives,
            true_negatives = report.true_negatives,
            false_negatives = report.false_negatives,
            "Lung model trained"
        );

        let triple = ArtifactTriple::with_default_names(Domain::Lung, scaler, Box::new(network))?;
        Ok((triple, report))
    }
}

impl Retrainer for SyntheticLungTrainer {
    fn retrain(&self, domain: Domain) -> Result<ArtifactTriple, TrainingError> {
        if domain != Domain::Lung {
            return Err(TrainingError::UnsupportedDomain(domain));
        }
        self.train().map(|(triple, _)| triple)
    }
}

fn gaussian<R: Rng>(rng: &mut R, mean: f64, std: f64) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    mean + z * std
}

fn bernoulli<R: Rng>(rng: &mut R, p: f64) -> f64 {
    if rng.gen_bool(p) {
        1.0
    } else {
        0.0
    }
}

/// Split `indices` into (kept, held out), holding out `fraction` of each class
fn stratified_split<R: Rng>(
    labels: &[bool],
    indices: &[usize],
    fraction: f64,
    rng: &mut R,
) -> Result<(Vec<usize>, Vec<usize>), TrainingError> {
    let mut kept = Vec::with_capacity(indices.len());
    let mut held = Vec::new();

    for class in [false, true] {
        let mut members: Vec<usize> = indices.iter().copied().filter(|&i| labels[i] == class).collect();
        if members.len() < 2 {
            return Err(TrainingError::Degenerate(format!(
                "class {} has {} samples",
                class as u8,
                members.len()
            )));
        }
        members.shuffle(rng);

        let n_held = ((members.len() as f64 * fraction).round() as usize).clamp(1, members.len() - 1);
        held.extend_from_slice(&members[..n_held]);
        kept.extend_from_slice(&members[n_held..]);
    }

    kept.sort_unstable();
    held.sort_unstable();
    Ok((kept, held))
}

fn class_weight(label: bool, config: &TrainingConfig) -> f64 {
    if label {
        config.positive_class_weight
    } else {
        1.0
    }
}

/// Mean class-weighted binary cross-entropy
fn weighted_loss(network: &DenseNetwork, set: &Dataset, config: &TrainingConfig) -> f64 {
    if set.is_empty() {
        return 0.0;
    }

    let total: f64 = set
        .features
        .iter()
        .zip(&set.labels)
        .map(|(x, &y)| {
            let p = network
                .forward(ArrayView1::from(x.as_slice()))
                .clamp(LOSS_CLIP, 1.0 - LOSS_CLIP);
            let loss = if y { -p.ln() } else { -(1.0 - p).ln() };
            loss * class_weight(y, config)
        })
        .sum();
    total / set.len() as f64
}

struct AdamState {
    m_w: Vec<Array2<f64>>,
    v_w: Vec<Array2<f64>>,
    m_b: Vec<Array1<f64>>,
    v_b: Vec<Array1<f64>>,
    step: i32,
}

impl AdamState {
    fn new(network: &DenseNetwork) -> Self {
        let layers = network.layers();
        Self {
            m_w: layers.iter().map(|l| Array::zeros(l.weights.raw_dim())).collect(),
            v_w: layers.iter().map(|l| Array::zeros(l.weights.raw_dim())).collect(),
            m_b: layers.iter().map(|l| Array::zeros(l.bias.raw_dim())).collect(),
            v_b: layers.iter().map(|l| Array::zeros(l.bias.raw_dim())).collect(),
            step: 0,
        }
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr_t: f64,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + ADAM_EPSILON);
        });
}

/// One mini-batch of backpropagation followed by an Adam step
fn train_batch(
    network: &mut DenseNetwork,
    set: &Dataset,
    batch: &[usize],
    adam: &mut AdamState,
    config: &TrainingConfig,
) {
    let layers = network.layers();
    let mut grad_w: Vec<Array2<f64>> = layers.iter().map(|l| Array::zeros(l.weights.raw_dim())).collect();
    let mut grad_b: Vec<Array1<f64>> = layers.iter().map(|l| Array::zeros(l.bias.raw_dim())).collect();

    for &i in batch {
        let trace = network.forward_trace(ArrayView1::from(set.features[i].as_slice()));
        let output = trace[trace.len() - 1][0];
        let target = if set.labels[i] { 1.0 } else { 0.0 };

        // Sigmoid output with cross-entropy: dL/dz = p - y
        let mut delta = Array1::from_elem(1, (output - target) * class_weight(set.labels[i], config));

        for l in (0..layers.len()).rev() {
            let outer = delta
                .view()
                .insert_axis(Axis(1))
                .dot(&trace[l].view().insert_axis(Axis(0)));
            grad_w[l] += &outer;
            grad_b[l] += &delta;

            if l > 0 {
                let back = layers[l].weights.t().dot(&delta);
                let activation = layers[l - 1].activation;
                delta = back
                    .iter()
                    .zip(trace[l].iter())
                    .map(|(&g, &a)| g * activation.derivative_from_output(a))
                    .collect();
            }
        }
    }

    let n = batch.len() as f64;
    for (l, layer) in layers.iter().enumerate() {
        grad_w[l].mapv_inplace(|g| g / n);
        grad_w[l].scaled_add(2.0 * config.l2, &layer.weights);
        grad_b[l].mapv_inplace(|g| g / n);
    }

    adam.step += 1;
    let lr_t = config.learning_rate * (1.0 - ADAM_BETA2.powi(adam.step)).sqrt()
        / (1.0 - ADAM_BETA1.powi(adam.step));

    for (l, layer) in network.layers_mut().iter_mut().enumerate() {
        adam_update(&mut layer.weights, &grad_w[l], &mut adam.m_w[l], &mut adam.v_w[l], lr_t);
        adam_update(&mut layer.bias, &grad_b[l], &mut adam.m_b[l], &mut adam.v_b[l], lr_t);
    }
}

/// Mini-batch Adam with early stopping; the best validation weights are
/// restored at the end. Returns (epochs run, best validation loss).
fn fit_network<R: Rng>(
    network: &mut DenseNetwork,
    train: &Dataset,
    validation: &Dataset,
    config: &TrainingConfig,
    rng: &mut R,
) -> (usize, f64) {
    let batch_size = config.batch_size.max(1);
    let mut adam = AdamState::new(network);
    let mut order: Vec<usize> = (0..train.len()).collect();

    let mut best_loss = weighted_loss(network, validation, config);
    let mut best_network = network.clone();
    let mut stale_epochs = 0;
    let mut epochs_run = 0;

    for epoch in 0..config.epochs {
        order.shuffle(rng);
        for batch in order.chunks(batch_size) {
            train_batch(network, train, batch, &mut adam, config);
        }
        epochs_run = epoch + 1;

        let val_loss = weighted_loss(network, validation, config);
        debug!(epoch = epochs_run, val_loss = val_loss, "Epoch finished");

        if val_loss < best_loss {
            best_loss = val_loss;
            best_network = network.clone();
            stale_epochs = 0;
        } else {
            stale_epochs += 1;
            if stale_epochs >= config.patience {
                debug!(epoch = epochs_run, "Early stopping");
                break;
            }
        }
    }

    *network = best_network;
    (epochs_run, best_loss)
}

fn evaluate(
    probabilities: &[f64],
    labels: &[bool],
    samples: usize,
    positives: usize,
    epochs_run: usize,
    best_validation_loss: f64,
) -> TrainingReport {
    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (&p, &y) in probabilities.iter().zip(labels) {
        // Exactly 0.5 counts as negative
        match (p > 0.5, y) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }

    let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    TrainingReport {
        samples,
        positives,
        epochs_run,
        best_validation_loss,
        accuracy: ratio(tp + tn, labels.len()),
        precision,
        recall,
        f1,
        roc_auc: roc_auc(probabilities, labels),
        true_positives: tp,
        false_positives: fp,
        true_negatives: tn,
        false_negatives: fn_,
    }
}

/// Area under the ROC curve via the rank-sum statistic (ties share ranks)
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 || scores.len() != labels.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        // 1-based average rank of the tie group
        let rank = (start + end) as f64 / 2.0 + 1.0;
        rank_sum += order[start..=end].iter().filter(|&&i| labels[i]).count() as f64 * rank;
        start = end + 1;
    }

    let n_pos = n_pos as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            samples: 300,
            hidden_layers: vec![8, 4],
            epochs: 5,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_dataset_ranges_and_width() {
        let data = SyntheticLungTrainer::new(small_config()).dataset().unwrap();
        assert_eq!(data.len(), 300);

        for row in &data.features {
            assert_eq!(row.len(), 12);
            assert!((20.0..=80.0).contains(&row[0]));
            assert!(row[1] == 0.0 || row[1] == 1.0);
            assert!((20.0..=300.0).contains(&row[2]));
            assert!((18.0..=40.0).contains(&row[4]));
            assert!([0.0, 1.0, 2.0, 3.0].contains(&row[6]));
            // Derived columns come from the inference-time engineer
            assert_eq!(row, &FeatureExtractor::new(Domain::Lung).extract(&row[..8]).unwrap());
        }

        let positives = data.positives();
        assert!(positives > 0 && positives < data.len());
    }

    #[test]
    fn test_dataset_is_deterministic() {
        let a = SyntheticLungTrainer::new(small_config()).dataset().unwrap();
        let b = SyntheticLungTrainer::new(small_config()).dataset().unwrap();
        assert_eq!(a, b);

        let other = SyntheticLungTrainer::new(TrainingConfig {
            seed: 7,
            ..small_config()
        })
        .dataset()
        .unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_training_is_deterministic() {
        let (first, report_a) = SyntheticLungTrainer::new(small_config()).train().unwrap();
        let (second, report_b) = SyntheticLungTrainer::new(small_config()).train().unwrap();

        assert_eq!(first.scaler(), second.scaler());
        assert_eq!(report_a, report_b);

        let input = vec![0.5; 12];
        assert_eq!(
            first.model().predict_proba(&input).unwrap(),
            second.model().predict_proba(&input).unwrap()
        );
    }

    #[test]
    fn test_trained_triple_is_usable() {
        let trainer = SyntheticLungTrainer::new(small_config());
        let triple = trainer.retrain(Domain::Lung).unwrap();

        assert_eq!(triple.scaler().width(), 12);
        assert_eq!(triple.feature_names()[8], "Age_Smoking");

        let raw = [60.0, 1.0, 150.0, 1.0, 30.0, 1.0, 0.0, 1.0];
        let engineered = FeatureExtractor::new(Domain::Lung).extract(&raw).unwrap();
        let scaled = triple.scaler().transform(&engineered).unwrap();
        let p = triple.model().predict_proba(&scaled).unwrap();
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_model_learns_signal() {
        let config = TrainingConfig {
            samples: 600,
            epochs: 40,
            learning_rate: 0.005,
            ..TrainingConfig::default()
        };
        let (_, report) = SyntheticLungTrainer::new(config).train().unwrap();

        assert!(report.epochs_run >= 1);
        assert!(report.best_validation_loss.is_finite());
        assert!(report.roc_auc.unwrap() > 0.6, "auc {:?}", report.roc_auc);
    }

    #[test]
    fn test_other_domains_cannot_be_retrained() {
        let trainer = SyntheticLungTrainer::new(small_config());
        for domain in [Domain::Heart, Domain::Liver, Domain::Diabetes] {
            assert!(matches!(
                trainer.retrain(domain),
                Err(TrainingError::UnsupportedDomain(d)) if d == domain
            ));
        }
    }

    #[test]
    fn test_single_class_data_is_degenerate() {
        let labels = vec![true; 10];
        let indices: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            stratified_split(&labels, &indices, 0.2, &mut rng),
            Err(TrainingError::Degenerate(_))
        ));
    }

    #[test]
    fn test_stratified_split_keeps_class_ratio() {
        let labels: Vec<bool> = (0..100).map(|i| i % 4 == 0).collect();
        let indices: Vec<usize> = (0..100).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let (kept, held) = stratified_split(&labels, &indices, 0.2, &mut rng).unwrap();

        assert_eq!(kept.len() + held.len(), 100);
        assert_eq!(held.len(), 20);
        assert_eq!(held.iter().filter(|&&i| labels[i]).count(), 5);
    }

    #[test]
    fn test_evaluate_confusion_matrix() {
        let probabilities = [0.9, 0.5, 0.2, 0.7, 0.4, 0.51];
        let labels = [true, true, false, false, true, true];
        let report = evaluate(&probabilities, &labels, 60, 40, 3, 0.4);

        assert_eq!(report.true_positives, 2);
        assert_eq!(report.false_positives, 1);
        assert_eq!(report.true_negatives, 1);
        assert_eq!(report.false_negatives, 2);
        assert!((report.accuracy - 0.5).abs() < 1e-12);
        assert!((report.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.recall - 0.5).abs() < 1e-12);
        assert!((report.f1 - 4.0 / 7.0).abs() < 1e-12);
        assert_eq!(report.samples, 60);
        assert_eq!(report.epochs_run, 3);
    }

    #[test]
    fn test_roc_auc() {
        let labels = [false, false, true, true];
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels), Some(1.0));
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels), Some(0.0));
        assert_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &labels), Some(0.5));
        assert_eq!(roc_auc(&[0.5, 0.5], &[true, true]), None);
    }
}
