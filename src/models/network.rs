//! Feed-forward binary classifier evaluated in pure Rust

use crate::error::ArtifactError;
use crate::models::inference::{ModelError, RiskModel};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(&self, z: f64) -> f64 {
        match self {
            Activation::Relu => z.max(0.0),
            Activation::Sigmoid => sigmoid(z),
        }
    }

    /// Derivative expressed through the activation's output
    pub(crate) fn derivative_from_output(&self, a: f64) -> f64 {
        match self {
            Activation::Relu => {
                if a > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => a * (1.0 - a),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Fully connected layer: `activation(W x + b)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Shape (output_dim, input_dim)
    pub(crate) weights: Array2<f64>,
    pub(crate) bias: Array1<f64>,
    pub(crate) activation: Activation,
}

impl DenseLayer {
    /// He initialization for ReLU layers, Glorot for the sigmoid output
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        output_dim: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let variance = match activation {
            Activation::Relu => 2.0 / input_dim as f64,
            Activation::Sigmoid => 2.0 / (input_dim + output_dim) as f64,
        };
        let std = if variance.is_finite() { variance.sqrt() } else { 1.0 };

        let weights = Array2::from_shape_fn((output_dim, input_dim), |_| {
            let z: f64 = StandardNormal.sample(rng);
            z * std
        });
        let bias = Array1::zeros(output_dim);

        Self {
            weights,
            bias,
            activation,
        }
    }

    pub fn from_parts(weights: Array2<f64>, bias: Array1<f64>, activation: Activation) -> Self {
        Self {
            weights,
            bias,
            activation,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn forward(&self, input: ArrayView1<f64>) -> Array1<f64> {
        let mut z = self.weights.dot(&input) + &self.bias;
        z.mapv_inplace(|v| self.activation.apply(v));
        z
    }
}

/// Stack of dense layers ending in a single sigmoid unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseNetwork {
    name: String,
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    /// Randomly initialised network: ReLU hidden layers, sigmoid output
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        input_dim: usize,
        hidden_layers: &[usize],
        rng: &mut R,
    ) -> Self {
        let mut layers = Vec::with_capacity(hidden_layers.len() + 1);
        let mut width = input_dim;
        for &units in hidden_layers {
            layers.push(DenseLayer::new(width, units, Activation::Relu, rng));
            width = units;
        }
        layers.push(DenseLayer::new(width, 1, Activation::Sigmoid, rng));

        Self {
            name: name.to_string(),
            layers,
        }
    }

    /// Assemble from explicit layers, checking that widths chain
    pub fn from_layers(name: &str, layers: Vec<DenseLayer>) -> Result<Self, String> {
        let network = Self {
            name: name.to_string(),
            layers,
        };
        network.validate()?;
        Ok(network)
    }

    /// Structural checks run after deserialization
    pub fn validate(&self) -> Result<(), String> {
        let last = self.layers.last().ok_or("network has no layers")?;
        if last.output_dim() != 1 {
            return Err(format!("output layer has {} units, expected 1", last.output_dim()));
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.bias.len() != layer.output_dim() {
                return Err(format!("layer {} bias width does not match its weights", i));
            }
            if let Some(next) = self.layers.get(i + 1) {
                if next.input_dim() != layer.output_dim() {
                    return Err(format!(
                        "layer {} outputs {} values but layer {} expects {}",
                        i,
                        layer.output_dim(),
                        i + 1,
                        next.input_dim()
                    ));
                }
            }
        }

        let finite = self
            .layers
            .iter()
            .all(|l| l.weights.iter().chain(l.bias.iter()).all(|v| v.is_finite()));
        if !finite {
            return Err("network contains non-finite parameters".to_string());
        }

        Ok(())
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    /// Activations of every layer, starting with the input itself
    pub(crate) fn forward_trace(&self, input: ArrayView1<f64>) -> Vec<Array1<f64>> {
        let mut trace = Vec::with_capacity(self.layers.len() + 1);
        trace.push(input.to_owned());
        for layer in &self.layers {
            let next = layer.forward(trace[trace.len() - 1].view());
            trace.push(next);
        }
        trace
    }

    /// Output probability for one input
    pub fn forward(&self, input: ArrayView1<f64>) -> f64 {
        let mut activation = input.to_owned();
        for layer in &self.layers {
            activation = layer.forward(activation.view());
        }
        activation[0]
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl RiskModel for DenseNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_dim(&self) -> Option<usize> {
        self.layers.first().map(|l| l.input_dim())
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64, ModelError> {
        let expected = self.input_dim().unwrap_or(0);
        if features.len() != expected {
            return Err(ModelError(format!(
                "model '{}' expects {} inputs, got {}",
                self.name,
                expected,
                features.len()
            )));
        }

        let prob = self.forward(ArrayView1::from(features));
        if !prob.is_finite() {
            return Err(ModelError(format!("model '{}' produced {}", self.name, prob)));
        }
        Ok(prob)
    }

    fn serialize_model(&self) -> Result<Vec<u8>, ArtifactError> {
        serde_json::to_vec(self)
            .map_err(|e| ArtifactError::Unsupported(format!("{}: {}", self.name, e)))
    }
}
