//! Multi-layer perceptron with a manual backward pass
//!
//! Hidden layers use tanh, the output layer is linear. Parameters flatten
//! layer by layer as row-major weights followed by biases, which is the
//! layout used by the optimizer and by agent snapshots.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use climb_rl_core::{RLError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dense {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    fn new<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        Self {
            weights: xavier_uniform(in_dim, out_dim, rng),
            bias: Array1::zeros(out_dim),
        }
    }

    fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

/// Xavier uniform initialisation
fn xavier_uniform<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Array2<f32> {
    let limit = (6.0 / (in_dim + out_dim) as f32).sqrt();
    Array2::from_shape_fn((in_dim, out_dim), |_| rng.gen_range(-limit..limit))
}

/// Layer inputs recorded during a batched forward pass
#[derive(Debug, Clone)]
pub struct ForwardCache {
    inputs: Vec<Array2<f32>>,
}

/// Per-layer parameter gradients
#[derive(Debug, Clone)]
pub struct Gradients {
    weights: Vec<Array2<f32>>,
    biases: Vec<Array1<f32>>,
}

impl Gradients {
    /// Flatten in parameter order
    #[must_use]
    pub fn flatten(&self) -> Vec<f32> {
        let mut flat = Vec::new();
        for (w, b) in self.weights.iter().zip(&self.biases) {
            flat.extend(w.iter().copied());
            flat.extend(b.iter().copied());
        }
        flat
    }
}

/// Fully connected network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    layers: Vec<Dense>,
    input_dim: usize,
    output_dim: usize,
}

impl Mlp {
    /// Create a network with Xavier-initialised weights and zero biases
    pub fn new<R: Rng + ?Sized>(
        input_dim: usize,
        hidden_dims: &[usize],
        output_dim: usize,
        rng: &mut R,
    ) -> Self {
        let mut layers = Vec::with_capacity(hidden_dims.len() + 1);
        let mut prev = input_dim;
        for &hidden in hidden_dims {
            layers.push(Dense::new(prev, hidden, rng));
            prev = hidden;
        }
        layers.push(Dense::new(prev, output_dim, rng));

        Self {
            layers,
            input_dim,
            output_dim,
        }
    }

    /// Input dimension
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Output dimension
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Total number of learnable parameters
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Dense::parameter_count).sum()
    }

    /// Draw fresh weights, keeping the architecture
    pub fn reinitialize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for layer in &mut self.layers {
            let (in_dim, out_dim) = layer.weights.dim();
            *layer = Dense::new(in_dim, out_dim, rng);
        }
    }

    /// Forward pass for a single input
    pub fn forward(&self, input: ArrayView1<'_, f32>) -> Result<Array1<f32>> {
        if input.len() != self.input_dim {
            return Err(RLError::DimensionMismatch {
                expected: self.input_dim,
                actual: input.len(),
            });
        }
        let last = self.layers.len() - 1;
        let mut hidden = input.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            hidden = hidden.dot(&layer.weights) + &layer.bias;
            if i < last {
                hidden.mapv_inplace(f32::tanh);
            }
        }
        Ok(hidden)
    }

    /// Forward pass over a batch of row inputs, recording what the backward pass needs
    pub fn forward_batch(&self, inputs: ArrayView2<'_, f32>) -> Result<(Array2<f32>, ForwardCache)> {
        if inputs.ncols() != self.input_dim {
            return Err(RLError::DimensionMismatch {
                expected: self.input_dim,
                actual: inputs.ncols(),
            });
        }
        let last = self.layers.len() - 1;
        let mut cache = ForwardCache {
            inputs: Vec::with_capacity(self.layers.len()),
        };
        let mut hidden = inputs.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let mut out = hidden.dot(&layer.weights) + &layer.bias;
            if i < last {
                out.mapv_inplace(f32::tanh);
            }
            cache.inputs.push(hidden);
            hidden = out;
        }
        Ok((hidden, cache))
    }

    /// Backpropagate `grad_output` (dLoss/dOutput, one row per input)
    pub fn backward(&self, cache: &ForwardCache, grad_output: &Array2<f32>) -> Result<Gradients> {
        if grad_output.ncols() != self.output_dim || cache.inputs.len() != self.layers.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.output_dim,
                actual: grad_output.ncols(),
            });
        }

        let n = self.layers.len();
        let mut weights = Vec::with_capacity(n);
        let mut biases = Vec::with_capacity(n);
        let mut delta = grad_output.clone();

        for l in (0..n).rev() {
            let input = &cache.inputs[l];
            weights.push(input.t().dot(&delta));
            biases.push(delta.sum_axis(Axis(0)));
            if l > 0 {
                // Inputs of layer l are tanh outputs of layer l - 1
                let mut back = delta.dot(&self.layers[l].weights.t());
                back.zip_mut_with(input, |d, &a| *d *= 1.0 - a * a);
                delta = back;
            }
        }
        weights.reverse();
        biases.reverse();
        Ok(Gradients { weights, biases })
    }

    /// Flattened copy of all parameters
    #[must_use]
    pub fn parameters(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.parameter_count());
        for layer in &self.layers {
            flat.extend(layer.weights.iter().copied());
            flat.extend(layer.bias.iter().copied());
        }
        flat
    }

    /// Overwrite all parameters from a flat slice
    pub fn set_parameters(&mut self, params: &[f32]) -> Result<()> {
        if params.len() != self.parameter_count() {
            return Err(RLError::DimensionMismatch {
                expected: self.parameter_count(),
                actual: params.len(),
            });
        }
        let mut offset = 0;
        for layer in &mut self.layers {
            for w in &mut layer.weights {
                *w = params[offset];
                offset += 1;
            }
            for b in &mut layer.bias {
                *b = params[offset];
                offset += 1;
            }
        }
        Ok(())
    }

    /// Copy parameters from a network of the same architecture
    pub fn copy_from(&mut self, other: &Self) -> Result<()> {
        self.set_parameters(&other.parameters())
    }

    /// Whether every parameter is finite
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.weights.iter().chain(l.bias.iter()).all(|v| v.is_finite()))
    }
}
