//! Feed-forward regressor
//!
//! `input -> 16 -> ReLU -> 8 -> ReLU -> 1`, f32 throughout. Weights are stored
//! `[out, in]` row-major and named after their position in the layer stack
//! (`layers.0`, `layers.2`, `layers.4`), with the activations occupying the
//! odd slots.

use crate::device::{ComputeDevice, PlacedBatch};
use crate::errors::{PipelineError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Widths of the two hidden layers
pub const HIDDEN_WIDTHS: [usize; 2] = [16, 8];

/// Positions of the linear layers in the stack
const LAYER_SLOTS: [usize; 3] = [0, 2, 4];

/// Named parameter tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Fully connected layer
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    in_dim: usize,
    out_dim: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl Linear {
    /// Uniform init in `[-1/sqrt(in), 1/sqrt(in)]` for weights and biases
    pub fn new<R: Rng>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_dim as f32).sqrt();
        let weight = (0..in_dim * out_dim)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let bias = (0..out_dim).map(|_| rng.gen_range(-bound..=bound)).collect();

        Self {
            in_dim,
            out_dim,
            weight,
            bias,
        }
    }

    fn forward(&self, input: &[f32], n: usize) -> Vec<f32> {
        let mut output = vec![0.0; n * self.out_dim];
        for b in 0..n {
            let x = &input[b * self.in_dim..(b + 1) * self.in_dim];
            for o in 0..self.out_dim {
                let w = &self.weight[o * self.in_dim..(o + 1) * self.in_dim];
                let dot: f32 = w.iter().zip(x).map(|(w, x)| w * x).sum();
                output[b * self.out_dim + o] = dot + self.bias[o];
            }
        }
        output
    }

    /// Accumulate parameter gradients and return the gradient w.r.t. the input
    fn backward(
        &self,
        input: &[f32],
        grad_output: &[f32],
        n: usize,
        grad_weight: &mut [f32],
        grad_bias: &mut [f32],
    ) -> Vec<f32> {
        let mut grad_input = vec![0.0; n * self.in_dim];
        for b in 0..n {
            let x = &input[b * self.in_dim..(b + 1) * self.in_dim];
            let gx = &mut grad_input[b * self.in_dim..(b + 1) * self.in_dim];
            for o in 0..self.out_dim {
                let g = grad_output[b * self.out_dim + o];
                grad_bias[o] += g;
                let row = o * self.in_dim;
                for i in 0..self.in_dim {
                    grad_weight[row + i] += g * x[i];
                    gx[i] += g * self.weight[row + i];
                }
            }
        }
        grad_input
    }
}

/// Gradients aligned with [`Regressor::parameters_mut`]
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub tensors: Vec<Vec<f32>>,
}

/// Activations kept from the forward pass for backprop
struct ForwardCache {
    /// Input of each linear layer
    inputs: Vec<Vec<f32>>,
    /// Pre-activation output of each linear layer
    outputs: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Regressor {
    layers: Vec<Linear>,
    device: ComputeDevice,
}

impl Regressor {
    pub fn new<R: Rng>(input_dim: usize, rng: &mut R, device: ComputeDevice) -> Result<Self> {
        if input_dim == 0 {
            return Err(PipelineError::config("model input width must be positive"));
        }
        let [h1, h2] = HIDDEN_WIDTHS;
        let layers = vec![
            Linear::new(input_dim, h1, rng),
            Linear::new(h1, h2, rng),
            Linear::new(h2, 1, rng),
        ];
        Ok(Self { layers, device })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].in_dim
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weight.len() + l.bias.len())
            .sum()
    }

    fn forward_cached(&self, features: &[f32], n: usize) -> (Vec<f32>, ForwardCache) {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut outputs = Vec::with_capacity(self.layers.len());
        let mut activation = features.to_vec();
        let last = self.layers.len() - 1;

        for (idx, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activation, n);
            let next = if idx < last {
                z.iter().map(|v| v.max(0.0)).collect()
            } else {
                z.clone()
            };
            inputs.push(std::mem::replace(&mut activation, next));
            outputs.push(z);
        }

        (activation, ForwardCache { inputs, outputs })
    }

    /// Inference over `n` rows of contiguous features; one output per row
    pub fn predict(&self, features: &[f32], n: usize) -> Vec<f32> {
        let last = self.layers.len() - 1;
        let mut activation = features.to_vec();
        for (idx, layer) in self.layers.iter().enumerate() {
            activation = layer.forward(&activation, n);
            if idx < last {
                for v in &mut activation {
                    *v = v.max(0.0);
                }
            }
        }
        activation
    }

    pub fn predict_row(&self, row: &[f32]) -> Result<f32> {
        if row.len() != self.input_dim() {
            return Err(PipelineError::config(format!(
                "expected {} features, got {}",
                self.input_dim(),
                row.len()
            )));
        }
        Ok(self.predict(row, 1)[0])
    }

    fn check_batch(&self, batch: &PlacedBatch<'_>) -> Result<()> {
        batch.ensure_on(self.device)?;
        if batch.width != self.input_dim() {
            return Err(PipelineError::config(format!(
                "batch has {} features, model expects {}",
                batch.width,
                self.input_dim()
            )));
        }
        Ok(())
    }

    /// Inference on a placed batch
    pub fn forward(&self, batch: &PlacedBatch<'_>) -> Result<Vec<f32>> {
        self.check_batch(batch)?;
        Ok(self.predict(&batch.features, batch.len()))
    }

    /// Mean squared error on a labelled batch, without gradients
    pub fn mse(&self, batch: &PlacedBatch<'_>) -> Result<f32> {
        let preds = self.forward(batch)?;
        let targets = batch_targets(batch)?;
        Ok(mean_squared_error(&preds, targets))
    }

    /// MSE loss and its gradient w.r.t. every parameter
    pub fn loss_and_gradients(&self, batch: &PlacedBatch<'_>) -> Result<(f32, Gradients)> {
        self.check_batch(batch)?;
        let targets = batch_targets(batch)?;
        let n = batch.len();
        if n == 0 {
            return Err(PipelineError::InsufficientData("empty batch".to_string()));
        }

        let (preds, cache) = self.forward_cached(&batch.features, n);
        let loss = mean_squared_error(&preds, targets);

        let scale = 2.0 / n as f32;
        let mut grad: Vec<f32> = preds
            .iter()
            .zip(targets)
            .map(|(p, t)| scale * (p - t))
            .collect();

        let mut tensors: Vec<Vec<f32>> = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            tensors.push(vec![0.0; layer.weight.len()]);
            tensors.push(vec![0.0; layer.bias.len()]);
        }

        for idx in (0..self.layers.len()).rev() {
            if idx + 1 < self.layers.len() {
                // ReLU
                for (g, z) in grad.iter_mut().zip(&cache.outputs[idx]) {
                    if *z <= 0.0 {
                        *g = 0.0;
                    }
                }
            }
            let (weights, biases) = tensors.split_at_mut(2 * idx + 1);
            grad = self.layers[idx].backward(
                &cache.inputs[idx],
                &grad,
                n,
                &mut weights[2 * idx],
                &mut biases[0],
            );
        }

        Ok((loss, Gradients { tensors }))
    }

    /// Parameter names in optimizer order
    pub fn parameter_names() -> Vec<String> {
        LAYER_SLOTS
            .iter()
            .flat_map(|slot| [format!("layers.{slot}.weight"), format!("layers.{slot}.bias")])
            .collect()
    }

    /// Mutable parameter slices in optimizer order
    pub fn parameters_mut(&mut self) -> Vec<&mut [f32]> {
        let mut params = Vec::with_capacity(self.layers.len() * 2);
        for layer in &mut self.layers {
            params.push(layer.weight.as_mut_slice());
            params.push(layer.bias.as_mut_slice());
        }
        params
    }

    /// Snapshot of every parameter with its name and shape
    pub fn to_tensors(&self) -> Vec<NamedTensor> {
        let names = Self::parameter_names();
        let mut tensors = Vec::with_capacity(names.len());
        let mut names = names.into_iter();

        for layer in &self.layers {
            if let (Some(w_name), Some(b_name)) = (names.next(), names.next()) {
                tensors.push(NamedTensor {
                    name: w_name,
                    shape: vec![layer.out_dim, layer.in_dim],
                    values: layer.weight.clone(),
                });
                tensors.push(NamedTensor {
                    name: b_name,
                    shape: vec![layer.out_dim],
                    values: layer.bias.clone(),
                });
            }
        }
        tensors
    }

    /// Rebuild a model from tensors produced by [`Regressor::to_tensors`]
    pub fn from_tensors(
        input_dim: usize,
        tensors: &[NamedTensor],
        device: ComputeDevice,
    ) -> Result<Self> {
        if input_dim == 0 {
            return Err(PipelineError::config("model input width must be positive"));
        }
        let [h1, h2] = HIDDEN_WIDTHS;
        let dims = [(input_dim, h1), (h1, h2), (h2, 1)];
        let names = Self::parameter_names();

        if tensors.len() != names.len() {
            return Err(PipelineError::config(format!(
                "expected {} tensors, found {}",
                names.len(),
                tensors.len()
            )));
        }

        let mut layers = Vec::with_capacity(dims.len());
        for (idx, &(in_dim, out_dim)) in dims.iter().enumerate() {
            let weight = take_tensor(&tensors[2 * idx], &names[2 * idx], &[out_dim, in_dim])?;
            let bias = take_tensor(&tensors[2 * idx + 1], &names[2 * idx + 1], &[out_dim])?;
            layers.push(Linear {
                in_dim,
                out_dim,
                weight,
                bias,
            });
        }

        Ok(Self { layers, device })
    }
}

fn take_tensor(tensor: &NamedTensor, name: &str, shape: &[usize]) -> Result<Vec<f32>> {
    if tensor.name != name {
        return Err(PipelineError::config(format!(
            "expected tensor `{}`, found `{}`",
            name, tensor.name
        )));
    }
    if tensor.shape != shape {
        return Err(PipelineError::config(format!(
            "tensor `{}` has shape {:?}, expected {:?}",
            name, tensor.shape, shape
        )));
    }
    let expected: usize = shape.iter().product();
    if tensor.values.len() != expected {
        return Err(PipelineError::config(format!(
            "tensor `{}` holds {} values, expected {}",
            name,
            tensor.values.len(),
            expected
        )));
    }
    Ok(tensor.values.clone())
}

fn batch_targets<'b>(batch: &'b PlacedBatch<'_>) -> Result<&'b [f32]> {
    batch
        .targets
        .as_deref()
        .ok_or_else(|| PipelineError::config("batch has no targets"))
}

/// Mean of squared differences; zero for empty input
pub fn mean_squared_error(preds: &[f32], targets: &[f32]) -> f32 {
    if preds.is_empty() {
        return 0.0;
    }
    let sum: f32 = preds
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t) * (p - t))
        .sum();
    sum / preds.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Placement;
    use crate::loader::Batch;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn model(input_dim: usize, seed: u64) -> Regressor {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Regressor::new(input_dim, &mut rng, ComputeDevice::Cpu).unwrap()
    }

    fn batch(rows: &[[f32; 3]], targets: &[f32]) -> Batch {
        Batch {
            rows: (0..rows.len()).collect(),
            features: rows.iter().flatten().copied().collect(),
            targets: Some(targets.to_vec()),
            width: 3,
            pinned: false,
        }
    }

    #[test]
    fn test_parameter_layout() {
        let m = model(5, 1);
        let tensors = m.to_tensors();
        let layout: Vec<(&str, Vec<usize>)> = tensors
            .iter()
            .map(|t| (t.name.as_str(), t.shape.clone()))
            .collect();

        assert_eq!(
            layout,
            vec![
                ("layers.0.weight", vec![16, 5]),
                ("layers.0.bias", vec![16]),
                ("layers.2.weight", vec![8, 16]),
                ("layers.2.bias", vec![8]),
                ("layers.4.weight", vec![1, 8]),
                ("layers.4.bias", vec![1]),
            ]
        );
        assert_eq!(m.num_parameters(), 16 * 5 + 16 + 8 * 16 + 8 + 8 + 1);
    }

    #[test]
    fn test_init_is_seeded_and_bounded() {
        assert_eq!(model(4, 7), model(4, 7));
        assert_ne!(model(4, 7), model(4, 8));

        let m = model(4, 7);
        for t in m.to_tensors() {
            let fan_in = if t.name.starts_with("layers.0") {
                4.0
            } else if t.name.starts_with("layers.2") {
                16.0
            } else {
                8.0
            };
            let bound = 1.0 / f32::sqrt(fan_in);
            assert!(t.values.iter().all(|v| v.abs() <= bound));
        }
    }

    #[test]
    fn test_forward_matches_predict_row() {
        let m = model(3, 2);
        let b = batch(&[[1.0, 2.0, 3.0], [-1.0, 0.5, 0.0]], &[0.0, 0.0]);
        let placed = Placement::cpu().bind(&b);
        let out = m.forward(&placed).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], m.predict_row(&[1.0, 2.0, 3.0]).unwrap());
        assert_eq!(out[1], m.predict_row(&[-1.0, 0.5, 0.0]).unwrap());
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut m = model(3, 11);
        let b = batch(
            &[[0.5, -1.0, 2.0], [1.5, 0.25, -0.5], [-0.75, 1.0, 1.0]],
            &[1.0, -2.0, 0.5],
        );
        let placed = Placement::cpu().bind(&b);
        let (_, grads) = m.loss_and_gradients(&placed).unwrap();

        let eps = 1e-3_f32;
        for (param_idx, coord) in [(0usize, 4usize), (1, 3), (2, 17), (4, 5), (5, 0)] {
            let original = m.parameters_mut()[param_idx][coord];

            m.parameters_mut()[param_idx][coord] = original + eps;
            let plus = m.mse(&placed).unwrap();
            m.parameters_mut()[param_idx][coord] = original - eps;
            let minus = m.mse(&placed).unwrap();
            m.parameters_mut()[param_idx][coord] = original;

            let numeric = (plus - minus) / (2.0 * eps);
            let analytic = grads.tensors[param_idx][coord];
            assert!(
                (numeric - analytic).abs() <= 1e-2 * (1.0 + analytic.abs()),
                "param {} [{}]: numeric {} vs analytic {}",
                param_idx,
                coord,
                numeric,
                analytic
            );
        }
    }

    #[test]
    fn test_width_and_device_checks() {
        let m = model(2, 3);
        let b = batch(&[[1.0, 2.0, 3.0]], &[1.0]);
        let placed = Placement::cpu().bind(&b);
        assert!(matches!(m.forward(&placed), Err(PipelineError::Config(_))));

        let m = model(3, 3);
        let unlabeled = Batch {
            targets: None,
            ..batch(&[[1.0, 2.0, 3.0]], &[1.0])
        };
        let placed = Placement::cpu().bind(&unlabeled);
        assert!(m.forward(&placed).is_ok());
        assert!(matches!(m.mse(&placed), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_tensor_round_trip() {
        let m = model(6, 5);
        let rebuilt = Regressor::from_tensors(6, &m.to_tensors(), ComputeDevice::Cpu).unwrap();
        assert_eq!(m, rebuilt);

        let mut tensors = m.to_tensors();
        tensors[2].values.pop();
        assert!(Regressor::from_tensors(6, &tensors, ComputeDevice::Cpu).is_err());
        assert!(Regressor::from_tensors(5, &m.to_tensors(), ComputeDevice::Cpu).is_err());
    }

    #[test]
    fn test_mse() {
        assert_eq!(mean_squared_error(&[1.0, 3.0], &[0.0, 1.0]), 2.5);
        assert_eq!(mean_squared_error(&[], &[]), 0.0);
    }
}
