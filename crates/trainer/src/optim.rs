//! Optimizers

use crate::errors::{PipelineError, Result};
use crate::model::{Gradients, Regressor};

pub trait Optimizer {
    /// Apply one update to `model` from `grads`
    fn step(&mut self, model: &mut Regressor, grads: &Gradients) -> Result<()>;

    /// Number of updates applied so far
    fn steps(&self) -> u64;
}

/// SGD with classical momentum: `v = mu * v + g; p -= lr * v`
#[derive(Debug, Clone)]
pub struct SgdMomentum {
    pub lr: f32,
    pub momentum: f32,
    velocity: Vec<Vec<f32>>,
    steps: u64,
}

impl SgdMomentum {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocity: Vec::new(),
            steps: 0,
        }
    }
}

impl Optimizer for SgdMomentum {
    fn step(&mut self, model: &mut Regressor, grads: &Gradients) -> Result<()> {
        let mut params = model.parameters_mut();
        if params.len() != grads.tensors.len() {
            return Err(PipelineError::config(format!(
                "{} gradient tensors for {} parameters",
                grads.tensors.len(),
                params.len()
            )));
        }

        if self.velocity.is_empty() {
            self.velocity = grads.tensors.iter().map(|g| vec![0.0; g.len()]).collect();
        }

        for ((param, grad), velocity) in params
            .iter_mut()
            .zip(&grads.tensors)
            .zip(&mut self.velocity)
        {
            if param.len() != grad.len() || velocity.len() != grad.len() {
                return Err(PipelineError::config("gradient shape does not match parameter"));
            }
            for ((p, g), v) in param.iter_mut().zip(grad).zip(velocity.iter_mut()) {
                *v = self.momentum * *v + g;
                *p -= self.lr * *v;
            }
        }

        self.steps += 1;
        Ok(())
    }

    fn steps(&self) -> u64 {
        self.steps
    }
}
