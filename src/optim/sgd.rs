//! # Stochastic Gradient Descent (SGD) Optimizer

use super::Optimizer;
use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::ArrayD;

/// Plain gradient descent, `θ ← θ - lr·∇θ`, with optional heavy-ball
/// momentum `buf ← μ·buf + ∇θ; θ ← θ - lr·buf`.
#[derive(Debug)]
pub struct SGD {
    params: Vec<Tensor>,
    lr: TensorData,
    momentum: TensorData,
    // One buffer per parameter, same order as `params`. Created lazily.
    momentum_buffers: Vec<Option<ArrayD<TensorData>>>,
}

impl SGD {
    /// Creates a new SGD optimizer instance.
    ///
    /// # Arguments
    /// * `params`: The parameters to optimize. Clones share storage with the
    ///   model, so updates are visible there.
    /// * `lr`: Learning rate, must be finite and positive.
    /// * `momentum`: Momentum factor in `[0, 1)` (default: 0).
    pub fn new<I>(params: I, lr: TensorData, momentum: Option<TensorData>) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        if !(lr.is_finite() && lr > 0.0) {
            return Err(TensorError::Generic(format!(
                "Invalid learning rate {}: must be finite and positive",
                lr
            )));
        }
        let momentum = momentum.unwrap_or(0.0);
        if !(0.0..1.0).contains(&momentum) {
            return Err(TensorError::Generic(format!(
                "Invalid momentum value {}: must lie in [0, 1)",
                momentum
            )));
        }

        let params: Vec<Tensor> = params.into_iter().collect();
        let momentum_buffers = vec![None; params.len()];
        Ok(SGD {
            params,
            lr,
            momentum,
            momentum_buffers,
        })
    }

    /// Simplified constructor with only lr.
    pub fn simple<I>(params: I, lr: TensorData) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        Self::new(params, lr, None)
    }
}

impl Optimizer for SGD {
    /// Either every parameter is updated or, on error, none is.
    fn step(&mut self) -> Result<(), TensorError> {
        let grads: Vec<Option<ArrayD<TensorData>>> = self
            .params
            .iter()
            .map(|p| if p.requires_grad() { p.grad() } else { None })
            .collect();
        for (param, grad) in self.params.iter().zip(&grads) {
            if let Some(g) = grad {
                if g.iter().any(|x| !x.is_finite()) {
                    return Err(TensorError::Generic(format!(
                        "non-finite gradient for parameter of shape {:?}",
                        param.shape()
                    )));
                }
            }
        }

        let slots = self.params.iter().zip(self.momentum_buffers.iter_mut()).zip(grads);
        for ((param, buffer), grad) in slots {
            let grad = match grad {
                Some(g) => g,
                None => continue,
            };

            let direction = if self.momentum != 0.0 {
                let updated = match buffer.take() {
                    Some(buf) => buf * self.momentum + &grad,
                    None => grad,
                };
                *buffer = Some(updated.clone());
                updated
            } else {
                grad
            };

            let mut data = param.data_mut();
            data.scaled_add(-self.lr, &direction);
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for param in &self.params {
            param.zero_grad();
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}
