//! # Optimization Algorithms (`optim`)
//!
//! Update rules applied to the model parameters after each backward pass.

use crate::tensor::TensorError;

// --- Submodules ---
pub mod sgd;

pub use sgd::SGD;

// --- Optimizer Trait ---

/// Base trait for all optimizers.
pub trait Optimizer {
    /// Performs a single parameter update from the currently accumulated
    /// gradients. Parameters without a gradient are left untouched.
    fn step(&mut self) -> Result<(), TensorError>;

    /// Zeros the gradients of all parameters managed by the optimizer.
    /// Call before every backward pass; gradients accumulate otherwise.
    fn zero_grad(&mut self);

    /// Current learning rate.
    fn learning_rate(&self) -> f32;
}
