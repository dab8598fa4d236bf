//! # Neural Network Module (`nn`)
//!
//! Building blocks of the LSTM-RBM: functional helpers, fast dropout, the
//! energy-based losses, the RBM Gibbs sampler and the gated recurrence.

use crate::tensor::Tensor;
use std::collections::BTreeMap;
use std::fmt::Debug;

// --- Submodules ---
pub mod functional;
pub mod modules;
pub mod loss;
pub mod rbm;

pub use modules::{FastDropout, LstmRbmParams, MemoryState, StepOutput};
pub use rbm::{sample_rbm, RbmSample};

// --- Core Trait: Module ---

/// Base trait for anything that owns trainable parameters.
pub trait Module: Debug {
    /// Returns the module's parameters (tensors that require gradients),
    /// keyed by name. BTreeMap keeps the order deterministic for optimizers.
    fn parameters(&self) -> BTreeMap<String, Tensor>;

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().values().map(Tensor::size).sum()
    }

    /// Clears the gradients of all parameters within the module.
    fn zero_grad(&self) {
        for param in self.parameters().values() {
            param.zero_grad();
        }
    }
}
