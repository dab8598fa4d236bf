//! # Neural Network Functional Interface (`nn::functional`)
//!
//! Stateless helpers. The graph-level activations delegate to
//! [`crate::tensor::ops`]; the array-level helpers serve the sampling paths,
//! which never need gradients.

use crate::tensor::{ops, Tensor, TensorData, TensorError};
use ndarray::{Array, Dimension};
use rand::Rng;

// --- Activation Functions ---

/// Applies the Sigmoid function element-wise.
/// `sigmoid(x) = 1 / (1 + exp(-x))`
pub fn sigmoid(input: &Tensor) -> Result<Tensor, TensorError> {
    ops::sigmoid(input)
}

/// Applies the Hyperbolic Tangent (Tanh) function element-wise.
pub fn tanh(input: &Tensor) -> Result<Tensor, TensorError> {
    ops::tanh(input)
}

// --- Array-level helpers (no autograd) ---

/// Element-wise sigmoid on a plain array.
pub fn sigmoid_array<D: Dimension>(x: &Array<TensorData, D>) -> Array<TensorData, D> {
    x.mapv(|val| 1.0 / (1.0 + (-val).exp()))
}

/// Draws an independent binary sample for every element, with the element
/// value as the probability of a one.
pub fn bernoulli<D: Dimension, R: Rng + ?Sized>(
    probs: &Array<TensorData, D>,
    rng: &mut R,
) -> Array<TensorData, D> {
    probs.mapv(|p| if rng.gen::<TensorData>() < p { 1.0 } else { 0.0 })
}

/// `x * ln(y)`, with `0 * ln(0)` taken as zero. A zero (or negative)
/// probability paired with a non-zero `x` also yields zero, so the result is
/// always finite.
pub fn xlogy0(x: TensorData, y: TensorData) -> TensorData {
    if x == 0.0 || y <= 0.0 {
        0.0
    } else {
        x * y.ln()
    }
}
