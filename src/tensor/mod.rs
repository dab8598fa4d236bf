//! # Tensor Module
//!
//! This module defines the core `Tensor` struct and related functionalities,
//! including operations and automatic differentiation.

use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

// --- Submodules ---
pub mod ops;
pub mod autograd;

// --- Re-exports ---
pub use autograd::{AutogradContext, BackwardOp};

// --- Error Handling ---
#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Incompatible shapes for operation {op}: {shape1:?} and {shape2:?}")]
    IncompatibleShapes {
        op: String,
        shape1: Vec<usize>,
        shape2: Vec<usize>,
    },
    #[error("Operation requires gradient but tensor does not have it")]
    RequiresGradNotSet,
    #[error("Tensor does not have a gradient computed")]
    NoGradient,
    #[error("ndarray error: {0}")]
    NdarrayError(#[from] ndarray::ShapeError),
    #[error("Autograd error: {0}")]
    AutogradError(String),
    #[error("Generic error: {0}")]
    Generic(String),
}

/// Element type of every tensor.
pub type TensorData = f32;

/// # Tensor
///
/// Wraps an `ndarray::ArrayD` together with the metadata needed for
/// reverse-mode differentiation.
///
/// Cloning a `Tensor` is cheap: data, gradient slot and graph node are all
/// shared through `Arc`s, so a parameter cloned into an optimizer and the same
/// parameter used in a forward pass refer to one storage and one gradient.
#[derive(Clone, Debug)]
pub struct Tensor {
    data: Arc<RwLock<ArrayD<TensorData>>>,
    shape: Vec<usize>,

    // Graph node that produced this tensor (None for leaves and detached tensors).
    pub(crate) grad_context: Option<Arc<AutogradContext>>,
    // Gradient accumulated by `backward`, shared between clones.
    grad: Arc<Mutex<Option<ArrayD<TensorData>>>>,

    requires_grad: bool,
    is_leaf: bool,
}

impl Tensor {
    /// Creates a new leaf Tensor from an ndarray::ArrayD.
    pub fn new(data: ArrayD<TensorData>, requires_grad: bool) -> Self {
        let shape = data.shape().to_vec();
        Tensor {
            data: Arc::new(RwLock::new(data)),
            shape,
            grad_context: None,
            grad: Arc::new(Mutex::new(None)),
            requires_grad,
            is_leaf: true,
        }
    }

    /// Creates a Tensor that is not a leaf node (i.e., result of an operation).
    pub(crate) fn from_op(data: ArrayD<TensorData>, grad_context: Arc<AutogradContext>) -> Self {
        let shape = data.shape().to_vec();
        Tensor {
            data: Arc::new(RwLock::new(data)),
            shape,
            grad_context: Some(grad_context),
            grad: Arc::new(Mutex::new(None)),
            requires_grad: true,
            is_leaf: false,
        }
    }

    /// Convenience constructor for a constant (no gradient) tensor.
    pub fn constant(data: ArrayD<TensorData>) -> Self {
        Tensor::new(data, false)
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Provides read-only access to the underlying data.
    pub fn data(&self) -> RwLockReadGuard<'_, ArrayD<TensorData>> {
        self.data.read().expect("Tensor data RwLock poisoned")
    }

    /// Provides mutable access to the underlying data.
    /// Used by optimizers to write parameter updates in place; the shape
    /// must not change.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, ArrayD<TensorData>> {
        self.data.write().expect("Tensor data RwLock poisoned")
    }

    /// Clones the underlying data into a new ArrayD.
    pub fn data_clone(&self) -> ArrayD<TensorData> {
        self.data().clone()
    }

    /// Reads the single value of a scalar tensor.
    pub fn item(&self) -> Result<TensorData, TensorError> {
        if !self.is_scalar() {
            return Err(TensorError::Generic(format!(
                "item() called on non-scalar tensor of shape {:?}",
                self.shape
            )));
        }
        self.data()
            .first()
            .copied()
            .ok_or_else(|| TensorError::Generic("Empty scalar tensor".into()))
    }

    /// Detaches the tensor from the computation graph.
    /// Returns a new tensor sharing the same data but without autograd history,
    /// so no gradient can flow through it.
    pub fn detach(&self) -> Self {
        Tensor {
            data: Arc::clone(&self.data),
            shape: self.shape.clone(),
            grad_context: None,
            grad: Arc::new(Mutex::new(None)),
            requires_grad: false,
            is_leaf: true,
        }
    }

    /// Accumulates an incoming gradient into this tensor's gradient slot.
    pub(crate) fn accumulate_grad(&self, incoming: &ArrayD<TensorData>) -> Result<(), TensorError> {
        if !self.requires_grad {
            return Ok(());
        }
        if self.shape() != incoming.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape().to_vec(),
                got: incoming.shape().to_vec(),
            });
        }
        let mut slot = self.grad.lock().expect("Gradient Mutex poisoned");
        match slot.as_mut() {
            Some(existing) => *existing += incoming,
            None => *slot = Some(incoming.clone()),
        }
        Ok(())
    }

    /// Retrieves a copy of the accumulated gradient, if any.
    pub fn grad(&self) -> Option<ArrayD<TensorData>> {
        self.grad.lock().expect("Gradient Mutex poisoned").clone()
    }

    /// Runs the backward pass from this (scalar) tensor, accumulating
    /// gradients into every leaf that requires them.
    pub fn backward(&self) -> Result<(), TensorError> {
        autograd::backward(self)
    }

    /// Checks if the tensor represents a single scalar value.
    pub fn is_scalar(&self) -> bool {
        self.size() == 1
    }

    /// Clears the gradient of the tensor.
    pub fn zero_grad(&self) {
        *self.grad.lock().expect("Gradient Mutex poisoned") = None;
    }
}

// --- Operator overloading ---
use std::ops::{Add, Mul, Sub};

impl Add<&Tensor> for &Tensor {
    type Output = Result<Tensor, TensorError>;

    fn add(self, other: &Tensor) -> Self::Output {
        ops::add(self, other)
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Result<Tensor, TensorError>;

    fn sub(self, other: &Tensor) -> Self::Output {
        ops::sub(self, other)
    }
}

// Element-wise multiplication
impl Mul<&Tensor> for &Tensor {
    type Output = Result<Tensor, TensorError>;

    fn mul(self, other: &Tensor) -> Self::Output {
        ops::mul(self, other)
    }
}

// --- Helper functions ---

/// Helper to create a tensor filled with zeros.
pub fn zeros(shape: &[usize], requires_grad: bool) -> Tensor {
    Tensor::new(ArrayD::zeros(IxDyn(shape)), requires_grad)
}

/// Helper to create a tensor filled with ones.
pub fn ones(shape: &[usize], requires_grad: bool) -> Tensor {
    Tensor::new(ArrayD::ones(IxDyn(shape)), requires_grad)
}

/// Helper to create a tensor with values drawn from `N(0, scale²)` using the
/// supplied random number generator.
pub fn randn_using<R: Rng + ?Sized>(
    shape: &[usize],
    scale: TensorData,
    requires_grad: bool,
    rng: &mut R,
) -> Result<Tensor, TensorError> {
    let normal = Normal::new(0.0, scale)
        .map_err(|e| TensorError::Generic(format!("invalid normal scale {}: {}", scale, e)))?;
    let data = ArrayD::random_using(IxDyn(shape), normal, rng);
    Ok(Tensor::new(data, requires_grad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn detach_shares_data_but_not_history() {
        let a = Tensor::new(arr1(&[1.0, 2.0]).into_dyn(), true);
        let b = ops::mul_scalar(&a, 3.0).unwrap();
        let d = b.detach();
        assert!(!d.requires_grad());
        assert!(d.is_leaf());
        assert!(d.grad_context.is_none());
        assert_eq!(d.data_clone(), b.data_clone());
    }

    #[test]
    fn clones_share_gradient_slot() {
        let a = Tensor::new(arr1(&[1.0, 2.0]).into_dyn(), true);
        let alias = a.clone();
        let loss = ops::sum(&ops::mul(&a, &a).unwrap()).unwrap();
        loss.backward().unwrap();
        assert_eq!(alias.grad().unwrap(), arr1(&[2.0, 4.0]).into_dyn());
        alias.zero_grad();
        assert!(a.grad().is_none());
    }

    #[test]
    fn randn_is_reproducible_for_a_seed() {
        let a = randn_using(&[3, 4], 0.01, true, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = randn_using(&[3, 4], 0.01, true, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a.shape(), &[3, 4]);
        assert_eq!(a.data_clone(), b.data_clone());
    }

    #[test]
    fn item_rejects_non_scalars() {
        assert!(zeros(&[2], false).item().is_err());
        assert_eq!(ones(&[], false).item().unwrap(), 1.0);
    }
}
