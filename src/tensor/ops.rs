//! # Tensor Operations
//!
//! Implements mathematical operations for Tensors, including autograd support.

use super::autograd::op_abstractions::{
    as_matrix, AddBackward, MatMulBackward, MulBackward, MulScalarBackward, SigmoidBackward,
    SoftplusBackward, StackBackward, SubBackward, SumBackward, TanhBackward,
};
use super::autograd::{AutogradContext, BackwardOp};
use super::{Tensor, TensorData, TensorError};
use ndarray::{ArrayD, Axis, IxDyn};
use std::sync::Arc;

// --- Helper Function for Autograd Setup ---

/// Creates a new tensor resulting from an operation, setting up autograd context if needed.
fn create_op_result(
    result_data: ArrayD<TensorData>,
    inputs: Vec<Tensor>,
    backward_op: Box<dyn BackwardOp>,
) -> Result<Tensor, TensorError> {
    let requires_grad = inputs.iter().any(|t| t.requires_grad());

    if requires_grad {
        let grad_context = Arc::new(AutogradContext::new(inputs, backward_op));
        Ok(Tensor::from_op(result_data, grad_context))
    } else {
        // No input requires grad: the output is a constant with no history.
        Ok(Tensor::new(result_data, false))
    }
}

// --- Broadcasting ---

/// Checks if tensor shapes can be broadcast together following NumPy broadcasting rules
pub fn can_broadcast(shape1: &[usize], shape2: &[usize]) -> bool {
    shape1
        .iter()
        .rev()
        .zip(shape2.iter().rev())
        .all(|(&s1, &s2)| s1 == s2 || s1 == 1 || s2 == 1)
}

/// Computes the resulting shape of broadcasting two shapes.
pub fn broadcast_shapes(shape1: &[usize], shape2: &[usize]) -> Result<Vec<usize>, TensorError> {
    if !can_broadcast(shape1, shape2) {
        return Err(TensorError::IncompatibleShapes {
            op: "broadcast".to_string(),
            shape1: shape1.to_vec(),
            shape2: shape2.to_vec(),
        });
    }
    let max_dims = shape1.len().max(shape2.len());
    let padded1 = pad_shape_left(shape1, max_dims);
    let padded2 = pad_shape_left(shape2, max_dims);
    Ok(padded1.iter().zip(&padded2).map(|(&a, &b)| a.max(b)).collect())
}

/// Pads a shape with 1s on the left to match the target length
fn pad_shape_left(shape: &[usize], target_len: usize) -> Vec<usize> {
    let mut padded = vec![1; target_len.saturating_sub(shape.len())];
    padded.extend_from_slice(shape);
    padded
}

/// Applies `f` to both operands broadcast to their common shape.
fn broadcast_binary<F>(
    op: &str,
    a: &Tensor,
    b: &Tensor,
    f: F,
) -> Result<ArrayD<TensorData>, TensorError>
where
    F: Fn(TensorData, TensorData) -> TensorData,
{
    let out_shape = broadcast_shapes(a.shape(), b.shape())?;
    let a_data = a.data();
    let b_data = b.data();
    let incompatible = || TensorError::IncompatibleShapes {
        op: op.to_string(),
        shape1: a.shape().to_vec(),
        shape2: b.shape().to_vec(),
    };
    let a_view = a_data.broadcast(IxDyn(&out_shape)).ok_or_else(incompatible)?;
    let b_view = b_data.broadcast(IxDyn(&out_shape)).ok_or_else(incompatible)?;
    let mut result = a_view.to_owned();
    result.zip_mut_with(&b_view, |x, &y| *x = f(*x, y));
    Ok(result)
}

// --- Arithmetic Operations ---

/// Element-wise addition with broadcasting.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = broadcast_binary("add", a, b, |x, y| x + y)?;
    create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(AddBackward))
}

/// Element-wise subtraction (a - b) with broadcasting.
pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = broadcast_binary("sub", a, b, |x, y| x - y)?;
    create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(SubBackward))
}

/// Element-wise multiplication with broadcasting.
pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = broadcast_binary("mul", a, b, |x, y| x * y)?;
    create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(MulBackward))
}

/// Multiply a tensor by a constant scalar.
pub fn mul_scalar(a: &Tensor, scalar: TensorData) -> Result<Tensor, TensorError> {
    let result_data = &*a.data() * scalar;
    create_op_result(result_data, vec![a.clone()], Box::new(MulScalarBackward { scalar }))
}

/// Negation.
pub fn neg(a: &Tensor) -> Result<Tensor, TensorError> {
    mul_scalar(a, -1.0)
}

// --- Matrix Operations ---

/// Matrix multiplication of two tensors.
/// Handles 1D (vector) and 2D (matrix) operands:
/// `[k]·[k]` → scalar, `[k]·[k,n]` → `[n]`, `[m,k]·[k]` → `[m]`,
/// `[m,k]·[k,n]` → `[m,n]`.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, TensorError> {
    let inner_a = *a.shape().last().unwrap_or(&0);
    let inner_b = *b.shape().first().unwrap_or(&0);
    if a.ndim() == 0 || b.ndim() == 0 || inner_a != inner_b {
        return Err(TensorError::IncompatibleShapes {
            op: "matmul".to_string(),
            shape1: a.shape().to_vec(),
            shape2: b.shape().to_vec(),
        });
    }

    let product = {
        let a_data = a.data();
        let b_data = b.data();
        as_matrix(&a_data, true)?.dot(&as_matrix(&b_data, false)?)
    };

    // Drop the promoted axes again.
    let mut out_shape = Vec::with_capacity(2);
    if a.ndim() == 2 {
        out_shape.push(a.shape()[0]);
    }
    if b.ndim() == 2 {
        out_shape.push(b.shape()[1]);
    }
    let result_data = product.into_shape(IxDyn(&out_shape))?;
    create_op_result(result_data, vec![a.clone(), b.clone()], Box::new(MatMulBackward))
}

// --- Reductions ---

/// Sum of all elements, as a 0-dimensional tensor.
pub fn sum(a: &Tensor) -> Result<Tensor, TensorError> {
    let total = a.data().sum();
    let result_data = ArrayD::from_elem(IxDyn(&[]), total);
    create_op_result(result_data, vec![a.clone()], Box::new(SumBackward))
}

// --- Shape Operations ---

/// Stacks equally shaped tensors along a new leading axis.
pub fn stack(tensors: &[Tensor]) -> Result<Tensor, TensorError> {
    let first = tensors
        .first()
        .ok_or_else(|| TensorError::Generic("stack requires at least one tensor".to_string()))?;
    for t in tensors {
        if t.shape() != first.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: first.shape().to_vec(),
                got: t.shape().to_vec(),
            });
        }
    }
    let result_data = {
        let guards: Vec<_> = tensors.iter().map(|t| t.data()).collect();
        let views: Vec<_> = guards.iter().map(|g| g.view()).collect();
        ndarray::stack(Axis(0), &views)?
    };
    create_op_result(result_data, tensors.to_vec(), Box::new(StackBackward))
}

// --- Activation Functions ---

/// Logistic sigmoid `1 / (1 + exp(-x))`, element-wise.
pub fn sigmoid(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|val| 1.0 / (1.0 + (-val).exp()));
    let output = result_data.clone();
    create_op_result(result_data, vec![a.clone()], Box::new(SigmoidBackward { output }))
}

/// Hyperbolic tangent, element-wise.
pub fn tanh(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(|val| val.tanh());
    let output = result_data.clone();
    create_op_result(result_data, vec![a.clone()], Box::new(TanhBackward { output }))
}

/// `log(1 + exp(x))`, element-wise, without overflow for large `x`.
pub fn softplus(a: &Tensor) -> Result<Tensor, TensorError> {
    let result_data = a.data().mapv(softplus_value);
    create_op_result(result_data, vec![a.clone()], Box::new(SoftplusBackward))
}

pub(crate) fn softplus_value(x: TensorData) -> TensorData {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}
