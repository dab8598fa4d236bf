//! # Automatic Differentiation (Autograd)
//!
//! Implements the reverse-mode automatic differentiation engine.
//! Every differentiable op records an [`AutogradContext`] holding its inputs and
//! a [`BackwardOp`]; `backward` walks those nodes in reverse topological order.

use super::{Tensor, TensorData, TensorError};
use ndarray::{ArrayD, Axis, IxDyn};
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

// --- Backward Operation Trait ---

/// Trait defining the backward pass for an operation.
/// Each operation (like Add, MatMul, Tanh) has a struct implementing this.
pub trait BackwardOp: Debug + Send + Sync + 'static {
    /// Computes the gradients with respect to the inputs of the operation.
    ///
    /// # Arguments
    /// * `inputs` - The input tensors of the original forward operation.
    /// * `output_grad` - The gradient flowing back into this operation's output.
    ///
    /// # Returns
    /// One gradient per input, in the same order and shape as `inputs`.
    fn backward(
        &self,
        inputs: &[Tensor],
        output_grad: &ArrayD<TensorData>,
    ) -> Result<Vec<ArrayD<TensorData>>, TensorError>;
}

// --- Autograd Context ---

/// Stores information needed for the backward pass of a single operation.
/// Associated with the output Tensor of that operation.
#[derive(Debug)]
pub struct AutogradContext {
    op: Box<dyn BackwardOp>,
    /// Input tensors to the forward operation. Their own contexts are the
    /// edges of the graph; the graph is acyclic, so strong references are safe.
    inputs: Vec<Tensor>,
    /// Gradient accumulated for the output tensor of this node.
    accumulated_grad: Mutex<Option<ArrayD<TensorData>>>,
}

impl AutogradContext {
    pub fn new(inputs: Vec<Tensor>, op: Box<dyn BackwardOp>) -> Self {
        AutogradContext {
            op,
            inputs,
            accumulated_grad: Mutex::new(None),
        }
    }

    /// Sets or accumulates the gradient for the output tensor of this operation.
    pub fn set_output_gradient(&self, grad: ArrayD<TensorData>) -> Result<(), TensorError> {
        let mut slot = self.accumulated_grad.lock().expect("AutogradContext Mutex poisoned");
        match slot.as_mut() {
            Some(existing) => {
                if existing.shape() != grad.shape() {
                    return Err(TensorError::ShapeMismatch {
                        expected: existing.shape().to_vec(),
                        got: grad.shape().to_vec(),
                    });
                }
                *existing += &grad;
            }
            None => *slot = Some(grad),
        }
        Ok(())
    }

    fn take_output_gradient(&self) -> Option<ArrayD<TensorData>> {
        self.accumulated_grad.lock().expect("AutogradContext Mutex poisoned").take()
    }
}

// --- Main Backward Function ---

/// Performs the backward pass starting from a scalar root tensor (usually the loss).
pub fn backward(root: &Tensor) -> Result<(), TensorError> {
    if !root.requires_grad() {
        return Err(TensorError::RequiresGradNotSet);
    }
    if !root.is_scalar() {
        return Err(TensorError::Generic(
            "Backward can only be called on scalar tensors".to_string(),
        ));
    }
    let seed = ArrayD::ones(IxDyn(root.shape()));

    let root_ctx = match &root.grad_context {
        Some(ctx) => ctx,
        // A leaf root: its gradient with respect to itself is one.
        None => return root.accumulate_grad(&seed),
    };

    let order = topological_order(root_ctx);
    root_ctx.set_output_gradient(seed)?;

    for node in order {
        // Nodes whose output never received a gradient contribute nothing.
        let output_grad = match node.take_output_gradient() {
            Some(g) => g,
            None => continue,
        };
        let input_grads = node.op.backward(&node.inputs, &output_grad)?;
        if input_grads.len() != node.inputs.len() {
            return Err(TensorError::AutogradError(format!(
                "Backward op {:?} produced {} gradients, but expected {}",
                node.op,
                input_grads.len(),
                node.inputs.len()
            )));
        }

        for (input, grad) in node.inputs.iter().zip(input_grads) {
            if !input.requires_grad() {
                continue;
            }
            if grad.shape() != input.shape() {
                return Err(TensorError::ShapeMismatch {
                    expected: input.shape().to_vec(),
                    got: grad.shape().to_vec(),
                });
            }
            match &input.grad_context {
                Some(next) => next.set_output_gradient(grad)?,
                None => input.accumulate_grad(&grad)?,
            }
        }
    }

    Ok(())
}

/// Orders the graph reachable from `root` so that every node comes before
/// all of its inputs. Iterative, since unrolled sequences produce deep graphs.
fn topological_order(root: &Arc<AutogradContext>) -> Vec<Arc<AutogradContext>> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut postorder = Vec::new();
    let mut stack: Vec<(Arc<AutogradContext>, bool)> = vec![(Arc::clone(root), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            postorder.push(node);
            continue;
        }
        if !visited.insert(Arc::as_ptr(&node) as usize) {
            continue;
        }
        stack.push((Arc::clone(&node), true));
        for input in &node.inputs {
            if let Some(ctx) = &input.grad_context {
                if !visited.contains(&(Arc::as_ptr(ctx) as usize)) {
                    stack.push((Arc::clone(ctx), false));
                }
            }
        }
    }

    postorder.reverse();
    postorder
}

/// Sums a broadcast gradient back down to `shape`.
pub(crate) fn unbroadcast(
    grad: ArrayD<TensorData>,
    shape: &[usize],
) -> Result<ArrayD<TensorData>, TensorError> {
    let mut g = grad;
    while g.ndim() > shape.len() {
        g = g.sum_axis(Axis(0));
    }
    for (axis, &dim) in shape.iter().enumerate() {
        if dim == 1 && g.shape()[axis] != 1 {
            g = g.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    if g.shape() != shape {
        return Err(TensorError::ShapeMismatch {
            expected: shape.to_vec(),
            got: g.shape().to_vec(),
        });
    }
    Ok(g)
}

// --- Concrete BackwardOp Implementations ---

pub mod op_abstractions {
    use super::*;
    use ndarray::{Array2, Ix2};

    // ---- Add ----
    #[derive(Debug)]
    pub struct AddBackward;
    impl BackwardOp for AddBackward {
        fn backward(
            &self,
            inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            Ok(vec![
                unbroadcast(output_grad.clone(), inputs[0].shape())?,
                unbroadcast(output_grad.clone(), inputs[1].shape())?,
            ])
        }
    }

    // ---- Sub ----
    #[derive(Debug)]
    pub struct SubBackward;
    impl BackwardOp for SubBackward {
        fn backward(
            &self,
            inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            Ok(vec![
                unbroadcast(output_grad.clone(), inputs[0].shape())?,
                unbroadcast(output_grad.mapv(|g| -g), inputs[1].shape())?,
            ])
        }
    }

    // ---- Mul (element-wise) ----
    #[derive(Debug)]
    pub struct MulBackward;
    impl BackwardOp for MulBackward {
        fn backward(
            &self,
            inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            let a = inputs[0].data();
            let b = inputs[1].data();
            let out_shape = IxDyn(output_grad.shape());
            let a_b = a.broadcast(out_shape.clone()).ok_or_else(|| broadcast_error(&a, output_grad))?;
            let b_b = b.broadcast(out_shape).ok_or_else(|| broadcast_error(&b, output_grad))?;
            Ok(vec![
                unbroadcast(output_grad * &b_b, inputs[0].shape())?,
                unbroadcast(output_grad * &a_b, inputs[1].shape())?,
            ])
        }
    }

    // ---- Mul by constant scalar ----
    #[derive(Debug)]
    pub struct MulScalarBackward {
        pub scalar: TensorData,
    }
    impl BackwardOp for MulScalarBackward {
        fn backward(
            &self,
            _inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            Ok(vec![output_grad * self.scalar])
        }
    }

    // ---- MatMul ----
    // Rank-1 operands are promoted to a row (lhs) or a column (rhs) matrix,
    // so all four rank combinations share the matrix rule
    // dA = G·Bᵀ, dB = Aᵀ·G.
    #[derive(Debug)]
    pub struct MatMulBackward;
    impl BackwardOp for MatMulBackward {
        fn backward(
            &self,
            inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            let a = inputs[0].data();
            let b = inputs[1].data();
            let a2 = as_matrix(&a, true)?;
            let b2 = as_matrix(&b, false)?;
            let g2: Array2<TensorData> = output_grad
                .as_standard_layout()
                .into_owned()
                .into_shape((a2.nrows(), b2.ncols()))?;

            let grad_a = g2.dot(&b2.t()).into_shape(IxDyn(inputs[0].shape()))?;
            let grad_b = a2.t().dot(&g2).into_shape(IxDyn(inputs[1].shape()))?;
            Ok(vec![grad_a, grad_b])
        }
    }

    /// Views a rank-1 or rank-2 array as an owned matrix.
    pub(crate) fn as_matrix(
        array: &ArrayD<TensorData>,
        is_lhs: bool,
    ) -> Result<Array2<TensorData>, TensorError> {
        match array.ndim() {
            1 => {
                let axis = if is_lhs { Axis(0) } else { Axis(1) };
                let v = array.view().into_dimensionality::<ndarray::Ix1>()?;
                Ok(v.insert_axis(axis).to_owned())
            }
            2 => Ok(array.view().into_dimensionality::<Ix2>()?.to_owned()),
            _ => Err(TensorError::Generic(format!(
                "matmul supports rank 1 and 2 operands, got shape {:?}",
                array.shape()
            ))),
        }
    }

    // ---- Sigmoid ----
    #[derive(Debug)]
    pub struct SigmoidBackward {
        pub output: ArrayD<TensorData>,
    }
    impl BackwardOp for SigmoidBackward {
        fn backward(
            &self,
            _inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            let local = self.output.mapv(|s| s * (1.0 - s));
            Ok(vec![output_grad * &local])
        }
    }

    // ---- Tanh ----
    #[derive(Debug)]
    pub struct TanhBackward {
        pub output: ArrayD<TensorData>,
    }
    impl BackwardOp for TanhBackward {
        fn backward(
            &self,
            _inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            let local = self.output.mapv(|y| 1.0 - y * y);
            Ok(vec![output_grad * &local])
        }
    }

    // ---- Softplus: d/dx log(1 + e^x) = sigmoid(x) ----
    #[derive(Debug)]
    pub struct SoftplusBackward;
    impl BackwardOp for SoftplusBackward {
        fn backward(
            &self,
            inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            let local = inputs[0].data().mapv(|x| 1.0 / (1.0 + (-x).exp()));
            Ok(vec![output_grad * &local])
        }
    }

    // ---- Sum (all elements) ----
    #[derive(Debug)]
    pub struct SumBackward;
    impl BackwardOp for SumBackward {
        fn backward(
            &self,
            inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            let g = output_grad
                .first()
                .copied()
                .ok_or_else(|| TensorError::AutogradError("empty gradient for sum".into()))?;
            Ok(vec![ArrayD::from_elem(IxDyn(inputs[0].shape()), g)])
        }
    }

    // ---- Stack (rows along a new leading axis) ----
    #[derive(Debug)]
    pub struct StackBackward;
    impl BackwardOp for StackBackward {
        fn backward(
            &self,
            inputs: &[Tensor],
            output_grad: &ArrayD<TensorData>,
        ) -> Result<Vec<ArrayD<TensorData>>, TensorError> {
            Ok((0..inputs.len())
                .map(|i| output_grad.index_axis(Axis(0), i).to_owned())
                .collect())
        }
    }

    fn broadcast_error(input: &ArrayD<TensorData>, output: &ArrayD<TensorData>) -> TensorError {
        TensorError::IncompatibleShapes {
            op: "mul backward".to_string(),
            shape1: input.shape().to_vec(),
            shape2: output.shape().to_vec(),
        }
    }
}
