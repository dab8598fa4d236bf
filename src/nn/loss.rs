//! # Energy-Based Losses
//!
//! The RBM is trained through its free energy rather than an explicit
//! likelihood. This module holds the free energy as a differentiable graph
//! expression, the contrastive-divergence surrogate built from it, and the
//! pseudo-log-likelihood used to monitor training.

use crate::nn::functional::xlogy0;
use crate::tensor::{ops, Tensor, TensorData, TensorError};
use ndarray::{Array2, Zip};

/// Free energy of visible configurations, summed over every row:
/// `F(v) = -(v·bv) - Σ log(1 + exp(v·W + bh))`.
///
/// `v` is `[rows, n_visible]`; `bv`/`bh` are either shared vectors or one row
/// per visible row.
pub fn free_energy(v: &Tensor, w: &Tensor, bv: &Tensor, bh: &Tensor) -> Result<Tensor, TensorError> {
    let visible_term = ops::sum(&ops::mul(v, bv)?)?;
    let hidden_term = ops::sum(&ops::softplus(&ops::add(&ops::matmul(v, w)?, bh)?)?)?;
    ops::neg(&ops::add(&visible_term, &hidden_term)?)
}

/// CD-k surrogate `(F(v) - F(v_sample)) / rows`.
///
/// `v_sample` is detached before it enters the expression, so the gradient
/// with respect to `W`, `bv` and `bh` treats the negative particle as data.
pub fn contrastive_divergence_cost(
    v: &Tensor,
    v_sample: &Tensor,
    w: &Tensor,
    bv: &Tensor,
    bh: &Tensor,
) -> Result<Tensor, TensorError> {
    let rows = v.shape().first().copied().unwrap_or(1).max(1);
    let negative = v_sample.detach();
    let gap = ops::sub(&free_energy(v, w, bv, bh)?, &free_energy(&negative, w, bv, bh)?)?;
    ops::mul_scalar(&gap, 1.0 / rows as TensorData)
}

/// Pseudo-log-likelihood proxy of `v` under the reconstruction probabilities
/// `mean_v`, summed over units and averaged over rows. Monitoring only.
pub fn pseudo_log_likelihood(v: &Array2<TensorData>, mean_v: &Array2<TensorData>) -> TensorData {
    let rows = v.nrows().max(1) as TensorData;
    let mut total = 0.0;
    Zip::from(v).and(mean_v).for_each(|&x, &p| {
        total += xlogy0(x, p) + xlogy0(1.0 - x, 1.0 - p);
    });
    total / rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn free_energy_matches_hand_computation() {
        let v = Tensor::constant(arr2(&[[1.0, 0.0]]).into_dyn());
        let w = Tensor::constant(arr2(&[[0.5, -1.0], [2.0, 0.0]]).into_dyn());
        let bv = Tensor::constant(arr1(&[0.3, 0.7]).into_dyn());
        let bh = Tensor::constant(arr1(&[0.0, 1.0]).into_dyn());
        let f = free_energy(&v, &w, &bv, &bh).unwrap().item().unwrap();
        // v·bv = 0.3; v·W + bh = [0.5, 0.0]
        let expected = -0.3 - (1.0 + 0.5f32.exp()).ln() - 2.0f32.ln();
        assert!((f - expected).abs() < 1e-5);
    }

    #[test]
    fn free_energy_is_finite_for_every_binary_vector() {
        let w = Tensor::constant(arr2(&[[40.0, -40.0], [-60.0, 80.0], [5.0, 0.0]]).into_dyn());
        let bv = Tensor::constant(arr1(&[1.0, -2.0, 3.0]).into_dyn());
        let bh = Tensor::constant(arr1(&[-50.0, 50.0]).into_dyn());
        for bits in 0..8u32 {
            let row: Vec<TensorData> = (0..3).map(|i| ((bits >> i) & 1) as TensorData).collect();
            let v = Tensor::constant(Array2::from_shape_vec((1, 3), row).unwrap().into_dyn());
            let f = free_energy(&v, &w, &bv, &bh).unwrap().item().unwrap();
            assert!(f.is_finite(), "F({:03b}) = {}", bits, f);
        }
    }

    #[test]
    fn cost_gradient_treats_sample_as_constant() {
        let v = Tensor::constant(arr2(&[[1.0, 0.0], [1.0, 1.0]]).into_dyn());
        let sample = Tensor::constant(arr2(&[[0.0, 1.0], [1.0, 0.0]]).into_dyn());
        let w = Tensor::new(arr2(&[[0.0, 0.0], [0.0, 0.0]]).into_dyn(), true);
        let bv = Tensor::new(arr1(&[0.0, 0.0]).into_dyn(), true);
        let bh = Tensor::new(arr1(&[0.0, 0.0]).into_dyn(), true);
        let cost = contrastive_divergence_cost(&v, &sample, &w, &bv, &bh).unwrap();
        cost.backward().unwrap();
        // dF/dbv = -v, so d cost/d bv = (-Σv + Σsample) / rows
        assert_eq!(bv.grad().unwrap(), arr1(&[-0.5, 0.0]).into_dyn());
    }

    #[test]
    fn identical_sample_gives_zero_cost() {
        let v = Tensor::constant(arr2(&[[1.0, 0.0, 1.0]]).into_dyn());
        let w = Tensor::constant(arr2(&[[0.1], [0.2], [0.3]]).into_dyn());
        let bv = Tensor::constant(arr1(&[0.5, 0.5, 0.5]).into_dyn());
        let bh = Tensor::constant(arr1(&[0.1]).into_dyn());
        let cost = contrastive_divergence_cost(&v, &v, &w, &bv, &bh).unwrap();
        assert_eq!(cost.item().unwrap(), 0.0);
    }

    #[test]
    fn pseudo_log_likelihood_is_zero_for_perfect_reconstruction() {
        let v = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(pseudo_log_likelihood(&v, &v), 0.0);
        let half = Array2::from_elem((2, 2), 0.5);
        let expected = 2.0 * 0.5f32.ln();
        assert!((pseudo_log_likelihood(&v, &half) - expected).abs() < 1e-6);
    }
}
