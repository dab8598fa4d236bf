//! # RBM Sampler
//!
//! Contrastive-divergence machinery for a (conditional) Restricted Boltzmann
//! Machine: a k-step Gibbs chain, the CD-k training cost and the
//! pseudo-log-likelihood monitor.
//!
//! Rows of the visible matrix are independent chains. Biases may be shared
//! vectors or carry one row per chain, which is how the recurrence hands a
//! different `(bv_t, bh_t)` pair to every time step of a sequence.

use crate::nn::functional::{bernoulli, sigmoid_array};
use crate::nn::loss::{contrastive_divergence_cost, pseudo_log_likelihood};
use crate::nn::modules::FastDropout;
use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix1, Ix2};
use rand::Rng;

/// Result of one sampler invocation.
#[derive(Debug)]
pub struct RbmSample {
    /// Final visible state of every chain (a constant, outside the graph).
    pub v_sample: Array2<TensorData>,
    /// Scalar whose gradient is the CD-k estimate of the log-likelihood gradient.
    pub cost: Tensor,
    /// Pseudo-log-likelihood of the input, averaged over rows.
    pub monitor: TensorData,
}

/// One alternating Gibbs step `v -> h -> v`.
///
/// Returns the visible probabilities and the binary visible sample.
pub fn gibbs_step<R: Rng + ?Sized>(
    v: &Array2<TensorData>,
    w: ArrayView2<'_, TensorData>,
    bv: ArrayView2<'_, TensorData>,
    bh: ArrayView2<'_, TensorData>,
    dropout: &FastDropout,
    rng: &mut R,
) -> (Array2<TensorData>, Array2<TensorData>) {
    let mean_h = sigmoid_array(&(dropout.apply(v, rng).dot(&w) + &bh));
    let h = bernoulli(&mean_h, rng);
    let mean_v = sigmoid_array(&(dropout.apply(&h, rng).dot(&w.t()) + &bv));
    let v_next = bernoulli(&mean_v, rng);
    (mean_v, v_next)
}

/// Runs `k` Gibbs steps from `v0` and returns the final visible sample.
/// With `k == 0` the input comes back unchanged.
pub fn gibbs_chain<R: Rng + ?Sized>(
    v0: &Array2<TensorData>,
    w: ArrayView2<'_, TensorData>,
    bv: ArrayView2<'_, TensorData>,
    bh: ArrayView2<'_, TensorData>,
    k: usize,
    dropout: &FastDropout,
    rng: &mut R,
) -> Array2<TensorData> {
    (0..k).fold(v0.clone(), |v, _| gibbs_step(&v, w, bv, bh, dropout, rng).1)
}

/// Full sampler: runs the chain from the data `v`, then builds the CD-k cost
/// and the monitor.
///
/// `v` is `[rows, n_visible]`; `w` is `[n_visible, n_hidden]`; `bv`/`bh` are
/// rank 1 (shared) or rank 2 (per row). The chain only reads the parameter
/// values, the cost keeps them in the graph.
pub fn sample_rbm<R: Rng + ?Sized>(
    v: &Tensor,
    w: &Tensor,
    bv: &Tensor,
    bh: &Tensor,
    k: usize,
    dropout: &FastDropout,
    rng: &mut R,
) -> Result<RbmSample, TensorError> {
    let v_data = as_rows(&v.data())?;
    let w_data = w.data().view().into_dimensionality::<Ix2>()?.to_owned();
    let bv_data = as_rows(&bv.data())?;
    let bh_data = as_rows(&bh.data())?;
    check_bias(&bv_data, v_data.nrows(), w_data.nrows(), "bv")?;
    check_bias(&bh_data, v_data.nrows(), w_data.ncols(), "bh")?;

    let v_sample = gibbs_chain(
        &v_data,
        w_data.view(),
        bv_data.view(),
        bh_data.view(),
        k,
        dropout,
        rng,
    );

    let (mean_v, _) = gibbs_step(
        &v_sample,
        w_data.view(),
        bv_data.view(),
        bh_data.view(),
        dropout,
        rng,
    );
    let monitor = pseudo_log_likelihood(&v_data, &mean_v);

    let negative = Tensor::constant(v_sample.clone().into_dyn());
    let cost = contrastive_divergence_cost(v, &negative, w, bv, bh)?;

    Ok(RbmSample {
        v_sample,
        cost,
        monitor,
    })
}

/// Views a rank-1 array as a single row, or a rank-2 array as is.
pub(crate) fn as_rows(data: &ArrayD<TensorData>) -> Result<Array2<TensorData>, TensorError> {
    match data.ndim() {
        1 => Ok(data
            .view()
            .into_dimensionality::<Ix1>()?
            .insert_axis(Axis(0))
            .to_owned()),
        _ => Ok(data.view().into_dimensionality::<Ix2>()?.to_owned()),
    }
}

fn check_bias(
    bias: &Array2<TensorData>,
    rows: usize,
    width: usize,
    name: &str,
) -> Result<(), TensorError> {
    let rows_ok = bias.nrows() == 1 || bias.nrows() == rows;
    if !rows_ok || bias.ncols() != width {
        return Err(TensorError::IncompatibleShapes {
            op: format!("sample_rbm {}", name),
            shape1: vec![rows, width],
            shape2: bias.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use ndarray_rand::rand_distr::{Distribution, Normal};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toy() -> (Array2<TensorData>, Array2<TensorData>, Array2<TensorData>) {
        let w = arr2(&[[0.8, -0.4, 0.2], [-0.3, 0.9, 0.5], [0.1, 0.1, -0.7], [0.6, -0.2, 0.3]]);
        let bv = arr2(&[[0.1, -0.2, 0.3, 0.0]]);
        let bh = arr2(&[[0.05, -0.05, 0.2]]);
        (w, bv, bh)
    }

    #[test]
    fn zero_step_chain_returns_input() {
        let (w, bv, bh) = toy();
        let v0 = arr2(&[[1.0, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 0.0]]);
        let mut rng = StdRng::seed_from_u64(11);
        let out = gibbs_chain(&v0, w.view(), bv.view(), bh.view(), 0, &FastDropout::default(), &mut rng);
        assert_eq!(out, v0);
    }

    #[test]
    fn one_step_chain_matches_manual_sampling() {
        let (w, bv, bh) = toy();
        let v0 = arr2(&[[1.0, 0.0, 1.0, 1.0]]);
        let dropout = FastDropout::default();
        let out = gibbs_chain(
            &v0,
            w.view(),
            bv.view(),
            bh.view(),
            1,
            &dropout,
            &mut StdRng::seed_from_u64(12),
        );

        // Same draws, same order: noise on v, hidden coins, noise on h, visible coins.
        let mut rng = StdRng::seed_from_u64(12);
        let normal = Normal::<TensorData>::new(1.0, 1.0).unwrap();
        let noise_v = Array2::from_shape_fn((1, 4), |_| normal.sample(&mut rng));
        let mean_h = sigmoid_array(&((&v0 * &noise_v).dot(&w) + &bh));
        let h = mean_h.mapv(|p| if rng.gen::<TensorData>() < p { 1.0 } else { 0.0 });
        let noise_h = Array2::from_shape_fn((1, 3), |_| normal.sample(&mut rng));
        let mean_v = sigmoid_array(&((&h * &noise_h).dot(&w.t()) + &bv));
        let expected = mean_v.mapv(|p| if rng.gen::<TensorData>() < p { 1.0 } else { 0.0 });

        assert_eq!(out, expected);
    }

    #[test]
    fn chain_output_is_binary_and_seed_deterministic() {
        let (w, bv, bh) = toy();
        let v0 = Array2::zeros((3, 4));
        let run = |seed| {
            gibbs_chain(
                &v0,
                w.view(),
                bv.view(),
                bh.view(),
                25,
                &FastDropout::default(),
                &mut StdRng::seed_from_u64(seed),
            )
        };
        let a = run(5);
        assert!(a.iter().all(|&x| x == 0.0 || x == 1.0));
        assert_eq!(a, run(5));
    }

    #[test]
    fn strong_biases_dominate_the_chain() {
        let w = Array2::zeros((3, 2));
        let bv = arr2(&[[30.0, -30.0, 30.0]]);
        let bh = arr2(&[[0.0, 0.0]]);
        let v0 = Array2::zeros((4, 3));
        let mut rng = StdRng::seed_from_u64(6);
        let out = gibbs_chain(&v0, w.view(), bv.view(), bh.view(), 3, &FastDropout::default(), &mut rng);
        for row in out.rows() {
            assert_eq!(row.to_vec(), vec![1.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn sampler_accepts_per_row_biases_and_reports_finite_values() {
        let w = Tensor::new(toy().0.into_dyn(), true);
        let v = Tensor::constant(arr2(&[[1.0, 0.0, 1.0, 1.0], [0.0, 1.0, 0.0, 0.0]]).into_dyn());
        let bv = Tensor::new(Array2::<TensorData>::zeros((2, 4)).into_dyn(), true);
        let bh = Tensor::new(arr1(&[0.0, 0.1, -0.1]).into_dyn(), true);
        let mut rng = StdRng::seed_from_u64(8);
        let out = sample_rbm(&v, &w, &bv, &bh, 15, &FastDropout::default(), &mut rng).unwrap();
        assert_eq!(out.v_sample.dim(), (2, 4));
        assert!(out.monitor.is_finite() && out.monitor <= 0.0);
        assert!(out.cost.item().unwrap().is_finite());

        out.cost.backward().unwrap();
        assert_eq!(w.grad().unwrap().shape(), &[4, 3]);
        assert_eq!(bv.grad().unwrap().shape(), &[2, 4]);
        assert_eq!(bh.grad().unwrap().shape(), &[3]);
    }

    #[test]
    fn mismatched_bias_rows_are_rejected() {
        let w = Tensor::constant(toy().0.into_dyn());
        let v = Tensor::constant(Array2::<TensorData>::zeros((3, 4)).into_dyn());
        let bv = Tensor::constant(Array2::<TensorData>::zeros((2, 4)).into_dyn());
        let bh = Tensor::constant(Array2::<TensorData>::zeros((1, 3)).into_dyn());
        let mut rng = StdRng::seed_from_u64(9);
        assert!(sample_rbm(&v, &w, &bv, &bh, 1, &FastDropout::default(), &mut rng).is_err());
    }
}
