//! # Sequence Unroller
//!
//! Runs the gated recurrence over a whole sequence, in the two modes the
//! model needs:
//!
//! - **training** (teacher-forced): a left fold over the data rows resolves
//!   every per-step bias pair first, then a single batched RBM call samples
//!   all time steps as independent chains;
//! - **generation** (free-running): every step samples its own visible
//!   vector and feeds it back into the memory.

use crate::nn::modules::{recurrence, FastDropout, LstmRbmParams, MemoryState};
use crate::nn::rbm::sample_rbm;
use crate::tensor::{ops, Tensor, TensorData, TensorError};
use ndarray::{Array2, Ix1};
use rand::Rng;

/// Training-mode result for one sequence (or chunk of one).
#[derive(Debug)]
pub struct TrainUnroll {
    /// CD-k cost, differentiable with respect to every parameter.
    pub cost: Tensor,
    /// Pseudo-log-likelihood monitor of the chunk.
    pub monitor: TensorData,
    /// Negative particles, one row per time step.
    pub v_sample: Array2<TensorData>,
}

/// Teacher-forced unroll of `v` (`T × n_visible`, `T > 0`).
pub fn train_unroll<R: Rng + ?Sized>(
    params: &LstmRbmParams,
    v: &Array2<TensorData>,
    k_train: usize,
    dropout: &FastDropout,
    rng: &mut R,
) -> Result<TrainUnroll, TensorError> {
    if v.nrows() == 0 {
        return Err(TensorError::Generic("cannot unroll an empty sequence".to_string()));
    }
    if v.ncols() != params.n_visible() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![v.nrows(), params.n_visible()],
            got: v.shape().to_vec(),
        });
    }

    let start = MemoryState::zeros(params.n_hidden_recurrent());
    let mut bv_rows = Vec::with_capacity(v.nrows());
    let mut bh_rows = Vec::with_capacity(v.nrows());
    v.rows().into_iter().try_fold(start, |state, row| {
        let v_t = Tensor::constant(row.to_owned().into_dyn());
        // Teacher forcing never samples, so the chain length is irrelevant here.
        let step = recurrence(params, Some(&v_t), &state, 0, dropout, &mut *rng)?;
        bv_rows.push(step.bv_t);
        bh_rows.push(step.bh_t);
        Ok::<_, TensorError>(step.state)
    })?;

    let bv_seq = ops::stack(&bv_rows)?;
    let bh_seq = ops::stack(&bh_rows)?;
    let data = Tensor::constant(v.clone().into_dyn());
    let sample = sample_rbm(&data, &params.w, &bv_seq, &bh_seq, k_train, dropout, rng)?;

    Ok(TrainUnroll {
        cost: sample.cost,
        monitor: sample.monitor,
        v_sample: sample.v_sample,
    })
}

/// Free-running unroll producing an `n_steps × n_visible` piano-roll.
///
/// Runs on a detached copy of the parameters, so no graph is recorded.
pub fn generate_unroll<R: Rng + ?Sized>(
    params: &LstmRbmParams,
    n_steps: usize,
    k_generate: usize,
    dropout: &FastDropout,
    rng: &mut R,
) -> Result<Array2<TensorData>, TensorError> {
    let params = params.detached();
    let mut roll = Array2::zeros((n_steps, params.n_visible()));
    let mut state = MemoryState::zeros(params.n_hidden_recurrent());

    for mut row in roll.rows_mut() {
        let step = recurrence(&params, None, &state, k_generate, dropout, &mut *rng)?;
        row.assign(&step.v_t.data().view().into_dimensionality::<Ix1>()?);
        state = step.state;
    }
    Ok(roll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Module;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> LstmRbmParams {
        LstmRbmParams::new(4, 3, 2, &mut StdRng::seed_from_u64(21)).unwrap()
    }

    fn sequence() -> Array2<TensorData> {
        arr2(&[
            [1.0, 0.0, 1.0, 0.0],
            [1.0, 0.0, 1.0, 1.0],
            [0.0, 1.0, 0.0, 0.0],
        ])
    }

    #[test]
    fn training_unroll_reaches_every_parameter() {
        let p = params();
        let mut rng = StdRng::seed_from_u64(1);
        let out = train_unroll(&p, &sequence(), 15, &FastDropout::default(), &mut rng).unwrap();
        assert_eq!(out.v_sample.dim(), (3, 4));
        assert!(out.monitor.is_finite());

        out.cost.backward().unwrap();
        for (name, t) in p.parameters() {
            let grad = t.grad().unwrap_or_else(|| panic!("{} has no gradient", name));
            assert_eq!(grad.shape(), t.shape(), "{}", name);
        }
    }

    #[test]
    fn single_step_sequence_uses_the_static_biases() {
        let p = params();
        let v = arr2(&[[0.0, 1.0, 1.0, 0.0]]);
        let mut rng = StdRng::seed_from_u64(2);
        let out = train_unroll(&p, &v, 1, &FastDropout::default(), &mut rng).unwrap();
        out.cost.backward().unwrap();
        // The first step starts from zero memory, so the recurrent weights
        // into the RBM biases see a zero input.
        assert!(p.wuv.grad().unwrap().iter().all(|&g| g == 0.0));
        assert!(p.bv.grad().is_some());
    }

    #[test]
    fn empty_or_misshaped_sequences_are_rejected() {
        let p = params();
        let mut rng = StdRng::seed_from_u64(3);
        let empty = Array2::<TensorData>::zeros((0, 4));
        assert!(train_unroll(&p, &empty, 15, &FastDropout::default(), &mut rng).is_err());
        let narrow = Array2::<TensorData>::zeros((2, 3));
        assert!(matches!(
            train_unroll(&p, &narrow, 15, &FastDropout::default(), &mut rng),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn generation_is_binary_and_seed_deterministic() {
        let p = params();
        let run = |seed| {
            generate_unroll(&p, 20, 25, &FastDropout::default(), &mut StdRng::seed_from_u64(seed))
                .unwrap()
        };
        let roll = run(9);
        assert_eq!(roll.dim(), (20, 4));
        assert!(roll.iter().all(|&x| x == 0.0 || x == 1.0));
        assert_eq!(roll, run(9));
    }

    #[test]
    fn generation_leaves_no_gradients_behind() {
        let p = params();
        generate_unroll(&p, 5, 3, &FastDropout::default(), &mut StdRng::seed_from_u64(4)).unwrap();
        assert!(p.parameters().values().all(|t| t.grad().is_none()));
    }
}
