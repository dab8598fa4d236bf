//! # Gated Recurrence
//!
//! The recurrent half of the LSTM-RBM. One step maps the memory state
//! `(u, q, c)` to the biases of the conditional RBM for the current time
//! step, then advances the memory using the visible vector of that step.
//!
//! The same [`recurrence`] function serves training and generation; the only
//! difference is where `v_t` comes from (`Some` = supplied by the data,
//! `None` = drawn from the RBM conditioned on the fresh biases).
//!
//! All gates squash with `tanh`, including input, forget and output gates.

use crate::nn::modules::FastDropout;
use crate::nn::rbm::gibbs_chain;
use crate::nn::{functional as F, Module};
use crate::tensor::{ops, randn_using, zeros, Tensor, TensorData, TensorError};
use ndarray::{Array2, Axis, Ix1};
use rand::Rng;
use std::collections::BTreeMap;

const RBM_WEIGHT_SCALE: TensorData = 0.01;
const RECURRENT_WEIGHT_SCALE: TensorData = 0.0001;

/// Every trainable tensor of the LSTM-RBM.
///
/// Shapes use `nv = n_visible`, `nh = n_hidden`, `nr = n_hidden_recurrent`.
#[derive(Debug, Clone)]
pub struct LstmRbmParams {
    // RBM: [nv, nh], [nv], [nh]
    pub w: Tensor,
    pub bv: Tensor,
    pub bh: Tensor,

    // Memory to RBM biases: [nr, nh], [nr, nv], [nr, nv], [nr, nh]
    pub wuh: Tensor,
    pub wuv: Tensor,
    pub wqv: Tensor,
    pub wqh: Tensor,

    // Memory update: [nv, nr], [nr, nr], [nr]
    pub wvu: Tensor,
    pub wuu: Tensor,
    pub bu: Tensor,

    // Input gate
    pub wui: Tensor,
    pub wqi: Tensor,
    pub wci: Tensor,
    pub bi: Tensor,

    // Forget gate
    pub wuf: Tensor,
    pub wqf: Tensor,
    pub wcf: Tensor,
    pub bf: Tensor,

    // Cell candidate
    pub wuc: Tensor,
    pub wqc: Tensor,
    pub bc: Tensor,

    // Output gate
    pub wuo: Tensor,
    pub wqo: Tensor,
    pub wco: Tensor,
    pub bo: Tensor,
}

impl LstmRbmParams {
    /// Creates the parameter set: RBM weights ~ N(0, 0.01²), every other
    /// weight ~ N(0, 0.0001²), biases zero.
    pub fn new<R: Rng + ?Sized>(
        n_visible: usize,
        n_hidden: usize,
        n_hidden_recurrent: usize,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        let (nv, nh, nr) = (n_visible, n_hidden, n_hidden_recurrent);
        let mut normal = |rows: usize, cols: usize, scale: TensorData| {
            randn_using(&[rows, cols], scale, true, &mut *rng)
        };
        let s = RECURRENT_WEIGHT_SCALE;

        // Draw order is fixed so a seed always yields the same model.
        let w = normal(nv, nh, RBM_WEIGHT_SCALE)?;
        let wuh = normal(nr, nh, s)?;
        let wuv = normal(nr, nv, s)?;
        let wvu = normal(nv, nr, s)?;
        let wuu = normal(nr, nr, s)?;
        let wui = normal(nr, nr, s)?;
        let wqi = normal(nr, nr, s)?;
        let wci = normal(nr, nr, s)?;
        let wuf = normal(nr, nr, s)?;
        let wqf = normal(nr, nr, s)?;
        let wcf = normal(nr, nr, s)?;
        let wuc = normal(nr, nr, s)?;
        let wqc = normal(nr, nr, s)?;
        let wuo = normal(nr, nr, s)?;
        let wqo = normal(nr, nr, s)?;
        let wco = normal(nr, nr, s)?;
        let wqv = normal(nr, nv, s)?;
        let wqh = normal(nr, nh, s)?;

        Ok(LstmRbmParams {
            w,
            bv: zeros(&[nv], true),
            bh: zeros(&[nh], true),
            wuh,
            wuv,
            wqv,
            wqh,
            wvu,
            wuu,
            bu: zeros(&[nr], true),
            wui,
            wqi,
            wci,
            bi: zeros(&[nr], true),
            wuf,
            wqf,
            wcf,
            bf: zeros(&[nr], true),
            wuc,
            wqc,
            bc: zeros(&[nr], true),
            wuo,
            wqo,
            wco,
            bo: zeros(&[nr], true),
        })
    }

    pub fn n_visible(&self) -> usize {
        self.w.shape()[0]
    }

    pub fn n_hidden(&self) -> usize {
        self.w.shape()[1]
    }

    pub fn n_hidden_recurrent(&self) -> usize {
        self.bu.shape()[0]
    }

    /// Gradient-free view of the same parameter values, for sampling paths
    /// that should not record a graph.
    pub fn detached(&self) -> Self {
        let mut copy = self.clone();
        copy.for_each_mut(|t| *t = t.detach());
        copy
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(&mut Tensor)) {
        for t in [
            &mut self.w, &mut self.bv, &mut self.bh, &mut self.wuh, &mut self.wuv,
            &mut self.wqv, &mut self.wqh, &mut self.wvu, &mut self.wuu, &mut self.bu,
            &mut self.wui, &mut self.wqi, &mut self.wci, &mut self.bi, &mut self.wuf,
            &mut self.wqf, &mut self.wcf, &mut self.bf, &mut self.wuc, &mut self.wqc,
            &mut self.bc, &mut self.wuo, &mut self.wqo, &mut self.wco, &mut self.bo,
        ] {
            f(t);
        }
    }
}

impl Module for LstmRbmParams {
    fn parameters(&self) -> BTreeMap<String, Tensor> {
        [
            ("W", &self.w), ("bv", &self.bv), ("bh", &self.bh),
            ("Wuh", &self.wuh), ("Wuv", &self.wuv), ("Wqv", &self.wqv), ("Wqh", &self.wqh),
            ("Wvu", &self.wvu), ("Wuu", &self.wuu), ("bu", &self.bu),
            ("Wui", &self.wui), ("Wqi", &self.wqi), ("Wci", &self.wci), ("bi", &self.bi),
            ("Wuf", &self.wuf), ("Wqf", &self.wqf), ("Wcf", &self.wcf), ("bf", &self.bf),
            ("Wuc", &self.wuc), ("Wqc", &self.wqc), ("bc", &self.bc),
            ("Wuo", &self.wuo), ("Wqo", &self.wqo), ("Wco", &self.wco), ("bo", &self.bo),
        ]
        .into_iter()
        .map(|(name, t)| (name.to_string(), t.clone()))
        .collect()
    }
}

/// Memory carried from one time step to the next.
#[derive(Debug, Clone)]
pub struct MemoryState {
    /// Memory-update vector.
    pub u: Tensor,
    /// Gated hidden output.
    pub q: Tensor,
    /// Cell state.
    pub c: Tensor,
}

impl MemoryState {
    /// Fresh all-zero state; every sequence starts from here.
    pub fn zeros(n_hidden_recurrent: usize) -> Self {
        MemoryState {
            u: zeros(&[n_hidden_recurrent], false),
            q: zeros(&[n_hidden_recurrent], false),
            c: zeros(&[n_hidden_recurrent], false),
        }
    }
}

/// Everything one recurrence step produces.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Visible vector of this step: the supplied one, or the sampled one.
    pub v_t: Tensor,
    /// Memory after this step.
    pub state: MemoryState,
    /// RBM visible bias for this step, from the previous memory.
    pub bv_t: Tensor,
    /// RBM hidden bias for this step, from the previous memory.
    pub bh_t: Tensor,
}

/// `bias + Σ xᵢ·Wᵢ`
fn affine(bias: &Tensor, terms: &[(&Tensor, &Tensor)]) -> Result<Tensor, TensorError> {
    terms
        .iter()
        .try_fold(bias.clone(), |acc, (x, w)| ops::add(&acc, &ops::matmul(x, w)?))
}

/// One step of the gated recurrence.
///
/// With `v_t = Some(v)` the step is deterministic and never touches `rng`.
/// With `v_t = None` the visible vector is drawn by a `k_generate`-step Gibbs
/// chain started from all zeros under the step's own biases.
pub fn recurrence<R: Rng + ?Sized>(
    params: &LstmRbmParams,
    v_t: Option<&Tensor>,
    prev: &MemoryState,
    k_generate: usize,
    dropout: &FastDropout,
    rng: &mut R,
) -> Result<StepOutput, TensorError> {
    let p = params;
    let (u_prev, q_prev, c_prev) = (&prev.u, &prev.q, &prev.c);

    let bv_t = affine(&p.bv, &[(u_prev, &p.wuv), (q_prev, &p.wqv)])?;
    let bh_t = affine(&p.bh, &[(u_prev, &p.wuh), (q_prev, &p.wqh)])?;

    let v_t = match v_t {
        Some(v) => {
            if v.shape() != [p.n_visible()] {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![p.n_visible()],
                    got: v.shape().to_vec(),
                });
            }
            v.clone()
        }
        None => sample_visible(p, &bv_t, &bh_t, k_generate, dropout, rng)?,
    };

    let u_t = F::tanh(&affine(&p.bu, &[(&v_t, &p.wvu), (u_prev, &p.wuu)])?)?;

    let i_t = F::tanh(&affine(&p.bi, &[(c_prev, &p.wci), (q_prev, &p.wqi), (&u_t, &p.wui)])?)?;
    let f_t = F::tanh(&affine(&p.bf, &[(c_prev, &p.wcf), (q_prev, &p.wqf), (&u_t, &p.wuf)])?)?;
    let candidate = F::tanh(&affine(&p.bc, &[(&u_t, &p.wuc), (q_prev, &p.wqc)])?)?;
    let c_t = ops::add(&ops::mul(&f_t, c_prev)?, &ops::mul(&i_t, &candidate)?)?;
    // The output gate reads the updated cell.
    let o_t = F::tanh(&affine(&p.bo, &[(&c_t, &p.wco), (q_prev, &p.wqo), (&u_t, &p.wuo)])?)?;
    let q_t = ops::mul(&o_t, &F::tanh(&c_t)?)?;

    Ok(StepOutput {
        v_t,
        state: MemoryState { u: u_t, q: q_t, c: c_t },
        bv_t,
        bh_t,
    })
}

/// Draws a visible vector from the RBM conditioned on `(bv_t, bh_t)`.
fn sample_visible<R: Rng + ?Sized>(
    p: &LstmRbmParams,
    bv_t: &Tensor,
    bh_t: &Tensor,
    k: usize,
    dropout: &FastDropout,
    rng: &mut R,
) -> Result<Tensor, TensorError> {
    let w = p.w.data().view().into_dimensionality::<ndarray::Ix2>()?.to_owned();
    let bv = bv_t.data().view().into_dimensionality::<Ix1>()?.insert_axis(Axis(0)).to_owned();
    let bh = bh_t.data().view().into_dimensionality::<Ix1>()?.insert_axis(Axis(0)).to_owned();
    let v0 = Array2::zeros((1, p.n_visible()));

    let sample = gibbs_chain(&v0, w.view(), bv.view(), bh.view(), k, dropout, rng);
    Ok(Tensor::constant(sample.index_axis_move(Axis(0), 0).into_dyn()))
}
