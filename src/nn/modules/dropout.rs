//! # Fast Dropout
//!
//! Multiplies activations by independent Gaussian noise drawn from `N(1, 1)`.
//! Applied to the visible and hidden states before every product in the Gibbs
//! chain, during training and generation alike.

use crate::tensor::{TensorData, TensorError};
use ndarray::{Array, Dimension};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct FastDropout {
    noise: Normal<TensorData>,
}

impl FastDropout {
    /// Creates a fast-dropout perturbation with noise `N(mean, std²)`.
    pub fn new(mean: TensorData, std: TensorData) -> Result<Self, TensorError> {
        let noise = Normal::new(mean, std).map_err(|e| {
            TensorError::Generic(format!("invalid dropout noise N({}, {}): {}", mean, std, e))
        })?;
        Ok(FastDropout { noise })
    }

    /// Returns `input ⊙ noise` with a fresh noise draw per element.
    pub fn apply<D: Dimension, R: Rng + ?Sized>(
        &self,
        input: &Array<TensorData, D>,
        rng: &mut R,
    ) -> Array<TensorData, D> {
        let mask: Array<TensorData, D> = Array::random_using(input.raw_dim(), self.noise, rng);
        input * &mask
    }
}

impl Default for FastDropout {
    fn default() -> Self {
        FastDropout {
            noise: Normal::new(1.0, 1.0).expect("unit normal parameters are valid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zeros_stay_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        let out = FastDropout::default().apply(&Array2::<TensorData>::zeros((2, 5)), &mut rng);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn noise_has_unit_mean_and_variance() {
        let mut rng = StdRng::seed_from_u64(4);
        let ones = Array2::<TensorData>::ones((100, 100));
        let out = FastDropout::default().apply(&ones, &mut rng);
        let mean = out.mean().unwrap();
        let var = out.mapv(|x| (x - mean) * (x - mean)).mean().unwrap();
        assert!((mean - 1.0).abs() < 0.05, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.1, "variance {}", var);
    }

    #[test]
    fn negative_std_is_rejected() {
        assert!(FastDropout::new(1.0, -1.0).is_err());
    }
}
