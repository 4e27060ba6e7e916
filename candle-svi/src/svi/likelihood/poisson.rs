//! Poisson likelihood for count data.

use candle_core::{DType, Result, Tensor};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};
use special::Gamma as SpecialGamma;

/// Largest rate the host Poisson sampler accepts.
pub(crate) const MAX_POISSON_RATE: f64 = 1e18;

/// Element-wise log(y!) for a tensor of non-negative counts.
pub fn ln_factorial(y: &Tensor) -> Result<Tensor> {
    let values: Vec<f32> = y
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?
        .into_iter()
        .map(|v| SpecialGamma::ln_gamma(v + 1.0).0 as f32)
        .collect();
    Tensor::from_vec(values, y.dims().to_vec(), y.device())?.to_dtype(y.dtype())
}

/// Poisson likelihood: y ~ Poisson(exp(η))
///
/// # Model
/// ```text
/// log p(y | η) = y * η - exp(η) - log(y!)
/// ```
/// log(y!) is precomputed once so the reported loss is the full negative
/// log-probability.
pub struct PoissonLikelihood {
    y: Tensor,
    ln_y_factorial: Tensor,
}

impl PoissonLikelihood {
    pub fn new(y: Tensor) -> Result<Self> {
        let ln_y_factorial = ln_factorial(&y)?;
        Ok(Self { y, ln_y_factorial })
    }

    /// Insert a broadcast axis into the counts, e.g. a trailing cluster axis.
    pub fn unsqueeze(&self, dim: usize) -> Result<Self> {
        Ok(Self {
            y: self.y.unsqueeze(dim)?,
            ln_y_factorial: self.ln_y_factorial.unsqueeze(dim)?,
        })
    }

    /// Element-wise log p(y | η).
    ///
    /// # Arguments
    /// * `log_rate` - log-rate η, any shape that broadcasts with y
    pub fn log_prob(&self, log_rate: &Tensor) -> Result<Tensor> {
        log_rate
            .broadcast_mul(&self.y)?
            .broadcast_sub(&log_rate.exp()?)?
            .broadcast_sub(&self.ln_y_factorial)
    }

    /// Draw counts from Poisson(rate) on the host.
    pub fn sample(rate: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
        let counts = rate
            .to_dtype(DType::F64)?
            .flatten_all()?
            .to_vec1::<f64>()?
            .into_iter()
            .map(|lambda| {
                if lambda == 0.0 {
                    return Ok(0f32);
                }
                let rpois = Poisson::new(lambda.min(MAX_POISSON_RATE)).map_err(|e| {
                    candle_core::Error::Msg(format!("poisson rate {}: {}", lambda, e))
                })?;
                Ok(rpois.sample(rng) as f32)
            })
            .collect::<Result<Vec<_>>>()?;
        Tensor::from_vec(counts, rate.dims().to_vec(), rate.device())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;
    use rand::SeedableRng;

    #[test]
    fn test_poisson_likelihood() -> Result<()> {
        let device = Device::Cpu;

        // y shape: (n, d) = (1, 3), eta shape: (S, n, 1) = (2, 1, 1)
        let y = Tensor::from_vec(vec![1.0f32, 0.0, 3.0], (1, 3), &device)?;
        let eta = Tensor::from_vec(vec![0.0f32, 0.5], (2, 1, 1), &device)?;

        let likelihood = PoissonLikelihood::new(y)?;
        let log_lik = likelihood.log_prob(&eta)?;
        assert_eq!(log_lik.dims(), &[2, 1, 3]);

        let vals: Vec<f32> = log_lik.flatten_all()?.to_vec1()?;
        let exact = |y: f64, eta: f64| y * eta - eta.exp() - SpecialGamma::ln_gamma(y + 1.0).0;
        assert_abs_diff_eq!(vals[0] as f64, exact(1.0, 0.0), epsilon = 1e-5);
        assert_abs_diff_eq!(vals[5] as f64, exact(3.0, 0.5), epsilon = 1e-5);

        Ok(())
    }

    #[test]
    fn test_ln_factorial() -> Result<()> {
        let y = Tensor::new(&[0f32, 1.0, 4.0], &Device::Cpu)?;
        let lf: Vec<f32> = ln_factorial(&y)?.to_vec1()?;
        assert_abs_diff_eq!(lf[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lf[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lf[2], 24f32.ln(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_poisson_sample() -> Result<()> {
        let rate = Tensor::new(&[[0f32, 2.0], [5.0, 0.5]], &Device::Cpu)?;
        let a = PoissonLikelihood::sample(&rate, &mut StdRng::seed_from_u64(11))?;
        let b = PoissonLikelihood::sample(&rate, &mut StdRng::seed_from_u64(11))?;
        assert_eq!(a.dims(), &[2, 2]);
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        assert_eq!(a.to_vec2::<f32>()?[0][0], 0.0);
        Ok(())
    }
}
