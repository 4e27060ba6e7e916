//! Negative Binomial likelihood for overdispersed count data.

use candle_core::{DType, Result, Tensor};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, Poisson};

use super::poisson::{ln_factorial, MAX_POISSON_RATE};

/// Keeps success probabilities away from 0 and 1 before taking logs.
const PROB_EPS: f64 = 1e-6;

/// Fast lgamma approximation for tensors (Paul Mineiro's fastlgamma).
///
/// ```text
/// lgamma(x) ≈ -2.081061466 - x + 0.0833333/(x+3) - log(x*(1+x)*(2+x)) + (2.5+x)*log(x+3)
/// ```
pub fn lgamma_approx(x: &Tensor) -> Result<Tensor> {
    // Clamp x to avoid log(0) issues
    let x_safe = x.clamp(1e-6f32, f32::MAX)?;

    let x_plus_1 = (&x_safe + 1.0)?;
    let x_plus_2 = (&x_safe + 2.0)?;
    let logterm = ((&x_safe * &x_plus_1)? * &x_plus_2)?.log()?;

    let xp3 = (&x_safe + 3.0)?;
    let log_xp3 = xp3.log()?;

    let recip_term = (xp3.recip()? * 0.0833333)?;
    let mult_term = ((&x_safe + 2.5)? * &log_xp3)?;

    (((recip_term - 2.081061466)? - &x_safe)? - &logterm)? + &mult_term
}

/// Negative Binomial likelihood: y ~ NB(r, p)
///
/// # Model
/// `r` is the total count and `p` the success probability, so the mean is
/// `r * p / (1 - p)`.
///
/// ```text
/// log P(y | r, p) = lgamma(y + r) - lgamma(r) - lgamma(y + 1)
///                 + r*log(1 - p) + y*log(p)
/// ```
pub struct NegativeBinomialLikelihood {
    y: Tensor,
    ln_y_factorial: Tensor,
}

impl NegativeBinomialLikelihood {
    pub fn new(y: Tensor) -> Result<Self> {
        let ln_y_factorial = ln_factorial(&y)?;
        Ok(Self { y, ln_y_factorial })
    }

    /// Element-wise log P(y | r, p).
    ///
    /// # Arguments
    /// * `total_count` - r, shape (S, n, d)
    /// * `probs` - p, any shape that broadcasts with r
    pub fn log_prob(&self, total_count: &Tensor, probs: &Tensor) -> Result<Tensor> {
        let p = probs.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
        let log_p = p.log()?;
        let log_1mp = p.affine(-1.0, 1.0)?.log()?;

        let y_plus_r = total_count.broadcast_add(&self.y)?;

        lgamma_approx(&y_plus_r)?
            .broadcast_sub(&lgamma_approx(total_count)?)?
            .broadcast_sub(&self.ln_y_factorial)?
            .broadcast_add(&total_count.broadcast_mul(&log_1mp)?)?
            .broadcast_add(&log_p.broadcast_mul(&self.y)?)
    }

    /// Draw counts from NB(r, p) on the host as a Gamma-Poisson mixture.
    ///
    /// `λ ~ Gamma(r, p / (1 - p))`, `y ~ Poisson(λ)`
    pub fn sample(total_count: &Tensor, probs: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
        let probs = probs.broadcast_as(total_count.dims().to_vec())?;
        let r_vec = total_count.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
        let p_vec = probs.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;

        let counts = r_vec
            .into_iter()
            .zip(p_vec)
            .map(|(r, p)| {
                let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
                if r <= 0.0 {
                    return Ok(0f32);
                }
                let rgamma = Gamma::new(r, p / (1.0 - p))
                    .map_err(|e| candle_core::Error::Msg(format!("gamma({}): {}", r, e)))?;
                let lambda: f64 = rgamma.sample(rng);
                if lambda <= 0.0 {
                    return Ok(0f32);
                }
                let rpois = Poisson::new(lambda.min(MAX_POISSON_RATE))
                    .map_err(|e| candle_core::Error::Msg(format!("poisson({}): {}", lambda, e)))?;
                Ok(rpois.sample(rng) as f32)
            })
            .collect::<Result<Vec<_>>>()?;

        Tensor::from_vec(counts, total_count.dims().to_vec(), total_count.device())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;
    use rand::SeedableRng;
    use special::Gamma as SpecialGamma;

    #[test]
    fn test_negbinom_likelihood() -> Result<()> {
        let device = Device::Cpu;

        // y shape: (n, d) = (1, 3), r shape: (S, n, d) = (1, 1, 3)
        let y = Tensor::from_vec(vec![1.0f32, 2.0, 5.0], (1, 3), &device)?;
        let r = Tensor::from_vec(vec![2.0f32, 3.0, 4.0], (1, 1, 3), &device)?;
        let p = Tensor::from_vec(vec![0.4f32], (1, 1, 1), &device)?;

        let likelihood = NegativeBinomialLikelihood::new(y)?;
        let log_lik: Vec<f32> = likelihood.log_prob(&r, &p)?.flatten_all()?.to_vec1()?;

        let exact = |y: f64, r: f64, p: f64| {
            SpecialGamma::ln_gamma(y + r).0 - SpecialGamma::ln_gamma(r).0
                - SpecialGamma::ln_gamma(y + 1.0).0
                + r * (1.0 - p).ln()
                + y * p.ln()
        };
        assert_abs_diff_eq!(log_lik[0] as f64, exact(1.0, 2.0, 0.4), epsilon = 0.05);
        assert_abs_diff_eq!(log_lik[2] as f64, exact(5.0, 4.0, 0.4), epsilon = 0.05);

        Ok(())
    }

    #[test]
    fn test_lgamma_approx() -> Result<()> {
        let device = Device::Cpu;

        let x = Tensor::from_vec(vec![1.0f32, 2.0, 5.0, 10.0], (4,), &device)?;
        let vals: Vec<f32> = lgamma_approx(&x)?.to_vec1()?;

        // lgamma(1) = 0, lgamma(2) = 0, lgamma(5) ≈ 3.178, lgamma(10) ≈ 12.802
        assert!((vals[0] - 0.0).abs() < 0.1);
        assert!((vals[1] - 0.0).abs() < 0.1);
        assert!((vals[2] - 3.178).abs() < 0.2);
        assert!((vals[3] - 12.802).abs() < 0.5);

        Ok(())
    }

    #[test]
    fn test_negbinom_sample_mean() -> Result<()> {
        // mean = r p / (1 - p) = 4 * 0.5 / 0.5 = 4
        let r = Tensor::full(4f32, (2000,), &Device::Cpu)?;
        let p = Tensor::full(0.5f32, (2000,), &Device::Cpu)?;
        let y = NegativeBinomialLikelihood::sample(&r, &p, &mut StdRng::seed_from_u64(5))?;
        let mean = y.mean_all()?.to_scalar::<f32>()?;
        assert!((mean - 4.0).abs() < 0.4, "sample mean {}", mean);
        Ok(())
    }
}
