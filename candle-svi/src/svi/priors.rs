use candle_core::{DType, Device, Result, Tensor};
use rand::rngs::StdRng;
use rand_distr::{Beta, Distribution, Gamma, Normal};
use special::Gamma as SpecialGamma;

use super::transforms::Support;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Smallest value kept away from the boundary of (0, 1) before taking logs.
const PROB_EPS: f64 = 1e-7;

fn sampler_error(err: impl std::fmt::Display) -> candle_core::Error {
    candle_core::Error::Msg(format!("prior sampler: {}", err))
}

/// Prior distribution of a latent site.
#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    /// N(loc, scale²), support ℝ
    Normal { loc: f64, scale: f64 },
    /// Beta(α, β), support (0, 1)
    Beta { alpha: f64, beta: f64 },
    /// Dirichlet(α₁..α_K), support the (K-1)-simplex
    Dirichlet { concentration: Vec<f64> },
}

impl Prior {
    pub fn normal(loc: f64, scale: f64) -> Self {
        Self::Normal { loc, scale }
    }

    pub fn beta(alpha: f64, beta: f64) -> Self {
        Self::Beta { alpha, beta }
    }

    pub fn dirichlet(concentration: Vec<f64>) -> Self {
        Self::Dirichlet { concentration }
    }

    pub fn symmetric_dirichlet(k: usize, alpha: f64) -> Self {
        Self::Dirichlet {
            concentration: vec![alpha; k],
        }
    }

    pub fn support(&self) -> Support {
        match self {
            Self::Normal { .. } => Support::Real,
            Self::Beta { .. } => Support::UnitInterval,
            Self::Dirichlet { .. } => Support::Simplex,
        }
    }

    pub fn event_shape(&self) -> Vec<usize> {
        match self {
            Self::Dirichlet { concentration } => vec![concentration.len()],
            _ => vec![],
        }
    }

    fn event_size(&self) -> usize {
        self.event_shape().iter().product()
    }

    /// Log density of `value`, reduced over the event dimension only.
    ///
    /// # Arguments
    /// * `value` - Constrained values, shape (S, ...batch, ...event)
    ///
    /// # Returns
    /// Log density, shape (S, ...batch)
    pub fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        match self {
            Self::Normal { loc, scale } => {
                // log N(x; μ, σ²) = -0.5 * [(x-μ)²/σ² + 2*ln(σ) + ln(2π)]
                let z_sq = ((value - *loc)? / *scale)?.sqr()?;
                let const_term = 2.0 * scale.ln() + LN_2PI;
                (z_sq + const_term)? * (-0.5)
            }
            Self::Beta { alpha, beta } => {
                let x = value.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
                let ln_x = x.log()?;
                let ln_1mx = x.affine(-1.0, 1.0)?.log()?;
                let ln_norm = SpecialGamma::ln_gamma(*alpha).0 + SpecialGamma::ln_gamma(*beta).0
                    - SpecialGamma::ln_gamma(alpha + beta).0;
                ((ln_x * (alpha - 1.0))? + (ln_1mx * (beta - 1.0))?)? - ln_norm
            }
            Self::Dirichlet { concentration } => {
                let k = concentration.len();
                let alpha_m1 = Tensor::from_vec(
                    concentration.iter().map(|&a| (a - 1.0) as f32).collect::<Vec<_>>(),
                    k,
                    value.device(),
                )?
                .to_dtype(value.dtype())?;
                let total: f64 = concentration.iter().sum();
                let ln_norm = SpecialGamma::ln_gamma(total).0
                    - concentration
                        .iter()
                        .map(|&a| SpecialGamma::ln_gamma(a).0)
                        .sum::<f64>();
                let ln_w = value.clamp(PROB_EPS, 1.0)?.log()?;
                ln_w.broadcast_mul(&alpha_m1)?.sum(value.rank() - 1)? + ln_norm
            }
        }
    }

    /// Draw `num_events` independent values on the host.
    ///
    /// # Returns
    /// Flat vector of `num_events * event_size` values
    pub fn sample_values(&self, num_events: usize, rng: &mut StdRng) -> Result<Vec<f64>> {
        match self {
            Self::Normal { loc, scale } => {
                let normal = Normal::new(*loc, *scale).map_err(sampler_error)?;
                Ok((0..num_events).map(|_| normal.sample(rng)).collect())
            }
            Self::Beta { alpha, beta } => {
                let rbeta = Beta::new(*alpha, *beta).map_err(sampler_error)?;
                Ok((0..num_events).map(|_| rbeta.sample(rng)).collect())
            }
            Self::Dirichlet { concentration } => {
                let gammas = concentration
                    .iter()
                    .map(|&a| Gamma::new(a, 1.0).map_err(sampler_error))
                    .collect::<Result<Vec<_>>>()?;
                let mut out = Vec::with_capacity(num_events * concentration.len());
                for _ in 0..num_events {
                    let draws: Vec<f64> = gammas.iter().map(|g| g.sample(rng)).collect();
                    let total: f64 = draws.iter().sum();
                    out.extend(draws.iter().map(|x| x / total));
                }
                Ok(out)
            }
        }
    }

    /// Draw a tensor of the given full shape (batch and event dims).
    pub fn sample(&self, shape: &[usize], device: &Device, rng: &mut StdRng) -> Result<Tensor> {
        let numel: usize = shape.iter().product();
        let num_events = numel / self.event_size().max(1);
        let values = self
            .sample_values(num_events, rng)?
            .into_iter()
            .map(|x| x as f32)
            .collect::<Vec<_>>();
        Tensor::from_vec(values, shape.to_vec(), device)?.to_dtype(DType::F32)
    }
}
