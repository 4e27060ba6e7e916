use candle_core::{Result, Tensor};

use super::elbo::sum_non_sample;

/// Support of a latent site and its bijection from unconstrained space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// ℝ, identity
    Real,
    /// (0, 1), logistic sigmoid
    UnitInterval,
    /// K-simplex, stick-breaking from ℝ^(K-1)
    Simplex,
}

/// log(1 + exp(-|x|)), the shared tail of softplus(x) and softplus(-x)
fn log1p_exp_neg_abs(x: &Tensor) -> Result<Tensor> {
    (x.abs()?.neg()?.exp()? + 1.0)?.log()
}

/// log σ(x) = -softplus(-x), stable for large |x|
fn log_sigmoid(x: &Tensor) -> Result<Tensor> {
    (x.neg()?.relu()? + log1p_exp_neg_abs(x)?)?.neg()
}

impl Support {
    /// Event shape in unconstrained space.
    pub fn unconstrained_event_shape(&self, event_shape: &[usize]) -> Vec<usize> {
        match self {
            Self::Simplex => {
                let mut shape = event_shape.to_vec();
                if let Some(last) = shape.last_mut() {
                    *last = last.saturating_sub(1);
                }
                shape
            }
            _ => event_shape.to_vec(),
        }
    }

    /// Map unconstrained `u` to the support.
    ///
    /// # Arguments
    /// * `u` - Unconstrained values, shape (S, ...)
    /// * `constrained_shape` - Target shape including the leading S
    ///
    /// # Returns
    /// `(value, log_abs_det_jacobian)` where the Jacobian term is summed
    /// to shape (S,)
    pub fn forward(&self, u: &Tensor, constrained_shape: &[usize]) -> Result<(Tensor, Tensor)> {
        let num_samples = constrained_shape[0];
        match self {
            Self::Real => {
                let ladj = Tensor::zeros(num_samples, u.dtype(), u.device())?;
                Ok((u.clone(), ladj))
            }
            Self::UnitInterval => {
                let x = candle_nn::ops::sigmoid(u)?;
                // log σ(u) + log(1 - σ(u)) = -(|u| + 2 log(1 + exp(-|u|)))
                let ladj = (u.abs()? + (log1p_exp_neg_abs(u)? * 2.0)?)?.neg()?;
                Ok((x, sum_non_sample(&ladj)?))
            }
            Self::Simplex => stick_breaking(u, constrained_shape),
        }
    }

    /// Inverse map on the host, used to place initial values.
    ///
    /// # Arguments
    /// * `values` - Flat constrained values, events laid out contiguously
    /// * `event_size` - Size of one event (K for a simplex, 1 otherwise)
    pub fn inverse_values(&self, values: &[f64], event_size: usize) -> Vec<f64> {
        let eps = 1e-6;
        let logit = |p: f64| {
            let p = p.clamp(eps, 1.0 - eps);
            (p / (1.0 - p)).ln()
        };
        match self {
            Self::Real => values.to_vec(),
            Self::UnitInterval => values.iter().map(|&p| logit(p)).collect(),
            Self::Simplex => {
                let k = event_size;
                let mut out = Vec::with_capacity(values.len() / k.max(1) * k.saturating_sub(1));
                for w in values.chunks(k) {
                    let total: f64 = w.iter().map(|x| x.max(eps)).sum();
                    let mut remaining = 1.0;
                    for (i, &wi) in w.iter().take(k - 1).enumerate() {
                        let wi = wi.max(eps) / total;
                        let z = wi / remaining;
                        out.push(logit(z) + ((k - 1 - i) as f64).ln());
                        remaining = (remaining - wi).max(eps);
                    }
                }
                out
            }
        }
    }
}

/// Stick-breaking map ℝ^(K-1) → simplex.
///
/// ```text
/// z_i = σ(u_i - ln(K-1-i))
/// w_i = z_i ∏_{j<i} (1 - z_j),   w_{K-1} = ∏_j (1 - z_j)
/// log|det J| = Σ_i [ln z_i + ln(1 - z_i) + ln ∏_{j<i} (1 - z_j)]
/// ```
fn stick_breaking(u: &Tensor, constrained_shape: &[usize]) -> Result<(Tensor, Tensor)> {
    let num_samples = constrained_shape[0];
    let last = constrained_shape.len() - 1;
    let k = constrained_shape[last];

    if k <= 1 {
        let w = Tensor::ones(constrained_shape.to_vec(), u.dtype(), u.device())?;
        let ladj = Tensor::zeros(num_samples, u.dtype(), u.device())?;
        return Ok((w, ladj));
    }

    let mut stick_shape = constrained_shape.to_vec();
    stick_shape[last] = 1;

    let mut log_rem = Tensor::zeros(stick_shape, u.dtype(), u.device())?;
    let mut ladj = log_rem.zeros_like()?;
    let mut pieces = Vec::with_capacity(k);

    for i in 0..(k - 1) {
        let offset = ((k - 1 - i) as f64).ln();
        let v = (u.narrow(last, i, 1)? - offset)?;
        let tail = log1p_exp_neg_abs(&v)?;
        let log_z = log_sigmoid(&v)?;
        let log_1mz = (v.relu()? + &tail)?.neg()?;

        pieces.push((&log_z + &log_rem)?.exp()?);
        ladj = (((ladj + &log_rem)? + &log_z)? + &log_1mz)?;
        log_rem = (log_rem + log_1mz)?;
    }
    pieces.push(log_rem.exp()?);

    let w = Tensor::cat(&pieces, last)?;
    Ok((w, sum_non_sample(&ladj)?))
}
