//! Count-regression models over per-site, per-day accident counts.
//!
//! Every model implements `GenerativeModel` with `ModelArgs`. Latent
//! values carry a leading Monte-Carlo sample axis `S`, so a log-rate has
//! shape (S, num_sites, num_days).

mod base;
mod log_linear;
mod mixture;
mod negbinom;

pub use base::BaseModel;
pub use log_linear::LogLinearModel;
pub use mixture::LogLinearMixtureModel;
pub use negbinom::NegBinomialLogLinearModel;

use candle_core::{Device, Result, Tensor};
use candle_svi::svi::{DiscreteSite, GenerativeModel, LatentSample, LatentSite};
use rand::rngs::StdRng;

use crate::model_args::ModelArgs;

/// `predictors @ betas` for every sample.
///
/// * `predictors` - (N, D, P)
/// * `betas` - (S, P)
///
/// Returns (S, N, D)
pub(crate) fn linear_log_rate(predictors: &Tensor, betas: &Tensor) -> Result<Tensor> {
    let (n, d, p) = predictors.dims3()?;
    let s = betas.dim(0)?;
    let x = predictors.reshape((n * d, p))?.unsqueeze(0)?;
    let b = betas.reshape((s, p, 1))?;
    x.broadcast_matmul(&b)?.reshape((s, n, d))
}

/// `predictors @ betas.T` for every sample and cluster.
///
/// * `predictors` - (N, D, P)
/// * `betas` - (S, K, P)
///
/// Returns (S, N, D, K)
pub(crate) fn cluster_log_rate(predictors: &Tensor, betas: &Tensor) -> Result<Tensor> {
    let (n, d, p) = predictors.dims3()?;
    let (s, k, _) = betas.dims3()?;
    let x = predictors.reshape((n * d, p))?.unsqueeze(0)?;
    let b = betas.transpose(1, 2)?.contiguous()?;
    x.broadcast_matmul(&b)?.reshape((s, n, d, k))
}

/// Model selection at training time.
pub enum ModelKind {
    Base(BaseModel),
    LogLinear(LogLinearModel),
    Mixture(LogLinearMixtureModel),
    NegBinomial(NegBinomialLogLinearModel),
}

impl std::str::FromStr for ModelKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "base" => Ok(Self::Base(BaseModel)),
            "log-linear" | "log_linear" | "loglinear" => Ok(Self::LogLinear(LogLinearModel)),
            "mixture" | "log-linear-mm" | "log_linear_mm" | "mm" => {
                Ok(Self::Mixture(LogLinearMixtureModel))
            }
            "negbinom" | "negative-binomial" | "negative_binomial" | "nb" => {
                Ok(Self::NegBinomial(NegBinomialLogLinearModel))
            }
            _ => anyhow::bail!("Unknown model type: {}", s),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $m:ident => $e:expr) => {
        match $self {
            ModelKind::Base($m) => $e,
            ModelKind::LogLinear($m) => $e,
            ModelKind::Mixture($m) => $e,
            ModelKind::NegBinomial($m) => $e,
        }
    };
}

impl GenerativeModel for ModelKind {
    type Args = ModelArgs;

    fn name(&self) -> &'static str {
        delegate!(self, m => m.name())
    }

    fn device(&self, args: &ModelArgs) -> Device {
        delegate!(self, m => m.device(args))
    }

    fn latent_sites(&self, args: &ModelArgs) -> Result<Vec<LatentSite>> {
        delegate!(self, m => m.latent_sites(args))
    }

    fn discrete_sites(&self, args: &ModelArgs) -> Result<Vec<DiscreteSite>> {
        delegate!(self, m => m.discrete_sites(args))
    }

    fn observed<'a>(&self, args: &'a ModelArgs) -> Option<&'a Tensor> {
        delegate!(self, m => m.observed(args))
    }

    fn log_likelihood(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        delegate!(self, m => m.log_likelihood(latents, args))
    }

    fn sample_observations(
        &self,
        latents: &LatentSample,
        args: &ModelArgs,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        delegate!(self, m => m.sample_observations(latents, args, rng))
    }
}
