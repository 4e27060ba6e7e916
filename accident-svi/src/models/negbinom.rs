use candle_core::{Device, Result, Tensor};
use candle_svi::svi::likelihood::NegativeBinomialLikelihood;
use candle_svi::svi::{sum_non_sample, GenerativeModel, LatentSample, LatentSite, Plate, Prior};
use rand::rngs::StdRng;

use super::linear_log_rate;
use crate::model_args::ModelArgs;

/// Overdispersed log-linear regression.
///
/// ```text
/// betas[p]       ~ Normal(0, 10)
/// epsilon[n]     ~ Normal(0, 5)
/// p[n]           ~ Beta(1, 1)
/// theta[n,d]     = exp(x[n,d,:] · betas + epsilon[n])
/// accidents[n,d] ~ NegativeBinomial(r = (1 - p[n]) / p[n] * theta[n,d], p[n])
/// ```
///
/// The mean of each count is `theta`; `p` only sets the dispersion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegBinomialLogLinearModel;

impl NegBinomialLogLinearModel {
    /// Total count `r` (S, N, D) and success probability `p` (S, N, 1).
    pub fn total_count_and_probs(
        &self,
        latents: &LatentSample,
        args: &ModelArgs,
    ) -> Result<(Tensor, Tensor)> {
        let betas = latents.get("betas")?;
        let epsilon = latents.get("epsilon")?.unsqueeze(2)?;
        let p = latents.get("p")?.unsqueeze(2)?;

        let theta = linear_log_rate(args.predictors()?, betas)?
            .broadcast_add(&epsilon)?
            .exp()?;

        let odds = (p.affine(-1.0, 1.0)? / &p)?;
        let r = theta.broadcast_mul(&odds)?;
        Ok((r, p))
    }
}

impl GenerativeModel for NegBinomialLogLinearModel {
    type Args = ModelArgs;

    fn name(&self) -> &'static str {
        "negative_binomial_log_linear"
    }

    fn device(&self, args: &ModelArgs) -> Device {
        args.device.clone()
    }

    fn latent_sites(&self, args: &ModelArgs) -> Result<Vec<LatentSite>> {
        let sites_params = Plate::new("sites_params", args.num_sites, -1);
        Ok(vec![
            LatentSite::new("betas", Prior::normal(0.0, 10.0))
                .in_plate(Plate::new("betas_plates", args.num_predictors, -1)),
            LatentSite::new("epsilon", Prior::normal(0.0, 5.0)).in_plate(sites_params.clone()),
            LatentSite::new("p", Prior::beta(1.0, 1.0)).in_plate(sites_params),
        ])
    }

    fn observed<'a>(&self, args: &'a ModelArgs) -> Option<&'a Tensor> {
        args.data.as_ref()
    }

    fn log_likelihood(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        let (r, p) = self.total_count_and_probs(latents, args)?;
        let likelihood = NegativeBinomialLikelihood::new(args.observed_data()?.clone())?;
        sum_non_sample(&likelihood.log_prob(&r, &p)?)
    }

    fn sample_observations(
        &self,
        latents: &LatentSample,
        args: &ModelArgs,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let (r, p) = self.total_count_and_probs(latents, args)?;
        NegativeBinomialLikelihood::sample(&r, &p, rng)
    }
}
