use candle_core::{Device, Result, Tensor};
use candle_svi::svi::likelihood::PoissonLikelihood;
use candle_svi::svi::{sum_non_sample, GenerativeModel, LatentSample, LatentSite, Plate, Prior};
use rand::rngs::StdRng;

use crate::model_args::ModelArgs;

/// Site-level Poisson rates without predictors.
///
/// ```text
/// epsilon[n]     ~ Normal(-5, 15)
/// accidents[n,d] ~ Poisson(exp(epsilon[n]))
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseModel;

impl GenerativeModel for BaseModel {
    type Args = ModelArgs;

    fn name(&self) -> &'static str {
        "base"
    }

    fn device(&self, args: &ModelArgs) -> Device {
        args.device.clone()
    }

    fn latent_sites(&self, args: &ModelArgs) -> Result<Vec<LatentSite>> {
        Ok(vec![LatentSite::new("epsilon", Prior::normal(-5.0, 15.0))
            .in_plate(Plate::new("sites", args.num_sites, -2))])
    }

    fn observed<'a>(&self, args: &'a ModelArgs) -> Option<&'a Tensor> {
        args.data.as_ref()
    }

    fn log_likelihood(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        // (S, N, 1) against (N, D)
        let epsilon = latents.get("epsilon")?;
        let likelihood = PoissonLikelihood::new(args.observed_data()?.clone())?;
        sum_non_sample(&likelihood.log_prob(epsilon)?)
    }

    fn sample_observations(
        &self,
        latents: &LatentSample,
        args: &ModelArgs,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let epsilon = latents.get("epsilon")?;
        let s = epsilon.dim(0)?;
        let rate = epsilon
            .exp()?
            .broadcast_as((s, args.num_sites, args.num_days))?
            .contiguous()?;
        PoissonLikelihood::sample(&rate, rng)
    }
}
