use candle_core::{DType, Device, Result, Tensor};
use candle_svi::svi::likelihood::PoissonLikelihood;
use candle_svi::svi::{
    enumerate_out, DiscreteSite, GenerativeModel, LatentSample, LatentSite, Plate, Prior,
};
use rand::rngs::StdRng;
use rand_distr::{weighted::WeightedIndex, Distribution};

use super::cluster_log_rate;
use crate::model_args::ModelArgs;

/// Mixture of K Poisson log-linear regressions with a per-site cluster.
///
/// ```text
/// weights           ~ Dirichlet(1_K)
/// betas[k,p]        ~ Normal(0, 2)
/// epsilon[n]        ~ Normal(0, 5)
/// assignments[n]    ~ Categorical(weights)
/// accidents[n,:]    ~ Π_d Poisson(exp(x[n,d,:] · betas[a_n] + epsilon[n]))
/// ```
///
/// The assignment is enumerated out during training:
/// `log p(y_n) = logsumexp_k(log w_k + Σ_d log Poisson(y_nd | θ_ndk))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLinearMixtureModel;

impl LogLinearMixtureModel {
    /// Per-site cluster assignment, enumerated over K clusters.
    pub fn assignment_site(&self, args: &ModelArgs) -> Result<DiscreteSite> {
        Ok(DiscreteSite::enumerated("assignments", args.num_clusters()?)
            .in_plate(Plate::new("sites", args.num_sites, -1)))
    }

    /// Per-cluster log-rate: (S, N, D, K)
    pub fn log_theta(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        let betas = latents.get("betas")?;
        let epsilon = latents.get("epsilon")?;
        let (s, n) = epsilon.dims2()?;
        let epsilon = epsilon.reshape((s, n, 1, 1))?;
        cluster_log_rate(args.predictors()?, betas)?.broadcast_add(&epsilon)
    }

    /// Joint log-probability of each site's counts and each cluster.
    ///
    /// # Returns
    /// `log w_k + Σ_d log Poisson(y_nd | θ_ndk)`, shape (S, N, K)
    pub fn cluster_log_joint(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        let likelihood = PoissonLikelihood::new(args.observed_data()?.clone())?.unsqueeze(2)?;

        // (S, N, D, K) -> (S, N, K), days form one event
        let per_cluster = likelihood.log_prob(&self.log_theta(latents, args)?)?.sum(2)?;

        let log_w = latents
            .get("weights")?
            .clamp(f32::MIN_POSITIVE, 1.0)?
            .log()?
            .unsqueeze(1)?;

        per_cluster.broadcast_add(&log_w)
    }
}

impl GenerativeModel for LogLinearMixtureModel {
    type Args = ModelArgs;

    fn name(&self) -> &'static str {
        "log_linear_mixture"
    }

    fn device(&self, args: &ModelArgs) -> Device {
        args.device.clone()
    }

    fn latent_sites(&self, args: &ModelArgs) -> Result<Vec<LatentSite>> {
        let k = args.num_clusters()?;
        Ok(vec![
            LatentSite::new("weights", Prior::symmetric_dirichlet(k, 1.0)),
            LatentSite::new("betas", Prior::normal(0.0, 2.0))
                .in_plate(Plate::new("beta_components", args.num_predictors, -1))
                .in_plate(Plate::new("beta_clusters", k, -2)),
            LatentSite::new("epsilon", Prior::normal(0.0, 5.0))
                .in_plate(Plate::new("epsilons", args.num_sites, -1)),
        ])
    }

    fn discrete_sites(&self, args: &ModelArgs) -> Result<Vec<DiscreteSite>> {
        Ok(vec![self.assignment_site(args)?])
    }

    fn observed<'a>(&self, args: &'a ModelArgs) -> Option<&'a Tensor> {
        args.data.as_ref()
    }

    fn log_likelihood(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        let joint = self.cluster_log_joint(latents, args)?;
        enumerate_out(&self.assignment_site(args)?, &joint, 2)?.sum(1)
    }

    fn sample_observations(
        &self,
        latents: &LatentSample,
        args: &ModelArgs,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let theta = self.log_theta(latents, args)?.exp()?;
        let (s, n, d, _) = theta.dims4()?;

        let weights = latents.get("weights")?.to_dtype(DType::F64)?.to_vec2::<f64>()?;

        let mut assignments = Vec::with_capacity(s * n);
        for w in &weights {
            let categorical = WeightedIndex::new(w)
                .map_err(|e| candle_core::Error::Msg(format!("cluster weights: {}", e)))?;
            assignments.extend((0..n).map(|_| categorical.sample(rng) as u32));
        }

        // theta[s, n, d, assignment[s, n]]
        let index = Tensor::from_vec(assignments, (s, n, 1, 1), theta.device())?
            .broadcast_as((s, n, d, 1))?
            .contiguous()?;
        let rate = theta.gather(&index, 3)?.squeeze(3)?;

        PoissonLikelihood::sample(&rate, rng)
    }
}
