use std::collections::HashMap;

use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;

use super::elbo::sum_non_sample;
use super::priors::Prior;

/// Conditional-independence annotation over one batch axis.
///
/// `dim` counts from the right (`-1` is the rightmost batch axis), so a
/// site inside `Plate::new("sites", n, -2)` gets shape `(n, 1)` and
/// broadcasts against `(sites, days)` tensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plate {
    pub name: &'static str,
    pub size: usize,
    pub dim: isize,
}

impl Plate {
    pub fn new(name: &'static str, size: usize, dim: isize) -> Self {
        Self { name, size, dim }
    }
}

/// A continuous latent random variable declared by a model.
#[derive(Debug, Clone)]
pub struct LatentSite {
    pub name: &'static str,
    pub prior: Prior,
    pub plates: Vec<Plate>,
    /// Batch shape declared by the prior itself (e.g. a vector of `P`
    /// independent coefficients without a plate).
    pub prior_batch_shape: Vec<usize>,
}

impl LatentSite {
    pub fn new(name: &'static str, prior: Prior) -> Self {
        Self {
            name,
            prior,
            plates: vec![],
            prior_batch_shape: vec![],
        }
    }

    pub fn with_batch_shape(mut self, shape: &[usize]) -> Self {
        self.prior_batch_shape = shape.to_vec();
        self
    }

    pub fn in_plate(mut self, plate: Plate) -> Self {
        self.plates.push(plate);
        self
    }

    /// Batch shape after placing every plate at its dimension.
    pub fn batch_shape(&self) -> Result<Vec<usize>> {
        let plate_rank = self
            .plates
            .iter()
            .map(|p| p.dim.unsigned_abs())
            .max()
            .unwrap_or(0);
        let rank = plate_rank.max(self.prior_batch_shape.len());

        let mut shape = vec![1; rank];
        let offset = rank - self.prior_batch_shape.len();
        shape[offset..].copy_from_slice(&self.prior_batch_shape);

        for plate in &self.plates {
            if plate.dim >= 0 {
                candle_core::bail!(
                    "plate '{}' of site '{}' must use a negative dim, got {}",
                    plate.name,
                    self.name,
                    plate.dim
                );
            }
            let idx = rank - plate.dim.unsigned_abs();
            if shape[idx] != 1 && shape[idx] != plate.size {
                candle_core::bail!(
                    "plate '{}' (size {}) conflicts with size {} of site '{}' at dim {}",
                    plate.name,
                    plate.size,
                    shape[idx],
                    self.name,
                    plate.dim
                );
            }
            shape[idx] = plate.size;
        }
        Ok(shape)
    }

    /// Full constrained shape: batch shape followed by the event shape.
    pub fn shape(&self) -> Result<Vec<usize>> {
        let mut shape = self.batch_shape()?;
        shape.extend(self.prior.event_shape());
        Ok(shape)
    }

    /// Shape of the site in unconstrained space.
    pub fn unconstrained_shape(&self) -> Result<Vec<usize>> {
        let mut shape = self.batch_shape()?;
        shape.extend(
            self.prior
                .support()
                .unconstrained_event_shape(&self.prior.event_shape()),
        );
        Ok(shape)
    }
}

/// How a discrete latent is handled during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscreteStrategy {
    /// Sum the variable out exactly over its finite support.
    Enumerate,
}

/// A discrete latent random variable, kept out of the Gaussian guide.
#[derive(Debug, Clone)]
pub struct DiscreteSite {
    pub name: &'static str,
    pub support_size: usize,
    pub plates: Vec<Plate>,
    pub strategy: DiscreteStrategy,
}

impl DiscreteSite {
    pub fn enumerated(name: &'static str, support_size: usize) -> Self {
        Self {
            name,
            support_size,
            plates: vec![],
            strategy: DiscreteStrategy::Enumerate,
        }
    }

    pub fn in_plate(mut self, plate: Plate) -> Self {
        self.plates.push(plate);
        self
    }
}

/// Constrained latent values, each with a leading sample dimension `S`.
#[derive(Debug, Clone)]
pub struct LatentSample {
    values: HashMap<&'static str, Tensor>,
    num_samples: usize,
}

impl LatentSample {
    pub fn new(num_samples: usize) -> Self {
        Self {
            values: HashMap::new(),
            num_samples,
        }
    }

    /// Draw every site from its prior.
    pub fn from_prior(
        sites: &[LatentSite],
        num_samples: usize,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let mut latents = Self::new(num_samples);
        for site in sites {
            let mut shape = vec![num_samples];
            shape.extend(site.shape()?);
            let value = site.prior.sample(&shape, device, rng)?;
            latents.insert(site.name, value);
        }
        Ok(latents)
    }

    pub fn insert(&mut self, name: &'static str, value: Tensor) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Result<&Tensor> {
        match self.values.get(name) {
            Some(value) => Ok(value),
            None => candle_core::bail!("latent site '{}' was not sampled", name),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn names(&self) -> impl Iterator<Item = &&'static str> {
        self.values.keys()
    }
}

/// A generative model with a fixed calling convention.
///
/// The same model serves training (observations supplied through `Args`,
/// scored by `log_likelihood`) and simulation (`forward` without
/// observations draws fresh outcomes).
pub trait GenerativeModel: Sync {
    type Args: Sync;

    fn name(&self) -> &'static str;

    fn device(&self, args: &Self::Args) -> Device;

    /// Continuous latent sites, in a fixed order.
    fn latent_sites(&self, args: &Self::Args) -> Result<Vec<LatentSite>>;

    /// Discrete sites the likelihood sums out.
    fn discrete_sites(&self, _args: &Self::Args) -> Result<Vec<DiscreteSite>> {
        Ok(vec![])
    }

    /// Observed outcome, if the model is conditioned on data.
    fn observed<'a>(&self, args: &'a Self::Args) -> Option<&'a Tensor>;

    /// Evaluate log p(y | latents) with discrete sites marginalized.
    ///
    /// # Returns
    /// Log-likelihood per sample, shape (S,)
    fn log_likelihood(&self, latents: &LatentSample, args: &Self::Args) -> Result<Tensor>;

    /// Draw outcomes given latents, shape (S, ...outcome shape)
    fn sample_observations(
        &self,
        latents: &LatentSample,
        args: &Self::Args,
        rng: &mut StdRng,
    ) -> Result<Tensor>;

    /// Evaluate log p(latents) under the declared priors.
    ///
    /// # Returns
    /// Log prior per sample, shape (S,)
    fn log_prior(&self, latents: &LatentSample, args: &Self::Args) -> Result<Tensor> {
        let mut total = Tensor::zeros(
            latents.num_samples(),
            candle_core::DType::F32,
            &self.device(args),
        )?;
        for site in self.latent_sites(args)? {
            let log_prob = site.prior.log_prob(latents.get(site.name)?)?;
            total = (total + sum_non_sample(&log_prob)?)?;
        }
        Ok(total)
    }

    /// Run the model once.
    ///
    /// Returns the observed data untouched when the model is conditioned,
    /// otherwise draws latents from their priors and then outcomes.
    fn forward(&self, args: &Self::Args, rng: &mut StdRng) -> Result<Tensor> {
        if let Some(observed) = self.observed(args) {
            return Ok(observed.clone());
        }
        let sites = self.latent_sites(args)?;
        let latents = LatentSample::from_prior(&sites, 1, &self.device(args), rng)?;
        self.sample_observations(&latents, args, rng)?.squeeze(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_shapes() -> Result<()> {
        let site = LatentSite::new("epsilon", Prior::normal(0.0, 1.0))
            .in_plate(Plate::new("sites", 4, -2));
        assert_eq!(site.shape()?, vec![4, 1]);

        let site = LatentSite::new("betas", Prior::normal(0.0, 1.0))
            .in_plate(Plate::new("components", 3, -1))
            .in_plate(Plate::new("clusters", 2, -2));
        assert_eq!(site.shape()?, vec![2, 3]);

        let site = LatentSite::new("betas", Prior::normal(0.0, 1.0)).with_batch_shape(&[5]);
        assert_eq!(site.shape()?, vec![5]);

        let site = LatentSite::new("weights", Prior::symmetric_dirichlet(3, 1.0));
        assert_eq!(site.shape()?, vec![3]);
        assert_eq!(site.unconstrained_shape()?, vec![2]);

        Ok(())
    }

    #[test]
    fn test_conflicting_plates() {
        let site = LatentSite::new("betas", Prior::normal(0.0, 1.0))
            .with_batch_shape(&[5])
            .in_plate(Plate::new("components", 3, -1));
        assert!(site.shape().is_err());

        let site = LatentSite::new("betas", Prior::normal(0.0, 1.0))
            .in_plate(Plate::new("components", 3, 0));
        assert!(site.shape().is_err());
    }

    #[test]
    fn test_missing_latent() {
        let latents = LatentSample::new(1);
        assert!(latents.get("epsilon").is_err());
    }
}
