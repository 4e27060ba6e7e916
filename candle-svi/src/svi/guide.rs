use candle_core::{DType, Device, Result, Tensor};
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::param_store::ParamStore;
use super::traits::{GenerativeModel, LatentSample, LatentSite};
use super::transforms::Support;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Layout of one latent site inside the flat unconstrained vector.
#[derive(Debug, Clone)]
pub struct GuideSite {
    pub name: &'static str,
    pub support: Support,
    /// Constrained shape without the sample dimension
    pub shape: Vec<usize>,
    /// Unconstrained shape without the sample dimension
    pub unconstrained_shape: Vec<usize>,
    pub offset: usize,
    pub numel: usize,
}

/// Sample drawn from the guide with everything the ELBO needs.
pub struct GuideSample {
    /// Constrained latent values, shape (S, ...site shape) each
    pub latents: LatentSample,
    /// log q(u) of the unconstrained draw, shape (S,)
    pub log_q: Tensor,
    /// Σ log|det J| of the constraining bijections, shape (S,)
    pub log_abs_det_jacobian: Tensor,
}

/// Diagonal Gaussian guide q(u) = N(loc, diag(scale²)) over the
/// concatenated unconstrained coordinates of all latent sites.
///
/// Parameters are stored as `loc` and `ln_scale` in the guide's own
/// `ParamStore`. `loc` starts at the unconstrained image of the
/// element-wise median of a few prior draws; `scale` starts at 0.1.
pub struct DiagonalNormalGuide {
    sites: Vec<GuideSite>,
    store: ParamStore,
    /// Variational mean: shape (D,)
    loc: Tensor,
    /// Log standard deviation: shape (D,)
    ln_scale: Tensor,
    dim: usize,
}

impl DiagonalNormalGuide {
    pub const INIT_SCALE: f64 = 0.1;
    pub const NUM_MEDIAN_DRAWS: usize = 15;

    /// Build the guide for `model`, drawing initial locations from `rng`.
    pub fn new<M: GenerativeModel>(model: &M, args: &M::Args, rng: &mut StdRng) -> Result<Self> {
        let device = model.device(args);
        let latent_sites = model.latent_sites(args)?;

        let mut sites = Vec::with_capacity(latent_sites.len());
        let mut init_loc = vec![];
        let mut offset = 0;

        for site in &latent_sites {
            let unconstrained = median_init(site, rng)?;
            let unconstrained_shape = site.unconstrained_shape()?;
            let numel = unconstrained.len();
            sites.push(GuideSite {
                name: site.name,
                support: site.prior.support(),
                shape: site.shape()?,
                unconstrained_shape,
                offset,
                numel,
            });
            offset += numel;
            init_loc.extend(unconstrained.into_iter().map(|x| x as f32));
        }

        if offset == 0 {
            candle_core::bail!("model '{}' declares no continuous latent sites", model.name());
        }

        debug!(
            "guide for '{}': {} sites, {} unconstrained coordinates",
            model.name(),
            sites.len(),
            offset
        );

        Self::from_init(sites, init_loc, &device)
    }

    fn from_init(sites: Vec<GuideSite>, init_loc: Vec<f32>, device: &Device) -> Result<Self> {
        let dim = init_loc.len();
        let mut store = ParamStore::new(DType::F32, device);

        let loc = store.param("loc", &Tensor::from_vec(init_loc, dim, device)?)?;
        let ln_scale = store.param(
            "ln_scale",
            &Tensor::full(Self::INIT_SCALE.ln() as f32, dim, device)?,
        )?;

        Ok(Self {
            sites,
            store,
            loc,
            ln_scale,
            dim,
        })
    }

    /// Number of unconstrained coordinates D.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn sites(&self) -> &[GuideSite] {
        &self.sites
    }

    pub fn site_names(&self) -> Vec<&'static str> {
        self.sites.iter().map(|s| s.name).collect()
    }

    pub fn param_store(&self) -> &ParamStore {
        &self.store
    }

    /// Get the variational mean.
    pub fn loc(&self) -> &Tensor {
        &self.loc
    }

    /// Get the variational standard deviation σ = exp(ln_scale).
    pub fn scale(&self) -> Result<Tensor> {
        self.ln_scale.exp()
    }

    pub fn device(&self) -> &Device {
        self.loc.device()
    }

    /// Draw `num_samples` reparameterized samples: u = loc + scale * ε.
    pub fn sample(&self, num_samples: usize, rng: &mut StdRng) -> Result<GuideSample> {
        let eps: Vec<f32> = (0..num_samples * self.dim)
            .map(|_| rng.sample::<f64, _>(StandardNormal) as f32)
            .collect();
        let eps = Tensor::from_vec(eps, (num_samples, self.dim), self.device())?;

        let scale = self.scale()?;
        let u = eps.broadcast_mul(&scale)?.broadcast_add(&self.loc)?;

        // log N(u; loc, scale²) summed over D
        let z_sq = u.broadcast_sub(&self.loc)?.broadcast_div(&scale)?.sqr()?;
        let log_q = ((z_sq + LN_2PI)?.broadcast_add(&(&self.ln_scale * 2.0)?)? * (-0.5))?.sum(1)?;

        let (latents, log_abs_det_jacobian) = self.constrain(&u)?;

        Ok(GuideSample {
            latents,
            log_q,
            log_abs_det_jacobian,
        })
    }

    /// Constrained latent values at the guide's location, S = 1.
    pub fn posterior_median(&self) -> Result<LatentSample> {
        let (latents, _) = self.constrain(&self.loc.unsqueeze(0)?)?;
        Ok(latents)
    }

    /// Split flat unconstrained draws (S, D) into constrained sites.
    fn constrain(&self, u: &Tensor) -> Result<(LatentSample, Tensor)> {
        let num_samples = u.dim(0)?;
        let mut latents = LatentSample::new(num_samples);
        let mut ladj_total = Tensor::zeros(num_samples, u.dtype(), u.device())?;

        for site in &self.sites {
            let mut shape = vec![num_samples];
            shape.extend(site.shape.iter().copied());

            let (value, ladj) = if site.numel == 0 {
                // degenerate simplex (single category)
                site.support.forward(u, &shape)?
            } else {
                let mut u_shape = vec![num_samples];
                u_shape.extend(site.unconstrained_shape.iter().copied());
                let u_site = u.narrow(1, site.offset, site.numel)?.reshape(u_shape)?;
                site.support.forward(&u_site, &shape)?
            };

            ladj_total = (ladj_total + ladj)?;
            latents.insert(site.name, value);
        }
        Ok((latents, ladj_total))
    }
}

/// Unconstrained image of the element-wise median of prior draws.
fn median_init(site: &LatentSite, rng: &mut StdRng) -> Result<Vec<f64>> {
    let shape = site.shape()?;
    let numel: usize = shape.iter().product();
    let event_size: usize = site.prior.event_shape().iter().product();
    let num_events = numel / event_size.max(1);
    let draws = DiagonalNormalGuide::NUM_MEDIAN_DRAWS;

    let samples = site.prior.sample_values(num_events * draws, rng)?;

    let mut median = Vec::with_capacity(numel);
    let mut column = Vec::with_capacity(draws);
    for j in 0..numel {
        column.clear();
        column.extend((0..draws).map(|i| samples[i * numel + j]));
        column.sort_by(|a, b| a.total_cmp(b));
        median.push(column[(draws - 1) / 2]);
    }

    Ok(site.prior.support().inverse_values(&median, event_size.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svi::elbo::sum_non_sample;
    use crate::svi::priors::Prior;
    use crate::svi::traits::Plate;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    /// Toy model: one real site, one simplex site, one unit-interval site
    struct ToyModel;

    impl GenerativeModel for ToyModel {
        type Args = usize;

        fn name(&self) -> &'static str {
            "toy"
        }

        fn device(&self, _args: &usize) -> Device {
            Device::Cpu
        }

        fn latent_sites(&self, n: &usize) -> Result<Vec<LatentSite>> {
            Ok(vec![
                LatentSite::new("mu", Prior::normal(0.0, 1.0)).in_plate(Plate::new("rows", *n, -1)),
                LatentSite::new("weights", Prior::symmetric_dirichlet(3, 1.0)),
                LatentSite::new("p", Prior::beta(1.0, 1.0)),
            ])
        }

        fn observed<'a>(&self, _args: &'a usize) -> Option<&'a Tensor> {
            None
        }

        fn log_likelihood(&self, latents: &LatentSample, _args: &usize) -> Result<Tensor> {
            sum_non_sample(&latents.get("mu")?.sqr()?.neg()?)
        }

        fn sample_observations(
            &self,
            latents: &LatentSample,
            _args: &usize,
            _rng: &mut StdRng,
        ) -> Result<Tensor> {
            Ok(latents.get("mu")?.clone())
        }
    }

    #[test]
    fn test_guide_layout() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let guide = DiagonalNormalGuide::new(&ToyModel, &4, &mut rng)?;

        // 4 (mu) + 2 (simplex of 3) + 1 (p)
        assert_eq!(guide.dim(), 7);
        assert_eq!(guide.site_names(), vec!["mu", "weights", "p"]);
        assert_eq!(guide.param_store().len(), 2);

        for s in guide.scale()?.to_vec1::<f32>()? {
            assert_abs_diff_eq!(s, 0.1, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_same_seed_same_guide() -> Result<()> {
        let a = DiagonalNormalGuide::new(&ToyModel, &4, &mut StdRng::seed_from_u64(9))?;
        let b = DiagonalNormalGuide::new(&ToyModel, &4, &mut StdRng::seed_from_u64(9))?;
        let c = DiagonalNormalGuide::new(&ToyModel, &4, &mut StdRng::seed_from_u64(10))?;

        assert_eq!(a.loc().to_vec1::<f32>()?, b.loc().to_vec1::<f32>()?);
        assert_ne!(a.loc().to_vec1::<f32>()?, c.loc().to_vec1::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_sample_shapes() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(2);
        let guide = DiagonalNormalGuide::new(&ToyModel, &4, &mut rng)?;
        let sample = guide.sample(5, &mut rng)?;

        assert_eq!(sample.latents.get("mu")?.dims(), &[5, 4]);
        assert_eq!(sample.latents.get("weights")?.dims(), &[5, 3]);
        assert_eq!(sample.latents.get("p")?.dims(), &[5]);
        assert_eq!(sample.log_q.dims(), &[5]);
        assert_eq!(sample.log_abs_det_jacobian.dims(), &[5]);

        for row in sample.latents.get("weights")?.to_vec2::<f32>()? {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }

        let median = guide.posterior_median()?;
        assert_eq!(median.get("mu")?.dims(), &[1, 4]);
        Ok(())
    }
}
