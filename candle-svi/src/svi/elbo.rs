use candle_core::{Result, Tensor};
use rand::rngs::StdRng;

use super::enumerate::check_discrete_sites;
use super::guide::DiagonalNormalGuide;
use super::traits::GenerativeModel;

/// Sum every dimension except the leading sample dimension.
///
/// # Returns
/// Tensor of shape (S,)
pub fn sum_non_sample(x: &Tensor) -> Result<Tensor> {
    if x.rank() <= 1 {
        Ok(x.clone())
    } else {
        x.flatten_from(1)?.sum(1)
    }
}

/// Monte-Carlo negative ELBO with reparameterized gradients.
///
/// ```text
/// ELBO = E_q[ log p(y | z) + log p(z) + log|det J(u)| - log q(u) ],  z = T(u)
/// ```
///
/// Averaged over `num_particles` draws from the guide. Backpropagating
/// through the returned scalar reaches the guide's `loc` and `ln_scale`.
pub fn trace_elbo_loss<M>(
    model: &M,
    guide: &DiagonalNormalGuide,
    args: &M::Args,
    num_particles: usize,
    rng: &mut StdRng,
) -> Result<Tensor>
where
    M: GenerativeModel,
{
    if num_particles == 0 {
        candle_core::bail!("num_particles must be at least 1");
    }
    check_discrete_sites(&model.discrete_sites(args)?)?;

    let sample = guide.sample(num_particles, rng)?;

    let llik = model.log_likelihood(&sample.latents, args)?;
    let log_prior = model.log_prior(&sample.latents, args)?;

    let elbo = (((llik + log_prior)? + &sample.log_abs_det_jacobian)? - &sample.log_q)?;

    elbo.mean(0)?.neg()
}

/// Loss estimate without taking a step (`SVI.loss` in other frameworks).
pub fn elbo_estimate<M>(
    model: &M,
    guide: &DiagonalNormalGuide,
    args: &M::Args,
    num_particles: usize,
    rng: &mut StdRng,
) -> Result<f32>
where
    M: GenerativeModel,
{
    trace_elbo_loss(model, guide, args, num_particles, rng)?
        .detach()
        .to_scalar::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svi::priors::Prior;
    use crate::svi::traits::{LatentSample, LatentSite};
    use candle_core::Device;
    use rand::SeedableRng;

    /// y ~ N(mu, 1) with mu ~ N(0, 1)
    struct GaussianMean {
        y: Tensor,
    }

    impl GenerativeModel for GaussianMean {
        type Args = ();

        fn name(&self) -> &'static str {
            "gaussian_mean"
        }

        fn device(&self, _args: &()) -> Device {
            Device::Cpu
        }

        fn latent_sites(&self, _args: &()) -> Result<Vec<LatentSite>> {
            Ok(vec![LatentSite::new("mu", Prior::normal(0.0, 1.0))])
        }

        fn observed<'a>(&self, _args: &'a ()) -> Option<&'a Tensor> {
            None
        }

        fn log_likelihood(&self, latents: &LatentSample, _args: &()) -> Result<Tensor> {
            let mu = latents.get("mu")?.unsqueeze(1)?;
            let resid = self.y.unsqueeze(0)?.broadcast_sub(&mu)?;
            sum_non_sample(&((resid.sqr()? + 1.837_877_066_409_345_5)? * (-0.5))?)
        }

        fn sample_observations(
            &self,
            latents: &LatentSample,
            _args: &(),
            _rng: &mut StdRng,
        ) -> Result<Tensor> {
            Ok(latents.get("mu")?.clone())
        }
    }

    #[test]
    fn test_sum_non_sample() -> Result<()> {
        let x = Tensor::ones((2, 3, 4), candle_core::DType::F32, &Device::Cpu)?;
        assert_eq!(sum_non_sample(&x)?.to_vec1::<f32>()?, vec![12.0, 12.0]);

        let x = Tensor::new(&[1f32, 2.0], &Device::Cpu)?;
        assert_eq!(sum_non_sample(&x)?.to_vec1::<f32>()?, vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_elbo_loss_is_finite_scalar() -> Result<()> {
        let model = GaussianMean {
            y: Tensor::new(&[0.5f32, 1.0, 1.5], &Device::Cpu)?,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let guide = DiagonalNormalGuide::new(&model, &(), &mut rng)?;

        let loss = trace_elbo_loss(&model, &guide, &(), 4, &mut rng)?;
        assert_eq!(loss.rank(), 0);
        assert!(loss.to_scalar::<f32>()?.is_finite());

        assert!(trace_elbo_loss(&model, &guide, &(), 0, &mut rng).is_err());
        Ok(())
    }

    #[test]
    fn test_elbo_estimate_is_seeded() -> Result<()> {
        let model = GaussianMean {
            y: Tensor::new(&[2f32, 3.0], &Device::Cpu)?,
        };
        let guide = DiagonalNormalGuide::new(&model, &(), &mut StdRng::seed_from_u64(4))?;

        let a = elbo_estimate(&model, &guide, &(), 1, &mut StdRng::seed_from_u64(8))?;
        let b = elbo_estimate(&model, &guide, &(), 1, &mut StdRng::seed_from_u64(8))?;
        assert_eq!(a, b);
        Ok(())
    }
}
