use candle_core::{Device, Result, Tensor};
use candle_svi::svi::likelihood::PoissonLikelihood;
use candle_svi::svi::{sum_non_sample, GenerativeModel, LatentSample, LatentSite, Plate, Prior};
use rand::rngs::StdRng;

use super::linear_log_rate;
use crate::model_args::ModelArgs;

/// Poisson log-linear regression with a site random effect.
///
/// ```text
/// betas[p]       ~ Normal(0, 10)
/// epsilon[n]     ~ Normal(0, 5)
/// accidents[n,d] ~ Poisson(exp(x[n,d,:] · betas + epsilon[n]))
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLinearModel;

impl LogLinearModel {
    /// Log-rate for every sample: (S, N, D)
    pub fn log_rate(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        let betas = latents.get("betas")?;
        let epsilon = latents.get("epsilon")?;
        linear_log_rate(args.predictors()?, betas)?.broadcast_add(epsilon)
    }
}

impl GenerativeModel for LogLinearModel {
    type Args = ModelArgs;

    fn name(&self) -> &'static str {
        "log_linear"
    }

    fn device(&self, args: &ModelArgs) -> Device {
        args.device.clone()
    }

    fn latent_sites(&self, args: &ModelArgs) -> Result<Vec<LatentSite>> {
        Ok(vec![
            LatentSite::new("betas", Prior::normal(0.0, 10.0))
                .with_batch_shape(&[args.num_predictors]),
            LatentSite::new("epsilon", Prior::normal(0.0, 5.0))
                .in_plate(Plate::new("sites", args.num_sites, -2)),
        ])
    }

    fn observed<'a>(&self, args: &'a ModelArgs) -> Option<&'a Tensor> {
        args.data.as_ref()
    }

    fn log_likelihood(&self, latents: &LatentSample, args: &ModelArgs) -> Result<Tensor> {
        let likelihood = PoissonLikelihood::new(args.observed_data()?.clone())?;
        sum_non_sample(&likelihood.log_prob(&self.log_rate(latents, args)?)?)
    }

    fn sample_observations(
        &self,
        latents: &LatentSample,
        args: &ModelArgs,
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let rate = self.log_rate(latents, args)?.exp()?;
        PoissonLikelihood::sample(&rate, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn toy_args() -> Result<ModelArgs> {
        let dev = Device::Cpu;
        let x = Tensor::new(
            &[[[1f32, 0.0], [1.0, 1.0]], [[1.0, 0.5], [1.0, 2.0]]],
            &dev,
        )?;
        let y = Tensor::new(&[[2f32, 4.0], [1.0, 7.0]], &dev)?;
        ModelArgs::new(2, 2).with_predictors(x)?.with_data(y)
    }

    #[test]
    fn test_log_linear_shapes() -> Result<()> {
        let args = toy_args()?;
        let sites = LogLinearModel.latent_sites(&args)?;
        assert_eq!(sites[0].shape()?, vec![2]);
        assert_eq!(sites[1].shape()?, vec![2, 1]);

        let mut latents = LatentSample::new(3);
        latents.insert("betas", Tensor::zeros((3, 2), candle_core::DType::F32, &Device::Cpu)?);
        latents.insert("epsilon", Tensor::zeros((3, 2, 1), candle_core::DType::F32, &Device::Cpu)?);
        assert_eq!(LogLinearModel.log_rate(&latents, &args)?.dims(), &[3, 2, 2]);
        assert_eq!(LogLinearModel.log_likelihood(&latents, &args)?.dims(), &[3]);
        Ok(())
    }

    #[test]
    fn test_log_linear_likelihood_value() -> Result<()> {
        let args = toy_args()?;
        let dev = Device::Cpu;

        let mut latents = LatentSample::new(1);
        latents.insert("betas", Tensor::new(&[[0.5f32, 0.2]], &dev)?);
        latents.insert("epsilon", Tensor::new(&[[[0.1f32], [-0.3]]], &dev)?);
        let llik = LogLinearModel.log_likelihood(&latents, &args)?.to_vec1::<f32>()?[0];

        let x = [[[1.0, 0.0], [1.0, 1.0]], [[1.0, 0.5], [1.0, 2.0]]];
        let y = [[2.0, 4.0], [1.0, 7.0]];
        let eps = [0.1, -0.3];
        let lnfact = |k: f64| (1..=(k as u32)).map(|i| (i as f64).ln()).sum::<f64>();
        let mut expected = 0.0;
        for n in 0..2 {
            for d in 0..2 {
                let eta: f64 = 0.5 * x[n][d][0] + 0.2 * x[n][d][1] + eps[n];
                expected += y[n][d] * eta - eta.exp() - lnfact(y[n][d]);
            }
        }
        assert_abs_diff_eq!(llik as f64, expected, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_log_linear_sample() -> Result<()> {
        let args = toy_args()?.without_data();
        let mut rng = StdRng::seed_from_u64(21);
        let y = LogLinearModel.forward(&args, &mut rng)?;
        assert_eq!(y.dims(), &[2, 2]);
        Ok(())
    }
}
