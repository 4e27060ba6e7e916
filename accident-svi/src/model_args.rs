use candle_core::{DType, Device, Result, Tensor};

/// Structural sizes and tensors passed to every model evaluation.
///
/// Attached tensors are stored as `f32`, the dtype of every latent.
///
/// * `predictors` - (num_sites, num_days, num_predictors)
/// * `data` - observed accident counts (num_sites, num_days); `None`
///   runs the models generatively
#[derive(Debug, Clone)]
pub struct ModelArgs {
    pub num_sites: usize,
    pub num_days: usize,
    pub num_predictors: usize,
    pub num_clusters: Option<usize>,
    pub predictors: Option<Tensor>,
    pub data: Option<Tensor>,
    pub device: Device,
}

impl ModelArgs {
    pub fn new(num_sites: usize, num_days: usize) -> Self {
        Self {
            num_sites,
            num_days,
            num_predictors: 0,
            num_clusters: None,
            predictors: None,
            data: None,
            device: Device::Cpu,
        }
    }

    /// Attach a predictor tensor and take `num_predictors` from its last axis.
    pub fn with_predictors(mut self, predictors: Tensor) -> Result<Self> {
        let (_, _, p) = predictors.dims3()?;
        self.num_predictors = p;
        self.device = predictors.device().clone();
        self.predictors = Some(predictors.to_dtype(DType::F32)?);
        Ok(self)
    }

    pub fn with_data(mut self, data: Tensor) -> Result<Self> {
        self.data = Some(data.to_dtype(DType::F32)?);
        Ok(self)
    }

    pub fn without_data(mut self) -> Self {
        self.data = None;
        self
    }

    pub fn with_clusters(mut self, num_clusters: usize) -> Self {
        self.num_clusters = Some(num_clusters);
        self
    }

    /// Derive every size from the tensors.
    ///
    /// * `accidents` - (num_sites, num_days) counts
    /// * `predictors` - (num_sites, num_days, num_predictors)
    pub fn from_counts(accidents: Tensor, predictors: Tensor) -> anyhow::Result<Self> {
        let (num_sites, num_days) = accidents.dims2()?;
        let args = Self::new(num_sites, num_days)
            .with_predictors(predictors)?
            .with_data(accidents)?;
        args.validate()?;
        Ok(args)
    }

    /// Check that supplied tensors agree with the declared sizes.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_sites > 0, "num_sites must be positive");
        anyhow::ensure!(self.num_days > 0, "num_days must be positive");

        if let Some(predictors) = &self.predictors {
            let expected = [self.num_sites, self.num_days, self.num_predictors];
            anyhow::ensure!(
                predictors.dims() == expected,
                "predictors: expected shape {:?}, got {:?}",
                expected,
                predictors.dims()
            );
        }

        if let Some(data) = &self.data {
            let expected = [self.num_sites, self.num_days];
            anyhow::ensure!(
                data.dims() == expected,
                "data: expected shape {:?}, got {:?}",
                expected,
                data.dims()
            );
        }

        if let Some(k) = self.num_clusters {
            anyhow::ensure!(k > 0, "num_clusters must be positive");
        }
        Ok(())
    }

    pub fn predictors(&self) -> Result<&Tensor> {
        match &self.predictors {
            Some(x) => Ok(x),
            None => candle_core::bail!("model needs predictors but none were supplied"),
        }
    }

    pub fn num_clusters(&self) -> Result<usize> {
        match self.num_clusters {
            Some(k) => Ok(k),
            None => candle_core::bail!("mixture model needs num_clusters"),
        }
    }

    /// Observed counts, required when scoring the likelihood.
    pub fn observed_data(&self) -> Result<&Tensor> {
        match &self.data {
            Some(y) => Ok(y),
            None => candle_core::bail!("no observed data to score"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_counts() -> anyhow::Result<()> {
        let y = Tensor::zeros((4, 7), DType::F32, &Device::Cpu)?;
        let x = Tensor::zeros((4, 7, 3), DType::F32, &Device::Cpu)?;
        let args = ModelArgs::from_counts(y, x)?;
        assert_eq!(args.num_sites, 4);
        assert_eq!(args.num_days, 7);
        assert_eq!(args.num_predictors, 3);
        assert!(args.num_clusters.is_none());
        Ok(())
    }

    #[test]
    fn test_double_precision_inputs_stored_as_f32() -> anyhow::Result<()> {
        let y = Tensor::new(&[[1f64, 0.0], [2.0, 3.0]], &Device::Cpu)?;
        let x = Tensor::ones((2, 2, 1), DType::F64, &Device::Cpu)?;
        let args = ModelArgs::from_counts(y, x)?;
        assert_eq!(args.observed_data()?.dtype(), DType::F32);
        assert_eq!(args.predictors()?.dtype(), DType::F32);
        assert_eq!(args.observed_data()?.to_vec2::<f32>()?, vec![vec![1.0, 0.0], vec![2.0, 3.0]]);
        Ok(())
    }

    #[test]
    fn test_shape_mismatch() -> anyhow::Result<()> {
        let y = Tensor::zeros((4, 6), DType::F32, &Device::Cpu)?;
        let x = Tensor::zeros((4, 7, 3), DType::F32, &Device::Cpu)?;
        let err = ModelArgs::from_counts(y, x).unwrap_err();
        assert!(err.to_string().contains("predictors"));

        let mut args = ModelArgs::new(2, 3);
        args.data = Some(Tensor::zeros((3, 2), DType::F32, &Device::Cpu)?);
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("data"));

        let args = ModelArgs::new(2, 3).with_clusters(0);
        assert!(args.validate().is_err());
        assert!(args.predictors().is_err());
        assert!(args.observed_data().is_err());
        Ok(())
    }
}
