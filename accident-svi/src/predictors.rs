use candle_core::Tensor;

/// Labelled predictor tensor, (num_sites, num_days, num_labels).
#[derive(Debug, Clone)]
pub struct PredictorTable {
    labels: Vec<Box<str>>,
    values: Tensor,
}

impl PredictorTable {
    pub fn new(labels: Vec<Box<str>>, values: Tensor) -> anyhow::Result<Self> {
        let (_, _, l) = values.dims3()?;
        anyhow::ensure!(
            labels.len() == l,
            "{} labels for {} predictor columns",
            labels.len(),
            l
        );
        Ok(Self { labels, values })
    }

    pub fn labels(&self) -> &[Box<str>] {
        &self.labels
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    pub fn num_sites(&self) -> anyhow::Result<usize> {
        Ok(self.values.dim(0)?)
    }

    pub fn num_days(&self) -> anyhow::Result<usize> {
        Ok(self.values.dim(1)?)
    }

    fn position(&self, label: &str) -> anyhow::Result<usize> {
        self.labels
            .iter()
            .position(|x| x.as_ref() == label)
            .ok_or_else(|| anyhow::anyhow!("unknown predictor label: {}", label))
    }

    /// Columns for `labels`, in the requested order.
    ///
    /// # Returns
    /// (num_sites, num_days, labels.len())
    pub fn select(&self, labels: &[&str]) -> anyhow::Result<Tensor> {
        anyhow::ensure!(!labels.is_empty(), "no predictor labels requested");

        let columns = labels
            .iter()
            .map(|label| {
                let j = self.position(label)?;
                Ok(self.values.narrow(2, j, 1)?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Tensor::cat(&columns, 2)?.contiguous()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn table() -> anyhow::Result<PredictorTable> {
        // 1 site, 2 days, 3 labels
        let values = Tensor::new(&[[[1f32, 10.0, 100.0], [2.0, 20.0, 200.0]]], &Device::Cpu)?;
        PredictorTable::new(
            vec!["intercept".into(), "rain".into(), "traffic".into()],
            values,
        )
    }

    #[test]
    fn test_select_keeps_requested_order() -> anyhow::Result<()> {
        let table = table()?;
        let x = table.select(&["traffic", "intercept"])?;
        assert_eq!(x.dims(), &[1, 2, 2]);
        assert_eq!(
            x.squeeze(0)?.to_vec2::<f32>()?,
            vec![vec![100.0, 1.0], vec![200.0, 2.0]]
        );
        Ok(())
    }

    #[test]
    fn test_unknown_label() -> anyhow::Result<()> {
        let table = table()?;
        let err = table.select(&["rain", "snow"]).unwrap_err();
        assert!(err.to_string().contains("snow"));
        assert!(table.select(&[]).is_err());

        let values = Tensor::zeros((1, 1, 2), candle_core::DType::F32, &Device::Cpu)?;
        assert!(PredictorTable::new(vec!["a".into()], values).is_err());
        Ok(())
    }
}
