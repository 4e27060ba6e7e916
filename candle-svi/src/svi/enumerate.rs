use candle_core::{Result, Tensor};

use super::traits::{DiscreteSite, DiscreteStrategy};

/// Reject discrete sites that cannot be summed out.
pub fn check_discrete_sites(sites: &[DiscreteSite]) -> Result<()> {
    for site in sites {
        match site.strategy {
            DiscreteStrategy::Enumerate => {
                if site.support_size == 0 {
                    candle_core::bail!("discrete site '{}' has an empty support", site.name);
                }
            }
        }
    }
    Ok(())
}

/// Marginalize a discrete site out of a joint log-probability.
///
/// `log_joint` has shape (S, ...batch, K, ...) with the site's support
/// of size K at `axis`. The site's plates are matched right-aligned
/// against the batch dimensions `1..axis`.
///
/// # Returns
/// `logsumexp` over `axis`, shape (S, ...batch, ...)
pub fn enumerate_out(site: &DiscreteSite, log_joint: &Tensor, axis: usize) -> Result<Tensor> {
    match site.strategy {
        DiscreteStrategy::Enumerate => {
            if axis == 0 || axis >= log_joint.rank() {
                candle_core::bail!(
                    "site '{}': enumeration axis {} out of range for shape {:?}",
                    site.name,
                    axis,
                    log_joint.dims()
                );
            }

            let support = log_joint.dim(axis)?;
            if support != site.support_size {
                candle_core::bail!(
                    "site '{}': support size {} but log-joint has {} values at dim {}",
                    site.name,
                    site.support_size,
                    support,
                    axis
                );
            }

            let batch = &log_joint.dims()[1..axis];
            for plate in &site.plates {
                let offset = plate.dim.unsigned_abs();
                if plate.dim >= 0 || offset > batch.len() {
                    candle_core::bail!(
                        "site '{}': plate '{}' at dim {} outside batch shape {:?}",
                        site.name,
                        plate.name,
                        plate.dim,
                        batch
                    );
                }
                let size = batch[batch.len() - offset];
                if size != plate.size {
                    candle_core::bail!(
                        "site '{}': plate '{}' expects size {}, found {}",
                        site.name,
                        plate.name,
                        plate.size,
                        size
                    );
                }
            }

            log_joint.log_sum_exp(axis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svi::traits::Plate;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    fn assignment(k: usize, n: usize) -> DiscreteSite {
        DiscreteSite::enumerated("z", k).in_plate(Plate::new("rows", n, -1))
    }

    #[test]
    fn test_enumerate_out_sums_support() -> Result<()> {
        let dev = Device::Cpu;
        // (S=1, N=2, K=2)
        let joint = Tensor::new(&[[[0.2f32.ln(), 0.3f32.ln()], [0.5f32.ln(), 0.25f32.ln()]]], &dev)?;

        let out = enumerate_out(&assignment(2, 2), &joint, 2)?;
        assert_eq!(out.dims(), &[1, 2]);

        let out = out.to_vec2::<f32>()?;
        assert_abs_diff_eq!(out[0][0], 0.5f32.ln(), epsilon = 1e-5);
        assert_abs_diff_eq!(out[0][1], 0.75f32.ln(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_enumerate_out_rejects_wrong_support() -> Result<()> {
        let joint = Tensor::zeros((1, 2, 3), candle_core::DType::F32, &Device::Cpu)?;
        assert!(enumerate_out(&assignment(2, 2), &joint, 2).is_err());
        assert!(enumerate_out(&assignment(3, 2), &joint, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_enumerate_out_rejects_wrong_plate() -> Result<()> {
        let joint = Tensor::zeros((1, 2, 3), candle_core::DType::F32, &Device::Cpu)?;
        assert!(enumerate_out(&assignment(3, 4), &joint, 2).is_err());

        let outside = DiscreteSite::enumerated("z", 3).in_plate(Plate::new("rows", 2, -2));
        assert!(enumerate_out(&outside, &joint, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_empty_support_rejected() {
        assert!(check_discrete_sites(&[assignment(2, 5)]).is_ok());
        assert!(check_discrete_sites(&[DiscreteSite::enumerated("z", 0)]).is_err());
    }
}
