use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

/// Multiplicative decay applied to a base learning rate.
pub trait LrSchedule {
    /// Decay factor at `step`; must be strictly positive.
    fn factor(&self, step: usize) -> f64;
}

/// Inverse-time decay: `clr(step) = (t_0 + step)^(-kappa)`
///
/// Monotonically non-increasing for `kappa > 0`, `t_0 > 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseTimeDecay {
    kappa: f64,
    t_0: f64,
}

impl InverseTimeDecay {
    pub fn new(kappa: f64, t_0: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            kappa.is_finite() && kappa > 0.0,
            "kappa must be positive and finite, got {}",
            kappa
        );
        anyhow::ensure!(
            t_0.is_finite() && t_0 > 0.0,
            "t_0 must be positive and finite, got {}",
            t_0
        );
        Ok(Self { kappa, t_0 })
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn t_0(&self) -> f64 {
        self.t_0
    }
}

impl LrSchedule for InverseTimeDecay {
    fn factor(&self, step: usize) -> f64 {
        (self.t_0 + step as f64).powf(-self.kappa)
    }
}

/// Adam wrapped in a learning-rate schedule.
///
/// Each call to `step()` sets the rate to `base_lr * factor(n)` for the
/// n-th call and then advances the counter, so the gradient step that
/// follows the n-th `step()` runs at `base_lr * factor(n)`. Moment
/// estimates persist across the whole run.
pub struct ScheduledOptimizer<S: LrSchedule> {
    optimizer: AdamW,
    base_lr: f64,
    schedule: S,
    step_count: usize,
}

impl<S: LrSchedule> ScheduledOptimizer<S> {
    /// Adam (AdamW with zero weight decay) over `vars`.
    pub fn adam(vars: Vec<Var>, base_lr: f64, schedule: S) -> anyhow::Result<Self> {
        anyhow::ensure!(
            base_lr.is_finite() && base_lr > 0.0,
            "learning rate must be positive and finite, got {}",
            base_lr
        );

        let params = ParamsAdamW {
            lr: base_lr * schedule.factor(0),
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(vars, params)?;

        Ok(Self {
            optimizer,
            base_lr,
            schedule,
            step_count: 0,
        })
    }

    /// Advance the schedule by one step.
    pub fn step(&mut self) {
        let lr = self.base_lr * self.schedule.factor(self.step_count);
        self.optimizer.set_learning_rate(lr);
        self.step_count += 1;
    }

    /// One gradient step on `loss` at the current rate.
    pub fn backward_step(&mut self, loss: &Tensor) -> candle_core::Result<()> {
        self.optimizer.backward_step(loss)
    }

    pub fn current_lr(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn schedule(&self) -> &S {
        &self.schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn test_inverse_time_decay() -> anyhow::Result<()> {
        let schedule = InverseTimeDecay::new(0.6, 10.0)?;
        assert_abs_diff_eq!(schedule.factor(0), 10f64.powf(-0.6), epsilon = 1e-12);
        assert_abs_diff_eq!(schedule.factor(5), 15f64.powf(-0.6), epsilon = 1e-12);

        for step in 0..1000 {
            let now = schedule.factor(step);
            assert!(now > 0.0);
            assert!(schedule.factor(step + 1) <= now);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_schedule() {
        assert!(InverseTimeDecay::new(0.0, 10.0).is_err());
        assert!(InverseTimeDecay::new(-0.5, 10.0).is_err());
        assert!(InverseTimeDecay::new(0.6, 0.0).is_err());
        assert!(InverseTimeDecay::new(f64::NAN, 10.0).is_err());
        assert!(InverseTimeDecay::new(0.6, f64::INFINITY).is_err());
    }

    #[test]
    fn test_scheduled_lr_sequence() -> anyhow::Result<()> {
        let var = Var::zeros(3, candle_core::DType::F32, &Device::Cpu)?;
        let schedule = InverseTimeDecay::new(0.5, 4.0)?;
        let mut opt = ScheduledOptimizer::adam(vec![var], 2.0, schedule)?;

        assert_eq!(opt.step_count(), 0);
        assert_abs_diff_eq!(opt.current_lr(), 2.0 * 4f64.powf(-0.5), epsilon = 1e-12);

        for i in 0..5 {
            opt.step();
            let expected = 2.0 * (4.0 + i as f64).powf(-0.5);
            assert_abs_diff_eq!(opt.current_lr(), expected, epsilon = 1e-12);
        }
        assert_eq!(opt.step_count(), 5);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_learning_rate() -> anyhow::Result<()> {
        let var = Var::zeros(1, candle_core::DType::F32, &Device::Cpu)?;
        let schedule = InverseTimeDecay::new(0.6, 10.0)?;
        assert!(ScheduledOptimizer::adam(vec![var], 0.0, schedule).is_err());
        Ok(())
    }
}
