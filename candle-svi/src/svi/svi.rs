use candle_core::Result;
use rand::rngs::StdRng;

use super::elbo::{elbo_estimate, trace_elbo_loss};
use super::guide::DiagonalNormalGuide;
use super::schedule::{LrSchedule, ScheduledOptimizer};
use super::traits::GenerativeModel;

/// Model, guide, scheduled optimizer and random stream of one fit.
///
/// Nothing is shared between two `Svi` values: each owns its guide (and
/// therefore its parameter store) and its `StdRng`.
pub struct Svi<'a, M: GenerativeModel, S: LrSchedule> {
    model: &'a M,
    guide: DiagonalNormalGuide,
    optimizer: ScheduledOptimizer<S>,
    rng: StdRng,
    num_particles: usize,
}

impl<'a, M: GenerativeModel, S: LrSchedule> Svi<'a, M, S> {
    pub fn new(
        model: &'a M,
        guide: DiagonalNormalGuide,
        schedule: S,
        base_lr: f64,
        rng: StdRng,
        num_particles: usize,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(num_particles > 0, "num_particles must be at least 1");
        let optimizer = ScheduledOptimizer::adam(guide.param_store().all_vars(), base_lr, schedule)?;
        Ok(Self {
            model,
            guide,
            optimizer,
            rng,
            num_particles,
        })
    }

    /// Loss estimate at the current guide, no parameter update.
    pub fn loss(&mut self, args: &M::Args) -> Result<f32> {
        elbo_estimate(
            self.model,
            &self.guide,
            args,
            self.num_particles,
            &mut self.rng,
        )
    }

    /// One gradient step on a fresh Monte-Carlo loss.
    ///
    /// # Returns
    /// The loss estimate computed before the update
    pub fn step(&mut self, args: &M::Args) -> Result<f32> {
        let loss = trace_elbo_loss(
            self.model,
            &self.guide,
            args,
            self.num_particles,
            &mut self.rng,
        )?;
        self.optimizer.backward_step(&loss)?;
        loss.to_scalar::<f32>()
    }

    pub fn advance_schedule(&mut self) {
        self.optimizer.step();
    }

    pub fn current_lr(&self) -> f64 {
        self.optimizer.current_lr()
    }

    pub fn step_count(&self) -> usize {
        self.optimizer.step_count()
    }

    pub fn model(&self) -> &M {
        self.model
    }

    pub fn guide(&self) -> &DiagonalNormalGuide {
        &self.guide
    }

    pub fn into_guide(self) -> DiagonalNormalGuide {
        self.guide
    }
}
