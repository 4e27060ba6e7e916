use candle_svi::svi::{DiagonalNormalGuide, GenerativeModel, InverseTimeDecay, Svi};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::initializer::{search_initialization, InitSearchConfig};

/// Iterations between two progress reports.
pub const REPORT_EVERY: usize = 50;

/// Training configuration.
///
/// * `kappa`, `t_0` - decay `lr * (t_0 + step)^(-kappa)`
/// * `threshold` - convergence tolerance; carried but not consulted, every
///   run uses the full `max_iters`
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub kappa: f64,
    pub t_0: f64,
    pub learning_rate: f64,
    pub max_iters: usize,
    pub threshold: f64,
    pub num_particles: usize,
    pub show_progress: bool,
    /// Fixed seed-block index for the initializer search
    pub block_start: Option<u64>,
    /// Seeds the draw of the block index; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            kappa: 0.6,
            t_0: 10.0,
            learning_rate: 1.0,
            max_iters: 2000,
            threshold: 1.0,
            num_particles: 1,
            show_progress: false,
            block_start: None,
            seed: None,
        }
    }
}

impl TrainConfig {
    /// Defaults for training a guide that was built elsewhere.
    pub fn supplied_guide() -> Self {
        Self {
            learning_rate: 0.05,
            ..Default::default()
        }
    }

    pub fn with_schedule(mut self, kappa: f64, t_0: f64) -> Self {
        self.kappa = kappa;
        self.t_0 = t_0;
        self
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn schedule(&self) -> anyhow::Result<InverseTimeDecay> {
        InverseTimeDecay::new(self.kappa, self.t_0)
    }

    fn init_search(&self) -> InitSearchConfig {
        InitSearchConfig {
            block_start: self.block_start,
            num_particles: self.num_particles,
            show_progress: self.show_progress,
            ..Default::default()
        }
    }
}

/// Receives `(iteration, loss)` every `REPORT_EVERY` iterations.
pub trait ProgressReporter {
    fn report(&mut self, iter: usize, loss: f32);
}

/// Reports through `log::info!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&mut self, iter: usize, loss: f32) {
        info!("In step {} the Elbo is {}", iter, loss);
    }
}

/// Result of a training run.
pub struct TrainResult {
    /// One loss per iteration, `max_iters` entries
    pub losses: Vec<f32>,
    pub guide: DiagonalNormalGuide,
    /// Seed the initializer search picked, if it ran
    pub best_seed: Option<u64>,
}

/// Run `max_iters` scheduled steps and collect the loss trace.
pub fn run_svi<M, R>(
    svi: &mut Svi<'_, M, InverseTimeDecay>,
    args: &M::Args,
    config: &TrainConfig,
    reporter: &mut R,
) -> anyhow::Result<Vec<f32>>
where
    M: GenerativeModel,
    R: ProgressReporter + ?Sized,
{
    let pb = ProgressBar::new(config.max_iters as u64);
    if !config.show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut losses = Vec::with_capacity(config.max_iters);

    for i in 0..config.max_iters {
        svi.advance_schedule();
        let loss = svi.step(args)?;
        losses.push(loss);

        if i % REPORT_EVERY == 0 {
            reporter.report(i, loss);
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(losses)
}

/// Train from the best of a block of random initial guides.
pub fn train_with_random_init<M, R>(
    model: &M,
    args: &M::Args,
    config: &TrainConfig,
    reporter: &mut R,
) -> anyhow::Result<TrainResult>
where
    M: GenerativeModel,
    R: ProgressReporter + ?Sized,
{
    let schedule = config.schedule()?;
    let mut block_rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    let init = search_initialization(model, args, &config.init_search(), &mut block_rng)?;
    let best_seed = init.seed;

    let mut svi = Svi::new(
        model,
        init.guide,
        schedule,
        config.learning_rate,
        init.rng,
        config.num_particles,
    )?;

    let losses = run_svi(&mut svi, args, config, reporter)?;
    if let Some(last) = losses.last() {
        info!("{}: final loss {} after {} iterations", model.name(), last, losses.len());
    }

    Ok(TrainResult {
        losses,
        guide: svi.into_guide(),
        best_seed: Some(best_seed),
    })
}

/// Train an existing guide; `seed` drives the Monte-Carlo draws.
pub fn train_with_guide<M, R>(
    model: &M,
    guide: DiagonalNormalGuide,
    args: &M::Args,
    config: &TrainConfig,
    seed: u64,
    reporter: &mut R,
) -> anyhow::Result<TrainResult>
where
    M: GenerativeModel,
    R: ProgressReporter + ?Sized,
{
    let schedule = config.schedule()?;
    let rng = StdRng::seed_from_u64(seed);
    let mut svi = Svi::new(
        model,
        guide,
        schedule,
        config.learning_rate,
        rng,
        config.num_particles,
    )?;

    let losses = run_svi(&mut svi, args, config, reporter)?;

    Ok(TrainResult {
        losses,
        guide: svi.into_guide(),
        best_seed: None,
    })
}
