use candle_core::Tensor;
use candle_svi::svi::DiagonalNormalGuide;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::model_args::ModelArgs;
use crate::models::LogLinearModel;
use crate::predictors::PredictorTable;
use crate::training::{
    train_with_guide, train_with_random_init, LogReporter, TrainConfig, TrainResult,
};

/// Log-linear fit from raw counts and a subset of labelled predictors.
pub struct FitResult {
    pub losses: Vec<f32>,
    pub guide: DiagonalNormalGuide,
    pub best_seed: Option<u64>,
    pub args: ModelArgs,
}

impl From<(TrainResult, ModelArgs)> for FitResult {
    fn from((result, args): (TrainResult, ModelArgs)) -> Self {
        Self {
            losses: result.losses,
            guide: result.guide,
            best_seed: result.best_seed,
            args,
        }
    }
}

fn log_linear_args(
    accidents: &Tensor,
    table: &PredictorTable,
    labels: &[&str],
) -> anyhow::Result<ModelArgs> {
    let predictors = table.select(labels)?;
    ModelArgs::from_counts(accidents.clone(), predictors)
}

/// Fit `LogLinearModel` from the best of a block of random initializations.
///
/// * `accidents` - (num_sites, num_days) counts
/// * `table` - labelled predictors; `labels` picks the columns
pub fn fit_log_linear_random_init(
    accidents: &Tensor,
    table: &PredictorTable,
    labels: &[&str],
    kappa: f64,
    t_0: f64,
    max_iters: usize,
) -> anyhow::Result<FitResult> {
    let args = log_linear_args(accidents, table, labels)?;
    let config = TrainConfig::default()
        .with_schedule(kappa, t_0)
        .with_max_iters(max_iters);

    let result = train_with_random_init(&LogLinearModel, &args, &config, &mut LogReporter)?;
    Ok((result, args).into())
}

/// Fit `LogLinearModel` from a single guide built from `seed` (lr 0.05).
pub fn fit_log_linear(
    accidents: &Tensor,
    table: &PredictorTable,
    labels: &[&str],
    kappa: f64,
    t_0: f64,
    max_iters: usize,
    seed: u64,
) -> anyhow::Result<FitResult> {
    let args = log_linear_args(accidents, table, labels)?;
    let config = TrainConfig::supplied_guide()
        .with_schedule(kappa, t_0)
        .with_max_iters(max_iters);

    let mut rng = StdRng::seed_from_u64(seed);
    let guide = DiagonalNormalGuide::new(&LogLinearModel, &args, &mut rng)?;

    let result = train_with_guide(
        &LogLinearModel,
        guide,
        &args,
        &config,
        seed.wrapping_add(1),
        &mut LogReporter,
    )?;
    Ok((result, args).into())
}
