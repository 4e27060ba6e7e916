use std::ops::Range;

use candle_svi::svi::{elbo_estimate, DiagonalNormalGuide, GenerativeModel};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressDrawTarget};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Multi-start search over guide initializations.
#[derive(Debug, Clone)]
pub struct InitSearchConfig {
    /// Seeds per block
    pub num_candidates: usize,
    /// Largest block index drawn when `block_start` is not given
    pub max_block: u64,
    /// Fixed block index; seeds are `[n * s0, n * (s0 + 1))`
    pub block_start: Option<u64>,
    pub num_particles: usize,
    pub show_progress: bool,
}

impl Default for InitSearchConfig {
    fn default() -> Self {
        Self {
            num_candidates: 100,
            max_block: 1_000_000,
            block_start: None,
            num_particles: 1,
            show_progress: false,
        }
    }
}

impl InitSearchConfig {
    /// Use `block_start` if fixed, otherwise draw one from `[0, max_block]`.
    pub fn resolve_block_start<R: Rng>(&self, rng: &mut R) -> u64 {
        self.block_start
            .unwrap_or_else(|| rng.random_range(0..=self.max_block))
    }
}

/// A guide built from a seed, together with the stream that built it.
pub struct Initialized {
    pub seed: u64,
    /// Loss estimate at the untouched initial guide
    pub loss: f32,
    pub guide: DiagonalNormalGuide,
    /// Continues the seed's random stream into training
    pub rng: StdRng,
}

/// Build a fresh guide from `seed` and score it without taking a step.
///
/// Every call starts from an empty parameter store, so calling twice with
/// the same seed gives identical guides and losses.
pub fn initialize<M: GenerativeModel>(
    seed: u64,
    model: &M,
    args: &M::Args,
    num_particles: usize,
) -> candle_core::Result<Initialized> {
    let mut rng = StdRng::seed_from_u64(seed);
    let guide = DiagonalNormalGuide::new(model, args, &mut rng)?;
    let loss = elbo_estimate(model, &guide, args, num_particles, &mut rng)?;
    Ok(Initialized {
        seed,
        loss,
        guide,
        rng,
    })
}

/// Contiguous seed block `[n * block_start, n * (block_start + 1))`.
///
/// Fails when the block end does not fit in `u64`.
pub fn candidate_seeds(block_start: u64, num_candidates: usize) -> anyhow::Result<Range<u64>> {
    let n = num_candidates as u64;
    let start = n.checked_mul(block_start);
    let end = block_start.checked_add(1).and_then(|b| n.checked_mul(b));
    match (start, end) {
        (Some(start), Some(end)) => Ok(start..end),
        _ => anyhow::bail!(
            "seed block {} of {} candidates overflows u64",
            block_start,
            num_candidates
        ),
    }
}

/// Initial loss of every seed, in seed order.
///
/// Candidates share nothing, so they run on the rayon pool.
pub fn evaluate_candidates<M: GenerativeModel>(
    model: &M,
    args: &M::Args,
    seeds: Range<u64>,
    num_particles: usize,
    show_progress: bool,
) -> anyhow::Result<Vec<(u64, f32)>> {
    let seeds: Vec<u64> = seeds.collect();

    let pb = ProgressBar::new(seeds.len() as u64);
    if !show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let losses = seeds
        .par_iter()
        .progress_with(pb.clone())
        .map(|&seed| {
            let init = initialize(seed, model, args, num_particles)?;
            debug!("seed {}: initial loss {}", seed, init.loss);
            Ok((seed, init.loss))
        })
        .collect::<candle_core::Result<Vec<_>>>()?;

    pb.finish_and_clear();
    Ok(losses)
}

/// Lowest finite loss; the earliest seed wins ties.
pub fn select_best_seed(candidates: &[(u64, f32)]) -> anyhow::Result<(u64, f32)> {
    let mut best: Option<(u64, f32)> = None;

    for &(seed, loss) in candidates {
        if !loss.is_finite() {
            warn!("seed {}: non-finite initial loss {}, skipped", seed, loss);
            continue;
        }
        match best {
            Some((_, best_loss)) if loss >= best_loss => {}
            _ => best = Some((seed, loss)),
        }
    }

    best.ok_or_else(|| {
        anyhow::anyhow!(
            "none of the {} candidate seeds gave a finite initial loss",
            candidates.len()
        )
    })
}

/// Score a block of seeds and rebuild the winner.
///
/// `rng` picks the block when `config.block_start` is unset. The returned
/// guide is exactly `initialize(best_seed, ..)`: the winner is recomputed
/// from its seed rather than kept from the search.
pub fn search_initialization<M, R>(
    model: &M,
    args: &M::Args,
    config: &InitSearchConfig,
    rng: &mut R,
) -> anyhow::Result<Initialized>
where
    M: GenerativeModel,
    R: Rng,
{
    anyhow::ensure!(config.num_candidates > 0, "need at least one candidate seed");

    let block_start = config.resolve_block_start(rng);
    let seeds = candidate_seeds(block_start, config.num_candidates)?;
    info!(
        "{}: searching initial guides over seeds [{}, {})",
        model.name(),
        seeds.start,
        seeds.end
    );

    let candidates = evaluate_candidates(
        model,
        args,
        seeds,
        config.num_particles,
        config.show_progress,
    )?;
    let (best_seed, best_loss) = select_best_seed(&candidates)?;

    let init = initialize(best_seed, model, args, config.num_particles)?;
    info!(
        "{}: best seed {} with initial loss {}",
        model.name(),
        best_seed,
        best_loss
    );
    Ok(init)
}
