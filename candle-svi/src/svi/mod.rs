//! Stochastic Variational Inference (SVI) module.
//!
//! Fits a mean-field Gaussian guide to the posterior of a generative model
//! by stochastic gradient descent on the negative evidence lower bound.
//!
//! # Key characteristics
//!
//! - Models declare latent sites with priors and plates (`LatentSite`)
//!   and provide the observation log-likelihood (`GenerativeModel`)
//! - Constrained latents (unit interval, simplex) are handled by
//!   bijections to ℝ with their log|det J| added to the joint
//! - Discrete sites marked `Enumerate` are summed out by the model with
//!   `enumerate_out`
//! - Guide: `q(u) = N(loc, diag(scale²))` over all unconstrained coordinates
//! - Reparameterized gradient: `u = loc + scale * ε`, `ε ~ N(0, I)`
//! - Every random draw goes through an explicit `StdRng`
//!
//! # Example
//!
//! ```ignore
//! use candle_svi::svi::{DiagonalNormalGuide, InverseTimeDecay, Svi};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(42);
//! let guide = DiagonalNormalGuide::new(&model, &args, &mut rng)?;
//! let schedule = InverseTimeDecay::new(0.6, 10.0)?;
//! let mut svi = Svi::new(&model, guide, schedule, 1.0, rng, 1)?;
//!
//! for _ in 0..num_iters {
//!     svi.advance_schedule();
//!     let loss = svi.step(&args)?;
//! }
//!
//! let posterior = svi.guide().posterior_median()?;
//! ```

mod elbo;
mod enumerate;
mod guide;
pub mod likelihood;
mod param_store;
mod priors;
mod schedule;
#[allow(clippy::module_inception)]
mod svi;
mod traits;
mod transforms;

pub use elbo::{elbo_estimate, sum_non_sample, trace_elbo_loss};
pub use enumerate::{check_discrete_sites, enumerate_out};
pub use guide::{DiagonalNormalGuide, GuideSample, GuideSite};
pub use param_store::ParamStore;
pub use priors::Prior;
pub use schedule::{InverseTimeDecay, LrSchedule, ScheduledOptimizer};
pub use svi::Svi;
pub use traits::{
    DiscreteSite, DiscreteStrategy, GenerativeModel, LatentSample, LatentSite, Plate,
};
pub use transforms::Support;
