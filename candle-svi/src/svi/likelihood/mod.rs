//! Count likelihoods for SVI models.
//!
//! Each likelihood holds the observed counts and returns element-wise
//! log-probabilities that broadcast against sampled parameters of shape
//! (S, ...), leaving the reduction to the model.

mod negbinom;
mod poisson;

pub use negbinom::{lgamma_approx, NegativeBinomialLikelihood};
pub use poisson::{ln_factorial, PoissonLikelihood};
