//! Probability building blocks for ProbLib.
//!
//! This crate hosts the probability math the reliability estimators share:
//! - standard-normal conversions between reliability index and probabilities
//! - chi-square tail probabilities along sampling rays
//! - a small catalogue of marginal distributions (inverse-CDF transforms)
//! - seeded, restartable random sources

pub mod chi_squared;
pub mod distributions;
pub mod normal;
pub mod random;

pub use distributions::{
    CombineOp, Combined, Deterministic, Exponential, Gumbel, LogNormal, Normal, Uniform, Weibull,
};
pub use normal::{BETA_MAX, beta_from_p, beta_from_q, pq_from_beta};
pub use random::{GeneratorKind, SeededRandom};
