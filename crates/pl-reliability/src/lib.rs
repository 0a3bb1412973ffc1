//! # pl-reliability
//!
//! Failure probability estimation for ProbLib.
//!
//! This crate provides:
//! - FORM with relaxation, trial loops and start-point strategies
//! - Directional sampling, crude Monte Carlo, (adaptive) importance sampling
//! - Numerical integration over the standard-normal space
//! - Hybrid chains (FDIR, DSFI, FORM+DSFI, CMC-FORM, CMIM-FORM)
//! - Combination of failure events (Hohenbichler)
//!
//! ## Architecture
//!
//! Estimators only see a [`Model`]: a [`StochasticSetup`] (marginals plus a
//! [`Correlation`]) and a user [`LimitState`]. Distributions, random sources
//! and progress hooks come in through the traits of `pl-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Reliability index and influence coefficients.
pub mod alpha_beta;
/// AND/OR combination of failure events.
pub mod combination;
/// Gaussian-copula correlation of the standard-normal variables.
pub mod correlation;
/// Directional sampling.
pub mod directional;
/// Method selection from flat settings.
pub mod dispatcher;
/// Per-sample variable values.
pub mod draw;
/// First-order reliability method.
pub mod form;
/// Two-stage estimators.
pub mod hybrid;
/// Estimator interface.
pub mod method;
/// Limit-state model: evaluation, batches, gradients.
pub mod model;
/// Grid integration in standard-normal space.
pub mod numerical_integration;
/// Estimator output and its text exchange format.
pub mod result;
/// One-dimensional root finding along rays.
pub mod root_finding;
/// Monte Carlo and importance sampling.
pub mod sampling;
/// FORM start points.
pub mod start;
/// Variables, marginals and the active-variable map.
pub mod stochast;

pub use alpha_beta::AlphaBeta;
pub use combination::{CombinationConfig, CombineType, combine_multiple, combine_tree, combine_two};
pub use correlation::{
    Correlation, CorrelationPair, GaussianCorrelation, IdentityCorrelation,
    RobustGaussianCorrelation,
};
pub use directional::{DirectionalSampling, DirectionalSamplingConfig};
pub use dispatcher::{CorrelationKind, MethodKind, Settings, run, run_with_monitor};
pub use draw::SampleDraw;
pub use form::{Form, FormConfig};
pub use hybrid::{BetaEnvelope, Hybrid};
pub use method::ReliabilityMethod;
pub use model::{FnLimitState, Gradient, LimitState, Model};
pub use numerical_integration::{NumericalIntegration, NumericalIntegrationConfig};
pub use result::{ConvergenceStatus, ReliabilityResult};
pub use root_finding::{BracketMethod, LoopTermination, RayMethod, RayRootFinder};
pub use sampling::{
    AdaptiveImportanceSampling, AdaptiveImportanceSamplingConfig, CrudeMonteCarlo,
    ImportanceSampling, ImportanceSamplingConfig, SamplingConfig,
};
pub use start::StartMethod;
pub use stochast::StochasticSetup;
