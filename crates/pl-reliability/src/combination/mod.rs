//! Combination of failure events (AND / OR) into one equivalent event.
//!
//! Events are `(beta, alpha)` pairs over the same list of variables;
//! `rho[i]` is the correlation between variable `i` as seen by event `a`
//! and variable `i` as seen by event `b` (`1` when both refer to the same
//! physical variable).

pub mod hohenbichler;

pub use hohenbichler::{ConditionalProbability, HohenbichlerConfig, conditional_failure};

use pl_core::{Error, Result};
use pl_prob::normal::cdf;
use pl_prob::{BETA_MAX, beta_from_q};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::alpha_beta::{AlphaBeta, norm};

/// How two failure events combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineType {
    /// Both events fail (series of parallel: intersection)
    And,
    /// Either event fails (union)
    Or,
}

/// Settings of event combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinationConfig {
    /// Conditional probability settings
    pub hohenbichler: HohenbichlerConfig,
    /// Beta perturbation used for the combined alpha
    pub delta: f64,
}

impl Default for CombinationConfig {
    fn default() -> Self {
        Self { hohenbichler: HohenbichlerConfig::default(), delta: 0.05 }
    }
}

impl CombinationConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(Error::Validation(format!(
                "combination delta must be positive, got {}",
                self.delta
            )));
        }
        self.hohenbichler.validate()
    }
}

fn check_lengths(a: &AlphaBeta, b: &AlphaBeta, rho: &[f64]) -> Result<()> {
    if a.n_variables() != b.n_variables() || rho.len() != a.n_variables() {
        return Err(Error::Validation(format!(
            "event lengths differ: alpha {} and {}, rho {}",
            a.n_variables(),
            b.n_variables(),
            rho.len()
        )));
    }
    if let Some(r) = rho.iter().find(|r| !(r.abs() <= 1.0)) {
        return Err(Error::Validation(format!("variable correlation {r} outside [-1, 1]")));
    }
    Ok(())
}

/// Correlation of the two linearised limit states, `Σ αa_i αb_i rho_i`.
pub fn event_correlation(a: &AlphaBeta, b: &AlphaBeta, rho: &[f64]) -> Result<f64> {
    check_lengths(a, b, rho)?;
    let r: f64 = a.alpha().iter().zip(b.alpha()).zip(rho).map(|((x, y), r)| x * y * r).sum();
    Ok(r.clamp(-1.0, 1.0))
}

/// Probability of the combined event for two betas and their correlation.
pub fn combined_probability(
    beta_a: f64,
    beta_b: f64,
    rho: f64,
    combine: CombineType,
    config: &HohenbichlerConfig,
) -> Result<f64> {
    let qa = cdf(-beta_a);
    let qb = cdf(-beta_b);
    // conditioning on the more probable event keeps the inner problem well scaled
    let both = if qa >= qb {
        qa * conditional_failure(beta_a, beta_b, rho, config)?.probability
    } else {
        qb * conditional_failure(beta_b, beta_a, rho, config)?.probability
    };
    let both = both.min(qa.min(qb));
    Ok(match combine {
        CombineType::And => both,
        CombineType::Or => (qa + qb - both).clamp(qa.max(qb), 1.0),
    })
}

/// Combine two events into one equivalent `(beta, alpha)`.
pub fn combine_two(
    a: &AlphaBeta,
    b: &AlphaBeta,
    rho: &[f64],
    combine: CombineType,
    config: &CombinationConfig,
) -> Result<AlphaBeta> {
    config.validate()?;
    let rho_ab = event_correlation(a, b, rho)?;
    let h = &config.hohenbichler;
    let q = combined_probability(a.beta(), b.beta(), rho_ab, combine, h)?;
    let beta = beta_from_q(q);

    let delta = config.delta;
    let alpha = (0..a.n_variables())
        .into_par_iter()
        .map(|i| {
            let beta_a = a.beta() + a.alpha()[i] * delta;
            let beta_b = b.beta() + b.alpha()[i] * rho[i] * delta;
            let q_i = combined_probability(beta_a, beta_b, rho_ab, combine, h)?;
            Ok((beta_from_q(q_i) - beta) / delta)
        })
        .collect::<Result<Vec<f64>>>()?;

    if beta.abs() >= BETA_MAX || norm(&alpha) == 0.0 {
        let dominant = match (combine, a.beta() >= b.beta()) {
            (CombineType::And, true) | (CombineType::Or, false) => a,
            _ => b,
        };
        log::debug!("combined event is degenerate (beta={beta}); using the dominant alpha");
        return Ok(AlphaBeta::new(beta, dominant.alpha().to_vec()));
    }
    Ok(AlphaBeta::new(beta, alpha).normalized())
}

/// Combine a list of events left to right.
pub fn combine_multiple(
    events: &[AlphaBeta],
    rho: &[f64],
    combine: CombineType,
    config: &CombinationConfig,
) -> Result<AlphaBeta> {
    let (first, rest) = events
        .split_first()
        .ok_or_else(|| Error::Validation("no events to combine".into()))?;
    rest.iter()
        .try_fold(first.clone(), |acc, next| combine_two(&acc, next, rho, combine, config))
}

/// Combine a list of events pairwise as a balanced tree, halves in parallel.
pub fn combine_tree(
    events: &[AlphaBeta],
    rho: &[f64],
    combine: CombineType,
    config: &CombinationConfig,
) -> Result<AlphaBeta> {
    match events.len() {
        0 => Err(Error::Validation("no events to combine".into())),
        1 => Ok(events[0].clone()),
        n => {
            let (left, right) = events.split_at(n / 2);
            let (l, r) = rayon::join(
                || combine_tree(left, rho, combine, config),
                || combine_tree(right, rho, combine, config),
            );
            combine_two(&l?, &r?, rho, combine, config)
        }
    }
}
