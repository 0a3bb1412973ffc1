//! Conditional failure probability of two correlated events (Hohenbichler).
//!
//! With `U1, U2` standard normal, `corr(U1, U2) = rho` and failure events
//! `U1 > beta1`, `U2 > beta2`, the conditional probability
//! `P(U2 > beta2 | U1 > beta1)` is found by FORM on the limit state
//!
//! ```text
//! u1 = Φ⁻¹(1 - q1 Φ(-w1))
//! z  = beta2 - rho u1 - sqrt(1 - rho²) w2
//! ```
//!
//! over independent standard normals `(w1, w2)`; `w1` spans the truncated
//! tail of `U1` beyond `beta1`.

use pl_core::{Distribution, Error, Result};
use pl_prob::normal::cdf;
use pl_prob::{Normal, beta_from_q};
use serde::{Deserialize, Serialize};

use crate::draw::SampleDraw;
use crate::form::{Form, FormConfig};
use crate::model::{LimitState, Model};
use crate::stochast::StochasticSetup;

/// Hohenbichler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HohenbichlerConfig {
    /// `|rho|` below this is treated as independence
    pub rho_zero: f64,
    /// `|rho|` above this is interpolated towards the exact `±1` result
    pub rho_limit: f64,
    /// FORM settings of the conditional problem
    pub form: FormConfig,
}

impl Default for HohenbichlerConfig {
    fn default() -> Self {
        Self {
            rho_zero: 1e-10,
            rho_limit: 0.99999,
            form: FormConfig {
                eps_beta: 1e-4,
                eps_z: 1e-4,
                du: 1e-3,
                relaxation: 1.0,
                trial_loops: 4,
                ..FormConfig::default()
            },
        }
    }
}

impl HohenbichlerConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.rho_zero >= 0.0 && self.rho_zero < self.rho_limit && self.rho_limit < 1.0) {
            return Err(Error::Validation(format!(
                "need 0 <= rho_zero < rho_limit < 1, got {} and {}",
                self.rho_zero, self.rho_limit
            )));
        }
        self.form.validate()
    }
}

/// Result of a conditional probability computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionalProbability {
    /// `P(event 2 | event 1)`
    pub probability: f64,
    /// `false` if the inner FORM did not converge
    pub converged: bool,
    /// Evaluations of the conditional limit state
    pub n_evaluations: usize,
}

struct ConditionalLimitState {
    q1: f64,
    beta2: f64,
    rho: f64,
}

impl LimitState for ConditionalLimitState {
    fn z(&self, draw: &SampleDraw<'_>, _thread_id: usize) -> Result<f64> {
        let w1 = draw.x(0)?;
        let w2 = draw.x(1)?;
        let u1 = beta_from_q(self.q1 * cdf(-w1));
        Ok(self.beta2 - self.rho * u1 - (1.0 - self.rho * self.rho).sqrt() * w2)
    }
}

/// Probability mass of a standard normal on `(a, b)`, accurate in both tails.
fn interval_mass(a: f64, b: f64) -> f64 {
    if b <= a {
        0.0
    } else if a >= 0.0 {
        cdf(-a) - cdf(-b)
    } else if b <= 0.0 {
        cdf(b) - cdf(a)
    } else {
        1.0 - cdf(a) - cdf(-b)
    }
}

/// Exact conditional probability for `rho = ±1`.
fn fully_correlated(beta1: f64, beta2: f64, sign: f64) -> f64 {
    let q1 = cdf(-beta1);
    if sign > 0.0 {
        cdf(-beta1.max(beta2)) / q1
    } else {
        interval_mass(beta1, -beta2) / q1
    }
}

/// `P(U2 > beta2 | U1 > beta1)` for standard normals with correlation `rho`.
pub fn conditional_failure(
    beta1: f64,
    beta2: f64,
    rho: f64,
    config: &HohenbichlerConfig,
) -> Result<ConditionalProbability> {
    if !beta1.is_finite() || !beta2.is_finite() {
        return Err(Error::Validation(format!("non-finite beta: {beta1}, {beta2}")));
    }
    if !rho.is_finite() || rho.abs() > 1.0 + 1e-10 {
        return Err(Error::Validation(format!("correlation must lie in [-1, 1], got {rho}")));
    }
    let q1 = cdf(-beta1);
    let q2 = cdf(-beta2);
    if rho.abs() < config.rho_zero || q1 <= 0.0 {
        return Ok(ConditionalProbability { probability: q2, converged: true, n_evaluations: 0 });
    }
    if rho.abs() > config.rho_limit {
        let sign = rho.signum();
        let at_limit = solve(q1, beta2, sign * config.rho_limit, config)?;
        let exact = fully_correlated(beta1, beta2, sign);
        let t = ((rho.abs() - config.rho_limit) / (1.0 - config.rho_limit)).min(1.0);
        return Ok(ConditionalProbability {
            probability: (at_limit.probability + t * (exact - at_limit.probability))
                .clamp(0.0, 1.0),
            ..at_limit
        });
    }
    solve(q1, beta2, rho, config)
}

fn solve(
    q1: f64,
    beta2: f64,
    rho: f64,
    config: &HohenbichlerConfig,
) -> Result<ConditionalProbability> {
    let distributions: Vec<Box<dyn Distribution>> =
        vec![Box::new(Normal::standard()), Box::new(Normal::standard())];
    let setup = StochasticSetup::independent(distributions)?;
    let lsf = ConditionalLimitState { q1, beta2, rho };
    let model = Model::new(&setup, &lsf)?;
    let form = Form::new(config.form.clone())?;
    let result = form.calc_from(&model, &[0.0, 0.0])?;
    if !result.converged() {
        log::warn!(
            "Hohenbichler: FORM did not converge (rho={rho}, beta2={beta2}); using beta={:.4}",
            result.beta()
        );
    }
    Ok(ConditionalProbability {
        probability: result.probability_of_failure(),
        converged: result.converged(),
        n_evaluations: result.n_evaluations,
    })
}
