//! First Order Reliability Method.
//!
//! Iterates towards the design point using finite-difference gradients and a
//! relaxed projection onto the linearised limit state:
//!
//! ```text
//! beta  = (z - dz/du · u) / |dz/du|
//! alpha = dz/du / |dz/du|
//! u    <- (1 - r) u + r (-beta alpha)
//! ```
//!
//! Without convergence the result is extrapolated from the mean of the last
//! iterates. Trial loops restart from the original start with the relaxation
//! halved each time.

use pl_core::{Error, Result};
use pl_prob::BETA_MAX;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::alpha_beta::{AlphaBeta, dot, norm};
use crate::method::ReliabilityMethod;
use crate::model::Model;
use crate::result::{ConvergenceStatus, ReliabilityResult};
use crate::start::{StartMethod, start_point};

/// Gradients shorter than this are treated as zero.
pub const GRADIENT_FLOOR: f64 = 1e-10;

/// Iterates averaged when FORM does not converge.
pub const EXTRAPOLATION_WINDOW: usize = 10;

/// FORM settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// Iterations per trial
    pub max_iterations: usize,
    /// Relaxation factor `r` in `(0, 1]`
    pub relaxation: f64,
    /// Tolerance on `|beta² - |u|²| / max(beta², 1)`
    pub eps_beta: f64,
    /// Tolerance on `|z| / |dz/du|`
    pub eps_z: f64,
    /// Finite-difference step in `u`
    pub du: f64,
    /// Trials; each retry halves the relaxation
    pub trial_loops: usize,
    /// First iterate
    pub start: StartMethod,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            relaxation: 0.75,
            eps_beta: 0.01,
            eps_z: 0.01,
            du: 0.3,
            trial_loops: 1,
            start: StartMethod::Zero,
        }
    }
}

impl FormConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Validation("FORM max_iterations must be positive".into()));
        }
        if !(self.relaxation > 0.0 && self.relaxation <= 1.0) {
            return Err(Error::Validation(format!(
                "FORM relaxation must lie in (0, 1], got {}",
                self.relaxation
            )));
        }
        for (name, v) in [("eps_beta", self.eps_beta), ("eps_z", self.eps_z), ("du", self.du)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::Validation(format!("FORM {name} must be positive, got {v}")));
            }
        }
        if self.trial_loops == 0 {
            return Err(Error::Validation("FORM trial_loops must be at least 1".into()));
        }
        Ok(())
    }
}

/// FORM estimator.
#[derive(Debug, Clone)]
pub struct Form {
    config: FormConfig,
}

impl Form {
    /// Name reported in results.
    pub const NAME: &'static str = "FORM";

    /// Create with validated settings.
    pub fn new(config: FormConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Settings.
    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    /// Run all trial loops from `start`.
    pub fn calc_from(&self, model: &Model<'_>, start: &[f64]) -> Result<ReliabilityResult> {
        if start.len() != model.n_active() {
            return Err(Error::Validation(format!(
                "start point has {} coordinates, model has {} active variables",
                start.len(),
                model.n_active()
            )));
        }
        let mut relaxation = self.config.relaxation;
        let mut n_steps = 0;
        let mut n_evaluations = 0;
        let mut trial = 0;
        loop {
            let mut result = self.iterate(model, start.to_vec(), relaxation)?;
            n_steps += result.n_steps;
            n_evaluations += result.n_evaluations;
            result.n_steps = n_steps;
            result.n_evaluations = n_evaluations;
            trial += 1;
            if result.status != ConvergenceStatus::NoConvergence
                || trial >= self.config.trial_loops
            {
                return Ok(result);
            }
            log::debug!(
                "FORM trial {trial} did not converge; relaxation {relaxation} -> {}",
                relaxation * 0.5
            );
            relaxation *= 0.5;
        }
    }

    fn iterate(
        &self,
        model: &Model<'_>,
        mut u: Vec<f64>,
        relaxation: f64,
    ) -> Result<ReliabilityResult> {
        let cfg = &self.config;
        let n = u.len();
        let mut history: VecDeque<(Vec<f64>, f64)> = VecDeque::with_capacity(EXTRAPOLATION_WINDOW);
        let mut last: Option<AlphaBeta> = None;
        let mut n_evaluations = 0;

        for iteration in 1..=cfg.max_iterations {
            let grad = model.gradient(&u, cfg.du)?;
            n_evaluations += grad.n_evaluations;
            let sigma = norm(&grad.dzdu);

            if sigma < GRADIENT_FLOOR {
                log::warn!("FORM: zero gradient at iteration {iteration}");
                let direction = match last {
                    Some(ab) => ab,
                    None => {
                        let beta = if grad.z < 0.0 { -BETA_MAX } else { BETA_MAX };
                        AlphaBeta::isotropic(n, beta)
                    }
                };
                return self.finish(
                    model,
                    ConvergenceStatus::NoConvergence,
                    direction,
                    u,
                    iteration,
                    n_evaluations,
                );
            }

            let beta = (grad.z - dot(&grad.dzdu, &u)) / sigma;
            let alpha: Vec<f64> = grad.dzdu.iter().map(|g| g / sigma).collect();
            let direction = AlphaBeta::new(beta, alpha);

            if history.len() == EXTRAPOLATION_WINDOW {
                history.pop_front();
            }
            history.push_back((u.clone(), beta));

            let z_residual = (grad.z / sigma).abs();
            let beta_residual = (beta * beta - dot(&u, &u)).abs() / (beta * beta).max(1.0);
            let converged = z_residual < cfg.eps_z && beta_residual < cfg.eps_beta;

            if model.report(iteration, cfg.max_iterations, beta, z_residual.max(beta_residual)) {
                return self.finish(
                    model,
                    ConvergenceStatus::AbortedByUser,
                    direction,
                    u,
                    iteration,
                    n_evaluations,
                );
            }
            if converged {
                return self.finish(
                    model,
                    ConvergenceStatus::Success,
                    direction,
                    u,
                    iteration,
                    n_evaluations,
                );
            }

            let target = direction.design_point();
            for (ui, ti) in u.iter_mut().zip(&target) {
                *ui = (1.0 - relaxation) * *ui + relaxation * ti;
            }
            last = Some(direction);
        }

        let direction = extrapolate(&history, last);
        log::warn!(
            "FORM did not converge in {} iterations; extrapolated beta = {:.4}",
            cfg.max_iterations,
            direction.beta()
        );
        let u = direction.design_point();
        self.finish(
            model,
            ConvergenceStatus::NoConvergence,
            direction,
            u,
            cfg.max_iterations,
            n_evaluations,
        )
    }

    fn finish(
        &self,
        model: &Model<'_>,
        status: ConvergenceStatus,
        direction: AlphaBeta,
        u: Vec<f64>,
        n_steps: usize,
        n_evaluations: usize,
    ) -> Result<ReliabilityResult> {
        Ok(ReliabilityResult {
            status,
            x: model.x(&u)?,
            direction,
            u,
            method: Self::NAME.to_string(),
            n_steps,
            n_evaluations,
        })
    }
}

/// Estimate from the mean of the last iterates.
fn extrapolate(history: &VecDeque<(Vec<f64>, f64)>, last: Option<AlphaBeta>) -> AlphaBeta {
    let k = history.len().max(1) as f64;
    let n = history.front().map_or(0, |(u, _)| u.len());
    let mut mean_u = vec![0.0; n];
    let mut mean_beta = 0.0;
    for (u, beta) in history {
        for (m, v) in mean_u.iter_mut().zip(u) {
            *m += v / k;
        }
        mean_beta += beta / k;
    }
    let r = norm(&mean_u);
    if r > 0.0 {
        let beta = if mean_beta < 0.0 { -r } else { r };
        AlphaBeta::new(beta, mean_u.iter().map(|v| -v / beta).collect())
    } else {
        match last {
            Some(ab) => ab.with_beta(mean_beta),
            None => AlphaBeta::isotropic(n, mean_beta),
        }
    }
}

impl ReliabilityMethod for Form {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult> {
        let start = start_point(&self.config.start, model)?;
        let mut result = self.calc_from(model, &start.u)?;
        result.n_evaluations += start.n_evaluations;
        Ok(result)
    }

    fn calc_seeded(
        &self,
        model: &Model<'_>,
        seed: &ReliabilityResult,
    ) -> Result<ReliabilityResult> {
        if seed.u.len() == model.n_active() && seed.u.iter().all(|v| v.is_finite()) {
            self.calc_from(model, &seed.u)
        } else {
            self.calc(model)
        }
    }
}
