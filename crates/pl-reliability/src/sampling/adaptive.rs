//! Adaptive importance sampling.
//!
//! Repeats importance sampling, moving the density towards the failure
//! domain until the failing fraction of a run is balanced:
//!
//! - too few failures: widen the density and restart the random source
//! - unbalanced fraction: re-centre on the current design point estimate
//! - balanced: accept, optionally after one larger final run

use pl_core::{Error, RandomSource, Result};
use serde::{Deserialize, Serialize};

use super::{
    AlphaEstimate, ImportanceDensity, RunOutcome, SampleBuffer, SamplingConfig, run_buffered,
};
use crate::method::ReliabilityMethod;
use crate::model::Model;
use crate::result::{ConvergenceStatus, ReliabilityResult};

/// Adaptive importance sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveImportanceSamplingConfig {
    /// Settings of every inner run
    pub sampling: SamplingConfig,
    /// Initial density centre; empty means the origin
    pub start_offset: Vec<f64>,
    /// Initial variance factor
    pub start_variance_factor: f64,
    /// Upper bound on inner runs (the final run excluded)
    pub max_loops: usize,
    /// Failures needed before the density is moved; fewer widen it instead
    pub min_failed: usize,
    /// A run is balanced when its failing fraction lies in `[f, 1 - f]`
    pub balanced_fraction: f64,
    /// Variance multiplier applied when a run has too few failures
    pub variance_increase: f64,
    /// `max_samples` multiplier of the final run; `<= 1` skips it
    pub final_run_scale: f64,
    /// Re-centre on the raw closest failing sample instead of `-beta·alpha`
    pub raw_offset_update: bool,
}

impl Default for AdaptiveImportanceSamplingConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            start_offset: Vec::new(),
            start_variance_factor: 1.0,
            max_loops: 10,
            min_failed: 10,
            balanced_fraction: 0.1,
            variance_increase: 1.5,
            final_run_scale: 1.0,
            raw_offset_update: false,
        }
    }
}

impl AdaptiveImportanceSamplingConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        if self.max_loops == 0 {
            return Err(Error::Validation("max_loops must be positive".into()));
        }
        if !(self.balanced_fraction > 0.0 && self.balanced_fraction < 0.5) {
            return Err(Error::Validation(format!(
                "balanced_fraction must lie in (0, 0.5), got {}",
                self.balanced_fraction
            )));
        }
        if !(self.variance_increase.is_finite() && self.variance_increase > 1.0) {
            return Err(Error::Validation(format!(
                "variance_increase must exceed 1, got {}",
                self.variance_increase
            )));
        }
        if !(self.start_variance_factor.is_finite() && self.start_variance_factor > 0.0) {
            return Err(Error::Validation("start_variance_factor must be positive".into()));
        }
        if !self.final_run_scale.is_finite() {
            return Err(Error::Validation("final_run_scale must be finite".into()));
        }
        Ok(())
    }
}

/// Adaptive importance sampling.
#[derive(Debug, Clone)]
pub struct AdaptiveImportanceSampling {
    config: AdaptiveImportanceSamplingConfig,
}

impl AdaptiveImportanceSampling {
    /// Name reported in results.
    pub const NAME: &'static str = "AdaptiveImportanceSampling";

    /// Create with validated settings.
    pub fn new(config: AdaptiveImportanceSamplingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Settings.
    pub fn config(&self) -> &AdaptiveImportanceSamplingConfig {
        &self.config
    }

    fn initial_density(&self, n: usize) -> Result<ImportanceDensity> {
        let offset = if self.config.start_offset.is_empty() {
            vec![0.0; n]
        } else {
            self.config.start_offset.clone()
        };
        ImportanceDensity::new(offset, vec![self.config.start_variance_factor; n])
    }

    fn next_offset(&self, outcome: &RunOutcome, n: usize) -> Option<Vec<f64>> {
        if self.config.raw_offset_update {
            outcome.tally.nearest_failure().map(<[f64]>::to_vec)
        } else {
            Some(outcome.tally.direction(n, AlphaEstimate::WeightedMean).design_point())
        }
    }
}

impl ReliabilityMethod for AdaptiveImportanceSampling {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult> {
        let cfg = &self.config;
        let n = model.n_active();
        let mut density = self.initial_density(n)?;
        let mut rng = cfg.sampling.random();
        let mut buffer = SampleBuffer::circular();
        let mut n_steps = 0;
        let mut n_evaluations = 0;

        let finish = |outcome: RunOutcome, status, n_steps, n_evaluations| {
            let mut result = outcome.into_result(model, Self::NAME, AlphaEstimate::WeightedMean)?;
            result.status = status;
            result.n_steps = n_steps;
            result.n_evaluations = n_evaluations;
            Ok::<_, Error>(result)
        };

        let mut last: Option<RunOutcome> = None;
        for iteration in 1..=cfg.max_loops {
            let outcome = run_buffered(model, &cfg.sampling, &density, &mut rng, &mut buffer)?;
            n_steps += outcome.tally.n_samples();
            n_evaluations += outcome.n_evaluations;
            if outcome.status == ConvergenceStatus::AbortedByUser {
                return finish(outcome, ConvergenceStatus::AbortedByUser, n_steps, n_evaluations);
            }

            let n_samples = outcome.tally.n_samples();
            let n_failed = outcome.tally.n_failed();
            let fraction = n_failed as f64 / n_samples as f64;
            log::debug!(
                "AIS loop {iteration}: {n_failed}/{n_samples} failed, beta = {:.4}",
                outcome.tally.beta()
            );

            if n_failed < cfg.min_failed {
                density = density.with_variance_scaled(cfg.variance_increase)?;
                rng.restart();
                buffer.clear();
                last = Some(outcome);
                continue;
            }

            if fraction >= cfg.balanced_fraction && fraction <= 1.0 - cfg.balanced_fraction {
                if cfg.final_run_scale <= 1.0 {
                    let status = outcome.status;
                    return finish(outcome, status, n_steps, n_evaluations);
                }
                let final_config = SamplingConfig {
                    max_samples: (cfg.sampling.max_samples as f64 * cfg.final_run_scale).ceil()
                        as usize,
                    ..cfg.sampling.clone()
                };
                let outcome = run_buffered(model, &final_config, &density, &mut rng, &mut buffer)?;
                n_steps += outcome.tally.n_samples();
                n_evaluations += outcome.n_evaluations;
                let status = outcome.status;
                return finish(outcome, status, n_steps, n_evaluations);
            }

            if let Some(offset) = self.next_offset(&outcome, n) {
                density = density.with_offset(offset)?;
            }
            last = Some(outcome);
        }

        log::warn!("AIS did not balance within {} loops; returning the last run", cfg.max_loops);
        match last {
            Some(outcome) => {
                finish(outcome, ConvergenceStatus::NoConvergence, n_steps, n_evaluations)
            }
            None => Ok(ReliabilityResult::not_started(Self::NAME, n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FnLimitState;
    use crate::stochast::StochasticSetup;
    use approx::assert_relative_eq;
    use pl_core::Distribution;
    use pl_prob::Normal;

    fn model_parts() -> StochasticSetup {
        let d: Vec<Box<dyn Distribution>> =
            vec![Box::new(Normal::standard()), Box::new(Normal::standard())];
        StochasticSetup::independent(d).unwrap()
    }

    #[test]
    fn test_moves_towards_failure_domain() {
        let s = model_parts();
        let lsf = FnLimitState::new(|d| Ok(3.5 - d.x(0)?));
        let model = Model::new(&s, &lsf).unwrap();
        let cfg = AdaptiveImportanceSamplingConfig {
            sampling: SamplingConfig {
                max_samples: 5000,
                var_coeff_failure: 0.02,
                seed: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        let r = AdaptiveImportanceSampling::new(cfg).unwrap().calc(&model).unwrap();
        assert_relative_eq!(r.beta(), 3.5, epsilon = 0.05);
        assert_relative_eq!(r.alpha()[0], -1.0, epsilon = 0.02);
        assert!(r.n_steps > 5000);
    }

    #[test]
    fn test_unreachable_failure_returns_last_run() {
        let s = model_parts();
        let lsf = FnLimitState::new(|_| Ok(1.0));
        let model = Model::new(&s, &lsf).unwrap();
        let cfg = AdaptiveImportanceSamplingConfig {
            sampling: SamplingConfig { min_samples: 100, max_samples: 200, ..Default::default() },
            max_loops: 3,
            ..Default::default()
        };
        let r = AdaptiveImportanceSampling::new(cfg).unwrap().calc(&model).unwrap();
        assert_eq!(r.status, ConvergenceStatus::NoConvergence);
        assert_eq!(r.n_steps, 600);
    }

    #[test]
    fn test_offset_inside_failure_domain_is_recentred() {
        let s = model_parts();
        let lsf = FnLimitState::new(|d| Ok(1.0 - d.x(0)?));
        let model = Model::new(&s, &lsf).unwrap();
        let cfg = AdaptiveImportanceSamplingConfig {
            sampling: SamplingConfig {
                min_samples: 1000,
                max_samples: 1000,
                seed: 8,
                ..Default::default()
            },
            start_offset: vec![4.0, 0.0],
            max_loops: 3,
            ..Default::default()
        };
        let r = AdaptiveImportanceSampling::new(cfg).unwrap().calc(&model).unwrap();
        // Balanced on the second loop after one re-centring.
        assert_eq!(r.n_steps, 2000);
        assert_relative_eq!(r.beta(), 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_abort_inside_inner_run() {
        struct StopAt(usize);
        impl pl_core::ProgressMonitor for StopAt {
            fn report(&self, progress: &pl_core::Progress) -> pl_core::Control {
                if progress.step >= self.0 {
                    pl_core::Control::Abort
                } else {
                    pl_core::Control::Continue
                }
            }
        }
        let s = model_parts();
        let lsf = FnLimitState::new(|d| Ok(3.5 - d.x(0)?));
        let monitor = StopAt(400);
        let model = Model::new(&s, &lsf).unwrap().with_monitor(&monitor);
        let cfg = AdaptiveImportanceSamplingConfig {
            sampling: SamplingConfig { max_samples: 5000, ..Default::default() },
            ..Default::default()
        };
        let r = AdaptiveImportanceSampling::new(cfg).unwrap().calc(&model).unwrap();
        assert_eq!(r.status, ConvergenceStatus::AbortedByUser);
        assert_eq!(r.n_steps, 400);
    }

    #[test]
    fn test_invalid_config() {
        let cfg =
            AdaptiveImportanceSamplingConfig { balanced_fraction: 0.7, ..Default::default() };
        assert!(AdaptiveImportanceSampling::new(cfg).is_err());
    }
}
