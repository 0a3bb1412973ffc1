//! Importance sampling with a fixed shifted/scaled normal density.

use pl_core::{Error, Result};
use serde::{Deserialize, Serialize};

use super::{
    AlphaEstimate, ImportanceDensity, SampleBuffer, SamplingConfig, run_buffered, run_sequential,
};
use crate::method::ReliabilityMethod;
use crate::model::Model;
use crate::result::ReliabilityResult;

/// Importance sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceSamplingConfig {
    /// Budget, targets and random source
    pub sampling: SamplingConfig,
    /// Density centre; empty means the origin (or the seed's design point
    /// when run as a hybrid stage)
    pub offset: Vec<f64>,
    /// Variance factor applied to every variable
    pub variance_factor: f64,
}

impl Default for ImportanceSamplingConfig {
    fn default() -> Self {
        Self { sampling: SamplingConfig::default(), offset: Vec::new(), variance_factor: 1.0 }
    }
}

impl ImportanceSamplingConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        if !(self.variance_factor.is_finite() && self.variance_factor > 0.0) {
            return Err(Error::Validation(format!(
                "variance_factor must be positive, got {}",
                self.variance_factor
            )));
        }
        Ok(())
    }

    pub(crate) fn density(&self, n: usize, offset: Option<&[f64]>) -> Result<ImportanceDensity> {
        let offset = match offset {
            Some(u) => u.to_vec(),
            None if self.offset.is_empty() => vec![0.0; n],
            None => self.offset.clone(),
        };
        if offset.len() != n {
            return Err(Error::Validation(format!(
                "importance offset has {} entries, model has {n} active variables",
                offset.len()
            )));
        }
        ImportanceDensity::new(offset, vec![self.variance_factor; n])
    }
}

/// Importance sampling.
#[derive(Debug, Clone)]
pub struct ImportanceSampling {
    config: ImportanceSamplingConfig,
}

impl ImportanceSampling {
    /// Name reported in results.
    pub const NAME: &'static str = "ImportanceSampling";

    /// Create with validated settings.
    pub fn new(config: ImportanceSamplingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Settings.
    pub fn config(&self) -> &ImportanceSamplingConfig {
        &self.config
    }

    /// Run with an explicit density.
    pub fn calc_with(
        &self,
        model: &Model<'_>,
        density: &ImportanceDensity,
    ) -> Result<ReliabilityResult> {
        let cfg = &self.config.sampling;
        let mut rng = cfg.random();
        let outcome = if cfg.buffered {
            run_buffered(model, cfg, density, &mut rng, &mut SampleBuffer::one_shot())?
        } else {
            run_sequential(model, cfg, density, &mut rng)?
        };
        outcome.into_result(model, Self::NAME, AlphaEstimate::WeightedMean)
    }
}

impl ReliabilityMethod for ImportanceSampling {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult> {
        let density = self.config.density(model.n_active(), None)?;
        self.calc_with(model, &density)
    }

    fn calc_seeded(
        &self,
        model: &Model<'_>,
        seed: &ReliabilityResult,
    ) -> Result<ReliabilityResult> {
        let offset = (self.config.offset.is_empty()
            && seed.u.len() == model.n_active()
            && seed.u.iter().all(|v| v.is_finite()))
        .then_some(seed.u.as_slice());
        let density = self.config.density(model.n_active(), offset)?;
        self.calc_with(model, &density)
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

    fn run(offset: Vec<f64>, buffered: bool, threads: usize) -> ReliabilityResult {
        let d: Vec<Box<dyn Distribution>> =
            vec![Box::new(Normal::standard()), Box::new(Normal::standard())];
        let s = StochasticSetup::independent(d).unwrap();
        let lsf = FnLimitState::new(|d| Ok(4.0 - (d.x(0)? + d.x(1)?) / 2f64.sqrt()));
        let model = Model::with_threads(&s, &lsf, threads).unwrap();
        let cfg = ImportanceSamplingConfig {
            sampling: SamplingConfig {
                var_coeff_failure: 0.05,
                seed: 3,
                buffered,
                chunk_size: 10,
                ..Default::default()
            },
            offset,
            variance_factor: 1.0,
        };
        ImportanceSampling::new(cfg).unwrap().calc(&model).unwrap()
    }

    #[test]
    fn test_shifted_density_finds_rare_event() {
        let c = 4.0 / 2f64.sqrt();
        let r = run(vec![c, c], false, 1);
        assert!(r.converged());
        assert_relative_eq!(r.beta(), 4.0, epsilon = 0.05);
        assert_relative_eq!(r.alpha()[0], -1.0 / 2f64.sqrt(), epsilon = 0.05);
    }

    #[test]
    fn test_buffered_matches_sequential() {
        let c = 4.0 / 2f64.sqrt();
        let seq = run(vec![c, c], false, 1);
        let par = run(vec![c, c], true, 4);
        assert_eq!(seq.beta(), par.beta());
        assert_eq!(seq.n_steps, par.n_steps);
        assert_eq!(seq.alpha(), par.alpha());
    }

    #[test]
    fn test_offset_length_checked() {
        let d: Vec<Box<dyn Distribution>> = vec![Box::new(Normal::standard())];
        let s = StochasticSetup::independent(d).unwrap();
        let lsf = FnLimitState::new(|d| d.x(0));
        let model = Model::new(&s, &lsf).unwrap();
        let cfg = ImportanceSamplingConfig { offset: vec![1.0, 2.0], ..Default::default() };
        assert!(ImportanceSampling::new(cfg).unwrap().calc(&model).is_err());
    }
}
