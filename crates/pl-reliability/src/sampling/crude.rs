//! Crude Monte Carlo.

use pl_core::Result;

use super::{
    AlphaEstimate, ImportanceDensity, SampleBuffer, SamplingConfig, run_buffered, run_sequential,
};
use crate::method::ReliabilityMethod;
use crate::model::Model;
use crate::result::ReliabilityResult;

/// Plain sampling of `u ~ N(0, I)` with binomial statistics.
///
/// `alpha` comes from the failing sample closest to the origin (the closest
/// non-failing one when `pf > 0.5`).
#[derive(Debug, Clone)]
pub struct CrudeMonteCarlo {
    config: SamplingConfig,
}

impl CrudeMonteCarlo {
    /// Name reported in results.
    pub const NAME: &'static str = "CrudeMonteCarlo";

    /// Create with validated settings.
    pub fn new(config: SamplingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Settings.
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }
}

impl ReliabilityMethod for CrudeMonteCarlo {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult> {
        let density = ImportanceDensity::standard(model.n_active());
        let mut rng = self.config.random();
        let outcome = if self.config.buffered {
            run_buffered(model, &self.config, &density, &mut rng, &mut SampleBuffer::one_shot())?
        } else {
            run_sequential(model, &self.config, &density, &mut rng)?
        };
        outcome.into_result(model, Self::NAME, AlphaEstimate::Nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FnLimitState;
    use crate::result::ConvergenceStatus;
    use crate::stochast::StochasticSetup;
    use approx::assert_relative_eq;
    use pl_core::Distribution;
    use pl_prob::Normal;

    #[test]
    fn test_half_space() {
        let d: Vec<Box<dyn Distribution>> =
            vec![Box::new(Normal::standard()), Box::new(Normal::standard())];
        let s = StochasticSetup::independent(d).unwrap();
        let lsf = FnLimitState::new(|d| Ok(1.0 - d.x(0)?));
        let model = Model::with_threads(&s, &lsf, 2).unwrap();
        let cfg = SamplingConfig { var_coeff_failure: 0.02, seed: 11, ..Default::default() };
        let r = CrudeMonteCarlo::new(cfg).unwrap().calc(&model).unwrap();
        assert_eq!(r.status, ConvergenceStatus::Success);
        assert_relative_eq!(r.beta(), 1.0, epsilon = 0.05);
        // Nearest failing sample lies close to the u0 axis beyond 1.
        assert!(r.alpha()[0] < -0.8);
    }

    #[test]
    fn test_rare_event_hits_budget() {
        let d: Vec<Box<dyn Distribution>> = vec![Box::new(Normal::standard())];
        let s = StochasticSetup::independent(d).unwrap();
        let lsf = FnLimitState::new(|d| Ok(10.0 - d.x(0)?));
        let model = Model::new(&s, &lsf).unwrap();
        let cfg = SamplingConfig { max_samples: 2000, ..Default::default() };
        let r = CrudeMonteCarlo::new(cfg).unwrap().calc(&model).unwrap();
        assert_eq!(r.status, ConvergenceStatus::NoConvergence);
        assert_eq!(r.n_steps, 2000);
        assert_eq!(r.beta(), pl_prob::BETA_MAX);
    }
}
