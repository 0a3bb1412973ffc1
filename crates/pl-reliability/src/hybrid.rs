//! Hybrid methods chaining two estimators.
//!
//! - *fallback*: run the second stage only when the first result is not
//!   accepted (no convergence, or `beta` outside an envelope)
//! - *refine*: always run the second stage from the first result; keep the
//!   first `beta` and take `alpha` from the second stage when it converged
//!
//! Step and evaluation counts are summed and stage names joined with `+`.

use pl_core::Result;
use pl_prob::BETA_MAX;
use serde::{Deserialize, Serialize};

use crate::alpha_beta::AlphaBeta;
use crate::directional::{DirectionalSampling, DirectionalSamplingConfig};
use crate::form::{Form, FormConfig};
use crate::method::ReliabilityMethod;
use crate::model::Model;
use crate::result::{ConvergenceStatus, ReliabilityResult};
use crate::root_finding::{LoopTermination, RayMethod};
use crate::sampling::{
    CrudeMonteCarlo, ImportanceSampling, ImportanceSamplingConfig, SamplingConfig,
};

/// Range of `beta` accepted from a first stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BetaEnvelope {
    /// Lowest accepted `beta`
    pub fd_threshold: f64,
    /// Highest accepted `beta`
    pub beta_max: f64,
}

impl Default for BetaEnvelope {
    fn default() -> Self {
        Self { fd_threshold: 0.0, beta_max: BETA_MAX }
    }
}

impl BetaEnvelope {
    /// `true` when `result` converged with `beta` inside the envelope.
    pub fn accepts(&self, result: &ReliabilityResult) -> bool {
        let beta = result.beta();
        result.converged() && beta >= self.fd_threshold && beta <= self.beta_max
    }
}

#[derive(Debug, Clone, Copy)]
enum Chain {
    Fallback(BetaEnvelope),
    Refine,
}

/// Two-stage estimator.
pub struct Hybrid {
    name: String,
    first: Box<dyn ReliabilityMethod>,
    second: Box<dyn ReliabilityMethod>,
    chain: Chain,
}

impl Hybrid {
    /// Run `second` when `first` is not accepted by `envelope`.
    pub fn fallback(
        name: &str,
        first: Box<dyn ReliabilityMethod>,
        second: Box<dyn ReliabilityMethod>,
        envelope: BetaEnvelope,
    ) -> Self {
        Self { name: name.to_string(), first, second, chain: Chain::Fallback(envelope) }
    }

    /// Refine the direction of `first` with `second`.
    pub fn refine(
        name: &str,
        first: Box<dyn ReliabilityMethod>,
        second: Box<dyn ReliabilityMethod>,
    ) -> Self {
        Self { name: name.to_string(), first, second, chain: Chain::Refine }
    }

    /// FORM, falling back to directional sampling.
    pub fn fdir(
        form: FormConfig,
        ds: DirectionalSamplingConfig,
        envelope: BetaEnvelope,
    ) -> Result<Self> {
        Ok(Self::fallback(
            "FDIR",
            Box::new(Form::new(form)?),
            Box::new(DirectionalSampling::new(ds)?),
            envelope,
        ))
    }

    /// Directional sampling refined by FORM.
    pub fn dsfi(ds: DirectionalSamplingConfig, form: FormConfig) -> Result<Self> {
        Ok(Self::refine(
            "DSFI",
            Box::new(DirectionalSampling::new(ds)?),
            Box::new(Form::new(form)?),
        ))
    }

    /// [`Hybrid::dsfi`] with the first-negative ray policy.
    pub fn dsfi_hr(ds: DirectionalSamplingConfig, form: FormConfig) -> Result<Self> {
        let ds = DirectionalSamplingConfig {
            ray_method: RayMethod::LinearLoop(LoopTermination::FirstNegative),
            ..ds
        };
        Ok(Self::refine(
            "DSFI-HR",
            Box::new(DirectionalSampling::new(ds)?),
            Box::new(Form::new(form)?),
        ))
    }

    /// FORM, falling back to DSFI.
    pub fn form_dsfi(
        form: FormConfig,
        ds: DirectionalSamplingConfig,
        envelope: BetaEnvelope,
    ) -> Result<Self> {
        Ok(Self::fallback(
            "FORM+DSFI",
            Box::new(Form::new(form.clone())?),
            Box::new(Self::dsfi(ds, form)?),
            envelope,
        ))
    }

    /// Crude Monte Carlo refined by FORM.
    pub fn cmc_form(sampling: SamplingConfig, form: FormConfig) -> Result<Self> {
        Ok(Self::refine(
            "CMC-FORM",
            Box::new(CrudeMonteCarlo::new(sampling)?),
            Box::new(Form::new(form)?),
        ))
    }

    /// Importance sampling refined by FORM.
    pub fn cmim_form(is: ImportanceSamplingConfig, form: FormConfig) -> Result<Self> {
        Ok(Self::refine(
            "CMIM-FORM",
            Box::new(ImportanceSampling::new(is)?),
            Box::new(Form::new(form)?),
        ))
    }

    fn refine_direction(
        &self,
        model: &Model<'_>,
        first: &ReliabilityResult,
        second: ReliabilityResult,
    ) -> Result<ReliabilityResult> {
        if !second.converged() {
            log::debug!(
                "{}: {} did not converge; keeping {} direction",
                self.name,
                second.method,
                first.method
            );
            let mut merged = first.clone();
            merged.n_steps += second.n_steps;
            merged.n_evaluations += second.n_evaluations;
            merged.method = format!("{}+{}", first.method, second.method);
            return Ok(merged);
        }
        let direction = AlphaBeta::new(first.beta(), second.alpha().to_vec());
        let u = direction.design_point();
        let refined = ReliabilityResult {
            status: first.status,
            x: model.x(&u)?,
            direction,
            u,
            method: second.method.clone(),
            n_steps: second.n_steps,
            n_evaluations: second.n_evaluations,
        };
        Ok(refined.after_stage(first))
    }
}

impl ReliabilityMethod for Hybrid {
    fn name(&self) -> &str {
        &self.name
    }

    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult> {
        let first = self.first.calc(model)?;
        if first.status == ConvergenceStatus::AbortedByUser {
            return Ok(first);
        }
        match self.chain {
            Chain::Fallback(envelope) => {
                if envelope.accepts(&first) {
                    return Ok(first);
                }
                log::debug!(
                    "{}: {} not accepted (status {:?}, beta {:.4}); running {}",
                    self.name,
                    first.method,
                    first.status,
                    first.beta(),
                    self.second.name()
                );
                let second = self.second.calc_seeded(model, &first)?;
                Ok(second.after_stage(&first))
            }
            Chain::Refine => {
                let second = self.second.calc_seeded(model, &first)?;
                if second.status == ConvergenceStatus::AbortedByUser {
                    return Ok(second.after_stage(&first));
                }
                self.refine_direction(model, &first, second)
            }
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

    fn setup() -> StochasticSetup {
        let d: Vec<Box<dyn Distribution>> =
            vec![Box::new(Normal::standard()), Box::new(Normal::standard())];
        StochasticSetup::independent(d).unwrap()
    }

    fn ds_config() -> DirectionalSamplingConfig {
        DirectionalSamplingConfig {
            sampling: SamplingConfig { max_samples: 20_000, seed: 4, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn test_fdir_accepts_converged_form() {
        let s = setup();
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)? - d.x(1)?));
        let model = Model::new(&s, &lsf).unwrap();
        let h = Hybrid::fdir(FormConfig::default(), ds_config(), BetaEnvelope::default()).unwrap();
        let r = h.calc(&model).unwrap();
        assert_eq!(r.method, "FORM");
        assert_relative_eq!(r.beta(), 2f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_fdir_falls_back_outside_envelope() {
        let s = setup();
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)? - d.x(1)?));
        let model = Model::new(&s, &lsf).unwrap();
        let envelope = BetaEnvelope { fd_threshold: 0.0, beta_max: 1.0 };
        let r = Hybrid::fdir(FormConfig::default(), ds_config(), envelope)
            .unwrap()
            .calc(&model)
            .unwrap();
        assert_eq!(r.method, "FORM+DirectionalSampling");
        assert_relative_eq!(r.beta(), 2f64.sqrt(), epsilon = 0.1);
        assert!(r.n_steps > 5);
    }

    #[test]
    fn test_dsfi_keeps_sampled_beta_and_form_alpha() {
        let s = setup();
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)? - d.x(1)?));
        let model = Model::new(&s, &lsf).unwrap();
        let ds = DirectionalSampling::new(ds_config()).unwrap().calc(&model).unwrap();
        let r = Hybrid::dsfi(ds_config(), FormConfig::default()).unwrap().calc(&model).unwrap();
        assert_eq!(r.method, "DirectionalSampling+FORM");
        assert_eq!(r.beta(), ds.beta());
        assert_relative_eq!(r.alpha()[0], -1.0 / 2f64.sqrt(), epsilon = 1e-6);
        assert!(r.n_steps > ds.n_steps);
    }

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

    #[test]
    fn test_abort_in_fallback_stage() {
        let s = setup();
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)? - d.x(1)?));
        let monitor = StopAt(100);
        let model = Model::new(&s, &lsf).unwrap().with_monitor(&monitor);
        let envelope = BetaEnvelope { fd_threshold: 0.0, beta_max: 1.0 };
        let r = Hybrid::fdir(FormConfig::default(), ds_config(), envelope)
            .unwrap()
            .calc(&model)
            .unwrap();
        assert_eq!(r.status, ConvergenceStatus::AbortedByUser);
        assert_eq!(r.method, "FORM+DirectionalSampling");
        assert!(r.n_steps > 100 && r.n_steps < 100 + 50);
    }

    #[test]
    fn test_abort_in_first_stage_skips_refinement() {
        let s = setup();
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)? - d.x(1)?));
        let monitor = StopAt(60);
        let model = Model::new(&s, &lsf).unwrap().with_monitor(&monitor);
        let r = Hybrid::dsfi(ds_config(), FormConfig::default()).unwrap().calc(&model).unwrap();
        assert_eq!(r.status, ConvergenceStatus::AbortedByUser);
        assert_eq!(r.method, "DirectionalSampling");
        assert_eq!(r.n_steps, 60);
    }

    #[test]
    fn test_form_dsfi_nests() {
        let s = setup();
        let lsf = FnLimitState::new(|_| Ok(1.0));
        let model = Model::new(&s, &lsf).unwrap();
        let mut ds = ds_config();
        ds.sampling.max_samples = 2000;
        let r = Hybrid::form_dsfi(FormConfig::default(), ds, BetaEnvelope::default())
            .unwrap()
            .calc(&model)
            .unwrap();
        assert_eq!(r.method, "FORM+DirectionalSampling+FORM");
        assert_eq!(r.beta(), BETA_MAX);
    }
}
