//! Method selection from a flat settings record.
//!
//! [`Settings`] is what front ends (CLI, bindings, config files) hand over:
//! a method name plus every tunable in one serde-friendly struct. It is
//! turned into the immutable per-method configs and a boxed
//! [`ReliabilityMethod`]; [`run`] evaluates it and qualifies any error with
//! the method name.

use std::path::Path;

use pl_core::{Error, ProgressMonitor, Result};
use pl_prob::{BETA_MAX, GeneratorKind};
use serde::{Deserialize, Serialize};

use crate::correlation::{
    Correlation, CorrelationPair, GaussianCorrelation, IdentityCorrelation,
    RobustGaussianCorrelation,
};
use crate::directional::{DirectionalSampling, DirectionalSamplingConfig};
use crate::form::{Form, FormConfig};
use crate::hybrid::{BetaEnvelope, Hybrid};
use crate::method::ReliabilityMethod;
use crate::model::{LimitState, Model};
use crate::numerical_integration::{NumericalIntegration, NumericalIntegrationConfig};
use crate::result::ReliabilityResult;
use crate::root_finding::RayMethod;
use crate::sampling::{
    AdaptiveImportanceSampling, AdaptiveImportanceSamplingConfig, CrudeMonteCarlo,
    ImportanceSampling, ImportanceSamplingConfig, SamplingConfig,
};
use crate::start::StartMethod;
use crate::stochast::StochasticSetup;

/// Selectable reliability methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// First-order reliability method
    #[default]
    Form,
    /// Directional sampling
    DirectionalSampling,
    /// Crude Monte Carlo
    CrudeMonteCarlo,
    /// Importance sampling with a fixed density
    ImportanceSampling,
    /// Importance sampling with an adapted density
    AdaptiveImportanceSampling,
    /// Grid integration in standard-normal space
    NumericalIntegration,
    /// FORM, directional sampling if FORM fails
    Fdir,
    /// Directional sampling, direction from FORM
    Dsfi,
    /// DSFI with first-negative ray roots
    DsfiHr,
    /// FORM, DSFI if FORM fails
    FormDsfi,
    /// Crude Monte Carlo, direction from FORM
    CmcForm,
    /// Importance sampling, direction from FORM
    CmImForm,
}

impl MethodKind {
    /// Name reported in results and errors.
    pub fn name(self) -> &'static str {
        match self {
            MethodKind::Form => Form::NAME,
            MethodKind::DirectionalSampling => DirectionalSampling::NAME,
            MethodKind::CrudeMonteCarlo => CrudeMonteCarlo::NAME,
            MethodKind::ImportanceSampling => ImportanceSampling::NAME,
            MethodKind::AdaptiveImportanceSampling => AdaptiveImportanceSampling::NAME,
            MethodKind::NumericalIntegration => NumericalIntegration::NAME,
            MethodKind::Fdir => "FDIR",
            MethodKind::Dsfi => "DSFI",
            MethodKind::DsfiHr => "DSFI-HR",
            MethodKind::FormDsfi => "FORM+DSFI",
            MethodKind::CmcForm => "CMC-FORM",
            MethodKind::CmImForm => "CMIM-FORM",
        }
    }
}

/// Correlation model built from [`Settings::correlation_pairs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    /// Ignore the pairs; all variables independent
    #[default]
    Identity,
    /// Gaussian copula, full-correlation chains rejected
    Gaussian,
    /// Gaussian copula, full-correlation chains resolved
    Robust,
}

/// Flat settings of every method.
///
/// Unset fields take the defaults of the per-method configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Method to run
    pub method: MethodKind,
    /// Worker threads for limit-state evaluation (`0` = all cores)
    pub n_threads: usize,

    /// FORM iterations per trial
    pub max_iterations: usize,
    /// FORM relaxation factor
    pub relaxation: f64,
    /// FORM tolerance on beta
    pub eps_beta: f64,
    /// FORM tolerance on z
    pub eps_z: f64,
    /// Finite-difference step in `u`
    pub du: f64,
    /// FORM trials, halving the relaxation each time
    pub trial_loops: usize,
    /// FORM start point
    pub start: StartMethod,

    /// Minimum samples or directions
    pub min_samples: usize,
    /// Maximum samples or directions; `None` for the method's own default
    pub max_samples: Option<usize>,
    /// Target coefficient of variation of `pf`
    pub var_coeff_failure: f64,
    /// Target coefficient of variation of `1 - pf`
    pub var_coeff_no_failure: f64,
    /// Random seed
    pub seed: u64,
    /// Random generator
    pub generator: GeneratorKind,
    /// Evaluate samples in parallel chunks
    pub buffered: bool,
    /// Samples per chunk (`0` = ten per thread)
    pub chunk_size: usize,

    /// Coarse step along directional-sampling rays
    pub ray_step: f64,
    /// Longest ray searched
    pub max_ray_length: f64,
    /// Root tolerance along a ray
    pub root_tolerance: f64,
    /// Root search along a ray
    pub ray_method: RayMethod,

    /// Importance-sampling mean shift (empty = origin)
    pub offset: Vec<f64>,
    /// Importance-sampling variance factor
    pub variance_factor: f64,
    /// Adaptive IS: maximum density updates
    pub max_loops: usize,
    /// Adaptive IS: minimum failures (and non-failures) per run
    pub min_failed: usize,
    /// Adaptive IS: failure fraction accepted as balanced
    pub balanced_fraction: f64,
    /// Adaptive IS: variance growth when too few failures
    pub variance_increase: f64,
    /// Adaptive IS: sample-budget scale of the final run (`1` = none)
    pub final_run_scale: f64,
    /// Adaptive IS: move the offset to the nearest failure itself
    pub raw_offset_update: bool,

    /// Numerical integration lower bound in `u`
    pub min_u: f64,
    /// Numerical integration upper bound in `u`
    pub max_u: f64,
    /// Numerical integration cells per dimension
    pub n_cells: usize,

    /// Hybrids: lowest first-stage beta accepted
    pub fd_threshold: f64,
    /// Hybrids: highest first-stage beta accepted
    pub beta_max: f64,

    /// Correlation model
    pub correlation: CorrelationKind,
    /// Correlated variable pairs
    pub correlation_pairs: Vec<CorrelationPair>,
}

impl Default for Settings {
    fn default() -> Self {
        let form = FormConfig::default();
        let sampling = SamplingConfig::default();
        let ds = DirectionalSamplingConfig::default();
        let ais = AdaptiveImportanceSamplingConfig::default();
        let ni = NumericalIntegrationConfig::default();
        Self {
            method: MethodKind::default(),
            n_threads: 1,
            max_iterations: form.max_iterations,
            relaxation: form.relaxation,
            eps_beta: form.eps_beta,
            eps_z: form.eps_z,
            du: form.du,
            trial_loops: form.trial_loops,
            start: form.start,
            min_samples: sampling.min_samples,
            max_samples: None,
            var_coeff_failure: sampling.var_coeff_failure,
            var_coeff_no_failure: sampling.var_coeff_no_failure,
            seed: sampling.seed,
            generator: sampling.generator,
            buffered: sampling.buffered,
            chunk_size: sampling.chunk_size,
            ray_step: ds.ray_step,
            max_ray_length: ds.max_ray_length,
            root_tolerance: ds.root_tolerance,
            ray_method: ds.ray_method,
            offset: Vec::new(),
            variance_factor: 1.0,
            max_loops: ais.max_loops,
            min_failed: ais.min_failed,
            balanced_fraction: ais.balanced_fraction,
            variance_increase: ais.variance_increase,
            final_run_scale: ais.final_run_scale,
            raw_offset_update: ais.raw_offset_update,
            min_u: ni.min_u,
            max_u: ni.max_u,
            n_cells: ni.n_cells,
            fd_threshold: 0.0,
            beta_max: BETA_MAX,
            correlation: CorrelationKind::default(),
            correlation_pairs: Vec::new(),
        }
    }
}

impl Settings {
    /// Parse and validate JSON settings.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and validate a JSON settings file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the settings used by the selected method.
    pub fn validate(&self) -> Result<()> {
        self.build_method().map(|_| ())
    }

    /// FORM config.
    pub fn form_config(&self) -> FormConfig {
        FormConfig {
            max_iterations: self.max_iterations,
            relaxation: self.relaxation,
            eps_beta: self.eps_beta,
            eps_z: self.eps_z,
            du: self.du,
            trial_loops: self.trial_loops,
            start: self.start.clone(),
        }
    }

    /// Sampling config; `default_max` applies when `max_samples` is unset.
    pub fn sampling_config(&self, default_max: usize) -> SamplingConfig {
        SamplingConfig {
            min_samples: self.min_samples,
            max_samples: self.max_samples.unwrap_or(default_max),
            var_coeff_failure: self.var_coeff_failure,
            var_coeff_no_failure: self.var_coeff_no_failure,
            seed: self.seed,
            generator: self.generator,
            buffered: self.buffered,
            chunk_size: self.chunk_size,
        }
    }

    /// Directional sampling config.
    pub fn directional_config(&self) -> DirectionalSamplingConfig {
        let defaults = DirectionalSamplingConfig::default();
        DirectionalSamplingConfig {
            sampling: self.sampling_config(defaults.sampling.max_samples),
            ray_step: self.ray_step,
            max_ray_length: self.max_ray_length,
            root_tolerance: self.root_tolerance,
            ray_method: self.ray_method,
            ..defaults
        }
    }

    /// Importance sampling config.
    pub fn importance_config(&self) -> ImportanceSamplingConfig {
        ImportanceSamplingConfig {
            sampling: self.sampling_config(SamplingConfig::default().max_samples),
            offset: self.offset.clone(),
            variance_factor: self.variance_factor,
        }
    }

    /// Adaptive importance sampling config.
    pub fn adaptive_config(&self) -> AdaptiveImportanceSamplingConfig {
        AdaptiveImportanceSamplingConfig {
            sampling: self.sampling_config(SamplingConfig::default().max_samples),
            start_offset: self.offset.clone(),
            start_variance_factor: self.variance_factor,
            max_loops: self.max_loops,
            min_failed: self.min_failed,
            balanced_fraction: self.balanced_fraction,
            variance_increase: self.variance_increase,
            final_run_scale: self.final_run_scale,
            raw_offset_update: self.raw_offset_update,
        }
    }

    /// Numerical integration config.
    pub fn integration_config(&self) -> NumericalIntegrationConfig {
        NumericalIntegrationConfig { min_u: self.min_u, max_u: self.max_u, n_cells: self.n_cells }
    }

    /// Acceptance range of hybrid first stages.
    pub fn envelope(&self) -> BetaEnvelope {
        BetaEnvelope { fd_threshold: self.fd_threshold, beta_max: self.beta_max }
    }

    /// Build the selected method.
    pub fn build_method(&self) -> Result<Box<dyn ReliabilityMethod>> {
        let method: Box<dyn ReliabilityMethod> = match self.method {
            MethodKind::Form => Box::new(Form::new(self.form_config())?),
            MethodKind::DirectionalSampling => {
                Box::new(DirectionalSampling::new(self.directional_config())?)
            }
            MethodKind::CrudeMonteCarlo => Box::new(CrudeMonteCarlo::new(
                self.sampling_config(SamplingConfig::default().max_samples),
            )?),
            MethodKind::ImportanceSampling => {
                Box::new(ImportanceSampling::new(self.importance_config())?)
            }
            MethodKind::AdaptiveImportanceSampling => {
                Box::new(AdaptiveImportanceSampling::new(self.adaptive_config())?)
            }
            MethodKind::NumericalIntegration => {
                Box::new(NumericalIntegration::new(self.integration_config())?)
            }
            MethodKind::Fdir => Box::new(Hybrid::fdir(
                self.form_config(),
                self.directional_config(),
                self.envelope(),
            )?),
            MethodKind::Dsfi => {
                Box::new(Hybrid::dsfi(self.directional_config(), self.form_config())?)
            }
            MethodKind::DsfiHr => {
                Box::new(Hybrid::dsfi_hr(self.directional_config(), self.form_config())?)
            }
            MethodKind::FormDsfi => Box::new(Hybrid::form_dsfi(
                self.form_config(),
                self.directional_config(),
                self.envelope(),
            )?),
            MethodKind::CmcForm => Box::new(Hybrid::cmc_form(
                self.sampling_config(SamplingConfig::default().max_samples),
                self.form_config(),
            )?),
            MethodKind::CmImForm => {
                Box::new(Hybrid::cmim_form(self.importance_config(), self.form_config())?)
            }
        };
        Ok(method)
    }

    /// Build the correlation model over `n` variables.
    pub fn build_correlation(&self, n: usize) -> Result<Box<dyn Correlation>> {
        Ok(match self.correlation {
            CorrelationKind::Identity => {
                if !self.correlation_pairs.is_empty() {
                    log::warn!(
                        "{} correlation pairs ignored by the identity correlation",
                        self.correlation_pairs.len()
                    );
                }
                Box::new(IdentityCorrelation::new(n))
            }
            CorrelationKind::Gaussian => {
                Box::new(GaussianCorrelation::new(n, &self.correlation_pairs)?)
            }
            CorrelationKind::Robust => {
                Box::new(RobustGaussianCorrelation::new(n, &self.correlation_pairs)?)
            }
        })
    }
}

/// Run the selected method on `setup` and `limit_state`.
pub fn run(
    settings: &Settings,
    setup: &StochasticSetup,
    limit_state: &dyn LimitState,
) -> Result<ReliabilityResult> {
    run_with_monitor(settings, setup, limit_state, &pl_core::NoProgress)
}

/// [`run`] with a progress monitor that may abort the computation.
pub fn run_with_monitor(
    settings: &Settings,
    setup: &StochasticSetup,
    limit_state: &dyn LimitState,
    monitor: &dyn ProgressMonitor,
) -> Result<ReliabilityResult> {
    let name = settings.method.name();
    let calc = || -> Result<ReliabilityResult> {
        let method = settings.build_method()?;
        let model =
            Model::with_threads(setup, limit_state, settings.n_threads)?.with_monitor(monitor);
        log::debug!("{name}: {} active variables, {} threads", model.n_active(), model.n_threads());
        method.calc(&model)
    };
    calc().map_err(|e| e.in_method(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FnLimitState;
    use pl_core::Distribution;
    use pl_prob::Normal;

    fn setup(n: usize) -> StochasticSetup {
        let d: Vec<Box<dyn Distribution>> =
            (0..n).map(|_| Box::new(Normal::standard()) as Box<dyn Distribution>).collect();
        StochasticSetup::independent(d).unwrap()
    }

    #[test]
    fn test_json_defaults_and_overrides() {
        let s = Settings::from_json_str(r#"{"method": "dsfi_hr", "seed": 7}"#).unwrap();
        assert_eq!(s.method, MethodKind::DsfiHr);
        assert_eq!(s.seed, 7);
        assert_eq!(s.directional_config().sampling.max_samples, 100_000);
        assert_eq!(s.sampling_config(1_000_000).max_samples, 1_000_000);
        assert_eq!(s.build_method().unwrap().name(), "DSFI-HR");
    }

    #[test]
    fn test_round_trip_json() {
        let s =
            Settings { method: MethodKind::CmImForm, offset: vec![1.0, 2.0], ..Default::default() };
        let back = Settings::from_json_str(&s.to_json().unwrap()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(matches!(
            Settings::from_json_str(r#"{"relaxation": 1.5}"#),
            Err(Error::Validation(_))
        ));
        assert!(matches!(Settings::from_json_str(r#"{"method": "sorm"}"#), Err(Error::Json(_))));
    }

    #[test]
    fn test_every_method_builds() {
        for method in [
            MethodKind::Form,
            MethodKind::DirectionalSampling,
            MethodKind::CrudeMonteCarlo,
            MethodKind::ImportanceSampling,
            MethodKind::AdaptiveImportanceSampling,
            MethodKind::NumericalIntegration,
            MethodKind::Fdir,
            MethodKind::Dsfi,
            MethodKind::DsfiHr,
            MethodKind::FormDsfi,
            MethodKind::CmcForm,
            MethodKind::CmImForm,
        ] {
            let s = Settings { method, ..Default::default() };
            assert_eq!(s.build_method().unwrap().name(), method.name());
        }
    }

    #[test]
    fn test_errors_are_qualified() {
        let s = Settings::default();
        let lsf = FnLimitState::new(|_d| Ok(f64::NAN));
        let err = run(&s, &setup(2), &lsf).unwrap_err();
        assert!(matches!(&err, Error::Method { method, .. } if method == "FORM"));
    }

    #[test]
    fn test_run_form() {
        let s = Settings::default();
        let lsf = FnLimitState::new(|d| Ok(3.0 - d.x(0)?));
        let r = run(&s, &setup(1), &lsf).unwrap();
        assert!(r.converged());
        approx::assert_relative_eq!(r.beta(), 3.0, epsilon = 1e-6);
    }
}
