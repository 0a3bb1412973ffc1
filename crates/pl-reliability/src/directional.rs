//! Directional sampling.
//!
//! Random unit directions `d` are searched for the first limit-state
//! crossing `r`; each direction contributes the chi-square tail mass beyond
//! (or within) `r`, and `pf` is the mean contribution. Rays are searched in
//! parallel chunks and consumed in draw order.

use pl_core::{Error, RandomSource, Result};
use pl_prob::chi_squared::{radius_exceedance, radius_non_exceedance};
use pl_prob::beta_from_q;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::alpha_beta::{AlphaBeta, norm};
use crate::method::ReliabilityMethod;
use crate::model::Model;
use crate::result::{ConvergenceStatus, ReliabilityResult};
use crate::root_finding::{LoopTermination, RayMethod, RayRootFinder};
use crate::sampling::SamplingConfig;

/// Directional sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalSamplingConfig {
    /// Direction budget, targets and random source
    pub sampling: SamplingConfig,
    /// Coarse step along each ray
    pub ray_step: f64,
    /// Largest radius searched
    pub max_ray_length: f64,
    /// Radius tolerance of the refinement
    pub root_tolerance: f64,
    /// Root search strategy
    pub ray_method: RayMethod,
    /// Evaluation budget per ray
    pub max_ray_evaluations: usize,
}

impl Default for DirectionalSamplingConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig { max_samples: 100_000, ..SamplingConfig::default() },
            ray_step: 3.0,
            max_ray_length: 20.0,
            root_tolerance: 1e-3,
            ray_method: RayMethod::default(),
            max_ray_evaluations: 100,
        }
    }
}

impl DirectionalSamplingConfig {
    /// Settings with the first-negative root policy.
    pub fn first_negative() -> Self {
        Self {
            ray_method: RayMethod::LinearLoop(LoopTermination::FirstNegative),
            ray_step: 0.5,
            ..Self::default()
        }
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        for (name, v) in [
            ("ray_step", self.ray_step),
            ("max_ray_length", self.max_ray_length),
            ("root_tolerance", self.root_tolerance),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::Validation(format!("{name} must be positive, got {v}")));
            }
        }
        if self.max_ray_evaluations == 0 {
            return Err(Error::Validation("max_ray_evaluations must be positive".into()));
        }
        Ok(())
    }

    fn finder(&self) -> RayRootFinder {
        RayRootFinder {
            step: self.ray_step,
            max_length: self.max_ray_length,
            tolerance: self.root_tolerance,
            method: self.ray_method,
            max_evaluations: self.max_ray_evaluations,
        }
    }
}

/// Contribution of one direction.
#[derive(Debug, Clone, Copy)]
struct RayOutcome {
    probability: f64,
    radius: Option<f64>,
}

/// Running mean and variance of direction contributions.
#[derive(Debug, Clone)]
struct DirectionTally {
    n: usize,
    sum: f64,
    sum_sq: f64,
    weighted_point: Vec<f64>,
    weight: f64,
}

impl DirectionTally {
    fn new(dim: usize) -> Self {
        Self { n: 0, sum: 0.0, sum_sq: 0.0, weighted_point: vec![0.0; dim], weight: 0.0 }
    }

    fn add(&mut self, direction: &[f64], ray: RayOutcome) {
        self.n += 1;
        self.sum += ray.probability;
        self.sum_sq += ray.probability * ray.probability;
        if let Some(r) = ray.radius {
            let w = ray.probability;
            for (acc, d) in self.weighted_point.iter_mut().zip(direction) {
                *acc += w * r * d;
            }
            self.weight += w;
        }
    }

    fn pf(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.sum / self.n as f64 }
    }

    fn sd_of_mean(&self) -> f64 {
        if self.n < 2 {
            return f64::INFINITY;
        }
        let n = self.n as f64;
        let mean = self.pf();
        ((self.sum_sq - n * mean * mean).max(0.0) / (n - 1.0) / n).sqrt()
    }

    fn covariances(&self) -> (f64, f64) {
        let pf = self.pf();
        let sd = self.sd_of_mean();
        let cf = if pf > 0.0 { sd / pf } else { f64::INFINITY };
        let cnf = if pf < 1.0 { sd / (1.0 - pf) } else { f64::INFINITY };
        (cf, cnf)
    }

    fn direction(&self) -> AlphaBeta {
        let beta = beta_from_q(self.pf().clamp(0.0, 1.0));
        if self.weight > 0.0 {
            let point: Vec<f64> = self.weighted_point.iter().map(|v| v / self.weight).collect();
            AlphaBeta::from_point_and_beta(&point, beta)
        } else {
            AlphaBeta::isotropic(self.weighted_point.len(), beta)
        }
    }
}

/// Directional sampling estimator.
#[derive(Debug, Clone)]
pub struct DirectionalSampling {
    config: DirectionalSamplingConfig,
}

impl DirectionalSampling {
    /// Name reported in results.
    pub const NAME: &'static str = "DirectionalSampling";

    /// Create with validated settings.
    pub fn new(config: DirectionalSamplingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Settings.
    pub fn config(&self) -> &DirectionalSamplingConfig {
        &self.config
    }

    fn search(&self, model: &Model<'_>, z0: f64, direction: &[f64]) -> Result<RayOutcome> {
        let n = direction.len();
        let thread_id = model.thread_index();
        // With the origin on the limit state, the ray's side is the sign of
        // its first non-zero evaluation.
        let mut first_nonzero = (z0 != 0.0).then_some(z0);
        let search = self.config.finder().find(z0, |r| {
            let u: Vec<f64> = direction.iter().map(|d| r * d).collect();
            let z = model.z_on(&u, thread_id)?;
            if first_nonzero.is_none() && z != 0.0 {
                first_nonzero = Some(z);
            }
            Ok(z)
        })?;
        let origin_fails = first_nonzero.is_some_and(|z| z < 0.0);
        Ok(match search.root {
            Some(root) if origin_fails => {
                RayOutcome { probability: radius_non_exceedance(n, root.x), radius: Some(root.x) }
            }
            Some(root) => {
                RayOutcome { probability: radius_exceedance(n, root.x), radius: Some(root.x) }
            }
            None => RayOutcome { probability: if origin_fails { 1.0 } else { 0.0 }, radius: None },
        })
    }
}

impl ReliabilityMethod for DirectionalSampling {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult> {
        let cfg = &self.config.sampling;
        let n = model.n_active();
        let start = model.evaluations();
        let z0 = model.z(&vec![0.0; n])?;
        let mut rng = cfg.random();
        let chunk = cfg.chunk(model).max(1);
        let mut tally = DirectionTally::new(n);

        let status = 'outer: loop {
            let m = chunk.min(cfg.max_samples - tally.n);
            let mut directions = Vec::with_capacity(m);
            while directions.len() < m {
                let mut d = vec![0.0; n];
                rng.fill_standard_normal(&mut d);
                let len = norm(&d);
                if len > 0.0 {
                    d.iter_mut().for_each(|v| *v /= len);
                    directions.push(d);
                }
            }
            let rays: Vec<RayOutcome> = model.install(|| {
                directions
                    .par_iter()
                    .map(|d| self.search(model, z0, d))
                    .collect::<Result<Vec<_>>>()
            })?;

            for (d, ray) in directions.iter().zip(rays) {
                tally.add(d, ray);
                let (cf, cnf) = tally.covariances();
                let beta = beta_from_q(tally.pf().clamp(0.0, 1.0));
                if model.report(tally.n, cfg.max_samples, beta, cf.max(cnf)) {
                    break 'outer ConvergenceStatus::AbortedByUser;
                }
                if tally.n >= cfg.min_samples
                    && cf <= cfg.var_coeff_failure
                    && cnf <= cfg.var_coeff_no_failure
                {
                    break 'outer ConvergenceStatus::Success;
                }
                if tally.n >= cfg.max_samples {
                    break 'outer ConvergenceStatus::NoConvergence;
                }
            }
        };

        let direction = tally.direction();
        let u = direction.design_point();
        Ok(ReliabilityResult {
            status,
            x: model.x(&u)?,
            direction,
            u,
            method: Self::NAME.to_string(),
            n_steps: tally.n,
            n_evaluations: model.evaluations() - start,
        })
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

    fn standard(n: usize) -> StochasticSetup {
        let d: Vec<Box<dyn Distribution>> =
            (0..n).map(|_| Box::new(Normal::standard()) as Box<dyn Distribution>).collect();
        StochasticSetup::independent(d).unwrap()
    }

    #[test]
    fn test_half_space_safe_origin() {
        let s = standard(3);
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(2)?));
        let model = Model::with_threads(&s, &lsf, 2).unwrap();
        let cfg = DirectionalSamplingConfig {
            sampling: SamplingConfig { var_coeff_failure: 0.03, seed: 1, ..Default::default() },
            ..Default::default()
        };
        let r = DirectionalSampling::new(cfg).unwrap().calc(&model).unwrap();
        assert!(r.converged());
        assert_relative_eq!(r.beta(), 2.0, epsilon = 0.05);
        assert!(r.alpha()[2] < -0.9);
    }

    #[test]
    fn test_failing_origin() {
        let s = standard(2);
        let lsf = FnLimitState::new(|d| Ok(d.x(0)? - 1.0));
        let model = Model::new(&s, &lsf).unwrap();
        let cfg = DirectionalSamplingConfig {
            sampling: SamplingConfig { min_samples: 20_000, seed: 2, ..Default::default() },
            ..Default::default()
        };
        let r = DirectionalSampling::new(cfg).unwrap().calc(&model).unwrap();
        assert_relative_eq!(r.beta(), -1.0, epsilon = 0.05);
        assert!(r.alpha()[0] > 0.9);
    }

    #[test]
    fn test_limit_state_through_origin() {
        let s = standard(2);
        let lsf = FnLimitState::new(|d| Ok(d.x(1)? - d.x(0)?));
        let model = Model::new(&s, &lsf).unwrap();
        let cfg = DirectionalSamplingConfig {
            sampling: SamplingConfig { min_samples: 20_000, seed: 6, ..Default::default() },
            ..Default::default()
        };
        let r = DirectionalSampling::new(cfg).unwrap().calc(&model).unwrap();
        assert_relative_eq!(r.beta(), 0.0, epsilon = 0.05);
        assert_relative_eq!(r.probability_of_failure(), 0.5, epsilon = 0.02);
    }

    #[test]
    fn test_abort_stops_direction_loop() {
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
        let s = standard(2);
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)?));
        let monitor = StopAt(37);
        let model = Model::with_threads(&s, &lsf, 2).unwrap().with_monitor(&monitor);
        let r = DirectionalSampling::new(DirectionalSamplingConfig::default())
            .unwrap()
            .calc(&model)
            .unwrap();
        assert_eq!(r.status, ConvergenceStatus::AbortedByUser);
        assert_eq!(r.n_steps, 37);
    }

    #[test]
    fn test_thread_count_does_not_change_estimate() {
        let s = standard(2);
        let lsf = FnLimitState::new(|d| Ok(2.5 - d.x(0)? * d.x(1)?.abs().sqrt() - d.x(1)?));
        let cfg = DirectionalSamplingConfig {
            sampling: SamplingConfig { max_samples: 3000, chunk_size: 16, ..Default::default() },
            ..Default::default()
        };
        let ds = DirectionalSampling::new(cfg).unwrap();
        let one = ds.calc(&Model::new(&s, &lsf).unwrap()).unwrap();
        let four = ds.calc(&Model::with_threads(&s, &lsf, 4).unwrap()).unwrap();
        assert_eq!(one.beta(), four.beta());
        assert_eq!(one.n_steps, four.n_steps);
    }

    #[test]
    fn test_first_negative_policy_rounds_radius_up() {
        let s = standard(2);
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)?));
        let model = Model::new(&s, &lsf).unwrap();
        let mut cfg = DirectionalSamplingConfig::first_negative();
        cfg.sampling.max_samples = 4000;
        cfg.sampling.seed = 9;
        let hr = DirectionalSampling::new(cfg).unwrap().calc(&model).unwrap();
        // Crossing radii are rounded up to the grid, so pf is underestimated.
        assert!(hr.beta() > 2.0);
        assert!(hr.beta() < 2.5);
    }
}
