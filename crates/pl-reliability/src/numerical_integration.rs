//! Numerical integration over a tensor grid in standard-normal space.

use pl_core::{Error, Result};
use pl_prob::beta_from_q;
use pl_prob::normal::cdf;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::alpha_beta::{AlphaBeta, dot};
use crate::method::ReliabilityMethod;
use crate::model::Model;
use crate::result::{ConvergenceStatus, ReliabilityResult};

/// Dimensions above which a warning is logged.
pub const WARN_DIMENSION: usize = 4;

/// Largest supported dimension.
pub const MAX_DIMENSION: usize = 11;

/// Grid settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericalIntegrationConfig {
    /// Lower grid bound; the tail below is folded into the first cell
    pub min_u: f64,
    /// Upper grid bound; the tail above is folded into the last cell
    pub max_u: f64,
    /// Cells per dimension
    pub n_cells: usize,
}

impl Default for NumericalIntegrationConfig {
    fn default() -> Self {
        Self { min_u: -8.0, max_u: 8.0, n_cells: 200 }
    }
}

impl NumericalIntegrationConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_u.is_finite() && self.max_u.is_finite() && self.min_u < self.max_u) {
            return Err(Error::Validation(format!(
                "integration bounds must satisfy min_u < max_u, got [{}, {}]",
                self.min_u, self.max_u
            )));
        }
        if self.n_cells == 0 {
            return Err(Error::Validation("n_cells must be positive".into()));
        }
        Ok(())
    }

    /// `(midpoint, probability mass)` of every cell along one axis.
    ///
    /// Masses below the origin are differences of `p`, above it differences
    /// of `q`, which keeps the tails accurate.
    pub fn cells(&self) -> Vec<(f64, f64)> {
        let h = (self.max_u - self.min_u) / self.n_cells as f64;
        (0..self.n_cells)
            .map(|k| {
                let lo = if k == 0 { f64::NEG_INFINITY } else { self.min_u + k as f64 * h };
                let hi = if k + 1 == self.n_cells {
                    f64::INFINITY
                } else {
                    self.min_u + (k + 1) as f64 * h
                };
                let mass = if lo >= 0.0 { cdf(-lo) - cdf(-hi) } else { cdf(hi) - cdf(lo) };
                (self.min_u + (k as f64 + 0.5) * h, mass)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    pf: f64,
    n_cells: usize,
    nearest_failure: Option<(f64, Vec<f64>)>,
    nearest_safe: Option<(f64, Vec<f64>)>,
}

fn is_nearer(slot: &Option<(f64, Vec<f64>)>, r2: f64) -> bool {
    slot.as_ref().is_none_or(|(best, _)| r2 < *best)
}

impl Accumulator {
    fn keep_nearest(slot: &mut Option<(f64, Vec<f64>)>, candidate: Option<(f64, Vec<f64>)>) {
        if let Some((r2, u)) = candidate {
            if is_nearer(slot, r2) {
                *slot = Some((r2, u));
            }
        }
    }

    fn offer(slot: &mut Option<(f64, Vec<f64>)>, r2: f64, u: &[f64]) {
        if is_nearer(slot, r2) {
            *slot = Some((r2, u.to_vec()));
        }
    }

    fn merge(&mut self, other: Accumulator) {
        self.pf += other.pf;
        self.n_cells += other.n_cells;
        Self::keep_nearest(&mut self.nearest_failure, other.nearest_failure);
        Self::keep_nearest(&mut self.nearest_safe, other.nearest_safe);
    }
}

/// Numerical integration estimator.
#[derive(Debug, Clone)]
pub struct NumericalIntegration {
    config: NumericalIntegrationConfig,
}

impl NumericalIntegration {
    /// Name reported in results.
    pub const NAME: &'static str = "NumericalIntegration";

    /// Create with validated settings.
    pub fn new(config: NumericalIntegrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Settings.
    pub fn config(&self) -> &NumericalIntegrationConfig {
        &self.config
    }

    fn integrate(
        model: &Model<'_>,
        cells: &[(f64, f64)],
        u: &mut Vec<f64>,
        level: usize,
        mass: f64,
        acc: &mut Accumulator,
    ) -> Result<()> {
        if level == u.len() {
            let z = model.z(u)?;
            let r2 = dot(u, u);
            let slot = if z < 0.0 {
                acc.pf += mass;
                &mut acc.nearest_failure
            } else {
                &mut acc.nearest_safe
            };
            Accumulator::offer(slot, r2, u);
            acc.n_cells += 1;
            return Ok(());
        }
        for &(mid, m) in cells {
            u[level] = mid;
            Self::integrate(model, cells, u, level + 1, mass * m, acc)?;
        }
        Ok(())
    }
}

impl ReliabilityMethod for NumericalIntegration {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult> {
        let n = model.n_active();
        if n > MAX_DIMENSION {
            return Err(Error::Validation(format!(
                "numerical integration supports at most {MAX_DIMENSION} variables, got {n}"
            )));
        }
        if n > WARN_DIMENSION {
            log::warn!(
                "numerical integration over {n} variables needs {}^{n} evaluations",
                self.config.n_cells
            );
        }
        let start = model.evaluations();
        let cells = self.config.cells();
        let batch = model.n_threads().max(1);
        let mut total = Accumulator::default();
        let mut status = ConvergenceStatus::Success;

        for (k, block) in cells.chunks(batch).enumerate() {
            // Per-cell partial sums are reduced in cell order.
            let parts: Vec<Accumulator> = model.install(|| {
                block
                    .par_iter()
                    .map(|&(mid, m)| {
                        let mut u = vec![0.0; n];
                        u[0] = mid;
                        let mut acc = Accumulator::default();
                        Self::integrate(model, &cells, &mut u, 1, m, &mut acc)?;
                        Ok(acc)
                    })
                    .collect::<Result<Vec<_>>>()
            })?;
            for part in parts {
                total.merge(part);
            }
            let done = ((k + 1) * batch).min(cells.len());
            if model.report(done, cells.len(), beta_from_q(total.pf.clamp(0.0, 1.0)), 0.0) {
                status = ConvergenceStatus::AbortedByUser;
                break;
            }
        }

        let pf = total.pf.clamp(0.0, 1.0);
        let beta = beta_from_q(pf);
        let nearest = if pf <= 0.5 { &total.nearest_failure } else { &total.nearest_safe };
        let direction = match nearest {
            Some((_, point)) => AlphaBeta::from_point_and_beta(point, beta),
            None => AlphaBeta::isotropic(n, beta),
        };
        let u = direction.design_point();
        Ok(ReliabilityResult {
            status,
            x: model.x(&u)?,
            direction,
            u,
            method: Self::NAME.to_string(),
            n_steps: total.n_cells,
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
    fn test_cell_masses_sum_to_one() {
        let cells = NumericalIntegrationConfig::default().cells();
        assert_eq!(cells.len(), 200);
        let total: f64 = cells.iter().map(|c| c.1).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-14);
        assert!(cells.iter().all(|c| c.1 > 0.0));
    }

    #[test]
    fn test_one_dimensional_tail() {
        let s = standard(1);
        let lsf = FnLimitState::new(|d| Ok(3.02 - d.x(0)?));
        let model = Model::new(&s, &lsf).unwrap();
        let r = NumericalIntegration::new(NumericalIntegrationConfig::default())
            .unwrap()
            .calc(&model)
            .unwrap();
        // Cells are 0.08 wide; the crossing at 3.02 lies in [2.96, 3.04] whose midpoint is safe.
        assert_relative_eq!(r.beta(), 3.04, epsilon = 1e-10);
        assert_eq!(r.alpha(), &[-1.0]);
        assert_eq!(r.n_steps, 200);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let s = standard(2);
        let lsf = FnLimitState::new(|d| Ok(2.0 - d.x(0)? - 0.3 * d.x(1)?.powi(2)));
        let cfg = NumericalIntegrationConfig { n_cells: 60, ..Default::default() };
        let ni = NumericalIntegration::new(cfg).unwrap();
        let a = ni.calc(&Model::new(&s, &lsf).unwrap()).unwrap();
        let b = ni.calc(&Model::with_threads(&s, &lsf, 3).unwrap()).unwrap();
        assert_eq!(a.beta().to_bits(), b.beta().to_bits());
    }

    #[test]
    fn test_nearest_cells() {
        let mut acc = Accumulator::default();
        Accumulator::offer(&mut acc.nearest_failure, 4.0, &[2.0, 0.0]);
        Accumulator::offer(&mut acc.nearest_failure, 9.0, &[3.0, 0.0]);
        Accumulator::offer(&mut acc.nearest_failure, 1.0, &[0.0, -1.0]);
        let mut other = Accumulator::default();
        Accumulator::offer(&mut other.nearest_failure, 2.0, &[1.0, 1.0]);
        Accumulator::offer(&mut other.nearest_safe, 0.5, &[0.5, 0.5]);
        acc.merge(other);
        assert_eq!(acc.nearest_failure, Some((1.0, vec![0.0, -1.0])));
        assert_eq!(acc.nearest_safe, Some((0.5, vec![0.5, 0.5])));
    }

    #[test]
    fn test_limit_state_through_origin() {
        let s = standard(2);
        let lsf = FnLimitState::new(|d| Ok(d.x(1)? - d.x(0)?));
        let model = Model::new(&s, &lsf).unwrap();
        let r = NumericalIntegration::new(NumericalIntegrationConfig::default())
            .unwrap()
            .calc(&model)
            .unwrap();
        // Diagonal cells have z = 0 and count as safe, so pf sits slightly below 0.5.
        assert_relative_eq!(r.beta(), 0.0, epsilon = 0.05);
        assert!(r.beta() > 0.0);
        assert_eq!(r.n_steps, 200 * 200);
    }

    #[test]
    fn test_abort_after_first_blocks() {
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
        let monitor = StopAt(5);
        let model = Model::new(&s, &lsf).unwrap().with_monitor(&monitor);
        let cfg = NumericalIntegrationConfig { n_cells: 20, ..Default::default() };
        let r = NumericalIntegration::new(cfg).unwrap().calc(&model).unwrap();
        assert_eq!(r.status, ConvergenceStatus::AbortedByUser);
        assert_eq!(r.n_steps, 5 * 20);
    }

    #[test]
    fn test_too_many_dimensions() {
        let s = standard(12);
        let lsf = FnLimitState::new(|d| d.x(0));
        let model = Model::new(&s, &lsf).unwrap();
        let ni = NumericalIntegration::new(NumericalIntegrationConfig::default()).unwrap();
        assert!(matches!(ni.calc(&model), Err(Error::Validation(_))));
    }
}
