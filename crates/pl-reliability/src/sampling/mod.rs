//! Monte Carlo estimators in standard-normal space.
//!
//! All estimators share one sampling engine: draw `ε ~ N(0, I)`, map it
//! through an [`ImportanceDensity`], evaluate `z` and accumulate weighted
//! failure statistics until both variation coefficients meet their targets.
//!
//! The buffered engine draws `ε` in chunks on the calling thread, evaluates
//! the chunk in parallel and consumes the results in draw order, so its
//! statistics equal those of the sequential engine for the same seed.

pub mod adaptive;
pub mod crude;
pub mod importance;

use pl_core::{Error, RandomSource, Result};
use pl_prob::{GeneratorKind, beta_from_q};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::alpha_beta::{AlphaBeta, dot};
use crate::model::Model;
use crate::result::{ConvergenceStatus, ReliabilityResult};

pub use adaptive::{AdaptiveImportanceSampling, AdaptiveImportanceSamplingConfig};
pub use crude::CrudeMonteCarlo;
pub use importance::{ImportanceSampling, ImportanceSamplingConfig};

/// Sample budget, stopping targets and random source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Samples before convergence is checked
    pub min_samples: usize,
    /// Hard cap
    pub max_samples: usize,
    /// Target variation coefficient of `pf`
    pub var_coeff_failure: f64,
    /// Target variation coefficient of `1 - pf`
    pub var_coeff_no_failure: f64,
    /// Random seed
    pub seed: u64,
    /// Generator family
    pub generator: GeneratorKind,
    /// Evaluate samples in parallel chunks
    pub buffered: bool,
    /// Samples per chunk; `0` means ten per worker
    pub chunk_size: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_samples: 1000,
            max_samples: 1_000_000,
            var_coeff_failure: 0.1,
            var_coeff_no_failure: 0.1,
            seed: 0,
            generator: GeneratorKind::default(),
            buffered: true,
            chunk_size: 0,
        }
    }
}

impl SamplingConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_samples == 0 {
            return Err(Error::Validation("max_samples must be positive".into()));
        }
        if self.min_samples > self.max_samples {
            return Err(Error::Validation(format!(
                "min_samples ({}) exceeds max_samples ({})",
                self.min_samples, self.max_samples
            )));
        }
        for (name, v) in [
            ("var_coeff_failure", self.var_coeff_failure),
            ("var_coeff_no_failure", self.var_coeff_no_failure),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::Validation(format!("{name} must be positive, got {v}")));
            }
        }
        Ok(())
    }

    pub(crate) fn random(&self) -> pl_prob::SeededRandom {
        pl_prob::SeededRandom::new(self.generator, self.seed)
    }

    pub(crate) fn chunk(&self, model: &Model<'_>) -> usize {
        if self.chunk_size == 0 { 10 * model.n_threads() } else { self.chunk_size }
    }

    fn is_converged(&self, n: usize, covar_failure: f64, covar_no_failure: f64) -> bool {
        n >= self.min_samples
            && covar_failure <= self.var_coeff_failure
            && covar_no_failure <= self.var_coeff_no_failure
    }
}

// ---------------------------------------------------------------------------
// Importance density
// ---------------------------------------------------------------------------

/// Shifted and scaled normal sampling density `N(offset, diag(variance_factor))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceDensity {
    offset: Vec<f64>,
    variance_factor: Vec<f64>,
}

impl ImportanceDensity {
    /// `N(0, I)`: crude Monte Carlo.
    pub fn standard(n: usize) -> Self {
        Self { offset: vec![0.0; n], variance_factor: vec![1.0; n] }
    }

    /// Density with per-variable offset and variance factor.
    pub fn new(offset: Vec<f64>, variance_factor: Vec<f64>) -> Result<Self> {
        if offset.len() != variance_factor.len() {
            return Err(Error::Validation(format!(
                "offset has {} entries, variance factor {}",
                offset.len(),
                variance_factor.len()
            )));
        }
        if offset.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("importance offset must be finite".into()));
        }
        if variance_factor.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(Error::Validation("variance factor must be positive".into()));
        }
        Ok(Self { offset, variance_factor })
    }

    /// Offset per variable.
    pub fn offset(&self) -> &[f64] {
        &self.offset
    }

    /// Variance factor per variable.
    pub fn variance_factor(&self) -> &[f64] {
        &self.variance_factor
    }

    /// Copy with a new offset.
    pub fn with_offset(&self, offset: Vec<f64>) -> Result<Self> {
        Self::new(offset, self.variance_factor.clone())
    }

    /// Copy with every variance factor multiplied by `factor`.
    pub fn with_variance_scaled(&self, factor: f64) -> Result<Self> {
        Self::new(self.offset.clone(), self.variance_factor.iter().map(|v| v * factor).collect())
    }

    /// Map `ε ~ N(0, I)` to a sample `u` and its weight `φ(u) / h(u)`.
    pub fn sample(&self, eps: &[f64]) -> (Vec<f64>, f64) {
        let mut log_weight = 0.0;
        let u = eps
            .iter()
            .zip(self.offset.iter().zip(&self.variance_factor))
            .map(|(&e, (&m, &v))| {
                let s = v.sqrt();
                let u = m + s * e;
                log_weight += 0.5 * e * e - 0.5 * u * u + s.ln();
                u
            })
            .collect();
        (u, log_weight.exp())
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// How a sampling run picks the point defining `alpha`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaEstimate {
    /// Sample closest to the origin in the minority domain
    Nearest,
    /// Weighted mean of the minority domain
    WeightedMean,
}

#[derive(Debug, Clone, Default)]
struct Domain {
    count: usize,
    weight: f64,
    weighted_sum: Vec<f64>,
    nearest: Option<(f64, Vec<f64>)>,
}

impl Domain {
    fn add(&mut self, u: &[f64], w: f64) {
        self.count += 1;
        self.weight += w;
        if self.weighted_sum.is_empty() {
            self.weighted_sum = vec![0.0; u.len()];
        }
        for (s, v) in self.weighted_sum.iter_mut().zip(u) {
            *s += w * v;
        }
        let r2 = dot(u, u);
        if self.nearest.as_ref().is_none_or(|(best, _)| r2 < *best) {
            self.nearest = Some((r2, u.to_vec()));
        }
    }

    fn point(&self, estimate: AlphaEstimate) -> Option<Vec<f64>> {
        match estimate {
            AlphaEstimate::Nearest => self.nearest.as_ref().map(|(_, u)| u.clone()),
            AlphaEstimate::WeightedMean if self.weight > 0.0 => {
                Some(self.weighted_sum.iter().map(|s| s / self.weight).collect())
            }
            AlphaEstimate::WeightedMean => None,
        }
    }
}

/// Running failure statistics of weighted samples.
///
/// `pf = Σ w_f / n` and `Var(pf) = (Σ w_f² / n - pf²) / n`; with unit
/// weights this is the binomial estimator.
#[derive(Debug, Clone, Default)]
pub struct SampleTally {
    n: usize,
    sum_w2: f64,
    failed: Domain,
    safe: Domain,
}

impl SampleTally {
    /// Record one sample.
    pub fn add(&mut self, u: &[f64], z: f64, weight: f64) {
        self.n += 1;
        if z < 0.0 {
            self.sum_w2 += weight * weight;
            self.failed.add(u, weight);
        } else {
            self.safe.add(u, weight);
        }
    }

    /// Samples recorded.
    pub fn n_samples(&self) -> usize {
        self.n
    }

    /// Failing samples recorded.
    pub fn n_failed(&self) -> usize {
        self.failed.count
    }

    /// Failure probability estimate.
    pub fn pf(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.failed.weight / self.n as f64 }
    }

    /// Variance of the estimate.
    pub fn variance(&self) -> f64 {
        if self.n == 0 {
            return f64::INFINITY;
        }
        let n = self.n as f64;
        let pf = self.pf();
        (self.sum_w2 / n - pf * pf).max(0.0) / n
    }

    /// Variation coefficient of `pf`.
    pub fn covar_failure(&self) -> f64 {
        let pf = self.pf();
        if pf > 0.0 { self.variance().sqrt() / pf } else { f64::INFINITY }
    }

    /// Variation coefficient of `1 - pf`.
    pub fn covar_no_failure(&self) -> f64 {
        let pf = self.pf();
        if pf < 1.0 { self.variance().sqrt() / (1.0 - pf) } else { f64::INFINITY }
    }

    /// Reliability index of the estimate.
    pub fn beta(&self) -> f64 {
        beta_from_q(self.pf().clamp(0.0, 1.0))
    }

    /// Closest failing sample (raw).
    pub fn nearest_failure(&self) -> Option<&[f64]> {
        self.failed.nearest.as_ref().map(|(_, u)| u.as_slice())
    }

    /// `beta` with `alpha` taken from the minority domain.
    pub fn direction(&self, n: usize, estimate: AlphaEstimate) -> AlphaBeta {
        let beta = self.beta();
        let domain = if self.pf() <= 0.5 { &self.failed } else { &self.safe };
        match domain.point(estimate) {
            Some(point) => AlphaBeta::from_point_and_beta(&point, beta),
            None => AlphaBeta::isotropic(n, beta),
        }
    }
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

/// Pending standard-normal draws of the buffered engine.
///
/// A circular buffer keeps draws left over at the end of a run for the next
/// run; a one-shot buffer discards them.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    pending: VecDeque<Vec<f64>>,
    keep_leftovers: bool,
}

impl SampleBuffer {
    /// Buffer discarding leftovers.
    pub fn one_shot() -> Self {
        Self { pending: VecDeque::new(), keep_leftovers: false }
    }

    /// Buffer carrying leftovers across runs.
    pub fn circular() -> Self {
        Self { pending: VecDeque::new(), keep_leftovers: true }
    }

    /// Drop all pending draws (after restarting the random source).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Pending draws.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// `true` without pending draws.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Statistics and status of one sampling run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Accumulated statistics
    pub tally: SampleTally,
    /// Stop reason
    pub status: ConvergenceStatus,
    /// Limit-state evaluations, including buffered draws not consumed
    pub n_evaluations: usize,
}

impl RunOutcome {
    /// Convert to a result, evaluating physical values at the design point.
    pub fn into_result(
        self,
        model: &Model<'_>,
        method: &str,
        estimate: AlphaEstimate,
    ) -> Result<ReliabilityResult> {
        let direction = self.tally.direction(model.n_active(), estimate);
        let u = direction.design_point();
        Ok(ReliabilityResult {
            status: self.status,
            x: model.x(&u)?,
            direction,
            u,
            method: method.to_string(),
            n_steps: self.tally.n_samples(),
            n_evaluations: self.n_evaluations,
        })
    }
}

fn consume(
    tally: &mut SampleTally,
    model: &Model<'_>,
    config: &SamplingConfig,
    u: &[f64],
    z: f64,
    weight: f64,
) -> Option<ConvergenceStatus> {
    tally.add(u, z, weight);
    let (cf, cnf) = (tally.covar_failure(), tally.covar_no_failure());
    if model.report(tally.n_samples(), config.max_samples, tally.beta(), cf.max(cnf)) {
        return Some(ConvergenceStatus::AbortedByUser);
    }
    if config.is_converged(tally.n_samples(), cf, cnf) {
        return Some(ConvergenceStatus::Success);
    }
    if tally.n_samples() >= config.max_samples {
        return Some(ConvergenceStatus::NoConvergence);
    }
    None
}

/// One sample at a time on the calling thread.
pub fn run_sequential(
    model: &Model<'_>,
    config: &SamplingConfig,
    density: &ImportanceDensity,
    rng: &mut dyn RandomSource,
) -> Result<RunOutcome> {
    let start = model.evaluations();
    let mut tally = SampleTally::default();
    let mut eps = vec![0.0; model.n_active()];
    loop {
        rng.fill_standard_normal(&mut eps);
        let (u, w) = density.sample(&eps);
        let z = model.z(&u)?;
        if let Some(status) = consume(&mut tally, model, config, &u, z, w) {
            return Ok(RunOutcome { tally, status, n_evaluations: model.evaluations() - start });
        }
    }
}

/// Chunked draws evaluated in parallel, consumed in draw order.
pub fn run_buffered(
    model: &Model<'_>,
    config: &SamplingConfig,
    density: &ImportanceDensity,
    rng: &mut dyn RandomSource,
    buffer: &mut SampleBuffer,
) -> Result<RunOutcome> {
    let start = model.evaluations();
    let chunk = config.chunk(model).max(1);
    let mut tally = SampleTally::default();
    loop {
        if buffer.pending.is_empty() {
            let m = chunk.min(config.max_samples - tally.n_samples());
            for _ in 0..m {
                let mut eps = vec![0.0; model.n_active()];
                rng.fill_standard_normal(&mut eps);
                buffer.pending.push_back(eps);
            }
        }
        let (points, weights): (Vec<Vec<f64>>, Vec<f64>) =
            buffer.pending.iter().map(|eps| density.sample(eps)).unzip();
        let zs = model.z_batch(&points)?;
        for ((u, w), z) in points.iter().zip(weights).zip(zs) {
            buffer.pending.pop_front();
            if let Some(status) = consume(&mut tally, model, config, u, z, w) {
                if !buffer.keep_leftovers {
                    buffer.clear();
                }
                return Ok(RunOutcome { tally, status, n_evaluations: model.evaluations() - start });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_standard_density_has_unit_weight() {
        let d = ImportanceDensity::standard(3);
        let (u, w) = d.sample(&[0.3, -1.2, 2.5]);
        assert_eq!(u, vec![0.3, -1.2, 2.5]);
        assert_eq!(w, 1.0);
    }

    #[test]
    fn test_shifted_density_weight() {
        let d = ImportanceDensity::new(vec![2.0], vec![4.0]).unwrap();
        let (u, w) = d.sample(&[0.5]);
        assert_relative_eq!(u[0], 3.0);
        // φ(3) / (φ(0.5) / 2)
        let expected = 2.0 * (-0.5f64 * 9.0).exp() / (-0.5f64 * 0.25).exp();
        assert_relative_eq!(w, expected, epsilon = 1e-14);
    }

    #[test]
    fn test_density_validation() {
        assert!(ImportanceDensity::new(vec![0.0], vec![0.0]).is_err());
        assert!(ImportanceDensity::new(vec![0.0, 1.0], vec![1.0]).is_err());
        let d = ImportanceDensity::standard(2);
        let moved = d.with_offset(vec![1.0, 2.0]).unwrap();
        assert_eq!(d.offset(), &[0.0, 0.0]);
        assert_eq!(moved.offset(), &[1.0, 2.0]);
        assert_eq!(moved.with_variance_scaled(2.0).unwrap().variance_factor(), &[2.0, 2.0]);
    }

    #[test]
    fn test_binomial_statistics() {
        let mut t = SampleTally::default();
        for k in 0..100 {
            let z = if k < 20 { -1.0 } else { 1.0 };
            t.add(&[k as f64], z, 1.0);
        }
        assert_relative_eq!(t.pf(), 0.2);
        let expected = ((1.0_f64 - 0.2) / (100.0 * 0.2)).sqrt();
        assert_relative_eq!(t.covar_failure(), expected, epsilon = 1e-12);
        assert_relative_eq!(t.covar_no_failure(), (0.2_f64 / (100.0 * 0.8)).sqrt(), epsilon = 1e-12);
        assert_eq!(t.nearest_failure(), Some(&[0.0][..]));
    }

    #[test]
    fn test_empty_failure_domain() {
        let mut t = SampleTally::default();
        t.add(&[0.0, 1.0], 1.0, 1.0);
        assert_eq!(t.pf(), 0.0);
        assert!(t.covar_failure().is_infinite());
        let ab = t.direction(2, AlphaEstimate::Nearest);
        assert_eq!(ab.beta(), pl_prob::BETA_MAX);
    }

    #[test]
    fn test_config_validation() {
        assert!(SamplingConfig::default().validate().is_ok());
        let bad = SamplingConfig { min_samples: 10, max_samples: 5, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
