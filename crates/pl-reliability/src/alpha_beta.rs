//! Reliability direction: reliability index `beta` and unit direction `alpha`.
//!
//! Convention: the linearised limit state reads `z ≈ σ (beta + alpha·u)`, so
//! failure (`z < 0`) is the half-space `-alpha·u > beta` and the design point
//! is `u* = -beta · alpha`. Probabilities are derived on demand from `beta`.

use pl_prob::normal::pq_from_beta;
use serde::{Deserialize, Serialize};

/// Euclidean norm.
#[inline]
pub(crate) fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Dot product of equal-length slices.
#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Reliability index and influence coefficients of a failure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphaBeta {
    beta: f64,
    alpha: Vec<f64>,
}

impl AlphaBeta {
    /// Create from `beta` and `alpha` as given (no normalisation).
    pub fn new(beta: f64, alpha: Vec<f64>) -> Self {
        Self { beta, alpha }
    }

    /// Direction with equal weight in every variable.
    ///
    /// Used when no failure point information is available.
    pub fn isotropic(n: usize, beta: f64) -> Self {
        let a = if n == 0 { 0.0 } else { 1.0 / (n as f64).sqrt() };
        Self { beta, alpha: vec![a; n] }
    }

    /// From a design point: `beta = |u|`, `alpha = -u / beta`.
    pub fn from_design_point(u: &[f64]) -> Self {
        let beta = norm(u);
        if beta == 0.0 {
            return Self::isotropic(u.len(), 0.0);
        }
        Self { beta, alpha: u.iter().map(|x| -x / beta).collect() }
    }

    /// From a representative point of the limit state and an independently
    /// estimated `beta`.
    ///
    /// Only the direction of `point` is used; the design point of the result
    /// lies along `point` at distance `|beta|`.
    pub fn from_point_and_beta(point: &[f64], beta: f64) -> Self {
        let r = norm(point);
        if r == 0.0 || !r.is_finite() {
            return Self::isotropic(point.len(), beta);
        }
        let sign = if beta < 0.0 { 1.0 } else { -1.0 };
        Self { beta, alpha: point.iter().map(|x| sign * x / r).collect() }
    }

    /// Reliability index.
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Influence coefficients, one per active variable.
    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    /// Number of active variables.
    pub fn n_variables(&self) -> usize {
        self.alpha.len()
    }

    /// Non-exceedance probability `Φ(beta)`.
    pub fn p(&self) -> f64 {
        pq_from_beta(self.beta).0
    }

    /// Exceedance (failure) probability `Φ(-beta)`.
    pub fn q(&self) -> f64 {
        pq_from_beta(self.beta).1
    }

    /// Design point `-beta · alpha`.
    pub fn design_point(&self) -> Vec<f64> {
        self.alpha.iter().map(|a| -self.beta * a).collect()
    }

    /// Same direction, different reliability index.
    pub fn with_beta(&self, beta: f64) -> Self {
        Self { beta, alpha: self.alpha.clone() }
    }

    /// Rescale `alpha` to unit length (no-op for a zero vector).
    pub fn normalized(mut self) -> Self {
        let n = norm(&self.alpha);
        if n > 0.0 && n.is_finite() {
            for a in &mut self.alpha {
                *a /= n;
            }
        }
        self
    }
}
