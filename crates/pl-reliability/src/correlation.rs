//! Correlation models mapping independent standard-normal vectors to
//! correlated ones: `u' = C · u`.
//!
//! - [`IdentityCorrelation`]: no correlation, `C = I`
//! - [`GaussianCorrelation`]: Cholesky factor of the correlation matrix;
//!   pairs with `|rho| = 1` substitute `u_j = ±u_i`
//! - [`RobustGaussianCorrelation`]: resolves chains of full correlations
//!   transitively and moves partial correlations onto the chain root

use nalgebra::DMatrix;
use pl_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Pairs with `|rho| >= 1 - FULL_CORRELATION_TOLERANCE` are full correlations.
pub const FULL_CORRELATION_TOLERANCE: f64 = 1e-10;

/// Correlation between two variables (indices into the full variable list).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    /// First variable
    pub i: usize,
    /// Second variable; replaced by `±i` when the correlation is full
    pub j: usize,
    /// Correlation coefficient in `[-1, 1]`
    pub rho: f64,
}

impl CorrelationPair {
    /// Create a pair.
    pub fn new(i: usize, j: usize, rho: f64) -> Self {
        Self { i, j, rho }
    }

    fn is_full(&self) -> bool {
        self.rho.abs() >= 1.0 - FULL_CORRELATION_TOLERANCE
    }

    fn key(&self) -> (usize, usize) {
        (self.i.min(self.j), self.i.max(self.j))
    }
}

/// Linear map from independent to correlated standard-normal space.
pub trait Correlation: Send + Sync + fmt::Debug {
    /// Short model name.
    fn name(&self) -> &'static str;

    /// Number of variables the model covers.
    fn dimension(&self) -> usize;

    /// Number of variables that keep an independent degree of freedom.
    fn n_independent(&self) -> usize;

    /// `true` if variable `i` is a deterministic function (`±u_k`) of another.
    fn is_fully_correlated(&self, i: usize) -> bool;

    /// `true` if variable `i` appears in any correlation pair.
    fn is_correlated(&self, i: usize) -> bool;

    /// Apply the map to an independent vector of length [`Correlation::dimension`].
    fn correlate(&self, u: &[f64]) -> Vec<f64>;
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Uncorrelated variables.
#[derive(Debug, Clone)]
pub struct IdentityCorrelation {
    n: usize,
}

impl IdentityCorrelation {
    /// Identity over `n` variables.
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Correlation for IdentityCorrelation {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn dimension(&self) -> usize {
        self.n
    }

    fn n_independent(&self) -> usize {
        self.n
    }

    fn is_fully_correlated(&self, _i: usize) -> bool {
        false
    }

    fn is_correlated(&self, _i: usize) -> bool {
        false
    }

    fn correlate(&self, u: &[f64]) -> Vec<f64> {
        u.to_vec()
    }
}

// ---------------------------------------------------------------------------
// Gaussian
// ---------------------------------------------------------------------------

/// Gaussian correlation via a Cholesky factor.
#[derive(Debug, Clone)]
pub struct GaussianCorrelation {
    transform: DMatrix<f64>,
    fully_correlated: Vec<bool>,
    correlated: Vec<bool>,
    n_independent: usize,
}

impl GaussianCorrelation {
    /// Build from correlation pairs.
    ///
    /// A full correlation makes `j` a substitute of `±i`. Chains of full
    /// correlations (`j` substituted and used as a source, or substituted
    /// twice) are rejected; use [`RobustGaussianCorrelation`] for those.
    /// Partial correlations involving a substituted variable are dropped.
    pub fn new(n: usize, pairs: &[CorrelationPair]) -> Result<Self> {
        validate_pairs(n, pairs)?;

        let mut substitutions: Vec<(usize, usize, f64)> = Vec::new();
        for p in pairs.iter().filter(|p| p.is_full()) {
            substitutions.push((p.j, p.i, p.rho.signum()));
        }
        for &(dep, _, _) in &substitutions {
            if substitutions.iter().filter(|&&(d, _, _)| d == dep).count() > 1
                || substitutions.iter().any(|&(_, src, _)| src == dep)
            {
                return Err(Error::Validation(format!(
                    "variable {dep} takes part in a chain of full correlations; \
                     use the robust Gaussian model"
                )));
            }
        }

        let partial: Vec<CorrelationPair> = pairs
            .iter()
            .filter(|p| !p.is_full())
            .filter(|p| {
                let touches = substitutions.iter().any(|&(d, _, _)| d == p.i || d == p.j);
                if touches {
                    log::warn!(
                        "dropping correlation {}-{} (rho={}): variable is fully correlated",
                        p.i,
                        p.j,
                        p.rho
                    );
                }
                !touches
            })
            .copied()
            .collect();

        let mut correlated = vec![false; n];
        for p in pairs {
            correlated[p.i] = true;
            correlated[p.j] = true;
        }
        Self::assemble(n, &partial, &substitutions, correlated)
    }

    /// `C = F · L` with `L` the Cholesky factor of the partial correlation
    /// matrix and `F` the substitution matrix.
    fn assemble(
        n: usize,
        partial: &[CorrelationPair],
        substitutions: &[(usize, usize, f64)],
        correlated: Vec<bool>,
    ) -> Result<Self> {
        let mut r = DMatrix::<f64>::identity(n, n);
        for p in partial {
            r[(p.i, p.j)] = p.rho;
            r[(p.j, p.i)] = p.rho;
        }

        let mut fully_correlated = vec![false; n];
        for &(dep, _, _) in substitutions {
            fully_correlated[dep] = true;
            for k in 0..n {
                if k != dep {
                    r[(dep, k)] = 0.0;
                    r[(k, dep)] = 0.0;
                }
            }
        }

        let l = r
            .cholesky()
            .ok_or_else(|| {
                Error::Computation("correlation matrix is not positive definite".to_string())
            })?
            .l();

        let mut f = DMatrix::<f64>::identity(n, n);
        for &(dep, src, sign) in substitutions {
            f[(dep, dep)] = 0.0;
            f[(dep, src)] = sign;
        }

        let n_independent = n - substitutions.len();
        Ok(Self { transform: f * l, fully_correlated, correlated, n_independent })
    }

    /// Entry `(i, j)` of the transformation matrix.
    pub fn coefficient(&self, i: usize, j: usize) -> f64 {
        self.transform[(i, j)]
    }
}

impl Correlation for GaussianCorrelation {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn dimension(&self) -> usize {
        self.transform.nrows()
    }

    fn n_independent(&self) -> usize {
        self.n_independent
    }

    fn is_fully_correlated(&self, i: usize) -> bool {
        self.fully_correlated[i]
    }

    fn is_correlated(&self, i: usize) -> bool {
        self.correlated[i]
    }

    fn correlate(&self, u: &[f64]) -> Vec<f64> {
        let n = self.dimension();
        (0..n).map(|i| (0..n).map(|j| self.transform[(i, j)] * u[j]).sum()).collect()
    }
}

// ---------------------------------------------------------------------------
// Robust Gaussian
// ---------------------------------------------------------------------------

/// Gaussian correlation that tolerates chains of full correlations.
///
/// Each group of fully correlated variables is represented by its lowest
/// index. Partial correlations of the other members are transferred to that
/// root (with the member's sign) unless the root pair is already given.
#[derive(Debug, Clone)]
pub struct RobustGaussianCorrelation {
    inner: GaussianCorrelation,
    groups: Vec<(usize, usize, f64)>,
}

impl RobustGaussianCorrelation {
    /// Build from correlation pairs, resolving full-correlation chains.
    pub fn new(n: usize, pairs: &[CorrelationPair]) -> Result<Self> {
        validate_pairs(n, pairs)?;

        let mut sets = SignedUnionFind::new(n);
        for p in pairs.iter().filter(|p| p.is_full()) {
            sets.union(p.j, p.i, p.rho.signum())?;
        }

        let mut substitutions = Vec::new();
        for var in 0..n {
            let (root, sign) = sets.find(var);
            if root != var {
                substitutions.push((var, root, sign));
            }
        }
        let is_chain = |p: &CorrelationPair| {
            let (ri, _) = sets.find_const(p.i);
            let (rj, _) = sets.find_const(p.j);
            (ri != p.i && ri != p.j) || (rj != p.i && rj != p.j)
        };
        if pairs.iter().filter(|p| p.is_full()).any(is_chain) {
            log::warn!(
                "resolved chain of full correlations into {} substitution(s)",
                substitutions.len()
            );
        }

        let mut explicit: HashMap<(usize, usize), f64> = HashMap::new();
        for p in pairs.iter().filter(|p| !p.is_full()) {
            explicit.insert(p.key(), p.rho);
        }

        let mut partial: Vec<CorrelationPair> = Vec::new();
        let mut seen: HashMap<(usize, usize), f64> = HashMap::new();
        for p in pairs.iter().filter(|p| !p.is_full()) {
            let (ri, si) = sets.find_const(p.i);
            let (rj, sj) = sets.find_const(p.j);
            if ri == rj {
                log::warn!(
                    "dropping correlation {}-{} (rho={}): both variables are fully correlated",
                    p.i,
                    p.j,
                    p.rho
                );
                continue;
            }
            let mapped = CorrelationPair::new(ri, rj, si * sj * p.rho);
            let moved = ri != p.i || rj != p.j;
            if moved && explicit.contains_key(&mapped.key()) {
                continue;
            }
            if seen.insert(mapped.key(), mapped.rho).is_some() {
                log::warn!(
                    "correlation {}-{} transferred more than once; keeping the first",
                    mapped.i,
                    mapped.j
                );
                continue;
            }
            partial.push(mapped);
        }

        let mut correlated = vec![false; n];
        for p in pairs {
            correlated[p.i] = true;
            correlated[p.j] = true;
        }
        let inner = GaussianCorrelation::assemble(n, &partial, &substitutions, correlated)?;
        Ok(Self { inner, groups: substitutions })
    }

    /// Resolved substitutions `(dependent, root, sign)`.
    pub fn substitutions(&self) -> &[(usize, usize, f64)] {
        &self.groups
    }
}

impl Correlation for RobustGaussianCorrelation {
    fn name(&self) -> &'static str {
        "gaussian_robust"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn n_independent(&self) -> usize {
        self.inner.n_independent()
    }

    fn is_fully_correlated(&self, i: usize) -> bool {
        self.inner.is_fully_correlated(i)
    }

    fn is_correlated(&self, i: usize) -> bool {
        self.inner.is_correlated(i)
    }

    fn correlate(&self, u: &[f64]) -> Vec<f64> {
        self.inner.correlate(u)
    }
}

fn validate_pairs(n: usize, pairs: &[CorrelationPair]) -> Result<()> {
    let mut keys = std::collections::HashSet::new();
    for p in pairs {
        if p.i >= n || p.j >= n {
            return Err(Error::Validation(format!(
                "correlation {}-{} refers to a variable outside 0..{n}",
                p.i, p.j
            )));
        }
        if p.i == p.j {
            return Err(Error::Validation(format!("self-correlation of variable {}", p.i)));
        }
        if !p.rho.is_finite() || p.rho.abs() > 1.0 + FULL_CORRELATION_TOLERANCE {
            return Err(Error::Validation(format!(
                "correlation {}-{} must lie in [-1, 1], got {}",
                p.i, p.j, p.rho
            )));
        }
        if !keys.insert(p.key()) {
            return Err(Error::Validation(format!(
                "correlation {}-{} specified twice",
                p.i, p.j
            )));
        }
    }
    Ok(())
}

/// Disjoint sets with a sign relative to the parent; the lowest index of a
/// set is its root.
struct SignedUnionFind {
    parent: Vec<usize>,
    sign: Vec<f64>,
}

impl SignedUnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), sign: vec![1.0; n] }
    }

    /// Root and sign with path compression.
    fn find(&mut self, x: usize) -> (usize, f64) {
        if self.parent[x] == x {
            return (x, 1.0);
        }
        let (root, s) = self.find(self.parent[x]);
        self.sign[x] *= s;
        self.parent[x] = root;
        (root, self.sign[x])
    }

    fn find_const(&self, mut x: usize) -> (usize, f64) {
        let mut s = 1.0;
        while self.parent[x] != x {
            s *= self.sign[x];
            x = self.parent[x];
        }
        (x, s)
    }

    /// Record `u_x = sign · u_y`.
    fn union(&mut self, x: usize, y: usize, sign: f64) -> Result<()> {
        let (rx, sx) = self.find(x);
        let (ry, sy) = self.find(y);
        // u_x = sx u_rx, u_y = sy u_ry  =>  u_rx = sx * sign * sy * u_ry
        let relative = sx * sign * sy;
        if rx == ry {
            if relative != 1.0 {
                return Err(Error::Validation(format!(
                    "inconsistent signs in full correlations between {x} and {y}"
                )));
            }
            return Ok(());
        }
        let (child, root) = if rx > ry { (rx, ry) } else { (ry, rx) };
        self.parent[child] = root;
        self.sign[child] = relative;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_full_correlation_substitutes() {
        for (rho, expected) in [(-1.0, -8.0), (0.0, 1.0), (1.0, 8.0)] {
            let c = GaussianCorrelation::new(2, &[CorrelationPair::new(0, 1, rho)]).unwrap();
            let out = c.correlate(&[8.0, 1.0]);
            assert_relative_eq!(out[0], 8.0, epsilon = 1e-12);
            assert_relative_eq!(out[1], expected, epsilon = 1e-12);
            let full = rho != 0.0;
            assert_eq!(c.is_fully_correlated(1), full);
            assert_eq!(c.n_independent(), if full { 1 } else { 2 });
        }
    }

    #[test]
    fn test_partial_correlation() {
        for rho in [-0.9, -0.3, 0.5, 0.99] {
            let c = GaussianCorrelation::new(2, &[CorrelationPair::new(0, 1, rho)]).unwrap();
            let out = c.correlate(&[8.0, 1.0]);
            assert_relative_eq!(out[1], rho * 8.0 + (1.0f64 - rho * rho).sqrt(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_invalid_pairs() {
        assert!(GaussianCorrelation::new(2, &[CorrelationPair::new(0, 2, 0.1)]).is_err());
        assert!(GaussianCorrelation::new(2, &[CorrelationPair::new(1, 1, 0.1)]).is_err());
        assert!(GaussianCorrelation::new(2, &[CorrelationPair::new(0, 1, 1.5)]).is_err());
        let twice = [CorrelationPair::new(0, 1, 0.1), CorrelationPair::new(1, 0, 0.2)];
        assert!(GaussianCorrelation::new(2, &twice).is_err());
    }

    #[test]
    fn test_not_positive_definite() {
        let pairs = [
            CorrelationPair::new(0, 1, 0.9),
            CorrelationPair::new(1, 2, 0.9),
            CorrelationPair::new(0, 2, -0.9),
        ];
        match GaussianCorrelation::new(3, &pairs) {
            Err(Error::Computation(_)) => {}
            other => panic!("expected computation error, got {other:?}"),
        }
    }

    #[test]
    fn test_basic_rejects_chain() {
        let pairs = [CorrelationPair::new(0, 1, 1.0), CorrelationPair::new(1, 2, 1.0)];
        assert!(GaussianCorrelation::new(3, &pairs).is_err());
    }

    #[test]
    fn test_robust_resolves_chain() {
        let pairs = [CorrelationPair::new(0, 1, 1.0), CorrelationPair::new(1, 2, -1.0)];
        let c = RobustGaussianCorrelation::new(3, &pairs).unwrap();
        assert_eq!(c.n_independent(), 1);
        let out = c.correlate(&[2.0, 0.0, 0.0]);
        assert_relative_eq!(out[0], 2.0);
        assert_relative_eq!(out[1], 2.0);
        assert_relative_eq!(out[2], -2.0);
    }

    #[test]
    fn test_robust_transfers_partial_correlation() {
        // 0 == 1 fully, 1 ~ 2 partially: the partial link moves onto 0.
        let pairs = [CorrelationPair::new(0, 1, 1.0), CorrelationPair::new(1, 2, 0.6)];
        let c = RobustGaussianCorrelation::new(3, &pairs).unwrap();
        let out = c.correlate(&[1.0, 0.0, 0.0]);
        assert_relative_eq!(out[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[2], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_robust_inconsistent_signs() {
        let pairs = [
            CorrelationPair::new(0, 1, 1.0),
            CorrelationPair::new(1, 2, 1.0),
            CorrelationPair::new(0, 2, -1.0),
        ];
        assert!(RobustGaussianCorrelation::new(3, &pairs).is_err());
    }

    #[test]
    fn test_robust_matches_basic_without_chains() {
        let pairs = [CorrelationPair::new(0, 1, 0.4), CorrelationPair::new(2, 1, 0.2)];
        let a = GaussianCorrelation::new(3, &pairs).unwrap();
        let b = RobustGaussianCorrelation::new(3, &pairs).unwrap();
        let u = [0.3, -1.2, 2.0];
        for (x, y) in a.correlate(&u).iter().zip(b.correlate(&u)) {
            assert_relative_eq!(*x, y, epsilon = 1e-14);
        }
    }
}
