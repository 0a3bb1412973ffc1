//! Standard-normal utilities.
//!
//! The reliability index `beta` and the failure probability are related by
//! `q = Φ(-beta)` (exceedance) and `p = Φ(beta)` (non-exceedance). Both tails
//! are evaluated through `erfc` so that each is accurate where it is small.

use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;

/// Largest reliability index represented; `beta_from_q(0)` saturates here.
pub const BETA_MAX: f64 = 40.0;

/// Natural log of `sqrt(2π)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Density of the standard normal distribution.
#[inline]
pub fn pdf(u: f64) -> f64 {
    (-0.5 * u * u - LN_SQRT_2PI).exp()
}

/// Non-exceedance probability `Φ(u)`.
#[inline]
pub fn cdf(u: f64) -> f64 {
    0.5 * erfc(-u / SQRT_2)
}

/// Non-exceedance and exceedance probability `(Φ(beta), Φ(-beta))`.
///
/// `p + q == 1` up to rounding; whichever of the two is small carries full
/// relative precision.
#[inline]
pub fn pq_from_beta(beta: f64) -> (f64, f64) {
    (cdf(beta), cdf(-beta))
}

/// Reliability index from an exceedance probability `q = Φ(-beta)`.
///
/// Saturates at `±BETA_MAX` for `q <= 0` and `q >= 1`.
pub fn beta_from_q(q: f64) -> f64 {
    if q.is_nan() {
        return f64::NAN;
    }
    if q <= 0.0 {
        return BETA_MAX;
    }
    if q >= 1.0 {
        return -BETA_MAX;
    }
    if q > 0.5 {
        return -beta_from_q(1.0 - q);
    }

    let mut beta = SQRT_2 * erfc_inv(2.0 * q);
    // One Newton step on Φ(-beta) = q polishes the rational approximation.
    let density = pdf(beta);
    if density > 0.0 && density.is_finite() {
        beta += (cdf(-beta) - q) / density;
    }
    beta.clamp(-BETA_MAX, BETA_MAX)
}

/// Reliability index from a non-exceedance probability `p = Φ(beta)`.
pub fn beta_from_p(p: f64) -> f64 {
    -beta_from_q(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cdf_symmetry() {
        for u in [-5.0, -1.3, 0.0, 0.7, 4.2] {
            assert_relative_eq!(cdf(u) + cdf(-u), 1.0, epsilon = 1e-15);
        }
        assert_relative_eq!(cdf(0.0), 0.5, epsilon = 1e-15);
    }

    #[test]
    fn test_pdf_at_zero() {
        assert_relative_eq!(pdf(0.0), 0.398_942_280_401_432_7, epsilon = 1e-15);
    }

    #[test]
    fn test_known_quantiles() {
        assert_relative_eq!(beta_from_q(0.05), 1.644_853_626_951_472_2, epsilon = 1e-10);
        assert_relative_eq!(beta_from_q(0.5), 0.0, epsilon = 1e-12);
        assert_relative_eq!(beta_from_p(0.975), 1.959_963_984_540_054, epsilon = 1e-10);
    }

    #[test]
    fn test_round_trip_over_full_range() {
        let mut u = -37.0;
        while u <= 37.0 {
            let (p, q) = pq_from_beta(u);
            let back = if u < 0.0 { beta_from_p(p) } else { beta_from_q(q) };
            assert!((back - u).abs() < 1e-8, "u={u}: recovered {back} (p={p:e}, q={q:e})");
            u += 0.25;
        }
    }

    #[test]
    fn test_saturation() {
        assert_eq!(beta_from_q(0.0), BETA_MAX);
        assert_eq!(beta_from_p(0.0), -BETA_MAX);
        assert_eq!(beta_from_q(1.0), -BETA_MAX);
        let (_, q) = pq_from_beta(40.0);
        assert_eq!(beta_from_q(q), BETA_MAX);
        assert!(beta_from_q(f64::NAN).is_nan());
    }
}
