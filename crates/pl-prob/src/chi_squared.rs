//! Chi-square tail probabilities.
//!
//! Along a uniformly distributed direction in `n` standard-normal
//! dimensions, the squared radius is chi-square distributed with `n`
//! degrees of freedom. Directional sampling turns a root at radius `r`
//! into a probability with these tails.

use statrs::function::gamma::{gamma_lr, gamma_ur};

/// `P(R > r)` for the radius `R` of an `n`-dimensional standard normal vector.
pub fn radius_exceedance(n: usize, r: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    if r.is_nan() || r <= 0.0 {
        return 1.0;
    }
    if r.is_infinite() {
        return 0.0;
    }
    gamma_ur(0.5 * n as f64, 0.5 * r * r)
}

/// `P(R <= r)` for the radius `R` of an `n`-dimensional standard normal vector.
pub fn radius_non_exceedance(n: usize, r: f64) -> f64 {
    if n == 0 {
        return 1.0;
    }
    if r.is_nan() || r <= 0.0 {
        return 0.0;
    }
    if r.is_infinite() {
        return 1.0;
    }
    gamma_lr(0.5 * n as f64, 0.5 * r * r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normal::cdf;
    use approx::assert_relative_eq;

    #[test]
    fn test_one_dimension_matches_two_sided_normal_tail() {
        for r in [0.5, 1.0, 2.5, 6.0] {
            assert_relative_eq!(radius_exceedance(1, r), 2.0 * cdf(-r), max_relative = 1e-10);
        }
    }

    #[test]
    fn test_two_dimensions_is_rayleigh() {
        for r in [0.3_f64, 1.0, 3.0] {
            let rayleigh = (-0.5 * r * r).exp();
            assert_relative_eq!(radius_exceedance(2, r), rayleigh, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_tails_are_complementary() {
        for n in [1, 3, 7] {
            for r in [0.1, 1.7, 4.0] {
                let s = radius_exceedance(n, r) + radius_non_exceedance(n, r);
                assert_relative_eq!(s, 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_degenerate_radius() {
        assert_eq!(radius_exceedance(3, 0.0), 1.0);
        assert_eq!(radius_exceedance(3, f64::INFINITY), 0.0);
        assert_eq!(radius_non_exceedance(3, 0.0), 0.0);
    }
}
