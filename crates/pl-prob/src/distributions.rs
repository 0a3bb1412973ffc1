//! Marginal distributions as inverse-CDF transforms.
//!
//! Every distribution maps a standard-normal value `u` to the physical value
//! with the same non-exceedance probability. The tail that is small is
//! evaluated directly (`q = Φ(-u)` for `u > 0`) so that extreme `u` values
//! keep their precision.
//!
//! | Distribution      | Parameters          |
//! |-------------------|---------------------|
//! | [`Normal`]        | mean, deviation     |
//! | [`LogNormal`]     | μ, σ of `ln x`      |
//! | [`Uniform`]       | lower, upper        |
//! | [`Exponential`]   | rate, shift         |
//! | [`Gumbel`]        | location, scale     |
//! | [`Weibull`]       | shape, scale        |
//! | [`Deterministic`] | value               |
//! | [`Combined`]      | two variable indices and an operation |

use pl_core::{Distribution, Error, Result};
use serde::{Deserialize, Serialize};

use crate::normal::{cdf, pq_from_beta};

fn check_finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{name} must be finite, got {value}")));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::Validation(format!("{name} must be finite and > 0, got {value}")));
    }
    Ok(())
}

/// `-ln(q)` with `q = Φ(-u)`, accurate in both tails.
fn neg_ln_exceedance(u: f64) -> f64 {
    if u > 0.0 { -cdf(-u).ln() } else { -(-cdf(u)).ln_1p() }
}

/// Normal distribution `N(mean, deviation)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal {
    mean: f64,
    deviation: f64,
}

impl Normal {
    /// Create a normal distribution; `deviation` must be positive.
    pub fn new(mean: f64, deviation: f64) -> Result<Self> {
        check_finite("mean", mean)?;
        check_positive("deviation", deviation)?;
        Ok(Self { mean, deviation })
    }

    /// Standard normal `N(0, 1)`.
    pub fn standard() -> Self {
        Self { mean: 0.0, deviation: 1.0 }
    }
}

impl Distribution for Normal {
    fn name(&self) -> &str {
        "normal"
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn x_from_u(&self, u: f64) -> Result<f64> {
        Ok(self.mean + self.deviation * u)
    }
}

/// Log-normal distribution: `ln x ~ N(mu, sigma)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormal {
    mu: f64,
    sigma: f64,
}

impl LogNormal {
    /// Create from the parameters of `ln x`.
    pub fn new(mu: f64, sigma: f64) -> Result<Self> {
        check_finite("mu", mu)?;
        check_positive("sigma", sigma)?;
        Ok(Self { mu, sigma })
    }

    /// Create from the mean and standard deviation of `x` itself.
    pub fn from_moments(mean: f64, deviation: f64) -> Result<Self> {
        check_positive("mean", mean)?;
        check_positive("deviation", deviation)?;
        let cv = deviation / mean;
        let sigma2 = cv.mul_add(cv, 1.0).ln();
        Self::new(mean.ln() - 0.5 * sigma2, sigma2.sqrt())
    }
}

impl Distribution for LogNormal {
    fn name(&self) -> &str {
        "lognormal"
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn x_from_u(&self, u: f64) -> Result<f64> {
        Ok((self.mu + self.sigma * u).exp())
    }
}

/// Continuous uniform distribution on `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    lower: f64,
    upper: f64,
}

impl Uniform {
    /// Create a uniform distribution; requires `lower < upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        check_finite("lower", lower)?;
        check_finite("upper", upper)?;
        if lower >= upper {
            return Err(Error::Validation(format!(
                "uniform requires lower < upper, got [{lower}, {upper}]"
            )));
        }
        Ok(Self { lower, upper })
    }
}

impl Distribution for Uniform {
    fn name(&self) -> &str {
        "uniform"
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn x_from_u(&self, u: f64) -> Result<f64> {
        let (p, q) = pq_from_beta(u);
        let width = self.upper - self.lower;
        Ok(if u > 0.0 { self.upper - width * q } else { self.lower + width * p })
    }
}

/// Shifted exponential distribution: `F(x) = 1 - exp(-rate (x - shift))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exponential {
    rate: f64,
    shift: f64,
}

impl Exponential {
    /// Create an exponential distribution; `rate` must be positive.
    pub fn new(rate: f64, shift: f64) -> Result<Self> {
        check_positive("rate", rate)?;
        check_finite("shift", shift)?;
        Ok(Self { rate, shift })
    }
}

impl Distribution for Exponential {
    fn name(&self) -> &str {
        "exponential"
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn x_from_u(&self, u: f64) -> Result<f64> {
        Ok(self.shift + neg_ln_exceedance(u) / self.rate)
    }
}

/// Gumbel (maximum) distribution: `F(x) = exp(-exp(-(x - location) / scale))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gumbel {
    location: f64,
    scale: f64,
}

impl Gumbel {
    /// Create a Gumbel distribution; `scale` must be positive.
    pub fn new(location: f64, scale: f64) -> Result<Self> {
        check_finite("location", location)?;
        check_positive("scale", scale)?;
        Ok(Self { location, scale })
    }
}

impl Distribution for Gumbel {
    fn name(&self) -> &str {
        "gumbel"
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn x_from_u(&self, u: f64) -> Result<f64> {
        // -ln(p), evaluated through q when p is close to one.
        let neg_ln_p = if u > 0.0 { -(-cdf(-u)).ln_1p() } else { -cdf(u).ln() };
        Ok(self.location - self.scale * neg_ln_p.ln())
    }
}

/// Weibull distribution: `F(x) = 1 - exp(-(x / scale)^shape)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weibull {
    shape: f64,
    scale: f64,
}

impl Weibull {
    /// Create a Weibull distribution; both parameters must be positive.
    pub fn new(shape: f64, scale: f64) -> Result<Self> {
        check_positive("shape", shape)?;
        check_positive("scale", scale)?;
        Ok(Self { shape, scale })
    }
}

impl Distribution for Weibull {
    fn name(&self) -> &str {
        "weibull"
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn x_from_u(&self, u: f64) -> Result<f64> {
        Ok(self.scale * neg_ln_exceedance(u).powf(1.0 / self.shape))
    }
}

/// Fixed value; does not consume a standard-normal variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deterministic {
    value: f64,
}

impl Deterministic {
    /// Create a deterministic "distribution".
    pub fn new(value: f64) -> Result<Self> {
        check_finite("value", value)?;
        Ok(Self { value })
    }
}

impl Distribution for Deterministic {
    fn name(&self) -> &str {
        "deterministic"
    }

    fn n_parameters(&self) -> usize {
        1
    }

    fn x_from_u(&self, _u: f64) -> Result<f64> {
        Ok(self.value)
    }

    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Operation of a [`Combined`] distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    /// `x1 + x2`
    Sum,
    /// `x1 * x2`
    Product,
    /// `min(x1, x2)`
    Min,
    /// `max(x1, x2)`
    Max,
}

/// Variable derived from two other variables of the same setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Combined {
    first: usize,
    second: usize,
    op: CombineOp,
}

impl Combined {
    /// Combine variables `first` and `second` (indices into the full variable list).
    pub fn new(first: usize, second: usize, op: CombineOp) -> Self {
        Self { first, second, op }
    }
}

impl Distribution for Combined {
    fn name(&self) -> &str {
        match self.op {
            CombineOp::Sum => "combined-sum",
            CombineOp::Product => "combined-product",
            CombineOp::Min => "combined-min",
            CombineOp::Max => "combined-max",
        }
    }

    fn n_parameters(&self) -> usize {
        2
    }

    fn x_from_u(&self, _u: f64) -> Result<f64> {
        Err(Error::Validation(format!(
            "{} is derived from variables {} and {}; evaluate it through its operands",
            self.name(),
            self.first,
            self.second
        )))
    }

    fn operands(&self) -> Option<(usize, usize)> {
        Some((self.first, self.second))
    }

    fn x_from_pair(&self, x1: f64, x2: f64) -> Result<f64> {
        Ok(match self.op {
            CombineOp::Sum => x1 + x2,
            CombineOp::Product => x1 * x2,
            CombineOp::Min => x1.min(x2),
            CombineOp::Max => x1.max(x2),
        })
    }
}
