//! Core traits for ProbLib
//!
//! The estimators only see the outside world through these interfaces:
//! marginal distributions are consumed as inverse-CDF transforms, random
//! numbers come from a restartable source, and long loops report to an
//! optional progress monitor which may request cancellation.

use crate::Result;

/// Marginal distribution of one physical variable.
///
/// Implementations map a standard-normal value `u` onto the physical value
/// `x` with the same non-exceedance probability.
pub trait Distribution: Send + Sync + std::fmt::Debug {
    /// Distribution name (e.g., "normal", "lognormal")
    fn name(&self) -> &str;

    /// Number of parameters
    fn n_parameters(&self) -> usize;

    /// Physical value with the same non-exceedance probability as `u`
    fn x_from_u(&self, u: f64) -> Result<f64>;

    /// Fixed-value distributions do not consume a standard-normal variable.
    fn is_deterministic(&self) -> bool {
        false
    }

    /// Indices of the two variables a combined distribution is derived from.
    ///
    /// Combined variables do not consume a standard-normal variable either;
    /// their value is [`Distribution::x_from_pair`] of the operands.
    fn operands(&self) -> Option<(usize, usize)> {
        None
    }

    /// Combine two physical values (combined distributions only).
    fn x_from_pair(&self, _x1: f64, _x2: f64) -> Result<f64> {
        Err(crate::Error::Validation(format!("{} is not a combined distribution", self.name())))
    }
}

/// Source of pseudo-random numbers.
///
/// Not required to be thread-safe: estimators draw on the orchestrating
/// thread and hand finished vectors to parallel workers.
pub trait RandomSource: Send {
    /// Uniform draw on `(0, 1)`
    fn uniform(&mut self) -> f64;

    /// Fill `out` with independent standard-normal draws
    fn fill_standard_normal(&mut self, out: &mut [f64]);

    /// Re-seed to the initial state
    fn restart(&mut self);
}

/// Snapshot handed to a [`ProgressMonitor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Completed iterations or samples
    pub step: usize,
    /// Budget for `step`
    pub max_steps: usize,
    /// Current reliability index estimate (NaN when not yet available)
    pub beta: f64,
    /// Current convergence measure (method specific; NaN when not available)
    pub convergence: f64,
}

/// Answer of a [`ProgressMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep going
    Continue,
    /// Stop and return the partial result
    Abort,
}

/// Synchronous progress hook, invoked once per outer iteration or sample.
pub trait ProgressMonitor: Send + Sync {
    /// Report progress; return [`Control::Abort`] to cancel.
    fn report(&self, progress: &Progress) -> Control;
}

/// Progress monitor that never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressMonitor for NoProgress {
    fn report(&self, _progress: &Progress) -> Control {
        Control::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(f64);

    impl Distribution for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn n_parameters(&self) -> usize {
            1
        }

        fn x_from_u(&self, _u: f64) -> Result<f64> {
            Ok(self.0)
        }

        fn is_deterministic(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_plain_distribution_is_not_combined() {
        let d = Fixed(2.5);
        assert_eq!(d.x_from_u(10.0).unwrap(), 2.5);
        assert!(d.operands().is_none());
        assert!(d.x_from_pair(1.0, 2.0).is_err());
    }

    #[test]
    fn test_no_progress_continues() {
        let p = Progress { step: 1, max_steps: 10, beta: f64::NAN, convergence: f64::NAN };
        assert_eq!(NoProgress.report(&p), Control::Continue);
    }
}
