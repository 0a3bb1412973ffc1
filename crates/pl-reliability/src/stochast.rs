//! Stochastic setup: marginal distributions, correlation and the mapping
//! between active (solver) coordinates and the full variable list.

use pl_core::{Distribution, Error, Result};

use crate::correlation::{Correlation, IdentityCorrelation};

/// All variables of a reliability problem.
///
/// A variable is *active* when it carries its own standard-normal
/// coordinate: it is stochastic, not a combination of other variables and
/// not fully correlated with another variable. Solvers work in the active
/// space only.
#[derive(Debug)]
pub struct StochasticSetup {
    distributions: Vec<Box<dyn Distribution>>,
    correlation: Box<dyn Correlation>,
    active: Vec<usize>,
}

impl StochasticSetup {
    /// Setup with uncorrelated variables.
    pub fn independent(distributions: Vec<Box<dyn Distribution>>) -> Result<Self> {
        let n = distributions.len();
        Self::new(distributions, Box::new(IdentityCorrelation::new(n)))
    }

    /// Setup with a correlation model over all variables.
    pub fn new(
        distributions: Vec<Box<dyn Distribution>>,
        correlation: Box<dyn Correlation>,
    ) -> Result<Self> {
        if correlation.dimension() != distributions.len() {
            return Err(Error::Validation(format!(
                "correlation covers {} variables, setup has {}",
                correlation.dimension(),
                distributions.len()
            )));
        }
        let mut setup = Self { distributions, correlation, active: Vec::new() };
        setup.refresh()?;
        Ok(setup)
    }

    /// Swap the marginal of variable `i`.
    ///
    /// The previous distribution is dropped and the active mapping is
    /// recomputed; the new one is validated like at construction.
    pub fn replace_distribution(
        &mut self,
        i: usize,
        distribution: Box<dyn Distribution>,
    ) -> Result<()> {
        if i >= self.distributions.len() {
            return Err(Error::Validation(format!(
                "variable {i} out of range 0..{}",
                self.distributions.len()
            )));
        }
        let previous = std::mem::replace(&mut self.distributions[i], distribution);
        if let Err(e) = self.refresh() {
            self.distributions[i] = previous;
            self.refresh()?;
            return Err(e);
        }
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        let n = self.distributions.len();
        for (i, d) in self.distributions.iter().enumerate() {
            if let Some((a, b)) = d.operands() {
                if a >= n || b >= n {
                    return Err(Error::Validation(format!(
                        "combined variable {i} refers to a variable outside 0..{n}"
                    )));
                }
            }
            if !self.is_stochastic(i) && self.correlation.is_correlated(i) {
                return Err(Error::Validation(format!(
                    "variable {i} ({}) is not stochastic and cannot be correlated",
                    d.name()
                )));
            }
        }
        self.check_acyclic()?;

        self.active = (0..n)
            .filter(|&i| self.is_stochastic(i) && !self.correlation.is_fully_correlated(i))
            .collect();
        if self.active.is_empty() {
            return Err(Error::Validation("no active stochastic variables".to_string()));
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        // 0 = unvisited, 1 = on stack, 2 = done
        fn visit(setup: &StochasticSetup, i: usize, state: &mut [u8]) -> Result<()> {
            match state[i] {
                1 => {
                    return Err(Error::Validation(format!(
                        "combined variable {i} depends on itself"
                    )));
                }
                2 => return Ok(()),
                _ => {}
            }
            state[i] = 1;
            if let Some((a, b)) = setup.distributions[i].operands() {
                visit(setup, a, state)?;
                visit(setup, b, state)?;
            }
            state[i] = 2;
            Ok(())
        }
        let mut state = vec![0u8; self.distributions.len()];
        for i in 0..self.distributions.len() {
            visit(self, i, &mut state)?;
        }
        Ok(())
    }

    fn is_stochastic(&self, i: usize) -> bool {
        let d = &self.distributions[i];
        !d.is_deterministic() && d.operands().is_none()
    }

    /// Total number of variables.
    pub fn n_total(&self) -> usize {
        self.distributions.len()
    }

    /// Number of active variables.
    pub fn n_active(&self) -> usize {
        self.active.len()
    }

    /// Full-list index of each active variable.
    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    /// Distribution of variable `i` (full-list index).
    pub fn distribution(&self, i: usize) -> &dyn Distribution {
        self.distributions[i].as_ref()
    }

    /// Correlation model.
    pub fn correlation(&self) -> &dyn Correlation {
        self.correlation.as_ref()
    }

    /// Correlated standard-normal values of all variables for an active
    /// vector `u`. Inactive variables have independent coordinate zero.
    pub fn correlated_u(&self, u: &[f64]) -> Vec<f64> {
        let mut full = vec![0.0; self.n_total()];
        for (&i, &v) in self.active.iter().zip(u) {
            full[i] = v;
        }
        self.correlation.correlate(&full)
    }
}
