//! A single evaluation point with lazily computed physical values.

use pl_core::{Error, Result};
use std::cell::Cell;

use crate::stochast::StochasticSetup;

/// Standard-normal point of the active variables, its correlated image over
/// all variables and the physical values derived on demand.
///
/// Physical values are cached per draw; [`SampleDraw::set_u`] reapplies the
/// correlation and clears the cache.
#[derive(Debug)]
pub struct SampleDraw<'a> {
    setup: &'a StochasticSetup,
    u: Vec<f64>,
    u_correlated: Vec<f64>,
    x: Vec<Cell<Option<f64>>>,
}

impl<'a> SampleDraw<'a> {
    /// New draw at active-space point `u`.
    pub fn new(setup: &'a StochasticSetup, u: Vec<f64>) -> Result<Self> {
        if u.len() != setup.n_active() {
            return Err(Error::Validation(format!(
                "expected {} active coordinates, got {}",
                setup.n_active(),
                u.len()
            )));
        }
        let u_correlated = setup.correlated_u(&u);
        let x = (0..setup.n_total()).map(|_| Cell::new(None)).collect();
        Ok(Self { setup, u, u_correlated, x })
    }

    /// Move the draw to a new point.
    pub fn set_u(&mut self, u: &[f64]) -> Result<()> {
        if u.len() != self.u.len() {
            return Err(Error::Validation(format!(
                "expected {} active coordinates, got {}",
                self.u.len(),
                u.len()
            )));
        }
        self.u.copy_from_slice(u);
        self.u_correlated = self.setup.correlated_u(&self.u);
        for cell in &self.x {
            cell.set(None);
        }
        Ok(())
    }

    /// Active-space coordinates.
    pub fn u(&self) -> &[f64] {
        &self.u
    }

    /// Correlated standard-normal value of every variable.
    pub fn u_correlated(&self) -> &[f64] {
        &self.u_correlated
    }

    /// Number of variables (full list).
    pub fn n_variables(&self) -> usize {
        self.x.len()
    }

    /// Physical value of variable `i`.
    pub fn x(&self, i: usize) -> Result<f64> {
        let cell = self.x.get(i).ok_or_else(|| {
            Error::Validation(format!("variable {i} out of range 0..{}", self.x.len()))
        })?;
        if let Some(v) = cell.get() {
            return Ok(v);
        }
        let dist = self.setup.distribution(i);
        let v = match dist.operands() {
            Some((a, b)) => dist.x_from_pair(self.x(a)?, self.x(b)?)?,
            None => dist.x_from_u(self.u_correlated[i])?,
        };
        cell.set(Some(v));
        Ok(v)
    }

    /// Physical values of all variables.
    pub fn x_all(&self) -> Result<Vec<f64>> {
        (0..self.n_variables()).map(|i| self.x(i)).collect()
    }
}
