//! Start points for FORM.

use pl_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::alpha_beta::norm;
use crate::model::Model;
use crate::root_finding::RayRootFinder;

/// How FORM chooses its first iterate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartMethod {
    /// Origin of the standard-normal space
    #[default]
    Zero,
    /// `u = (1, …, 1)`
    One,
    /// User supplied point in active space
    Given {
        /// Active-space coordinates
        u: Vec<f64>,
    },
    /// First limit-state crossing along a ray from the origin
    RaySearch {
        /// Ray direction; `None` means `(1, …, 1)`
        direction: Option<Vec<f64>>,
        /// Coarse step along the ray
        step: f64,
        /// Largest distance searched
        max_length: f64,
    },
}

/// Start point and the limit-state evaluations spent finding it.
#[derive(Debug, Clone, PartialEq)]
pub struct StartPoint {
    /// Active-space coordinates
    pub u: Vec<f64>,
    /// Limit-state evaluations
    pub n_evaluations: usize,
}

/// Resolve `method` for `model`.
pub fn start_point(method: &StartMethod, model: &Model<'_>) -> Result<StartPoint> {
    let n = model.n_active();
    match method {
        StartMethod::Zero => Ok(StartPoint { u: vec![0.0; n], n_evaluations: 0 }),
        StartMethod::One => Ok(StartPoint { u: vec![1.0; n], n_evaluations: 0 }),
        StartMethod::Given { u } => {
            if u.len() != n || u.iter().any(|v| !v.is_finite()) {
                return Err(Error::Validation(format!(
                    "start point needs {n} finite coordinates, got {:?}",
                    u
                )));
            }
            Ok(StartPoint { u: u.clone(), n_evaluations: 0 })
        }
        StartMethod::RaySearch { direction, step, max_length } => {
            let mut d = direction.clone().unwrap_or_else(|| vec![1.0; n]);
            let len = norm(&d);
            if d.len() != n || len == 0.0 || !len.is_finite() {
                return Err(Error::Validation(format!(
                    "ray direction needs {n} coordinates and a non-zero length"
                )));
            }
            d.iter_mut().for_each(|v| *v /= len);

            let z0 = model.z(&vec![0.0; n])?;
            let finder =
                RayRootFinder { step: *step, max_length: *max_length, ..RayRootFinder::default() };
            let search = finder.find(z0, |lambda| {
                let u: Vec<f64> = d.iter().map(|v| lambda * v).collect();
                model.z(&u)
            })?;
            let n_evaluations = search.n_evaluations + 1;
            let u = match search.root {
                Some(root) => d.iter().map(|v| root.x * v).collect(),
                None => {
                    log::debug!(
                        "ray search found no crossing up to {max_length}; starting at origin"
                    );
                    vec![0.0; n]
                }
            };
            Ok(StartPoint { u, n_evaluations })
        }
    }
}
