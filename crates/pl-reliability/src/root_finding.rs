//! One-dimensional root finders used along rays.
//!
//! Finders follow a propose/observe protocol: given every point evaluated so
//! far they propose the next abscissa, or stop. [`solve`] drives a protocol
//! against a function and an evaluation budget.

use pl_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// An evaluated point `(x, z(x))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootPoint {
    /// Abscissa
    pub x: f64,
    /// Function value
    pub z: f64,
}

impl RootPoint {
    fn crosses(&self, other: &RootPoint) -> bool {
        self.z == 0.0 || other.z == 0.0 || (self.z < 0.0) != (other.z < 0.0)
    }
}

/// Outcome of a root search, with diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootSearch {
    /// Selected root, `None` when no sign change was found
    pub root: Option<RootPoint>,
    /// Function evaluations spent
    pub n_evaluations: usize,
    /// `false` when the evaluation budget ran out
    pub converged: bool,
}

impl RootSearch {
    /// `|z|` at the returned root.
    pub fn residual(&self) -> Option<f64> {
        self.root.map(|p| p.z.abs())
    }
}

/// Propose/observe root-finding protocol.
pub trait RootProtocol {
    /// Next abscissa to evaluate, or `None` when finished.
    ///
    /// `history` holds every evaluated point, oldest first.
    fn propose(&mut self, history: &[RootPoint]) -> Option<f64>;

    /// Selected root once finished.
    fn answer(&self, history: &[RootPoint]) -> Option<RootPoint>;
}

/// Drive `protocol` from the already evaluated `history`.
pub fn solve<P, F>(
    protocol: &mut P,
    mut history: Vec<RootPoint>,
    max_evaluations: usize,
    mut f: F,
) -> Result<RootSearch>
where
    P: RootProtocol + ?Sized,
    F: FnMut(f64) -> Result<f64>,
{
    let mut n_evaluations = 0;
    let mut converged = true;
    while let Some(x) = protocol.propose(&history) {
        if n_evaluations >= max_evaluations {
            converged = false;
            break;
        }
        let z = f(x)?;
        n_evaluations += 1;
        history.push(RootPoint { x, z });
    }
    Ok(RootSearch { root: protocol.answer(&history), n_evaluations, converged })
}

// ---------------------------------------------------------------------------
// Bracketing methods
// ---------------------------------------------------------------------------

/// Update rule inside a sign-change bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketMethod {
    /// Secant through the bracket ends
    RegulaFalsi,
    /// Regula falsi, damping the retained end after two same-signed updates
    #[default]
    AndersonBjorck,
    /// Halve the bracket
    Bisection,
}

/// Root search inside a bracket `[a, b]` with `z(a)·z(b) <= 0`.
#[derive(Debug, Clone)]
pub struct Bracketing {
    method: BracketMethod,
    tolerance: f64,
    // `a` and `b` keep opposite signs; `b` is the most recent point.
    a: RootPoint,
    b: RootPoint,
    za: f64,
    last_step: f64,
    observed: Option<usize>,
}

impl Bracketing {
    /// New search; fails if `a` and `b` do not bracket a root.
    pub fn new(method: BracketMethod, a: RootPoint, b: RootPoint, tolerance: f64) -> Result<Self> {
        if !a.crosses(&b) {
            return Err(Error::Validation(format!(
                "no sign change between z({})={} and z({})={}",
                a.x, a.z, b.x, b.z
            )));
        }
        Ok(Self { method, tolerance, a, b, za: a.z, last_step: f64::INFINITY, observed: None })
    }

    fn observe(&mut self, c: RootPoint) {
        self.last_step = (c.x - self.b.x).abs();
        if c.crosses(&self.b) && c.z != 0.0 {
            self.a = self.b;
            self.za = self.b.z;
        } else if self.method == BracketMethod::AndersonBjorck && c.z != 0.0 {
            let m = 1.0 - c.z / self.b.z;
            self.za *= if m > 0.0 { m } else { 0.5 };
        }
        self.b = c;
    }
}

impl RootProtocol for Bracketing {
    fn propose(&mut self, history: &[RootPoint]) -> Option<f64> {
        match self.observed {
            Some(n) if history.len() > n => {
                if let Some(&c) = history.last() {
                    self.observe(c);
                }
            }
            _ => {}
        }
        self.observed = Some(history.len());

        if self.a.z == 0.0 || self.b.z == 0.0 {
            return None;
        }
        if (self.b.x - self.a.x).abs() <= self.tolerance || self.last_step <= 0.5 * self.tolerance {
            return None;
        }
        let x = match self.method {
            BracketMethod::Bisection => 0.5 * (self.a.x + self.b.x),
            BracketMethod::RegulaFalsi | BracketMethod::AndersonBjorck => {
                let x = self.b.x - self.b.z * (self.b.x - self.a.x) / (self.b.z - self.za);
                if x.is_finite() { x } else { 0.5 * (self.a.x + self.b.x) }
            }
        };
        Some(x)
    }

    fn answer(&self, _history: &[RootPoint]) -> Option<RootPoint> {
        Some(if self.a.z.abs() < self.b.z.abs() { self.a } else { self.b })
    }
}

// ---------------------------------------------------------------------------
// Linear loop
// ---------------------------------------------------------------------------

/// Point returned by a [`LinearLoop`] once the sign changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopTermination {
    /// First point past the sign change
    #[default]
    LastX,
    /// The bracketing point with the smaller `|z|`
    MinAbsZ,
    /// One extra evaluation at the linearly interpolated crossing
    Interpolate,
    /// The bracketing point on the failure side (`z < 0`)
    FirstNegative,
}

/// Fixed-step march from the first history point until the sign changes.
#[derive(Debug, Clone)]
pub struct LinearLoop {
    step: f64,
    max_x: f64,
    termination: LoopTermination,
    interpolated: bool,
}

impl LinearLoop {
    /// March with `step` up to `max_x`.
    pub fn new(step: f64, max_x: f64, termination: LoopTermination) -> Self {
        Self { step, max_x, termination, interpolated: false }
    }

    /// First `k` with a sign change between points `k - 1` and `k`.
    ///
    /// Leading points with `z == 0` (a ray starting on the limit state) are
    /// not roots; the sign is taken from the first non-zero point.
    fn crossing(history: &[RootPoint]) -> Option<usize> {
        let first = history.iter().position(|p| p.z != 0.0)?;
        (first + 1..history.len()).find(|&k| history[k - 1].crosses(&history[k]))
    }
}

impl RootProtocol for LinearLoop {
    fn propose(&mut self, history: &[RootPoint]) -> Option<f64> {
        if let Some(k) = Self::crossing(history) {
            if self.termination == LoopTermination::Interpolate && !self.interpolated {
                self.interpolated = true;
                let (p, q) = (history[k - 1], history[k]);
                if q.z == p.z {
                    return None;
                }
                return Some(p.x - p.z * (q.x - p.x) / (q.z - p.z));
            }
            return None;
        }
        let last = history.last()?;
        let next = last.x + self.step;
        if last.x >= self.max_x || self.step <= 0.0 {
            return None;
        }
        Some(next.min(self.max_x))
    }

    fn answer(&self, history: &[RootPoint]) -> Option<RootPoint> {
        let k = Self::crossing(history)?;
        let (p, q) = (history[k - 1], history[k]);
        Some(match self.termination {
            LoopTermination::LastX => q,
            LoopTermination::MinAbsZ => {
                if p.z.abs() < q.z.abs() {
                    p
                } else {
                    q
                }
            }
            LoopTermination::Interpolate => *history.last()?,
            LoopTermination::FirstNegative => {
                if p.z < 0.0 {
                    p
                } else {
                    q
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Ray search
// ---------------------------------------------------------------------------

/// Search strategy along a ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "method", rename_all = "snake_case")]
pub enum RayMethod {
    /// Coarse march, then refine the first sign change with a bracketing method
    Robust(BracketMethod),
    /// Coarse march only, selecting the returned point by policy
    LinearLoop(LoopTermination),
}

impl Default for RayMethod {
    fn default() -> Self {
        RayMethod::Robust(BracketMethod::default())
    }
}

/// Root search along `x ∈ [0, max_length]`, starting from a known `z(0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayRootFinder {
    /// Coarse step
    pub step: f64,
    /// Largest abscissa searched
    pub max_length: f64,
    /// Abscissa tolerance of the refinement
    pub tolerance: f64,
    /// Strategy
    pub method: RayMethod,
    /// Evaluation budget per ray
    pub max_evaluations: usize,
}

impl Default for RayRootFinder {
    fn default() -> Self {
        Self {
            step: 3.0,
            max_length: 20.0,
            tolerance: 1e-3,
            method: RayMethod::default(),
            max_evaluations: 100,
        }
    }
}

impl RayRootFinder {
    /// Find the first sign change of `f` along the ray.
    ///
    /// `root == None` means `f` keeps the sign of `z0` up to `max_length`.
    pub fn find<F>(&self, z0: f64, mut f: F) -> Result<RootSearch>
    where
        F: FnMut(f64) -> Result<f64>,
    {
        let origin = RootPoint { x: 0.0, z: z0 };
        match self.method {
            RayMethod::LinearLoop(termination) => {
                let mut protocol = LinearLoop::new(self.step, self.max_length, termination);
                solve(&mut protocol, vec![origin], self.max_evaluations, f)
            }
            RayMethod::Robust(method) => {
                let mut coarse =
                    LinearLoop::new(self.step, self.max_length, LoopTermination::LastX);
                let mut history = vec![origin];
                let mut n_evaluations = 0;
                while let Some(x) = coarse.propose(&history) {
                    if n_evaluations >= self.max_evaluations {
                        return Ok(RootSearch { root: None, n_evaluations, converged: false });
                    }
                    let z = f(x)?;
                    n_evaluations += 1;
                    history.push(RootPoint { x, z });
                }
                let Some(k) = LinearLoop::crossing(&history) else {
                    return Ok(RootSearch { root: None, n_evaluations, converged: true });
                };
                let mut fine = Bracketing::new(method, history[k - 1], history[k], self.tolerance)?;
                let refined = solve(
                    &mut fine,
                    vec![history[k - 1], history[k]],
                    self.max_evaluations.saturating_sub(n_evaluations),
                    f,
                )?;
                Ok(RootSearch { n_evaluations: n_evaluations + refined.n_evaluations, ..refined })
            }
        }
    }
}
