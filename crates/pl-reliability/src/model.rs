//! Limit-state functions and the evaluation context shared by all methods.

use pl_core::{Control, Error, NoProgress, Progress, ProgressMonitor, Result};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::draw::SampleDraw;
use crate::stochast::StochasticSetup;

/// Limit-state function `z(x)`; failure is `z < 0`.
///
/// Implementations must be safe to call concurrently; `thread_id` is the
/// index of the calling worker inside the model's pool and may be used to
/// select per-thread scratch state.
pub trait LimitState: Send + Sync {
    /// Evaluate `z` at a draw.
    fn z(&self, draw: &SampleDraw<'_>, thread_id: usize) -> Result<f64>;

    /// Evaluate `z` and return additional output values.
    ///
    /// Default: the physical values of all variables.
    fn z_with_output(&self, draw: &SampleDraw<'_>, thread_id: usize) -> Result<(f64, Vec<f64>)> {
        let z = self.z(draw, thread_id)?;
        Ok((z, draw.x_all()?))
    }
}

/// [`LimitState`] from a closure over the draw.
pub struct FnLimitState<F>(F);

impl<F> FnLimitState<F>
where
    F: Fn(&SampleDraw<'_>) -> Result<f64> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> LimitState for FnLimitState<F>
where
    F: Fn(&SampleDraw<'_>) -> Result<f64> + Send + Sync,
{
    fn z(&self, draw: &SampleDraw<'_>, _thread_id: usize) -> Result<f64> {
        (self.0)(draw)
    }
}

/// `z` and its gradient with respect to `u`.
#[derive(Debug, Clone)]
pub struct Gradient {
    /// `z` at the expansion point
    pub z: f64,
    /// `dz/du`
    pub dzdu: Vec<f64>,
    /// Limit-state evaluations spent
    pub n_evaluations: usize,
}

static NO_PROGRESS: NoProgress = NoProgress;

/// Evaluation context: setup, limit state, worker pool and progress monitor.
pub struct Model<'a> {
    setup: &'a StochasticSetup,
    limit_state: &'a dyn LimitState,
    monitor: &'a dyn ProgressMonitor,
    // `None` for single-threaded models; work then runs on the caller.
    pool: Option<rayon::ThreadPool>,
    n_threads: usize,
    evaluations: AtomicUsize,
}

impl<'a> Model<'a> {
    /// Single-threaded model.
    pub fn new(setup: &'a StochasticSetup, limit_state: &'a dyn LimitState) -> Result<Self> {
        Self::with_threads(setup, limit_state, 1)
    }

    /// Model evaluating on `n_threads` workers (`0` = available parallelism).
    pub fn with_threads(
        setup: &'a StochasticSetup,
        limit_state: &'a dyn LimitState,
        n_threads: usize,
    ) -> Result<Self> {
        let n_threads = if n_threads == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            n_threads
        };
        let pool = if n_threads == 1 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_threads)
                .build()
                .map_err(|e| Error::Computation(format!("failed to build thread pool: {e}")))?;
            Some(pool)
        };
        Ok(Self {
            setup,
            limit_state,
            monitor: &NO_PROGRESS,
            pool,
            n_threads,
            evaluations: AtomicUsize::new(0),
        })
    }

    /// Attach a progress monitor.
    pub fn with_monitor(mut self, monitor: &'a dyn ProgressMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Stochastic setup.
    pub fn setup(&self) -> &StochasticSetup {
        self.setup
    }

    /// Number of active variables.
    pub fn n_active(&self) -> usize {
        self.setup.n_active()
    }

    /// Worker count.
    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Total limit-state evaluations so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Index of the calling thread inside this model's pool.
    ///
    /// Threads outside the pool (the orchestrating thread, workers of other
    /// rayon pools) map to `0`.
    pub fn thread_index(&self) -> usize {
        self.pool.as_ref().and_then(|p| p.current_thread_index()).unwrap_or(0)
    }

    /// Run `op` inside the worker pool.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Draw at active-space point `u`.
    pub fn draw(&self, u: &[f64]) -> Result<SampleDraw<'a>> {
        SampleDraw::new(self.setup, u.to_vec())
    }

    /// Physical values of all variables at `u`.
    pub fn x(&self, u: &[f64]) -> Result<Vec<f64>> {
        self.draw(u)?.x_all()
    }

    fn evaluate(&self, u: &[f64], thread_id: usize) -> Result<f64> {
        let draw = self.draw(u)?;
        let z = self.limit_state.z(&draw, thread_id)?;
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        Ok(z)
    }

    /// `z` at `u` from the calling thread; a non-finite value is an error.
    pub fn z(&self, u: &[f64]) -> Result<f64> {
        self.z_on(u, self.thread_index())
    }

    /// `z` at `u` on behalf of worker `thread_id`.
    pub fn z_on(&self, u: &[f64], thread_id: usize) -> Result<f64> {
        let z = self.evaluate(u, thread_id)?;
        if !z.is_finite() {
            return Err(Error::Computation(format!("limit state returned {z} at u={u:?}")));
        }
        Ok(z)
    }

    /// `z` at every point, evaluated in parallel; results keep input order.
    pub fn z_batch(&self, points: &[Vec<f64>]) -> Result<Vec<f64>> {
        match &self.pool {
            None => points.iter().map(|u| self.z_on(u, 0)).collect(),
            Some(pool) => pool.install(|| {
                points.par_iter().map(|u| self.z_on(u, self.thread_index())).collect()
            }),
        }
    }

    fn z_batch_unchecked(&self, points: &[Vec<f64>]) -> Result<Vec<f64>> {
        match &self.pool {
            None => points.iter().map(|u| self.evaluate(u, 0)).collect(),
            Some(pool) => pool.install(|| {
                points.par_iter().map(|u| self.evaluate(u, self.thread_index())).collect()
            }),
        }
    }

    /// Finite-difference gradient at `u` with step `du`.
    ///
    /// Central differences; one-sided when one neighbour returns a
    /// non-finite value. The `2n + 1` points are evaluated in parallel.
    pub fn gradient(&self, u: &[f64], du: f64) -> Result<Gradient> {
        let n = u.len();
        let mut points = Vec::with_capacity(2 * n + 1);
        points.push(u.to_vec());
        for i in 0..n {
            let mut up = u.to_vec();
            up[i] += du;
            let mut down = u.to_vec();
            down[i] -= du;
            points.push(up);
            points.push(down);
        }
        let zs = self.z_batch_unchecked(&points)?;
        let z = zs[0];
        if !z.is_finite() {
            return Err(Error::Computation(format!("limit state returned {z} at u={u:?}")));
        }
        let dzdu = (0..n)
            .map(|i| {
                let (zp, zm) = (zs[1 + 2 * i], zs[2 + 2 * i]);
                match (zp.is_finite(), zm.is_finite()) {
                    (true, true) => Ok((zp - zm) / (2.0 * du)),
                    (true, false) => Ok((zp - z) / du),
                    (false, true) => Ok((z - zm) / du),
                    (false, false) => Err(Error::Computation(format!(
                        "limit state not finite on either side of u[{i}]"
                    ))),
                }
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(Gradient { z, dzdu, n_evaluations: points.len() })
    }

    /// Report progress; `true` means the caller asked to abort.
    pub fn report(&self, step: usize, max_steps: usize, beta: f64, convergence: f64) -> bool {
        let progress = Progress { step, max_steps, beta, convergence };
        self.monitor.report(&progress) == Control::Abort
    }
}
