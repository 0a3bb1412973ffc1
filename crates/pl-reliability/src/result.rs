//! Reliability result and its text exchange format.

use pl_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Read, Write};

use crate::alpha_beta::AlphaBeta;

/// Convergence state of an estimator run.
///
/// Non-convergence and cancellation are outcomes, not errors: callers must
/// inspect this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Convergence criteria met
    Success,
    /// Budget exhausted; the result is a best-effort estimate
    NoConvergence,
    /// Cancelled through the progress monitor; the result is partial
    AbortedByUser,
    /// Nothing computed yet
    NotStarted,
}

impl ConvergenceStatus {
    /// Integer code used in the text exchange format.
    pub fn code(self) -> i32 {
        match self {
            ConvergenceStatus::Success => 0,
            ConvergenceStatus::NoConvergence => 1,
            ConvergenceStatus::AbortedByUser => 2,
            ConvergenceStatus::NotStarted => 3,
        }
    }

    /// Inverse of [`ConvergenceStatus::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ConvergenceStatus::Success),
            1 => Some(ConvergenceStatus::NoConvergence),
            2 => Some(ConvergenceStatus::AbortedByUser),
            3 => Some(ConvergenceStatus::NotStarted),
            _ => None,
        }
    }
}

/// Output of every reliability method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityResult {
    /// Convergence state
    pub status: ConvergenceStatus,
    /// Reliability index and influence coefficients
    pub direction: AlphaBeta,
    /// Physical values at the design point (all variables)
    pub x: Vec<f64>,
    /// Standard-normal design point (active variables)
    pub u: Vec<f64>,
    /// Method name; hybrid methods join stage names with `+`
    pub method: String,
    /// Iterations (FORM) or samples/directions (sampling methods)
    pub n_steps: usize,
    /// Limit-state evaluations
    pub n_evaluations: usize,
}

impl ReliabilityResult {
    /// Placeholder for a method that has not run.
    pub fn not_started(method: &str, n_active: usize) -> Self {
        Self {
            status: ConvergenceStatus::NotStarted,
            direction: AlphaBeta::isotropic(n_active, 0.0),
            x: Vec::new(),
            u: vec![0.0; n_active],
            method: method.to_string(),
            n_steps: 0,
            n_evaluations: 0,
        }
    }

    /// Reliability index.
    pub fn beta(&self) -> f64 {
        self.direction.beta()
    }

    /// Influence coefficients.
    pub fn alpha(&self) -> &[f64] {
        self.direction.alpha()
    }

    /// Failure probability `Φ(-beta)`.
    pub fn probability_of_failure(&self) -> f64 {
        self.direction.q()
    }

    /// `true` for [`ConvergenceStatus::Success`].
    pub fn converged(&self) -> bool {
        self.status == ConvergenceStatus::Success
    }

    /// Add the step and evaluation counts of an earlier stage and prefix its
    /// method name.
    pub fn after_stage(mut self, earlier: &ReliabilityResult) -> Self {
        self.n_steps += earlier.n_steps;
        self.n_evaluations += earlier.n_evaluations;
        self.method = format!("{}+{}", earlier.method, self.method);
        self
    }

    /// Serialise to the line-oriented exchange format.
    ///
    /// Items, one per line: beta, alpha count, alpha values, x count,
    /// x values, method name, convergence code, step count.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{:.16e}\n", self.beta()));
        out.push_str(&format!("{}\n", self.alpha().len()));
        for a in self.alpha() {
            out.push_str(&format!("{a:.16e}\n"));
        }
        out.push_str(&format!("{}\n", self.x.len()));
        for x in &self.x {
            out.push_str(&format!("{x:.16e}\n"));
        }
        out.push_str(&format!("{}\n", self.method));
        out.push_str(&format!("{}\n", self.status.code()));
        out.push_str(&format!("{}\n", self.n_steps));
        out
    }

    /// Parse the exchange format written by [`ReliabilityResult::to_text`].
    ///
    /// `u` is restored as the design point `-beta·alpha`; the evaluation
    /// count is not part of the format and reads back as zero.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut lines = LineReader { lines: text.lines(), line: 0 };

        let beta: f64 = lines.parse("beta")?;
        let n_alpha: usize = lines.parse("alpha count")?;
        let alpha = (0..n_alpha).map(|_| lines.parse("alpha value")).collect::<Result<Vec<f64>>>()?;
        let n_x: usize = lines.parse("x count")?;
        let x = (0..n_x).map(|_| lines.parse("x value")).collect::<Result<Vec<f64>>>()?;
        let method = lines.next_line("method name")?.to_string();
        let code: i32 = lines.parse("convergence code")?;
        let status = ConvergenceStatus::from_code(code).ok_or_else(|| Error::Parse {
            line: lines.line,
            message: format!("unknown convergence code {code}"),
        })?;
        let n_steps: usize = lines.parse("step count")?;

        let direction = AlphaBeta::new(beta, alpha);
        let u = direction.design_point();
        Ok(Self { status, direction, x, u, method, n_steps, n_evaluations: 0 })
    }

    /// Write the exchange format to a stream.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.to_text().as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Read the exchange format from a stream.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::from_text(&text)
    }
}

impl fmt::Display for ReliabilityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(beta={:.6}, pf={:.6e}, status={:?}, steps={}, evaluations={})",
            self.method,
            self.beta(),
            self.probability_of_failure(),
            self.status,
            self.n_steps,
            self.n_evaluations
        )
    }
}

struct LineReader<'a> {
    lines: std::str::Lines<'a>,
    line: usize,
}

impl<'a> LineReader<'a> {
    fn next_line(&mut self, what: &str) -> Result<&'a str> {
        self.line += 1;
        self.lines
            .next()
            .map(str::trim)
            .ok_or_else(|| Error::Parse { line: self.line, message: format!("missing {what}") })
    }

    fn parse<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let raw = self.next_line(what)?;
        raw.parse().map_err(|_| Error::Parse {
            line: self.line,
            message: format!("expected {what}, got '{raw}'"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReliabilityResult {
        let direction = AlphaBeta::new(3.123_456_789_012_345, vec![-0.6, 0.8]);
        ReliabilityResult {
            status: ConvergenceStatus::Success,
            u: direction.design_point(),
            direction,
            x: vec![1.0 / 3.0, -2.5e-12, 7.0],
            method: "FORM".to_string(),
            n_steps: 7,
            n_evaluations: 35,
        }
    }

    #[test]
    fn test_text_round_trip_is_exact() {
        let r = sample();
        let back = ReliabilityResult::from_text(&r.to_text()).unwrap();
        assert_eq!(back.beta().to_bits(), r.beta().to_bits());
        assert_eq!(back.alpha(), r.alpha());
        assert_eq!(back.x, r.x);
        assert_eq!(back.method, r.method);
        assert_eq!(back.status, r.status);
        assert_eq!(back.n_steps, r.n_steps);
        assert_eq!(back.n_evaluations, 0);
    }

    #[test]
    fn test_text_layout() {
        let text = sample().to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + 1 + 2 + 1 + 3 + 3);
        assert_eq!(lines[1], "2");
        assert_eq!(lines[4], "3");
        assert_eq!(lines[8], "FORM");
        assert_eq!(lines[9], "0");
        assert_eq!(lines[10], "7");
    }

    #[test]
    fn test_truncated_text_reports_line() {
        let text = sample().to_text();
        let truncated: String = text.lines().take(5).map(|l| format!("{l}\n")).collect();
        match ReliabilityResult::from_text(&truncated) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 6),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_status_code() {
        let text = sample().to_text().replace("\n0\n7\n", "\n9\n7\n");
        assert!(ReliabilityResult::from_text(&text).is_err());
    }

    #[test]
    fn test_after_stage_merges_counts() {
        let mut first = sample();
        first.method = "DirectionalSampling".into();
        let merged = sample().after_stage(&first);
        assert_eq!(merged.n_steps, 14);
        assert_eq!(merged.n_evaluations, 70);
        assert_eq!(merged.method, "DirectionalSampling+FORM");
    }
}
