//! Common interface of all reliability methods.

use pl_core::Result;

use crate::model::Model;
use crate::result::ReliabilityResult;

/// A reliability estimator.
///
/// Methods hold configuration only; random state is created per call from
/// the configured seed, so one instance may serve several models.
pub trait ReliabilityMethod: Send + Sync {
    /// Method name reported in results.
    fn name(&self) -> &str;

    /// Estimate the reliability of `model`.
    fn calc(&self, model: &Model<'_>) -> Result<ReliabilityResult>;

    /// Estimate starting from an earlier result (hybrid methods).
    ///
    /// Default: ignore `seed`.
    fn calc_seeded(
        &self,
        model: &Model<'_>,
        seed: &ReliabilityResult,
    ) -> Result<ReliabilityResult> {
        let _ = seed;
        self.calc(model)
    }
}
