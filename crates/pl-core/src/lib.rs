//! # pl-core
//!
//! Core types and traits for ProbLib.
//!
//! This crate defines the error type shared by all ProbLib crates and the
//! interfaces through which the reliability estimators consume their
//! external collaborators (distributions, random sources, progress hooks).

#![warn(missing_docs)]

pub mod error;
pub mod traits;

pub use error::{Error, Result};
pub use traits::{Control, Distribution, NoProgress, Progress, ProgressMonitor, RandomSource};
