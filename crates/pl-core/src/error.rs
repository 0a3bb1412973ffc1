//! Error types for ProbLib

use thiserror::Error;

/// ProbLib error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration (correlation coefficients, distribution parameters, settings)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure (non-finite z, degenerate matrix, failed decomposition)
    #[error("Computation error: {0}")]
    Computation(String),

    /// Malformed result text
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number of the offending item
        line: usize,
        /// What was expected
        message: String,
    },

    /// Error raised while running a named reliability method
    #[error("{method}: {source}")]
    Method {
        /// Method name, e.g. "FORM" or "DirectionalSampling"
        method: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Qualify this error with the name of the method that raised it.
    ///
    /// Already-qualified errors are returned unchanged so that nested hybrid
    /// methods report the innermost method.
    pub fn in_method(self, method: &str) -> Self {
        match self {
            Error::Method { .. } => self,
            other => Error::Method { method: method.to_string(), source: Box::new(other) },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_qualification_is_outermost_once() {
        let e = Error::Computation("z is NaN".into()).in_method("FORM").in_method("FDIR");
        assert_eq!(e.to_string(), "FORM: Computation error: z is NaN");
    }

    #[test]
    fn test_parse_error_display() {
        let e = Error::Parse { line: 3, message: "expected alpha count".into() };
        assert_eq!(e.to_string(), "Parse error at line 3: expected alpha count");
    }
}
