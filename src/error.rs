//! Error types for parafold.

use thiserror::Error;

/// Result type alias using parafold's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for parafold operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pipeline or pool was configured with an illegal parameter
    /// (zero batch size, zero worker threads).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The requested terminal cannot be produced from the composed chain
    /// (e.g. a grouped terminal with no group_by stage).
    #[error("incompatible terminal: {0}")]
    IncompatibleTerminal(String),

    /// A stage's transform failed (or panicked) while evaluating an element.
    #[error("element evaluation failed: {0}")]
    ElementEvaluation(String),

    /// Merging batch partial results violated the merge policy.
    #[error("aggregation failed: {0}")]
    Aggregation(String),

    /// The worker pool rejected work (shut down, channel closed).
    #[error("worker pool error: {0}")]
    Pool(String),
}

impl Error {
    /// Wrap an arbitrary stage error as an element evaluation failure.
    pub fn evaluation<E: std::fmt::Display>(err: E) -> Self {
        Error::ElementEvaluation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfiguration("batch size must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: batch size must be positive"
        );
    }

    #[test]
    fn test_evaluation_wrapper() {
        let err = Error::evaluation("boom");
        assert!(matches!(err, Error::ElementEvaluation(ref msg) if msg == "boom"));
    }
}
