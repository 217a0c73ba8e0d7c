//! Unified error types for the planning engine.
//!
//! The engine distinguishes three failure kinds. [`PlanError::Data`] flags
//! invalid caller input and leaves the model unchanged. [`PlanError::Logic`]
//! flags a broken internal invariant and is never recoverable.
//! [`PlanError::Runtime`] flags resource exhaustion such as a level or
//! cluster counter overflow.
//!
//! # Example
//!
//! ```ignore
//! use aps_core::{PlanError, PlanResult};
//!
//! fn load_model(path: &str) -> PlanResult<()> {
//!     let model = read_model(path)?;
//!     model.compute_problems();
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all planning operations.
#[derive(Error, Debug)]
pub enum PlanError {
    /// Invalid caller input (negative quantity, unknown reference,
    /// duplicate rule priority). The model is left unchanged.
    #[error("Data error: {0}")]
    Data(String),

    /// Internal invariant violation. Indicates a bug, not recoverable.
    #[error("Logic error: {0}")]
    Logic(String),

    /// Resource exhaustion (level/cluster overflow, unbounded calendar
    /// expansion). The caller decides whether to retry with a smaller model.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors surfaced by the loading layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using PlanError.
pub type PlanResult<T> = Result<T, PlanError>;

impl PlanError {
    pub fn data(msg: impl Into<String>) -> Self {
        PlanError::Data(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        PlanError::Logic(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        PlanError::Runtime(msg.into())
    }
}

// Conversion from anyhow::Error for callers that mix the two styles
impl From<anyhow::Error> for PlanError {
    fn from(err: anyhow::Error) -> Self {
        PlanError::Data(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::data("unknown buffer 'B7'");
        assert!(err.to_string().contains("Data error"));
        assert!(err.to_string().contains("B7"));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> PlanResult<()> {
            Err(PlanError::logic("corrupted plan list"))
        }

        fn outer() -> PlanResult<()> {
            inner()?;
            Ok(())
        }

        assert!(matches!(outer(), Err(PlanError::Logic(_))));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PlanError = io_err.into();
        assert!(matches!(err, PlanError::Io(_)));
    }
}
