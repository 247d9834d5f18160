//! Error taxonomy for batch fitting.
//!
//! Shape and precondition problems are detected before any worker starts, so a
//! caller either gets a complete batch or an error explaining which input was
//! inconsistent. Solver non-convergence is never an error (see
//! `domain::UnitReport`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitError {
    /// An input matrix/vector does not have the shape the batch requires.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The sensitivity-flag vector is shorter/longer than the parameter count.
    #[error("Sensitivity flags have length {got}, expected {expected} (one per parameter)")]
    SensitivityLength { expected: usize, got: usize },

    /// A sensitivity flag is not a finite number.
    #[error("Sensitivity flag {index} is not finite: {value}")]
    InvalidFlag { index: usize, value: f64 },

    /// Model configuration or dispatch options are unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Thread-private scratch could not be allocated.
    #[error("Failed to allocate scratch for worker {worker}: {reason}")]
    Allocation { worker: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FitError {
    pub fn shape(message: impl Into<String>) -> Self {
        FitError::ShapeMismatch(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        FitError::InvalidConfig(message.into())
    }

    /// Process exit code used by the `kfit` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::InvalidConfig(_) | FitError::InvalidFlag { .. } => 2,
            FitError::ShapeMismatch(_) | FitError::SensitivityLength { .. } => 3,
            FitError::Allocation { .. }
            | FitError::Io(_)
            | FitError::Json(_)
            | FitError::Csv(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, FitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(FitError::config("bad step").exit_code(), 2);
        assert_eq!(FitError::shape("pinit").exit_code(), 3);
        assert_eq!(
            FitError::SensitivityLength { expected: 3, got: 2 }.exit_code(),
            3
        );
        let alloc = FitError::Allocation {
            worker: 1,
            reason: "capacity overflow".to_string(),
        };
        assert_eq!(alloc.exit_code(), 4);
    }

    #[test]
    fn sensitivity_length_message_names_both_counts() {
        let msg = FitError::SensitivityLength { expected: 7, got: 4 }.to_string();
        assert!(msg.contains('7') && msg.contains('4'), "{msg}");
    }
}
