//! Error types for the apex-rotation library.
//!
//! Module-specific errors (`LinAlgError`, `SolverError`, `EstimatorError`)
//! convert into the top-level [`RotationError`] so that applications can
//! handle everything through one type. All errors use the `thiserror` crate.

use crate::{averaging, linalg, solver};
use thiserror::Error;

/// Main result type of the library.
pub type RotationResult<T> = Result<T, RotationError>;

/// Top-level error type of the library.
#[derive(Debug, Clone, Error)]
pub enum RotationError {
    /// Sparse factorization or eigenvalue failures
    #[error("linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Failures inside the L1 or SDP solvers
    #[error("solver error: {0}")]
    Solver(String),

    /// Failures of the rotation estimators
    #[error("estimation error: {0}")]
    Estimation(String),

    /// Caller violated an input contract
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<linalg::LinAlgError> for RotationError {
    fn from(err: linalg::LinAlgError) -> Self {
        RotationError::LinearAlgebra(err.to_string())
    }
}

impl From<solver::SolverError> for RotationError {
    fn from(err: solver::SolverError) -> Self {
        RotationError::Solver(err.to_string())
    }
}

impl From<averaging::EstimatorError> for RotationError {
    fn from(err: averaging::EstimatorError) -> Self {
        match err {
            averaging::EstimatorError::InvalidInput(message) => {
                RotationError::InvalidInput(message)
            }
            other => RotationError::Estimation(other.to_string()),
        }
    }
}
