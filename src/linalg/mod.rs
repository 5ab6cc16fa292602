//! Sparse linear algebra backends.
//!
//! Two pieces live here: a sparse Cholesky adapter with a separate symbolic
//! analysis phase (the sparsity pattern of the rotation-averaging systems is
//! fixed per graph, so the elimination order is computed once and reused
//! across ADMM/IRLS iterations), and a Lanczos eigensolver for the few
//! smallest eigenvalues of large symmetric operators.

pub mod cholesky;
pub mod lanczos;

use thiserror::Error;

/// Errors raised by the linear algebra layer.
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Symbolic analysis of the sparsity pattern failed
    #[error("sparse Cholesky analysis failed: {0}")]
    AnalysisFailed(String),

    /// Numeric factorization failed (matrix not positive definite)
    #[error("sparse Cholesky factorization failed: {0}")]
    FactorizationFailed(String),

    /// Factorize was called without a prior symbolic analysis
    #[error("factorize called before analyze_pattern")]
    PatternNotAnalyzed,

    /// Solve was called without a prior numeric factorization
    #[error("solve called before factorize")]
    NotFactorized,

    /// Operand dimensions do not match
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Sparse matrix assembly or conversion failed
    #[error("sparse matrix construction failed: {0}")]
    MatrixConstruction(String),

    /// The eigensolver did not converge to the requested accuracy
    #[error("eigenvalue computation failed: {0}")]
    EigenFailed(String),
}

/// Result type for linear algebra operations.
pub type LinAlgResult<T> = Result<T, LinAlgError>;

pub use cholesky::SparseCholesky;
pub use lanczos::smallest_eigenpairs;
