//! Convex optimization back ends used by the rotation estimators.
//!
//! - [`l1`]: an ADMM solver for `min_x ||A x - b||_1` over a fixed sparse `A`
//! - [`sdp`]: interchangeable solvers for the semidefinite relaxation of
//!   rotation averaging

pub mod l1;
pub mod sdp;

use thiserror::Error;

/// Solver-specific error types.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// A sparse factorization or triangular solve failed
    #[error("linear algebra failure: {0}")]
    LinAlg(#[from] crate::linalg::LinAlgError),

    /// Problem dimensions or options are inconsistent
    #[error("invalid solver input: {0}")]
    InvalidInput(String),

    /// A required matrix was not supplied before solving
    #[error("solver state incomplete: {0}")]
    MissingState(String),
}

/// Result type for solver operations.
pub type SolverResult<T> = Result<T, SolverError>;

pub use l1::{L1Solver, L1SolverOptions};
pub use sdp::{
    create_sdp_solver, BlockMatrix, RankRestrictedSdpSolver, RbrSdpSolver, RiemannianStaircase,
    SdpSolver, SdpSolverOptions, SdpSolverType, SdpSummary,
};
