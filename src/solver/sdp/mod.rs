//! Solvers for the semidefinite relaxation of rotation averaging.
//!
//! The relaxation maximizes `tr(R Y^T Y)` over factors `Y` whose 3x3
//! diagonal Gram blocks equal the identity, where `R` is the symmetric block
//! matrix of relative rotation measurements. Every backend consumes the
//! negated block matrix (`set_covariance(-R)`) so that it can minimize
//! `tr(C Y^T Y)`, and reports the rounded `3 x 3V` factor on success.
//!
//! Three interchangeable backends are provided:
//! - [`RbrSdpSolver`]: block-coordinate descent over the full PSD variable
//! - [`RankRestrictedSdpSolver`]: the same sweep over a rank-`d` factor
//! - [`RiemannianStaircase`]: staircase of Riemannian descents with a dual
//!   optimality certificate

pub mod rank_restricted;
pub mod rbr;
pub mod staircase;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use nalgebra::{DMatrix, Matrix3};

use super::SolverResult;

pub use rank_restricted::RankRestrictedSdpSolver;
pub use rbr::RbrSdpSolver;
pub use staircase::RiemannianStaircase;

/// Selects the SDP backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SdpSolverType {
    /// Row-by-row block coordinate descent on the full PSD variable
    #[default]
    RbrBcm,
    /// Block coordinate descent restricted to a rank-deficient factor
    RankDeficientBcm,
    /// Riemannian staircase with a dual optimality certificate
    RiemannianStaircase,
}

impl fmt::Display for SdpSolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpSolverType::RbrBcm => write!(f, "row-by-row BCM"),
            SdpSolverType::RankDeficientBcm => write!(f, "rank-restricted BCM"),
            SdpSolverType::RiemannianStaircase => write!(f, "Riemannian staircase"),
        }
    }
}

/// Options shared by the SDP backends.
#[derive(Debug, Clone)]
pub struct SdpSolverOptions {
    pub solver_type: SdpSolverType,
    /// Cap on BCM sweeps (per-backend) or descent iterations (per rank)
    pub max_iterations: usize,
    /// Relative objective-change threshold for BCM convergence
    pub tolerance: f64,
    /// Factor rank used by the rank-restricted backend (at least 3)
    pub rank: usize,
    /// First rank tried by the staircase
    pub min_rank: usize,
    /// Rank at which the staircase gives up escalating
    pub max_rank: usize,
    /// Riemannian gradient-norm threshold, relative to the objective scale
    pub gradient_tolerance: f64,
    /// Slack allowed on the certificate's minimum eigenvalue
    pub certificate_tolerance: f64,
}

impl Default for SdpSolverOptions {
    fn default() -> Self {
        Self {
            solver_type: SdpSolverType::default(),
            max_iterations: 500,
            tolerance: 1e-8,
            rank: 4,
            min_rank: 3,
            max_rank: 10,
            gradient_tolerance: 1e-8,
            certificate_tolerance: 1e-5,
        }
    }
}

/// Result summary reported by every backend.
#[derive(Debug, Clone)]
pub struct SdpSummary {
    /// Iterations spent across all sweeps/ranks
    pub total_iterations: usize,
    /// Final value of `tr(C Y^T Y)`
    pub final_objective: f64,
    /// Whether the tolerance (and, for the staircase, the certificate) held
    pub converged: bool,
    /// Wall-clock time of the solve
    pub total_time: Duration,
}

impl fmt::Display for SdpSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iterations: {}, objective: {:.6e}, converged: {}, time: {:?}",
            self.total_iterations, self.final_objective, self.converged, self.total_time
        )
    }
}

/// Symmetric matrix of 3x3 blocks with deterministic iteration order.
///
/// Blocks accumulate on repeated insertion; absent blocks are zero. The
/// block diagonal stays empty for the measurement graphs handled here
/// (no self-edges).
#[derive(Debug, Clone)]
pub struct BlockMatrix {
    num_blocks: usize,
    blocks: BTreeMap<(usize, usize), Matrix3<f64>>,
}

impl BlockMatrix {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            num_blocks,
            blocks: BTreeMap::new(),
        }
    }

    /// Number of 3x3 block rows/columns.
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Adds `block` at block position `(row, col)`, accumulating duplicates.
    pub fn add_block(&mut self, row: usize, col: usize, block: Matrix3<f64>) {
        debug_assert!(row < self.num_blocks && col < self.num_blocks);
        *self.blocks.entry((row, col)).or_insert_with(Matrix3::zeros) += block;
    }

    pub fn block(&self, row: usize, col: usize) -> Option<&Matrix3<f64>> {
        self.blocks.get(&(row, col))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &Matrix3<f64>)> {
        self.blocks.iter()
    }

    /// Returns the elementwise negation (used for `set_covariance(-R)`).
    pub fn negated(&self) -> BlockMatrix {
        BlockMatrix {
            num_blocks: self.num_blocks,
            blocks: self
                .blocks
                .iter()
                .map(|(&key, block)| (key, -block))
                .collect(),
        }
    }

    /// Blockwise product with a stacked vector of length `3 * num_blocks`.
    pub fn multiply_vector(&self, v: &faer::Mat<f64>) -> faer::Mat<f64> {
        debug_assert_eq!(v.nrows(), 3 * self.num_blocks);
        let mut out = faer::Mat::<f64>::zeros(v.nrows(), 1);
        for (&(row, col), block) in &self.blocks {
            for r in 0..3 {
                let mut acc = 0.0;
                for c in 0..3 {
                    acc += block[(r, c)] * v[(3 * col + c, 0)];
                }
                out[(3 * row + r, 0)] += acc;
            }
        }
        out
    }

    /// Largest block Frobenius norm, used to scale tolerances.
    pub fn max_block_norm(&self) -> f64 {
        self.blocks
            .values()
            .map(|b| b.norm())
            .fold(0.0_f64, f64::max)
    }
}

/// Capability set shared by the SDP backends.
pub trait SdpSolver {
    /// Supplies the negated measurement block matrix `C = -R`.
    fn set_covariance(&mut self, covariance: BlockMatrix);

    /// Supplies the neighbor lists of the view graph (sorted, deduplicated).
    fn set_adjacent_edges(&mut self, adjacency: BTreeMap<usize, Vec<usize>>);

    /// Runs the backend to convergence or its iteration cap.
    fn solve(&mut self) -> SolverResult<SdpSummary>;

    /// The rounded `3 x 3V` solution factor; valid after a successful
    /// [`solve`](SdpSolver::solve).
    fn solution(&self) -> &DMatrix<f64>;
}

/// Constructs the backend selected by `options.solver_type`.
pub fn create_sdp_solver(num_views: usize, options: &SdpSolverOptions) -> Box<dyn SdpSolver> {
    match options.solver_type {
        SdpSolverType::RbrBcm => Box::new(RbrSdpSolver::new(num_views, options.clone())),
        SdpSolverType::RankDeficientBcm => {
            Box::new(RankRestrictedSdpSolver::new(num_views, options.clone()))
        }
        SdpSolverType::RiemannianStaircase => {
            Box::new(RiemannianStaircase::new(num_views, options.clone()))
        }
    }
}

/// `tr(C Y^T Y)` for a `d x 3V` factor, summed in deterministic block order.
pub(crate) fn factor_objective(covariance: &BlockMatrix, y: &DMatrix<f64>) -> f64 {
    let d = y.nrows();
    let mut objective = 0.0;
    for (&(i, j), block) in covariance.iter() {
        let y_i = y.view((0, 3 * i), (d, 3));
        let y_j = y.view((0, 3 * j), (d, 3));
        let gram = y_j.transpose() * y_i;
        let product = block * gram;
        objective += product[(0, 0)] + product[(1, 1)] + product[(2, 2)];
    }
    objective
}

/// Orthonormalizes the columns of a `d x 3` block (polar factor).
pub(crate) fn stiefel_project(block: &DMatrix<f64>) -> DMatrix<f64> {
    let svd = block.clone().svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => u * v_t,
        _ => block.clone(),
    }
}

/// Rounds a `d x 3V` factor to the dominant rank-3 factor `3 x 3V`.
pub(crate) fn round_factor_to_rank3(y: &DMatrix<f64>) -> DMatrix<f64> {
    let cols = y.ncols();
    if y.nrows() == 3 {
        return y.clone();
    }
    let svd = y.clone().svd(true, true);
    let (Some(_), Some(v_t)) = (svd.u, svd.v_t) else {
        return DMatrix::zeros(3, cols);
    };
    let mut rounded = DMatrix::zeros(3, cols);
    for k in 0..3 {
        let sigma = svd.singular_values[k];
        for c in 0..cols {
            rounded[(k, c)] = sigma * v_t[(k, c)];
        }
    }
    rounded
}
