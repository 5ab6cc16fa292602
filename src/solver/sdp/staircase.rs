//! Riemannian staircase with a dual optimality certificate.
//!
//! Starting at a low rank, the factor `Y (d x 3V)` is driven to a stationary
//! point by Riemannian gradient descent over the product of Stiefel blocks
//! (projection gradient, polar retraction, Armijo backtracking). Global
//! optimality of the stationary point is then tested through the dual
//! certificate `S = C - Lambda`: if the smallest eigenvalue of `S` is
//! non-negative the relaxation is solved; otherwise the factor is lifted one
//! rank, perturbed along the certificate eigenvector, and the descent
//! resumes. Ranks are escalated up to a configured cap.

use std::collections::BTreeMap;
use std::time::Instant;

use nalgebra::{DMatrix, Matrix3};
use tracing::{info, warn};

use super::{
    factor_objective, round_factor_to_rank3, stiefel_project, BlockMatrix,
    RankRestrictedSdpSolver, SdpSolver, SdpSolverOptions, SdpSummary,
};
use crate::linalg::smallest_eigenpairs;
use crate::solver::{SolverError, SolverResult};

/// Armijo sufficient-decrease constant.
const ARMIJO_SLOPE: f64 = 1e-4;

/// Smallest accepted backtracking step.
const MIN_STEP: f64 = 1e-16;

/// Magnitude of the lifted-row perturbation relative to the factor scale.
const ESCAPE_PERTURBATION: f64 = 1e-2;

pub struct RiemannianStaircase {
    num_views: usize,
    options: SdpSolverOptions,
    covariance: Option<BlockMatrix>,
    adjacency: BTreeMap<usize, Vec<usize>>,
    solution: DMatrix<f64>,
}

impl RiemannianStaircase {
    pub fn new(num_views: usize, options: SdpSolverOptions) -> Self {
        Self {
            num_views,
            options,
            covariance: None,
            adjacency: BTreeMap::new(),
            solution: DMatrix::zeros(0, 0),
        }
    }

    /// Euclidean gradient block `(2 Y C)_i` of `tr(C Y^T Y)`.
    fn gradient_block(
        covariance: &BlockMatrix,
        adjacency: &BTreeMap<usize, Vec<usize>>,
        y: &DMatrix<f64>,
        i: usize,
    ) -> DMatrix<f64> {
        let d = y.nrows();
        let mut g = DMatrix::<f64>::zeros(d, 3);
        if let Some(neighbors) = adjacency.get(&i) {
            for &j in neighbors {
                if let Some(c_ji) = covariance.block(j, i) {
                    let y_j = y.view((0, 3 * j), (d, 3));
                    g += y_j * c_ji;
                }
            }
        }
        g * 2.0
    }

    /// Riemannian gradient descent at the current rank. Returns the number
    /// of iterations spent and the final objective.
    fn riemannian_descent(&self, covariance: &BlockMatrix, y: &mut DMatrix<f64>) -> (usize, f64) {
        let n = self.num_views;
        let d = y.nrows();
        let mut objective = factor_objective(covariance, y);
        let mut step: f64 = 1.0;

        for iteration in 0..self.options.max_iterations {
            // Project the Euclidean gradient onto the Stiefel tangent
            // spaces: grad_i = G_i - Y_i sym(Y_i^T G_i).
            let mut gradient = DMatrix::<f64>::zeros(d, 3 * n);
            let mut gradient_norm_sq = 0.0;
            for i in 0..n {
                let g_i = Self::gradient_block(covariance, &self.adjacency, y, i);
                let y_i = y.view((0, 3 * i), (d, 3)).into_owned();
                let coupling = y_i.transpose() * &g_i;
                let symmetrized = 0.5 * (&coupling + coupling.transpose());
                let tangent = &g_i - &y_i * symmetrized;
                gradient_norm_sq += tangent.norm_squared();
                gradient.view_mut((0, 3 * i), (d, 3)).copy_from(&tangent);
            }

            let scale = objective.abs().max(1.0);
            if gradient_norm_sq.sqrt() <= self.options.gradient_tolerance * scale {
                return (iteration, objective);
            }

            // Armijo backtracking with a polar retraction per block.
            step = (step * 2.0).min(1.0);
            let mut accepted = false;
            while step >= MIN_STEP {
                let mut candidate = y.clone();
                for i in 0..n {
                    let y_i = y.view((0, 3 * i), (d, 3)).into_owned();
                    let direction = gradient.view((0, 3 * i), (d, 3)).into_owned();
                    let moved = y_i - direction * step;
                    candidate
                        .view_mut((0, 3 * i), (d, 3))
                        .copy_from(&stiefel_project(&moved));
                }
                let candidate_objective = factor_objective(covariance, &candidate);
                if candidate_objective <= objective - ARMIJO_SLOPE * step * gradient_norm_sq {
                    *y = candidate;
                    objective = candidate_objective;
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                // No productive step length left; treat as stationary.
                return (iteration, objective);
            }
            info!(
                "{:>10} {:>16.8e} {:>14.6e} {:>12.4e}",
                iteration,
                objective,
                gradient_norm_sq.sqrt(),
                step
            );
        }
        warn!(
            "Riemannian descent reached the iteration cap ({}) at rank {}",
            self.options.max_iterations, d
        );
        (self.options.max_iterations, objective)
    }

    /// Block-diagonal dual multipliers `Lambda_i = sym(Y_i^T (Y C)_i)`.
    fn dual_multipliers(&self, covariance: &BlockMatrix, y: &DMatrix<f64>) -> Vec<Matrix3<f64>> {
        let d = y.nrows();
        (0..self.num_views)
            .map(|i| {
                let half_gradient =
                    Self::gradient_block(covariance, &self.adjacency, y, i) * 0.5;
                let y_i = y.view((0, 3 * i), (d, 3)).into_owned();
                let coupling = y_i.transpose() * half_gradient;
                let mut lambda = Matrix3::zeros();
                for r in 0..3 {
                    for c in 0..3 {
                        lambda[(r, c)] = 0.5 * (coupling[(r, c)] + coupling[(c, r)]);
                    }
                }
                lambda
            })
            .collect()
    }

    /// Smallest eigenpair of the certificate `S = C - blockdiag(Lambda)`.
    fn certificate_minimum(
        &self,
        covariance: &BlockMatrix,
        multipliers: &[Matrix3<f64>],
    ) -> SolverResult<(f64, faer::Mat<f64>)> {
        let dim = 3 * self.num_views;
        let apply = |v: &faer::Mat<f64>| {
            let mut out = covariance.multiply_vector(v);
            for (i, lambda) in multipliers.iter().enumerate() {
                for r in 0..3 {
                    let mut acc = 0.0;
                    for c in 0..3 {
                        acc += lambda[(r, c)] * v[(3 * i + c, 0)];
                    }
                    out[(3 * i + r, 0)] -= acc;
                }
            }
            out
        };
        let (values, vectors) = smallest_eigenpairs(dim, 1, apply)?;
        let mut vector = faer::Mat::<f64>::zeros(dim, 1);
        for i in 0..dim {
            vector[(i, 0)] = vectors[(i, 0)];
        }
        Ok((values[0], vector))
    }

    /// Appends one zero row and seeds it with the certificate eigenvector,
    /// then restores feasibility blockwise.
    fn lift_factor(y: &DMatrix<f64>, escape: &faer::Mat<f64>) -> DMatrix<f64> {
        let d = y.nrows();
        let cols = y.ncols();
        let mut lifted = DMatrix::<f64>::zeros(d + 1, cols);
        lifted.view_mut((0, 0), (d, cols)).copy_from(y);
        for c in 0..cols {
            lifted[(d, c)] = ESCAPE_PERTURBATION * escape[(c, 0)];
        }
        let n = cols / 3;
        for i in 0..n {
            let block = lifted.view((0, 3 * i), (d + 1, 3)).into_owned();
            lifted
                .view_mut((0, 3 * i), (d + 1, 3))
                .copy_from(&stiefel_project(&block));
        }
        lifted
    }
}

impl SdpSolver for RiemannianStaircase {
    fn set_covariance(&mut self, covariance: BlockMatrix) {
        self.covariance = Some(covariance);
    }

    fn set_adjacent_edges(&mut self, adjacency: BTreeMap<usize, Vec<usize>>) {
        self.adjacency = adjacency;
    }

    fn solve(&mut self) -> SolverResult<SdpSummary> {
        let covariance = self
            .covariance
            .clone()
            .ok_or_else(|| SolverError::MissingState("covariance not set".to_string()))?;

        let start = Instant::now();
        let min_rank = self.options.min_rank.max(3);
        let max_rank = self.options.max_rank.max(min_rank);
        let mut y = RankRestrictedSdpSolver::initial_factor(self.num_views, min_rank);
        let mut total_iterations = 0;
        let mut objective = 0.0;
        let mut certified = false;
        let certificate_scale = covariance.max_block_norm().max(1.0);

        loop {
            let rank = y.nrows();
            let (iterations, rank_objective) = self.riemannian_descent(&covariance, &mut y);
            total_iterations += iterations.max(1);
            objective = rank_objective;

            let multipliers = self.dual_multipliers(&covariance, &y);
            let (min_eigenvalue, escape) = self.certificate_minimum(&covariance, &multipliers)?;
            info!(
                "rank {:>2}: objective {:.8e}, certificate min eigenvalue {:.4e}",
                rank, objective, min_eigenvalue
            );

            if min_eigenvalue >= -self.options.certificate_tolerance * certificate_scale {
                certified = true;
                break;
            }
            if rank >= max_rank {
                warn!(
                    "staircase stopped at rank {} without a certificate (min eigenvalue {:.4e})",
                    rank, min_eigenvalue
                );
                break;
            }
            y = Self::lift_factor(&y, &escape);
        }

        self.solution = round_factor_to_rank3(&y);
        Ok(SdpSummary {
            total_iterations,
            final_objective: objective,
            converged: certified,
            total_time: start.elapsed(),
        })
    }

    fn solution(&self) -> &DMatrix<f64> {
        &self.solution
    }
}
