//! Row-by-row block coordinate descent on the full SDP variable.
//!
//! Operates directly on the PSD matrix `X (3V x 3V)` with identity diagonal
//! blocks. One view at a time, the off-diagonal block column is replaced by
//! its closed-form minimizer `X_{-i,i} = -W (B^T S B)^{-1/2}` against the
//! current neighbors, which keeps `X` feasible and decreases the objective
//! monotonically (Wen et al., "Row by row methods for semidefinite
//! programming").

use std::collections::BTreeMap;
use std::time::Instant;

use nalgebra::{DMatrix, Matrix3, SymmetricEigen};
use tracing::{info, warn};

use super::{BlockMatrix, SdpSolver, SdpSolverOptions, SdpSummary};
use crate::solver::{SolverError, SolverResult};

pub struct RbrSdpSolver {
    num_views: usize,
    options: SdpSolverOptions,
    covariance: Option<BlockMatrix>,
    adjacency: BTreeMap<usize, Vec<usize>>,
    solution: DMatrix<f64>,
}

impl RbrSdpSolver {
    pub fn new(num_views: usize, options: SdpSolverOptions) -> Self {
        Self {
            num_views,
            options,
            covariance: None,
            adjacency: BTreeMap::new(),
            solution: DMatrix::zeros(0, 0),
        }
    }

    /// `tr(C X)` in deterministic block order.
    fn objective(covariance: &BlockMatrix, x: &DMatrix<f64>) -> f64 {
        let mut objective = 0.0;
        for (&(i, j), block) in covariance.iter() {
            let x_ji = x.fixed_view::<3, 3>(3 * j, 3 * i).into_owned();
            let product = block * x_ji;
            objective += product[(0, 0)] + product[(1, 1)] + product[(2, 2)];
        }
        objective
    }

    /// Extracts the dominant rank-3 factor of the PSD solution.
    fn round_solution(x: &DMatrix<f64>) -> DMatrix<f64> {
        let dim = x.ncols();
        let eigen = SymmetricEigen::new(x.clone());
        let mut order: Vec<usize> = (0..dim).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let mut factor = DMatrix::zeros(3, dim);
        for (row, &idx) in order.iter().take(3).enumerate() {
            let scale = eigen.eigenvalues[idx].max(0.0).sqrt();
            for col in 0..dim {
                factor[(row, col)] = scale * eigen.eigenvectors[(col, idx)];
            }
        }
        factor
    }
}

impl SdpSolver for RbrSdpSolver {
    fn set_covariance(&mut self, covariance: BlockMatrix) {
        self.covariance = Some(covariance);
    }

    fn set_adjacent_edges(&mut self, adjacency: BTreeMap<usize, Vec<usize>>) {
        self.adjacency = adjacency;
    }

    fn solve(&mut self) -> SolverResult<SdpSummary> {
        let covariance = self
            .covariance
            .as_ref()
            .ok_or_else(|| SolverError::MissingState("covariance not set".to_string()))?;
        let n = self.num_views;
        let dim = 3 * n;

        let start = Instant::now();
        let mut x = DMatrix::<f64>::identity(dim, dim);
        let mut objective = Self::objective(covariance, &x);
        let mut converged = false;
        let mut iterations = 0;

        for sweep in 0..self.options.max_iterations {
            iterations = sweep + 1;
            for i in 0..n {
                let Some(neighbors) = self.adjacency.get(&i) else {
                    continue;
                };

                // V = X * B, where B stacks the covariance blocks C_{ji} of
                // the neighbors of i (the block diagonal of C is zero, so
                // row/column i of X never contributes).
                let mut v = DMatrix::<f64>::zeros(dim, 3);
                for &j in neighbors {
                    if let Some(c_ji) = covariance.block(j, i) {
                        let x_col = x.view((0, 3 * j), (dim, 3));
                        v += x_col * c_ji;
                    }
                }

                // M = B^T X B, the 3x3 Gram of the update direction.
                let mut m = Matrix3::<f64>::zeros();
                for &j in neighbors {
                    if let Some(c_ji) = covariance.block(j, i) {
                        let v_j = v.fixed_view::<3, 3>(3 * j, 0).into_owned();
                        m += c_ji.transpose() * v_j;
                    }
                }

                let Some(inv_sqrt) = symmetric_inverse_sqrt(&m) else {
                    continue;
                };

                let update = -(&v * inv_sqrt);
                for k in 0..n {
                    if k == i {
                        continue;
                    }
                    for r in 0..3 {
                        for c in 0..3 {
                            let value = update[(3 * k + r, c)];
                            x[(3 * k + r, 3 * i + c)] = value;
                            x[(3 * i + c, 3 * k + r)] = value;
                        }
                    }
                }
            }

            let new_objective = Self::objective(covariance, &x);
            let change = (objective - new_objective).abs();
            info!(
                "{:>10} {:>16.8e} {:>14.6e}",
                sweep, new_objective, change
            );
            let scale = objective.abs().max(1.0);
            objective = new_objective;
            if change < self.options.tolerance * scale {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "row-by-row BCM reached the sweep cap ({}) before convergence",
                self.options.max_iterations
            );
        }

        self.solution = Self::round_solution(&x);
        Ok(SdpSummary {
            total_iterations: iterations,
            final_objective: objective,
            converged,
            total_time: start.elapsed(),
        })
    }

    fn solution(&self) -> &DMatrix<f64> {
        &self.solution
    }
}

/// Inverse square root of a symmetric positive semidefinite 3x3 matrix.
///
/// Returns `None` when the matrix is numerically zero; near-null directions
/// are clamped relative to the dominant eigenvalue.
fn symmetric_inverse_sqrt(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let symmetrized = 0.5 * (m + m.transpose());
    let eigen = SymmetricEigen::new(symmetrized);
    let max_eigenvalue = eigen.eigenvalues.iter().fold(0.0_f64, |acc, &v| acc.max(v));
    if max_eigenvalue <= f64::EPSILON {
        return None;
    }
    let floor = max_eigenvalue * 1e-12;
    let mut result = Matrix3::zeros();
    for k in 0..3 {
        let clamped = eigen.eigenvalues[k].max(floor);
        let weight = 1.0 / clamped.sqrt();
        let q = eigen.eigenvectors.column(k);
        result += weight * q * q.transpose();
    }
    Some(result)
}
