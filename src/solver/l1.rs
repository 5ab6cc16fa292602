//! L1-norm minimization via the alternating direction method of multipliers.
//!
//! Solves `min_x ||A x - b||_1` (least absolute deviations) for a fixed
//! sparse `A`. ADMM needs a single Cholesky factorization of `A^T A` that is
//! reused by every iteration, which makes it much cheaper than interior-point
//! methods when the same system is solved for many right-hand sides. The
//! splitting follows Boyd et al., "Distributed Optimization and Statistical
//! Learning via the Alternating Direction Method of Multipliers" (2011).

use std::ops::Mul;

use faer::sparse::SparseColMat;
use faer::Mat;
use tracing::{error, info, warn};

use super::{SolverError, SolverResult};
use crate::linalg::{LinAlgError, SparseCholesky};

/// Options controlling the ADMM iteration.
#[derive(Debug, Clone)]
pub struct L1SolverOptions {
    /// Iteration cap; reaching it is reported as a warning, not an error
    pub max_num_iterations: usize,
    /// Augmented Lagrangian parameter
    pub rho: f64,
    /// Over-relaxation parameter, typically in [1.0, 1.8]
    pub alpha: f64,
    /// Absolute tolerance entering the primal/dual stopping rule
    pub absolute_tolerance: f64,
    /// Relative tolerance entering the primal/dual stopping rule
    pub relative_tolerance: f64,
}

impl Default for L1SolverOptions {
    fn default() -> Self {
        Self {
            max_num_iterations: 1000,
            rho: 1.0,
            alpha: 1.0,
            absolute_tolerance: 1e-4,
            relative_tolerance: 1e-2,
        }
    }
}

/// Least-absolute-deviations solver over a fixed sparse system matrix.
pub struct L1Solver {
    options: L1SolverOptions,
    a: SparseColMat<usize, f64>,
    a_transpose: SparseColMat<usize, f64>,
    linear_solver: SparseCholesky,
}

impl L1Solver {
    /// Builds the solver for `A`, forming and factorizing `A^T A` once.
    ///
    /// Fails if the normal matrix cannot be analyzed or factorized.
    pub fn new(options: L1SolverOptions, a: SparseColMat<usize, f64>) -> SolverResult<Self> {
        if a.nrows() == 0 || a.ncols() == 0 {
            return Err(SolverError::InvalidInput(
                "L1 system matrix must be non-empty".to_string(),
            ));
        }
        let a_transpose = a
            .as_ref()
            .transpose()
            .to_col_major()
            .map_err(|e| SolverError::LinAlg(LinAlgError::MatrixConstruction(format!("{e:?}"))))?;
        let normal_matrix = a_transpose.as_ref().mul(a.as_ref());

        let mut linear_solver = SparseCholesky::new();
        linear_solver.analyze_pattern(&normal_matrix)?;
        linear_solver.factorize(&normal_matrix)?;

        Ok(Self {
            options,
            a,
            a_transpose,
            linear_solver,
        })
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.options.max_num_iterations = max_iterations;
    }

    /// Minimizes `||A x - rhs||_1`, iterating from the caller's `x` (which
    /// may be zero). On return `solution` holds the final iterate; hitting
    /// the iteration cap leaves the best iterate in place and only warns.
    pub fn solve(&self, rhs: &Mat<f64>, solution: &mut Mat<f64>) -> SolverResult<()> {
        let rows = self.a.nrows();
        let cols = self.a.ncols();
        if rhs.nrows() != rows || rhs.ncols() != 1 {
            return Err(SolverError::InvalidInput(format!(
                "right-hand side has {} rows, system has {}",
                rhs.nrows(),
                rows
            )));
        }
        if solution.nrows() != cols || solution.ncols() != 1 {
            return Err(SolverError::InvalidInput(format!(
                "solution has {} rows, system has {} columns",
                solution.nrows(),
                cols
            )));
        }

        let mut z = Mat::<f64>::zeros(rows, 1);
        let mut z_old = Mat::<f64>::zeros(rows, 1);
        let mut u = Mat::<f64>::zeros(rows, 1);
        let mut ax_hat = Mat::<f64>::zeros(rows, 1);
        let mut work = Mat::<f64>::zeros(rows, 1);

        let rhs_norm = rhs.norm_l2();
        let primal_tolerance = (rows as f64).sqrt() * self.options.absolute_tolerance;
        let dual_tolerance = (cols as f64).sqrt() * self.options.absolute_tolerance;
        let shrinkage_kappa = 1.0 / self.options.rho;

        info!(
            "{:>10} {:>14} {:>14} {:>14} {:>14}",
            "iter", "r norm", "s norm", "primal eps", "dual eps"
        );

        for iteration in 0..self.options.max_num_iterations {
            // x update: (A^T A)^-1 A^T (b + z - u), reusing the factor.
            for i in 0..rows {
                work[(i, 0)] = rhs[(i, 0)] + z[(i, 0)] - u[(i, 0)];
            }
            let gradient = self.a_transpose.as_ref().mul(&work);
            let x = match self.linear_solver.solve(&gradient) {
                Ok(x) => x,
                Err(e) => {
                    error!("L1 minimization failed: sparse Cholesky solve error: {e}");
                    return Err(SolverError::from(e));
                }
            };

            let a_times_x = self.a.as_ref().mul(&x);
            for i in 0..rows {
                ax_hat[(i, 0)] = self.options.alpha * a_times_x[(i, 0)]
                    + (1.0 - self.options.alpha) * (z[(i, 0)] + rhs[(i, 0)]);
            }

            // z update with elementwise soft thresholding.
            std::mem::swap(&mut z, &mut z_old);
            for i in 0..rows {
                let v = ax_hat[(i, 0)] - rhs[(i, 0)] + u[(i, 0)];
                z[(i, 0)] = shrink(v, shrinkage_kappa);
            }

            // Scaled dual update.
            for i in 0..rows {
                u[(i, 0)] += ax_hat[(i, 0)] - z[(i, 0)] - rhs[(i, 0)];
            }

            // Convergence terms.
            let mut primal_sq = 0.0_f64;
            for i in 0..rows {
                primal_sq += (a_times_x[(i, 0)] - z[(i, 0)] - rhs[(i, 0)]).powi(2);
            }
            let primal_residual = primal_sq.sqrt();

            for i in 0..rows {
                work[(i, 0)] = z[(i, 0)] - z_old[(i, 0)];
            }
            let dual_residual =
                self.options.rho * self.a_transpose.as_ref().mul(&work).norm_l2();

            let max_norm = a_times_x.norm_l2().max(z.norm_l2()).max(rhs_norm);
            let primal_eps = primal_tolerance + self.options.relative_tolerance * max_norm;
            let dual_eps = dual_tolerance
                + self.options.relative_tolerance
                    * (self.options.rho * self.a_transpose.as_ref().mul(&u).norm_l2());

            info!(
                "{:>10} {:>14.6e} {:>14.6e} {:>14.6e} {:>14.6e}",
                iteration, primal_residual, dual_residual, primal_eps, dual_eps
            );

            for i in 0..cols {
                solution[(i, 0)] = x[(i, 0)];
            }

            if primal_residual < primal_eps && dual_residual < dual_eps {
                return Ok(());
            }
        }

        warn!(
            "L1 minimization reached the iteration cap ({}) before convergence",
            self.options.max_num_iterations
        );
        Ok(())
    }
}

/// Soft thresholding: `sign(v) * max(|v| - kappa, 0)`.
fn shrink(v: f64, kappa: f64) -> f64 {
    (v - kappa).max(0.0) - (-v - kappa).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    fn identity(n: usize) -> SparseColMat<usize, f64> {
        let triplets: Vec<_> = (0..n).map(|i| Triplet::new(i, i, 1.0)).collect();
        SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap()
    }

    #[test]
    fn test_shrinkage_operator() {
        assert_eq!(shrink(2.0, 0.5), 1.5);
        assert_eq!(shrink(-2.0, 0.5), -1.5);
        assert_eq!(shrink(0.3, 0.5), 0.0);
        assert_eq!(shrink(-0.3, 0.5), 0.0);
    }

    #[test]
    fn test_identity_system_returns_rhs() {
        let solver = L1Solver::new(L1SolverOptions::default(), identity(4)).unwrap();
        let rhs = Mat::from_fn(4, 1, |i, _| 0.5 * (i as f64 + 1.0));
        let mut x = Mat::zeros(4, 1);
        solver.solve(&rhs, &mut x).unwrap();
        for i in 0..4 {
            assert!((x[(i, 0)] - rhs[(i, 0)]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_median_regression_ignores_outlier() {
        // One unknown observed four times; the L1 optimum is the median of
        // the observations, so a single gross outlier has no pull.
        let triplets: Vec<_> = (0..4).map(|i| Triplet::new(i, 0, 1.0)).collect();
        let a = SparseColMat::try_new_from_triplets(4, 1, &triplets).unwrap();
        let options = L1SolverOptions {
            absolute_tolerance: 1e-8,
            relative_tolerance: 1e-8,
            max_num_iterations: 10_000,
            ..Default::default()
        };
        let solver = L1Solver::new(options, a).unwrap();
        let rhs = Mat::from_fn(4, 1, |i, _| if i == 3 { 10.0 } else { 0.0 });
        let mut x = Mat::zeros(1, 1);
        solver.solve(&rhs, &mut x).unwrap();
        assert!(x[(0, 0)].abs() < 1e-2);
    }

    #[test]
    fn test_consistent_overdetermined_system() {
        // Rows of a consistent 4x2 system; the L1 optimum is the exact
        // solution [1, -2].
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(1, 1, 1.0),
            Triplet::new(2, 0, 1.0),
            Triplet::new(2, 1, 1.0),
            Triplet::new(3, 0, 2.0),
            Triplet::new(3, 1, -1.0),
        ];
        let a = SparseColMat::try_new_from_triplets(4, 2, &triplets).unwrap();
        let options = L1SolverOptions {
            absolute_tolerance: 1e-8,
            relative_tolerance: 1e-8,
            max_num_iterations: 10_000,
            ..Default::default()
        };
        let solver = L1Solver::new(options, a).unwrap();
        let expected = [1.0, -2.0];
        let rhs = Mat::from_fn(4, 1, |i, _| match i {
            0 => 1.0,
            1 => -2.0,
            2 => -1.0,
            _ => 4.0,
        });
        let mut x = Mat::zeros(2, 1);
        solver.solve(&rhs, &mut x).unwrap();
        for (i, e) in expected.iter().enumerate() {
            assert!((x[(i, 0)] - e).abs() < 1e-4);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let solver = L1Solver::new(L1SolverOptions::default(), identity(3)).unwrap();
        let rhs = Mat::zeros(4, 1);
        let mut x = Mat::zeros(3, 1);
        assert!(solver.solve(&rhs, &mut x).is_err());
        let rhs = Mat::zeros(3, 1);
        let mut x = Mat::zeros(2, 1);
        assert!(solver.solve(&rhs, &mut x).is_err());
    }
}
