//! Sparse Cholesky (LLT) adapter with pattern reuse.

use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::SparseColMat;
use faer::Mat;

use super::{LinAlgError, LinAlgResult};

/// Sparse LLT factorization split into a symbolic and a numeric phase.
///
/// [`analyze_pattern`](SparseCholesky::analyze_pattern) runs the fill-reducing
/// symbolic analysis once per sparsity pattern;
/// [`factorize`](SparseCholesky::factorize) refreshes the numeric factor for
/// new values over the same pattern, and [`solve`](SparseCholesky::solve)
/// applies the factor to a right-hand side. Iterative callers analyze once at
/// construction and re-factorize per iteration.
#[derive(Default)]
pub struct SparseCholesky {
    symbolic: Option<SymbolicLlt<usize>>,
    factor: Option<Llt<usize, f64>>,
    dimension: usize,
}

impl SparseCholesky {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the symbolic analysis for the pattern of `matrix`.
    ///
    /// Invalidates any previously computed numeric factor.
    pub fn analyze_pattern(&mut self, matrix: &SparseColMat<usize, f64>) -> LinAlgResult<()> {
        let symbolic = SymbolicLlt::try_new(matrix.symbolic(), faer::Side::Lower)
            .map_err(|e| LinAlgError::AnalysisFailed(format!("{e:?}")))?;
        self.symbolic = Some(symbolic);
        self.factor = None;
        self.dimension = matrix.ncols();
        Ok(())
    }

    /// Computes the numeric factor of `matrix`, whose pattern must match the
    /// one passed to [`analyze_pattern`](SparseCholesky::analyze_pattern).
    pub fn factorize(&mut self, matrix: &SparseColMat<usize, f64>) -> LinAlgResult<()> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinAlgError::PatternNotAnalyzed)?;
        if matrix.ncols() != self.dimension {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dimension,
                actual: matrix.ncols(),
            });
        }
        let factor = Llt::try_new_with_symbolic(symbolic.clone(), matrix.as_ref(), faer::Side::Lower)
            .map_err(|e| LinAlgError::FactorizationFailed(format!("{e:?}")))?;
        self.factor = Some(factor);
        Ok(())
    }

    /// Returns `M^-1 rhs` for the last factorized matrix `M`.
    pub fn solve(&self, rhs: &Mat<f64>) -> LinAlgResult<Mat<f64>> {
        let factor = self.factor.as_ref().ok_or(LinAlgError::NotFactorized)?;
        if rhs.nrows() != self.dimension {
            return Err(LinAlgError::DimensionMismatch {
                expected: self.dimension,
                actual: rhs.nrows(),
            });
        }
        Ok(factor.solve(rhs))
    }
}
