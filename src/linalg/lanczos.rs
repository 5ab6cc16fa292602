//! Lanczos iteration for extremal eigenpairs of symmetric operators.
//!
//! The rotation estimators need only a handful of eigenvalues of large sparse
//! symmetric matrices (the second-smallest Laplacian eigenvalue for the
//! a-posteriori error bound, the minimum eigenvalue of the dual certificate
//! in the Riemannian staircase), so a Krylov method over a matrix-vector
//! closure avoids forming or densifying the operator.

use faer::Mat;
use nalgebra::{DMatrix, SymmetricEigen};

use super::{LinAlgError, LinAlgResult};

/// Breakdown threshold relative to the running spectral scale.
const BREAKDOWN_TOLERANCE: f64 = 1e-13;

/// Relative residual below which a Ritz pair is accepted.
const CONVERGENCE_TOLERANCE: f64 = 1e-7;

/// Computes the `num_pairs` smallest algebraic eigenvalues (ascending) and
/// eigenvectors of a symmetric operator of size `dim`, given as the closure
/// `operator(v) = M * v` over `dim x 1` column vectors.
///
/// Uses Lanczos with full reorthogonalization and a fixed, deterministic
/// start vector, so repeated calls produce identical results. Returns the
/// eigenvalues together with a `dim x num_pairs` matrix of Ritz vectors.
pub fn smallest_eigenpairs<F>(
    dim: usize,
    num_pairs: usize,
    operator: F,
) -> LinAlgResult<(Vec<f64>, Mat<f64>)>
where
    F: Fn(&Mat<f64>) -> Mat<f64>,
{
    if num_pairs == 0 || num_pairs > dim {
        return Err(LinAlgError::DimensionMismatch {
            expected: dim,
            actual: num_pairs,
        });
    }

    let max_subspace = dim.min((10 * num_pairs + 50).max(60));

    let mut basis: Vec<Mat<f64>> = Vec::with_capacity(max_subspace);
    let mut alphas: Vec<f64> = Vec::with_capacity(max_subspace);
    let mut betas: Vec<f64> = Vec::with_capacity(max_subspace);

    let mut v = start_vector(dim);
    let mut spectral_scale: f64 = 0.0;
    let mut exhausted = false;

    for step in 0..max_subspace {
        let mut w = operator(&v);
        if w.nrows() != dim || w.ncols() != 1 {
            return Err(LinAlgError::DimensionMismatch {
                expected: dim,
                actual: w.nrows(),
            });
        }

        let alpha = dot(&v, &w);
        for i in 0..dim {
            w[(i, 0)] -= alpha * v[(i, 0)];
        }
        if step > 0 {
            let beta_prev = betas[step - 1];
            let v_prev = &basis[step - 1];
            for i in 0..dim {
                w[(i, 0)] -= beta_prev * v_prev[(i, 0)];
            }
        }
        basis.push(v.clone());
        alphas.push(alpha);

        // Full reorthogonalization, twice for good measure.
        for _ in 0..2 {
            for q in &basis {
                let overlap = dot(q, &w);
                for i in 0..dim {
                    w[(i, 0)] -= overlap * q[(i, 0)];
                }
            }
        }

        let beta = norm(&w);
        betas.push(beta);
        spectral_scale = spectral_scale.max(alpha.abs()).max(beta);

        if beta <= BREAKDOWN_TOLERANCE * spectral_scale.max(1.0) {
            // Invariant subspace found; the Ritz values are exact on it.
            exhausted = true;
            break;
        }
        for i in 0..dim {
            v[(i, 0)] = w[(i, 0)] / beta;
        }
    }

    let subspace = basis.len();
    if subspace < num_pairs {
        return Err(LinAlgError::EigenFailed(format!(
            "Krylov subspace collapsed after {subspace} steps, {num_pairs} pairs requested"
        )));
    }

    let tridiagonal = DMatrix::from_fn(subspace, subspace, |r, c| {
        if r == c {
            alphas[r]
        } else if r + 1 == c || c + 1 == r {
            betas[r.min(c)]
        } else {
            0.0
        }
    });
    let eigen = SymmetricEigen::new(tridiagonal);

    let mut order: Vec<usize> = (0..subspace).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let beta_last = betas[subspace - 1];
    let mut values = Vec::with_capacity(num_pairs);
    let mut vectors = Mat::<f64>::zeros(dim, num_pairs);
    for (k, &idx) in order.iter().take(num_pairs).enumerate() {
        let ritz_value = eigen.eigenvalues[idx];
        let ritz_weight = eigen.eigenvectors[(subspace - 1, idx)];
        let residual = beta_last * ritz_weight.abs();
        if !exhausted
            && subspace < dim
            && residual > CONVERGENCE_TOLERANCE * spectral_scale.max(1.0)
        {
            return Err(LinAlgError::EigenFailed(format!(
                "Ritz pair {k} not converged: residual {residual:.3e}"
            )));
        }
        values.push(ritz_value);
        for (j, q) in basis.iter().enumerate() {
            let weight = eigen.eigenvectors[(j, idx)];
            for i in 0..dim {
                vectors[(i, k)] += weight * q[(i, 0)];
            }
        }
    }

    Ok((values, vectors))
}

/// Deterministic, dense start vector with no obvious symmetry.
fn start_vector(dim: usize) -> Mat<f64> {
    let mut v = Mat::from_fn(dim, 1, |i, _| 1.0 + (1.0 + i as f64).sin() * 0.5);
    let scale = norm(&v);
    for i in 0..dim {
        v[(i, 0)] /= scale;
    }
    v
}

fn dot(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let mut sum = 0.0;
    for i in 0..a.nrows() {
        sum += a[(i, 0)] * b[(i, 0)];
    }
    sum
}

fn norm(a: &Mat<f64>) -> f64 {
    dot(a, a).sqrt()
}
