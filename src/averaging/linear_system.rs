//! Sparse tangent-space system shared by the L1 estimator and the IRLS
//! refiner.
//!
//! The system matrix couples the stacked per-edge residuals to the stacked
//! per-view tangent updates. Its nonzero pattern depends only on the graph,
//! so it is built once per solve and reused across iterations; the hybrid
//! driver hands the same instance to the initializer and the refiner.

use std::collections::HashMap;

use faer::sparse::{SparseColMat, Triplet};
use faer::Mat;
use nalgebra::Vector3;

use super::view_index::ViewIndex;
use super::{EstimatorError, EstimatorResult, TwoViewGeometry, ViewId, ViewIdPair};
use crate::geometry;
use crate::linalg::LinAlgError;

/// One measurement edge resolved against the dense index.
#[derive(Debug, Clone)]
pub(crate) struct EdgeTerm {
    pub first: ViewId,
    pub second: ViewId,
    pub relative_rotation: Vector3<f64>,
}

/// Fixed-pattern sparse system over the view graph.
///
/// Each edge `(i, j)` contributes three rows holding `-R_ij^T` in the
/// columns of view `i` and the identity in the columns of view `j`; the
/// anchor view has no columns. Edges are ranked by their dense index pair,
/// which pins the row order (and therefore floating-point summation order)
/// independently of hash-map iteration.
#[derive(Debug, Clone)]
pub struct RelativeRotationSystem {
    matrix: SparseColMat<usize, f64>,
    edges: Vec<EdgeTerm>,
    num_views: usize,
}

impl RelativeRotationSystem {
    /// Assembles the system for `view_pairs` over `view_index`.
    pub fn build(
        view_pairs: &HashMap<ViewIdPair, TwoViewGeometry>,
        view_index: &ViewIndex,
    ) -> EstimatorResult<Self> {
        let num_views = view_index.num_views();
        let mut keyed_edges: Vec<(usize, usize, EdgeTerm)> = Vec::with_capacity(view_pairs.len());
        for (&(first, second), geometry) in view_pairs {
            let index1 = view_index.index_of(first).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("view {first} missing from index"))
            })?;
            let index2 = view_index.index_of(second).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("view {second} missing from index"))
            })?;
            keyed_edges.push((
                index1,
                index2,
                EdgeTerm {
                    first,
                    second,
                    relative_rotation: geometry::normalize(&geometry.relative_rotation),
                },
            ));
        }
        keyed_edges.sort_by_key(|&(index1, index2, _)| (index1, index2));

        let mut triplets: Vec<Triplet<usize, usize, f64>> =
            Vec::with_capacity(12 * keyed_edges.len());
        for (e, (index1, index2, edge)) in keyed_edges.iter().enumerate() {
            let rotation = geometry::to_rotation_matrix(&edge.relative_rotation);
            if let Some(offset) = view_index.tangent_offset(*index1) {
                for r in 0..3 {
                    for c in 0..3 {
                        // -R_ij^T
                        triplets.push(Triplet::new(3 * e + r, offset + c, -rotation[(c, r)]));
                    }
                }
            }
            if let Some(offset) = view_index.tangent_offset(*index2) {
                for r in 0..3 {
                    triplets.push(Triplet::new(3 * e + r, offset + r, 1.0));
                }
            }
        }

        let num_rows = 3 * keyed_edges.len();
        let num_cols = 3 * (num_views - 1);
        let matrix = SparseColMat::try_new_from_triplets(num_rows, num_cols, &triplets)
            .map_err(|e| {
                EstimatorError::LinAlg(LinAlgError::MatrixConstruction(format!("{e:?}")))
            })?;

        Ok(Self {
            matrix,
            edges: keyed_edges.into_iter().map(|(_, _, edge)| edge).collect(),
            num_views,
        })
    }

    pub fn matrix(&self) -> &SparseColMat<usize, f64> {
        &self.matrix
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_views(&self) -> usize {
        self.num_views
    }

    pub(crate) fn edges(&self) -> &[EdgeTerm] {
        &self.edges
    }

    /// Stacked tangent-space residuals `e_ij = -r_j ∘ r_ij ∘ r_i` of the
    /// current global rotations, in system row order.
    ///
    /// The caller's rotations carry no magnitude restriction, so they are
    /// normalized into the principal ball here; negation-as-inverse is only
    /// valid there.
    pub fn residuals(
        &self,
        global_rotations: &HashMap<ViewId, Vector3<f64>>,
    ) -> EstimatorResult<Mat<f64>> {
        let mut residuals = Mat::<f64>::zeros(3 * self.edges.len(), 1);
        for (e, edge) in self.edges.iter().enumerate() {
            let rotation1 = global_rotations.get(&edge.first).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("missing rotation for view {}", edge.first))
            })?;
            let rotation2 = global_rotations.get(&edge.second).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("missing rotation for view {}", edge.second))
            })?;
            let rotation1 = geometry::normalize(rotation1);
            let rotation2 = geometry::normalize(rotation2);
            let residual = geometry::multiply(
                &geometry::inverse(&rotation2),
                &geometry::multiply(&edge.relative_rotation, &rotation1),
            );
            for r in 0..3 {
                residuals[(3 * e + r, 0)] = residual[r];
            }
        }
        Ok(residuals)
    }
}

/// Right-composes each non-anchor view's rotation with its slice of the
/// stacked tangent step. The anchor view is left untouched.
pub(crate) fn apply_tangent_step(
    step: &Mat<f64>,
    view_index: &ViewIndex,
    global_rotations: &mut HashMap<ViewId, Vector3<f64>>,
) {
    for index in 0..view_index.num_views() {
        let Some(offset) = view_index.tangent_offset(index) else {
            continue;
        };
        let id = view_index.id_at(index);
        let increment = Vector3::new(step[(offset, 0)], step[(offset + 1, 0)], step[(offset + 2, 0)]);
        if let Some(rotation) = global_rotations.get_mut(&id) {
            *rotation = geometry::multiply(rotation, &increment);
        }
    }
}

/// Mean Euclidean norm of the per-view tangent increments.
pub(crate) fn average_step_size(step: &Mat<f64>) -> f64 {
    let num_vertices = step.nrows() / 3;
    if num_vertices == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for v in 0..num_vertices {
        let mut norm_sq = 0.0;
        for r in 0..3 {
            norm_sq += step[(3 * v + r, 0)].powi(2);
        }
        total += norm_sq.sqrt();
    }
    total / num_vertices as f64
}
