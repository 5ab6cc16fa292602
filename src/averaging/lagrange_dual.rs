//! Rotation estimation through the Lagrange-dual semidefinite relaxation.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, Matrix3, Vector3};
use tracing::info;

use super::view_index::ViewIndex;
use super::{
    validate_input, EstimatorError, EstimatorResult, RotationEstimator, TwoViewGeometry, ViewId,
    ViewIdPair,
};
use crate::geometry;
use crate::linalg::{smallest_eigenpairs, LinAlgError};
use crate::solver::{create_sdp_solver, BlockMatrix, SdpSolverOptions, SdpSummary};

/// Solves the chordal-distance relaxation `max tr(R Y^T Y)` subject to
/// identity diagonal Gram blocks, then reads rotations off the block
/// structure of the solution.
///
/// Also reports an a-posteriori bound on the worst-case rotation error of
/// the relaxed solution, derived from the algebraic connectivity of the
/// view graph.
pub struct LagrangeDualRotationEstimator {
    options: SdpSolverOptions,
    view_index: Option<ViewIndex>,
    summary: Option<SdpSummary>,
    error_bound: f64,
}

impl LagrangeDualRotationEstimator {
    pub fn new(options: SdpSolverOptions) -> Self {
        Self {
            options,
            view_index: None,
            summary: None,
            error_bound: 0.0,
        }
    }

    /// Reuses a prebuilt view index (hybrid driver hook).
    pub fn set_view_index(&mut self, view_index: ViewIndex) {
        self.view_index = Some(view_index);
    }

    /// Summary of the last backend run.
    pub fn summary(&self) -> Option<&SdpSummary> {
        self.summary.as_ref()
    }

    /// `alpha_max`, the worst-case per-view rotation error bound of the last
    /// solve, in radians.
    pub fn error_bound(&self) -> f64 {
        self.error_bound
    }

    /// Fills the symmetric measurement block matrix and the neighbor lists:
    /// block `(i, j)` holds `R_ij^T`, block `(j, i)` holds `R_ij`.
    fn fill_relative_graph(
        view_pairs: &HashMap<ViewIdPair, TwoViewGeometry>,
        view_index: &ViewIndex,
    ) -> EstimatorResult<(BlockMatrix, BTreeMap<usize, Vec<usize>>)> {
        let mut relative = BlockMatrix::new(view_index.num_views());
        let mut adjacency: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (&(first, second), geometry_entry) in view_pairs {
            let i = view_index.index_of(first).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("view {first} missing from index"))
            })?;
            let j = view_index.index_of(second).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("view {second} missing from index"))
            })?;
            let rotation = geometry::to_rotation_matrix(&geometry::normalize(
                &geometry_entry.relative_rotation,
            ));
            relative.add_block(i, j, rotation.transpose());
            relative.add_block(j, i, rotation);
            adjacency.entry(i).or_default().push(j);
            adjacency.entry(j).or_default().push(i);
        }
        for neighbors in adjacency.values_mut() {
            neighbors.sort_unstable();
            neighbors.dedup();
        }
        Ok((relative, adjacency))
    }

    /// Reads one rotation per view out of the `3 x 3V` solution factor.
    ///
    /// Each raw block is negated when its determinant is negative (the O(3)
    /// sign ambiguity of the relaxation), orthogonalized, and re-expressed
    /// relative to the anchor block so that the anchor view keeps its
    /// incoming rotation untouched.
    fn retrieve_rotations(
        solution: &DMatrix<f64>,
        view_index: &ViewIndex,
        global_rotations: &mut HashMap<ViewId, Vector3<f64>>,
    ) -> EstimatorResult<()> {
        if solution.ncols() != 3 * view_index.num_views() || solution.nrows() != 3 {
            return Err(EstimatorError::Solver(crate::solver::SolverError::InvalidInput(
                format!(
                    "SDP solution has shape {}x{}, expected 3x{}",
                    solution.nrows(),
                    solution.ncols(),
                    3 * view_index.num_views()
                ),
            )));
        }

        let anchor_id = view_index.anchor_id();
        let anchor_rotation = global_rotations
            .get(&anchor_id)
            .map(geometry::to_rotation_matrix)
            .ok_or_else(|| {
                EstimatorError::InvalidInput(format!("missing rotation for anchor view {anchor_id}"))
            })?;
        let anchor_block = Self::orthogonal_block(solution, view_index.anchor_index());
        let anchor_inverse = anchor_block.transpose();

        for index in 0..view_index.num_views() {
            if index == view_index.anchor_index() {
                continue;
            }
            let id = view_index.id_at(index);
            let block = Self::orthogonal_block(solution, index);
            let rotation = block * anchor_inverse * anchor_rotation;
            global_rotations.insert(id, geometry::to_angle_axis(&rotation));
        }
        Ok(())
    }

    /// Extracts `Y[:, 3i..3i+3]^T` as a proper rotation matrix.
    fn orthogonal_block(solution: &DMatrix<f64>, index: usize) -> Matrix3<f64> {
        let mut block = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                // Transposed read of the solution block.
                block[(r, c)] = solution[(c, 3 * index + r)];
            }
        }
        if block.determinant() < 0.0 {
            block = -block;
        }
        geometry::project_to_rotation(&block)
    }

    /// Bound on the worst-case per-view rotation error of the relaxation:
    /// `alpha_max = 2 asin(sqrt(1/4 + lambda_2 / (2 d_max)) - 1/2)` with
    /// `lambda_2` the algebraic connectivity of the unweighted view graph
    /// and `d_max` its maximum vertex degree.
    fn compute_error_bound(
        view_pairs: &HashMap<ViewIdPair, TwoViewGeometry>,
        view_index: &ViewIndex,
    ) -> EstimatorResult<f64> {
        let n = view_index.num_views();
        let mut degrees = vec![0.0_f64; n];
        let mut seen_edges: Vec<(usize, usize)> = Vec::with_capacity(view_pairs.len());
        for &(first, second) in view_pairs.keys() {
            let i = view_index.index_of(first).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("view {first} missing from index"))
            })?;
            let j = view_index.index_of(second).ok_or_else(|| {
                EstimatorError::InvalidInput(format!("view {second} missing from index"))
            })?;
            seen_edges.push((i.min(j), i.max(j)));
        }
        seen_edges.sort_unstable();
        seen_edges.dedup();
        for &(i, j) in &seen_edges {
            degrees[i] += 1.0;
            degrees[j] += 1.0;
        }
        let max_degree = degrees.iter().fold(0.0_f64, |acc, &d| acc.max(d));

        // Laplacian L = D - A of the unweighted graph.
        let mut triplets: Vec<Triplet<usize, usize, f64>> =
            Vec::with_capacity(n + 2 * seen_edges.len());
        for (i, &degree) in degrees.iter().enumerate() {
            triplets.push(Triplet::new(i, i, degree));
        }
        for &(i, j) in &seen_edges {
            triplets.push(Triplet::new(i, j, -1.0));
            triplets.push(Triplet::new(j, i, -1.0));
        }
        let laplacian = SparseColMat::try_new_from_triplets(n, n, &triplets).map_err(|e| {
            EstimatorError::LinAlg(LinAlgError::MatrixConstruction(format!("{e:?}")))
        })?;

        let (eigenvalues, _) = smallest_eigenpairs(n, 2, |v| &laplacian * v)?;
        let lambda2 = eigenvalues[1];

        let argument = (0.25 + lambda2 / (2.0 * max_degree)).sqrt() - 0.5;
        Ok(2.0 * argument.clamp(-1.0, 1.0).asin())
    }
}

impl RotationEstimator for LagrangeDualRotationEstimator {
    fn estimate_rotations(
        &mut self,
        view_pairs: &HashMap<ViewIdPair, TwoViewGeometry>,
        global_rotations: &mut HashMap<ViewId, Vector3<f64>>,
    ) -> EstimatorResult<()> {
        validate_input(view_pairs, global_rotations)?;
        let start = Instant::now();

        let view_index = match self.view_index.take() {
            Some(view_index) => view_index,
            None => ViewIndex::from_view_pairs(view_pairs),
        };

        let (relative, adjacency) = Self::fill_relative_graph(view_pairs, &view_index)?;
        let mut solver = create_sdp_solver(view_index.num_views(), &self.options);
        solver.set_covariance(relative.negated());
        solver.set_adjacent_edges(adjacency);
        let summary = solver.solve()?;

        Self::retrieve_rotations(solver.solution(), &view_index, global_rotations)?;

        info!(
            "Lagrange dual ({}) finished in {} iterations",
            self.options.solver_type, summary.total_iterations
        );
        self.summary = Some(summary);

        self.error_bound = Self::compute_error_bound(view_pairs, &view_index)?;
        info!(
            "a-posteriori rotation error bound: {:.4} rad",
            self.error_bound
        );

        self.view_index = Some(view_index);
        info!("Total time [Lagrange dual]: {:?}", start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orthogonal_block_fixes_negative_determinant() {
        // Store -R^T in the solution block; retrieval must negate it back
        // to a proper rotation.
        let rotation = geometry::to_rotation_matrix(&Vector3::new(0.3, 0.2, -0.5));
        let mut solution = DMatrix::zeros(3, 3);
        for r in 0..3 {
            for c in 0..3 {
                solution[(r, c)] = -rotation[(c, r)];
            }
        }
        let block = LagrangeDualRotationEstimator::orthogonal_block(&solution, 0);
        assert!((block.determinant() - 1.0).abs() < 1e-9);
        assert!((block - rotation).norm() < 1e-9);
    }

    #[test]
    fn test_orthogonal_block_positive_determinant_untouched() {
        let rotation = geometry::to_rotation_matrix(&Vector3::new(-0.2, 0.6, 0.1));
        let mut solution = DMatrix::zeros(3, 3);
        for r in 0..3 {
            for c in 0..3 {
                solution[(r, c)] = rotation[(c, r)];
            }
        }
        let block = LagrangeDualRotationEstimator::orthogonal_block(&solution, 0);
        assert!((block - rotation).norm() < 1e-9);
    }

    #[test]
    fn test_two_views_single_edge() {
        // Minimal graph: the free view lands on the measurement composed
        // with the anchor's rotation, and the anchor is untouched.
        let anchor_initial = Vector3::new(-0.2, 0.15, 0.1);
        let measurement = Vector3::new(0.3, -0.1, 0.2);
        let view_pairs = HashMap::from([(
            (0_u32, 1_u32),
            TwoViewGeometry {
                relative_rotation: measurement,
                visibility_score: 1,
            },
        )]);
        let mut rotations = HashMap::from([(0, anchor_initial), (1, Vector3::zeros())]);

        let options = SdpSolverOptions {
            max_iterations: 2000,
            tolerance: 1e-14,
            ..Default::default()
        };
        let mut estimator = LagrangeDualRotationEstimator::new(options);
        estimator
            .estimate_rotations(&view_pairs, &mut rotations)
            .unwrap();

        assert_eq!(rotations[&0], anchor_initial);
        let expected = geometry::multiply(&measurement, &anchor_initial);
        assert!(geometry::angular_distance(&rotations[&1], &expected) < 1e-5);
    }

    #[test]
    fn test_error_bound_on_complete_graph() {
        // K4: lambda_2 = 4, d_max = 3.
        let mut view_pairs = HashMap::new();
        for i in 0..4_u32 {
            for j in (i + 1)..4 {
                view_pairs.insert((i, j), TwoViewGeometry::default());
            }
        }
        let view_index = ViewIndex::from_view_pairs(&view_pairs);
        let bound =
            LagrangeDualRotationEstimator::compute_error_bound(&view_pairs, &view_index).unwrap();
        let expected = 2.0 * ((0.25_f64 + 4.0 / 6.0).sqrt() - 0.5).asin();
        assert!((bound - expected).abs() < 1e-8);
        assert!(bound > 0.0);
    }
}
