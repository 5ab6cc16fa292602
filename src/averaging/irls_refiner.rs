//! Iteratively reweighted least-squares refinement on the rotation manifold.

use std::collections::HashMap;
use std::ops::Mul;
use std::time::Instant;

use faer::sparse::{SparseColMat, Triplet};
use faer::Mat;
use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::{error, info, warn};

use super::linear_system::{apply_tangent_step, average_step_size, RelativeRotationSystem};
use super::view_index::ViewIndex;
use super::{
    validate_input, EstimatorError, EstimatorResult, RotationEstimator, TwoViewGeometry, ViewId,
    ViewIdPair,
};
use crate::linalg::{LinAlgError, SparseCholesky};

/// Options of the IRLS refiner.
#[derive(Debug, Clone)]
pub struct IrlsRefinerOptions {
    /// Iteration cap; reaching it leaves the current iterate in place
    pub max_num_irls_iterations: usize,
    /// Scale parameter of the reweighting loss, in radians
    pub irls_loss_parameter_sigma: f64,
    /// Average tangent step size below which the refinement stops
    pub irls_step_convergence_threshold: f64,
    /// Worker threads for the per-edge weight update
    pub num_threads: usize,
}

impl Default for IrlsRefinerOptions {
    fn default() -> Self {
        Self {
            max_num_irls_iterations: 100,
            irls_loss_parameter_sigma: 5.0_f64.to_radians(),
            irls_step_convergence_threshold: 1e-3,
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Polishes an initial set of global rotations by reweighted least squares
/// on the tangent space.
///
/// Per iteration the edge residuals are reweighted with
/// `w = sigma / (e^2 + sigma^2)^2`, the weighted normal equations are
/// re-factorized over the once-analyzed sparsity pattern, and the solved
/// tangent step is composed onto every non-anchor view.
pub struct IrlsRotationLocalRefiner {
    options: IrlsRefinerOptions,
    view_index: Option<ViewIndex>,
    system: Option<RelativeRotationSystem>,
}

impl IrlsRotationLocalRefiner {
    pub fn new(options: IrlsRefinerOptions) -> Self {
        Self {
            options,
            view_index: None,
            system: None,
        }
    }

    /// Reuses a prebuilt view index (hybrid driver hook).
    pub fn set_view_index(&mut self, view_index: ViewIndex) {
        self.view_index = Some(view_index);
    }

    /// Reuses a prebuilt sparse system (hybrid driver hook).
    pub fn set_sparse_system(&mut self, system: RelativeRotationSystem) {
        self.system = Some(system);
    }

    /// Soft-l1/2 weight of one edge given its squared residual norm.
    ///
    /// This exact expression (rather than a textbook Huber or Geman-McClure
    /// derivative) is what the refiner is calibrated for; see the tests for
    /// its monotonicity.
    fn edge_weight(squared_residual: f64, sigma: f64) -> f64 {
        let denominator = squared_residual + sigma * sigma;
        sigma / (denominator * denominator)
    }

    /// Fills `weights` with one weight per row, broadcast over each edge's
    /// three rows. Edges are independent, so the loop is data parallel.
    fn compute_weights(&self, residuals: &Mat<f64>, weights: &mut [f64]) {
        let sigma = self.options.irls_loss_parameter_sigma;
        let fill = |(edge, chunk): (usize, &mut [f64])| {
            let mut squared = 0.0;
            for r in 0..3 {
                squared += residuals[(3 * edge + r, 0)].powi(2);
            }
            let weight = Self::edge_weight(squared, sigma);
            for value in chunk.iter_mut() {
                *value = weight;
            }
        };
        weights
            .par_chunks_mut(3)
            .enumerate()
            .for_each(fill);
    }
}

impl RotationEstimator for IrlsRotationLocalRefiner {
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
        let system = match self.system.take() {
            Some(system) => system,
            None => RelativeRotationSystem::build(view_pairs, &view_index)?,
        };

        let a = system.matrix();
        let num_rows = a.nrows();
        let a_transpose = a
            .as_ref()
            .transpose()
            .to_col_major()
            .map_err(|e| EstimatorError::LinAlg(LinAlgError::MatrixConstruction(format!("{e:?}"))))?;

        // The weighted normal matrix shares the pattern of A^T A, so the
        // symbolic analysis is done once up front.
        let mut linear_solver = SparseCholesky::new();
        let pattern_matrix = a_transpose.as_ref().mul(a.as_ref());
        if let Err(e) = linear_solver.analyze_pattern(&pattern_matrix) {
            error!("Cholesky analysis of the IRLS system failed: {e}");
            return Err(EstimatorError::from(e));
        }

        let pool = if self.options.num_threads >= 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.options.num_threads)
                    .build()
                    .map_err(|e| EstimatorError::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };

        info!(
            "{:>10} {:>16} {:>16}",
            "iter", "squared error", "avg step"
        );

        let mut residuals = system.residuals(global_rotations)?;
        let mut weights = vec![0.0_f64; num_rows];
        let mut result = Ok(());
        let mut converged = false;

        for iteration in 0..self.options.max_num_irls_iterations {
            match &pool {
                Some(pool) => pool.install(|| self.compute_weights(&residuals, &mut weights)),
                None => self.compute_weights(&residuals, &mut weights),
            }

            // A^T W as a sparse product with the diagonal weight matrix.
            let weight_triplets: Vec<Triplet<usize, usize, f64>> = weights
                .iter()
                .enumerate()
                .map(|(i, &w)| Triplet::new(i, i, w))
                .collect();
            let weight_diagonal =
                SparseColMat::try_new_from_triplets(num_rows, num_rows, &weight_triplets)
                    .map_err(|e| {
                        EstimatorError::LinAlg(LinAlgError::MatrixConstruction(format!("{e:?}")))
                    })?;
            let at_weight = a_transpose.as_ref().mul(weight_diagonal.as_ref());

            if let Err(e) = linear_solver.factorize(&at_weight.as_ref().mul(a.as_ref())) {
                error!("failed to factorize the weighted least squares system: {e}");
                result = Err(EstimatorError::from(e));
                break;
            }
            let step = match linear_solver.solve(&at_weight.as_ref().mul(&residuals)) {
                Ok(step) => step,
                Err(e) => {
                    error!("failed to solve the weighted least squares system: {e}");
                    result = Err(EstimatorError::from(e));
                    break;
                }
            };

            apply_tangent_step(&step, &view_index, global_rotations);
            residuals = system.residuals(global_rotations)?;

            let squared_error = {
                let mut total = 0.0;
                for i in 0..num_rows {
                    total += residuals[(i, 0)].powi(2);
                }
                total
            };
            let step_size = average_step_size(&step);
            info!("{:>10} {:>16.8e} {:>16.8e}", iteration, squared_error, step_size);

            if step_size < self.options.irls_step_convergence_threshold {
                info!("IRLS converged in {} iterations", iteration + 1);
                converged = true;
                break;
            }
        }

        if result.is_ok() && !converged {
            warn!(
                "IRLS reached the iteration cap ({}) before convergence",
                self.options.max_num_irls_iterations
            );
        }

        self.view_index = Some(view_index);
        self.system = Some(system);
        info!("Total time [IRLS]: {:?}", start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry;

    fn tight_options() -> IrlsRefinerOptions {
        IrlsRefinerOptions {
            max_num_irls_iterations: 200,
            irls_step_convergence_threshold: 1e-12,
            ..Default::default()
        }
    }

    #[test]
    fn test_weights_monotonically_non_increasing() {
        let sigma = 5.0_f64.to_radians();
        let mut previous = f64::INFINITY;
        for k in 0..100 {
            let residual = k as f64 * 0.01;
            let weight = IrlsRotationLocalRefiner::edge_weight(residual * residual, sigma);
            assert!(weight <= previous);
            assert!(weight > 0.0);
            previous = weight;
        }
    }

    #[test]
    fn test_weight_formula_value() {
        let sigma = 0.1;
        let e_sq = 0.04;
        let expected = sigma / ((e_sq + sigma * sigma) * (e_sq + sigma * sigma));
        assert!(
            (IrlsRotationLocalRefiner::edge_weight(e_sq, sigma) - expected).abs() < 1e-15
        );
    }

    #[test]
    fn test_two_views_single_edge() {
        // Minimal graph: the free view lands on the measurement composed
        // with the anchor's rotation, and the anchor is untouched.
        let anchor_initial = Vector3::new(0.1, -0.3, 0.2);
        let measurement = Vector3::new(0.25, 0.1, -0.15);
        let view_pairs = HashMap::from([(
            (0_u32, 1_u32),
            TwoViewGeometry {
                relative_rotation: measurement,
                visibility_score: 1,
            },
        )]);
        let mut rotations = HashMap::from([(0, anchor_initial), (1, Vector3::zeros())]);

        let mut refiner = IrlsRotationLocalRefiner::new(tight_options());
        refiner
            .estimate_rotations(&view_pairs, &mut rotations)
            .unwrap();

        assert_eq!(rotations[&0], anchor_initial);
        let expected = geometry::multiply(&measurement, &anchor_initial);
        assert!(geometry::angular_distance(&rotations[&1], &expected) < 1e-8);
    }

    #[test]
    fn test_refines_perturbed_triangle() {
        // Consistent triangle; the initial guess for view 2 is off by a few
        // degrees and must be pulled back onto the ground truth.
        let r1 = Vector3::new(0.0, 0.3, 0.0);
        let r2 = Vector3::new(0.1, 0.0, 0.4);
        let view_pairs = HashMap::from([
            (
                (0_u32, 1_u32),
                TwoViewGeometry {
                    relative_rotation: r1,
                    visibility_score: 1,
                },
            ),
            (
                (1_u32, 2_u32),
                TwoViewGeometry {
                    relative_rotation: geometry::multiply(&r2, &geometry::inverse(&r1)),
                    visibility_score: 1,
                },
            ),
            (
                (0_u32, 2_u32),
                TwoViewGeometry {
                    relative_rotation: r2,
                    visibility_score: 1,
                },
            ),
        ]);
        let mut rotations = HashMap::from([
            (0, Vector3::zeros()),
            (1, r1 + Vector3::new(0.02, -0.01, 0.015)),
            (2, r2 + Vector3::new(-0.01, 0.02, 0.01)),
        ]);

        let mut refiner = IrlsRotationLocalRefiner::new(tight_options());
        refiner
            .estimate_rotations(&view_pairs, &mut rotations)
            .unwrap();

        assert_eq!(rotations[&0], Vector3::zeros());
        assert!(geometry::angular_distance(&rotations[&1], &r1) < 1e-8);
        assert!(geometry::angular_distance(&rotations[&2], &r2) < 1e-8);
    }

    #[test]
    fn test_single_threaded_run_matches_default() {
        let r1 = Vector3::new(0.2, 0.0, -0.1);
        let view_pairs = HashMap::from([(
            (0_u32, 1_u32),
            TwoViewGeometry {
                relative_rotation: r1,
                visibility_score: 1,
            },
        )]);
        let initial = HashMap::from([(0, Vector3::zeros()), (1, Vector3::new(0.15, 0.02, -0.1))]);

        let mut options = tight_options();
        options.num_threads = 1;
        let mut single = IrlsRotationLocalRefiner::new(options);
        let mut rotations_single = initial.clone();
        single
            .estimate_rotations(&view_pairs, &mut rotations_single)
            .unwrap();

        let mut default = IrlsRotationLocalRefiner::new(tight_options());
        let mut rotations_default = initial;
        default
            .estimate_rotations(&view_pairs, &mut rotations_default)
            .unwrap();

        assert_eq!(rotations_single[&1], rotations_default[&1]);
    }
}
