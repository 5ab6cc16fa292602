//! Robust global initialization by L1 cycle-residual minimization.

use std::collections::HashMap;
use std::time::Instant;

use faer::Mat;
use nalgebra::Vector3;
use tracing::info;

use super::linear_system::{apply_tangent_step, average_step_size, RelativeRotationSystem};
use super::view_index::ViewIndex;
use super::{
    validate_input, EstimatorResult, RotationEstimator, TwoViewGeometry, ViewId, ViewIdPair,
};
use crate::solver::{L1Solver, L1SolverOptions};

/// Options of the L1 global estimator.
#[derive(Debug, Clone)]
pub struct L1RotationOptions {
    /// Outer relinearization passes over the L1 problem
    pub max_num_l1_iterations: usize,
    /// Average tangent step size below which the outer loop stops
    pub l1_step_convergence_threshold: f64,
    /// Options forwarded to the inner ADMM solver
    pub l1_solver: L1SolverOptions,
}

impl Default for L1RotationOptions {
    fn default() -> Self {
        Self {
            max_num_l1_iterations: 5,
            l1_step_convergence_threshold: 1e-3,
            l1_solver: L1SolverOptions::default(),
        }
    }
}

/// Estimates global rotations by minimizing `sum_e ||A x - b||_1` over the
/// view graph, where `b` stacks the tangent-space cycle residuals of the
/// current estimate (the raw measurements, at a cold identity start).
///
/// The L1 norm tolerates a minority of gross edge errors, which makes the
/// result a good initialization for the IRLS refiner.
pub struct L1RotationGlobalEstimator {
    options: L1RotationOptions,
    view_index: Option<ViewIndex>,
    system: Option<RelativeRotationSystem>,
}

impl L1RotationGlobalEstimator {
    pub fn new(options: L1RotationOptions) -> Self {
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
}

impl RotationEstimator for L1RotationGlobalEstimator {
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

        let solver = L1Solver::new(self.options.l1_solver.clone(), system.matrix().clone())?;
        let mut step = Mat::<f64>::zeros(system.matrix().ncols(), 1);

        for iteration in 0..self.options.max_num_l1_iterations {
            let residuals = system.residuals(global_rotations)?;
            solver.solve(&residuals, &mut step)?;
            apply_tangent_step(&step, &view_index, global_rotations);

            let step_size = average_step_size(&step);
            info!("L1 pass {:>3}: average step size {:.6e}", iteration, step_size);
            if step_size < self.options.l1_step_convergence_threshold {
                break;
            }
        }

        self.view_index = Some(view_index);
        self.system = Some(system);
        info!("Total time [L1 rotation estimation]: {:?}", start.elapsed());
        Ok(())
    }
}
