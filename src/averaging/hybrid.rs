//! Global initialization composed with local IRLS refinement.

use std::collections::HashMap;

use nalgebra::Vector3;
use tracing::info;

use super::irls_refiner::{IrlsRefinerOptions, IrlsRotationLocalRefiner};
use super::l1_estimator::{L1RotationGlobalEstimator, L1RotationOptions};
use super::lagrange_dual::LagrangeDualRotationEstimator;
use super::linear_system::RelativeRotationSystem;
use super::view_index::ViewIndex;
use super::{
    validate_input, EstimatorResult, RotationEstimator, TwoViewGeometry, ViewId, ViewIdPair,
};
use crate::solver::SdpSolverOptions;

/// Which global estimator seeds the refinement.
#[derive(Debug, Clone)]
pub enum InitializerType {
    /// L1 cycle-residual minimization
    L1(L1RotationOptions),
    /// Lagrange-dual semidefinite relaxation
    LagrangeDual(SdpSolverOptions),
}

impl Default for InitializerType {
    fn default() -> Self {
        InitializerType::L1(L1RotationOptions::default())
    }
}

/// Options of the hybrid estimator.
#[derive(Debug, Clone, Default)]
pub struct HybridRotationOptions {
    pub initializer: InitializerType,
    pub irls: IrlsRefinerOptions,
}

/// Runs a global estimator for the initialization and hands its result,
/// together with the already-built view index and sparse system, to the
/// IRLS refiner.
///
/// There is no fallback: if the chosen initializer fails, the error is
/// propagated and the refiner never runs. The caller picks the composition
/// explicitly.
pub struct HybridRotationEstimator {
    options: HybridRotationOptions,
}

impl HybridRotationEstimator {
    pub fn new(options: HybridRotationOptions) -> Self {
        Self { options }
    }
}

impl RotationEstimator for HybridRotationEstimator {
    fn estimate_rotations(
        &mut self,
        view_pairs: &HashMap<ViewIdPair, TwoViewGeometry>,
        global_rotations: &mut HashMap<ViewId, Vector3<f64>>,
    ) -> EstimatorResult<()> {
        validate_input(view_pairs, global_rotations)?;

        let view_index = ViewIndex::from_view_pairs(view_pairs);
        let system = RelativeRotationSystem::build(view_pairs, &view_index)?;

        match &self.options.initializer {
            InitializerType::L1(l1_options) => {
                info!("hybrid estimation: L1 initialization");
                let mut initializer = L1RotationGlobalEstimator::new(l1_options.clone());
                initializer.set_view_index(view_index.clone());
                initializer.set_sparse_system(system.clone());
                initializer.estimate_rotations(view_pairs, global_rotations)?;
            }
            InitializerType::LagrangeDual(sdp_options) => {
                info!("hybrid estimation: Lagrange-dual initialization");
                let mut initializer = LagrangeDualRotationEstimator::new(sdp_options.clone());
                initializer.set_view_index(view_index.clone());
                initializer.estimate_rotations(view_pairs, global_rotations)?;
            }
        }

        info!("hybrid estimation: IRLS refinement");
        let mut refiner = IrlsRotationLocalRefiner::new(self.options.irls.clone());
        refiner.set_view_index(view_index);
        refiner.set_sparse_system(system);
        refiner.estimate_rotations(view_pairs, global_rotations)
    }
}
