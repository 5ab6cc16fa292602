//! Global rotation averaging over a view graph.
//!
//! Given pairwise relative rotation measurements between views, the
//! estimators in this module recover one absolute orientation per view in a
//! common world frame. The view with the smallest identifier is the gauge
//! anchor: its rotation is never modified, which removes the global
//! rotational degree of freedom.
//!
//! Three estimators are provided, plus a driver composing them:
//! - [`L1RotationGlobalEstimator`]: robust initialization minimizing the sum
//!   of L1 norms of the tangent-space cycle residuals
//! - [`IrlsRotationLocalRefiner`]: iteratively reweighted least squares on
//!   the rotation manifold, polishing an initial estimate
//! - [`LagrangeDualRotationEstimator`]: semidefinite relaxation with an
//!   a-posteriori error bound from the graph Laplacian spectrum
//! - [`HybridRotationEstimator`]: L1 or Lagrange-dual initialization
//!   followed by IRLS refinement, sharing one sparse system

pub mod hybrid;
pub mod irls_refiner;
pub mod l1_estimator;
pub mod lagrange_dual;
pub mod linear_system;
pub mod view_index;

use std::collections::HashMap;

use nalgebra::Vector3;
use thiserror::Error;

use crate::linalg::LinAlgError;
use crate::solver::SolverError;

pub use hybrid::{HybridRotationEstimator, HybridRotationOptions, InitializerType};
pub use irls_refiner::{IrlsRefinerOptions, IrlsRotationLocalRefiner};
pub use l1_estimator::{L1RotationGlobalEstimator, L1RotationOptions};
pub use lagrange_dual::LagrangeDualRotationEstimator;
pub use linear_system::RelativeRotationSystem;
pub use view_index::ViewIndex;

/// Opaque view identifier supplied by the caller.
pub type ViewId = u32;

/// Directed view pair; the edge rotation maps the first view's frame to the
/// second view's frame.
pub type ViewIdPair = (ViewId, ViewId);

/// Relative rotation measurement attached to a view pair.
#[derive(Debug, Clone)]
pub struct TwoViewGeometry {
    /// Axis-angle of the rotation from the first to the second view
    pub relative_rotation: Vector3<f64>,
    /// Number of shared observations backing the measurement (at least 1)
    pub visibility_score: u32,
}

impl Default for TwoViewGeometry {
    fn default() -> Self {
        Self {
            relative_rotation: Vector3::zeros(),
            visibility_score: 1,
        }
    }
}

/// Errors raised by the rotation estimators.
#[derive(Debug, Clone, Error)]
pub enum EstimatorError {
    /// The input graph or rotation map violates the call contract
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A sparse factorization or solve failed
    #[error("linear algebra failure: {0}")]
    LinAlg(#[from] LinAlgError),

    /// A convex solver backend failed
    #[error("solver failure: {0}")]
    Solver(#[from] SolverError),

    /// The worker pool for the parallel weight update could not be built
    #[error("thread pool construction failed: {0}")]
    ThreadPool(String),
}

/// Result type for estimator operations.
pub type EstimatorResult<T> = Result<T, EstimatorError>;

/// Batch interface shared by every rotation estimator.
///
/// `estimate_rotations` updates `global_rotations` in place; every view id
/// appearing in `view_pairs` must already have an entry (zero vectors are a
/// valid cold start). On error the map holds the last successful iterate.
pub trait RotationEstimator {
    fn estimate_rotations(
        &mut self,
        view_pairs: &HashMap<ViewIdPair, TwoViewGeometry>,
        global_rotations: &mut HashMap<ViewId, Vector3<f64>>,
    ) -> EstimatorResult<()>;
}

/// Checks the shared input contract of all estimators.
pub(crate) fn validate_input(
    view_pairs: &HashMap<ViewIdPair, TwoViewGeometry>,
    global_rotations: &HashMap<ViewId, Vector3<f64>>,
) -> EstimatorResult<()> {
    if view_pairs.is_empty() {
        return Err(EstimatorError::InvalidInput(
            "view pair map is empty".to_string(),
        ));
    }
    for ((first, second), geometry) in view_pairs {
        if first == second {
            return Err(EstimatorError::InvalidInput(format!(
                "self edge on view {first}"
            )));
        }
        if geometry.visibility_score == 0 {
            return Err(EstimatorError::InvalidInput(format!(
                "edge ({first}, {second}) has zero visibility score"
            )));
        }
        for id in [first, second] {
            if !global_rotations.contains_key(id) {
                return Err(EstimatorError::InvalidInput(format!(
                    "missing initial rotation for view {id}"
                )));
            }
        }
    }
    let mut ids: Vec<ViewId> = Vec::new();
    for &(first, second) in view_pairs.keys() {
        ids.push(first);
        ids.push(second);
    }
    ids.sort_unstable();
    ids.dedup();
    if ids.len() < 2 {
        return Err(EstimatorError::InvalidInput(
            "rotation averaging needs at least two views".to_string(),
        ));
    }
    Ok(())
}
