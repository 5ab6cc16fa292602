//! # Apex Rotation
//!
//! A Rust library for global rotation averaging, the stage of a
//! structure-from-motion pipeline that turns noisy pairwise relative
//! rotations into a globally consistent set of absolute camera orientations.
//!
//! ## Features
//!
//! - **Robust L1 initialization**: cycle-residual minimization through an
//!   ADMM least-absolute-deviations solver with a single cached Cholesky
//!   factorization
//! - **IRLS refinement**: reweighted least squares on the rotation manifold
//!   with a fixed-pattern sparse system reused across iterations
//! - **Lagrange-dual estimation**: the chordal-distance semidefinite
//!   relaxation with three interchangeable backends (row-by-row BCM,
//!   rank-restricted BCM, Riemannian staircase) and an a-posteriori error
//!   bound from the view graph's algebraic connectivity
//! - **Hybrid driver**: L1 or SDP initialization composed with IRLS
//!   refinement over one shared sparse system
//! - **High performance**: sparse linear algebra on the faer library,
//!   data-parallel reweighting through rayon
//!
//! ## Conventions
//!
//! Rotations travel as axis-angle 3-vectors. An edge `(i, j)` carries the
//! rotation taking view `i`'s frame to view `j`'s frame, so a consistent
//! graph satisfies `R_j = R_ij * R_i`. The view with the smallest id is the
//! gauge anchor and is never modified.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use nalgebra::Vector3;
//! use apex_rotation::averaging::{
//!     RotationEstimator, HybridRotationEstimator, HybridRotationOptions, TwoViewGeometry,
//! };
//!
//! let view_pairs = HashMap::from([(
//!     (0u32, 1u32),
//!     TwoViewGeometry {
//!         relative_rotation: Vector3::new(0.0, 0.0, 0.3),
//!         visibility_score: 25,
//!     },
//! )]);
//! let mut rotations = HashMap::from([(0, Vector3::zeros()), (1, Vector3::zeros())]);
//!
//! let mut estimator = HybridRotationEstimator::new(HybridRotationOptions::default());
//! estimator.estimate_rotations(&view_pairs, &mut rotations).unwrap();
//! assert!((rotations[&1].z - 0.3).abs() < 1e-6);
//! ```

pub mod averaging;
pub mod error;
pub mod geometry;
pub mod linalg;
pub mod logger;
pub mod solver;

pub use averaging::{
    HybridRotationEstimator, HybridRotationOptions, InitializerType, IrlsRefinerOptions,
    IrlsRotationLocalRefiner, L1RotationGlobalEstimator, L1RotationOptions,
    LagrangeDualRotationEstimator, RelativeRotationSystem, RotationEstimator, TwoViewGeometry,
    ViewId, ViewIdPair, ViewIndex,
};
pub use error::{RotationError, RotationResult};
pub use logger::{init_logger, init_logger_with_level};
pub use solver::{L1SolverOptions, SdpSolverOptions, SdpSolverType};
