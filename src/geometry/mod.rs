//! Geometric primitives for rotation averaging.
//!
//! All estimator state is kept in axis-angle form (a 3-vector whose direction
//! is the rotation axis and whose magnitude is the angle in radians).
//! Conversions to 3x3 rotation matrices are scoped to the places that
//! assemble block matrices.

pub mod rotation;

pub use rotation::{
    angular_distance, inverse, multiply, normalize, project_to_rotation, to_angle_axis,
    to_rotation_matrix,
};
