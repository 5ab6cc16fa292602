//! Axis-angle rotation primitives.
//!
//! Composition `multiply(a, b)` is defined as the axis-angle of the rotation
//! matrix product `R_a * R_b`, and `inverse(a) == -a` for normalized inputs.
//! Every function that returns an axis-angle vector yields the principal
//! representative, with magnitude in `[0, pi]`.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Converts an axis-angle vector to its 3x3 rotation matrix (Rodrigues).
pub fn to_rotation_matrix(angle_axis: &Vector3<f64>) -> Matrix3<f64> {
    UnitQuaternion::from_scaled_axis(*angle_axis)
        .to_rotation_matrix()
        .into_inner()
}

/// Converts a 3x3 rotation matrix to its principal axis-angle vector.
///
/// The input must already be a rotation matrix; use [`project_to_rotation`]
/// first for matrices that are only approximately orthogonal.
pub fn to_angle_axis(matrix: &Matrix3<f64>) -> Vector3<f64> {
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*matrix)).scaled_axis()
}

/// Axis-angle of the composition `R_lhs * R_rhs`.
pub fn multiply(lhs: &Vector3<f64>, rhs: &Vector3<f64>) -> Vector3<f64> {
    (UnitQuaternion::from_scaled_axis(*lhs) * UnitQuaternion::from_scaled_axis(*rhs)).scaled_axis()
}

/// Axis-angle of the inverse rotation.
///
/// Negation is the inverse only for vectors with magnitude at most pi;
/// callers feeding externally supplied rotations should [`normalize`] first.
pub fn inverse(angle_axis: &Vector3<f64>) -> Vector3<f64> {
    -*angle_axis
}

/// Wraps an axis-angle vector of arbitrary magnitude onto its principal
/// representative with magnitude in `[0, pi]`.
pub fn normalize(angle_axis: &Vector3<f64>) -> Vector3<f64> {
    UnitQuaternion::from_scaled_axis(*angle_axis).scaled_axis()
}

/// Geodesic distance (radians) between two rotations in axis-angle form.
pub fn angular_distance(lhs: &Vector3<f64>, rhs: &Vector3<f64>) -> f64 {
    multiply(&inverse(&normalize(lhs)), &normalize(rhs)).norm()
}

/// Projects an arbitrary 3x3 matrix onto the nearest rotation matrix.
///
/// Uses the SVD polar factor; when the orthogonal factor has determinant -1
/// the smallest singular direction is flipped so the result lands in SO(3).
pub fn project_to_rotation(matrix: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = matrix.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };
    let polar = u * v_t;
    if polar.determinant() >= 0.0 {
        return polar;
    }
    let mut u_flipped = u;
    for row in 0..3 {
        u_flipped[(row, 2)] = -u_flipped[(row, 2)];
    }
    u_flipped * v_t
}
