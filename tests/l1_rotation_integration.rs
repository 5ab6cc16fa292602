//! Integration tests for the L1 global rotation estimator.


use std::collections::HashMap;

use apex_rotation::averaging::{
    L1RotationGlobalEstimator, L1RotationOptions, RotationEstimator, TwoViewGeometry,
};
use apex_rotation::geometry;
use apex_rotation::solver::L1SolverOptions;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rotation_test_utils::*;

fn tight_options() -> L1RotationOptions {
    L1RotationOptions {
        max_num_l1_iterations: 50,
        l1_step_convergence_threshold: 1e-12,
        l1_solver: L1SolverOptions {
            max_num_iterations: 5000,
            absolute_tolerance: 1e-10,
            relative_tolerance: 1e-12,
            ..Default::default()
        },
    }
}

#[test]
fn test_consistent_triangle_about_x_axis() {
    let ground_truth = HashMap::from([
        (0, Vector3::zeros()),
        (1, Vector3::new(30.0_f64.to_radians(), 0.0, 0.0)),
        (2, Vector3::new(75.0_f64.to_radians(), 0.0, 0.0)),
    ]);
    let view_pairs = consistent_view_pairs(&ground_truth, &[(0, 1), (1, 2), (0, 2)]);
    let mut rotations = identity_rotations(&[0, 1, 2]);

    let mut estimator = L1RotationGlobalEstimator::new(tight_options());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    assert!(max_angular_error(&rotations, &ground_truth) < 1e-6);
}

#[test]
fn test_chain_of_ten_views() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut ground_truth = HashMap::from([(0_u32, Vector3::zeros())]);
    let mut edges = Vec::new();
    for i in 1..10_u32 {
        let step = random_axis_angle(&mut rng, 10.0_f64.to_radians());
        let previous = ground_truth[&(i - 1)];
        ground_truth.insert(i, geometry::multiply(&step, &previous));
        edges.push((i - 1, i));
    }
    let view_pairs = consistent_view_pairs(&ground_truth, &edges);
    let ids: Vec<u32> = (0..10).collect();
    let mut rotations = identity_rotations(&ids);

    let mut estimator = L1RotationGlobalEstimator::new(tight_options());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    assert!(max_angular_error(&rotations, &ground_truth) < 1e-6);
}

#[test]
fn test_star_graph_recovers_leaves() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut ground_truth = HashMap::from([(0_u32, Vector3::zeros())]);
    let mut edges = Vec::new();
    for leaf in 1..=5_u32 {
        ground_truth.insert(leaf, random_axis_angle(&mut rng, 0.8));
        edges.push((0, leaf));
    }
    let view_pairs = consistent_view_pairs(&ground_truth, &edges);
    let ids: Vec<u32> = (0..=5).collect();
    let mut rotations = identity_rotations(&ids);

    let mut estimator = L1RotationGlobalEstimator::new(tight_options());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    assert!(max_angular_error(&rotations, &ground_truth) < 1e-8);
}

#[test]
fn test_anchor_rotation_bit_identical() {
    let anchor_initial = Vector3::new(0.12, -0.05, 0.3);
    let ground_truth = HashMap::from([
        (0, Vector3::zeros()),
        (1, Vector3::new(0.0, 0.4, 0.0)),
        (2, Vector3::new(0.0, 0.9, 0.0)),
    ]);
    let view_pairs = consistent_view_pairs(&ground_truth, &[(0, 1), (1, 2), (0, 2)]);
    let mut rotations = identity_rotations(&[0, 1, 2]);
    rotations.insert(0, anchor_initial);

    let mut estimator = L1RotationGlobalEstimator::new(tight_options());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    assert_eq!(rotations[&0], anchor_initial);
}

#[test]
fn test_identity_graph_is_idempotent() {
    let view_pairs: HashMap<_, _> = [(0_u32, 1_u32), (1, 2), (0, 2)]
        .into_iter()
        .map(|pair| (pair, TwoViewGeometry::default()))
        .collect();
    let mut rotations = identity_rotations(&[0, 1, 2]);

    let mut estimator = L1RotationGlobalEstimator::new(tight_options());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    for id in 0..3 {
        assert!(rotations[&id].norm() < 1e-10);
    }
}

#[test]
fn test_inconsistent_triangle_keeps_majority() {
    // Two edges agree with a 30/75 degree x-axis chain, the third is off by
    // 5 degrees. The L1 optimum satisfies the consistent majority.
    let ground_truth = HashMap::from([
        (0, Vector3::zeros()),
        (1, Vector3::new(30.0_f64.to_radians(), 0.0, 0.0)),
        (2, Vector3::new(75.0_f64.to_radians(), 0.0, 0.0)),
    ]);
    let mut view_pairs = consistent_view_pairs(&ground_truth, &[(0, 1), (1, 2), (0, 2)]);
    view_pairs.insert(
        (0, 2),
        TwoViewGeometry {
            relative_rotation: Vector3::new(70.0_f64.to_radians(), 0.0, 0.0),
            visibility_score: 1,
        },
    );
    let mut rotations = identity_rotations(&[0, 1, 2]);

    let initial_residual = total_squared_residual(&view_pairs, &rotations);
    let mut estimator = L1RotationGlobalEstimator::new(tight_options());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    let final_residual = total_squared_residual(&view_pairs, &rotations);
    assert!(final_residual < initial_residual);

    // The optimal L1 cost concentrates the whole 5 degree cycle error; no
    // view strays further than that from the consistent chain.
    let l1_cost: f64 = view_pairs
        .iter()
        .map(|(&(i, j), geometry_entry)| {
            geometry::multiply(
                &geometry::inverse(&rotations[&j]),
                &geometry::multiply(&geometry_entry.relative_rotation, &rotations[&i]),
            )
            .norm()
        })
        .sum();
    assert!(l1_cost < 5.2_f64.to_radians());
    assert!(geometry::angular_distance(&rotations[&1], &ground_truth[&1]) < 5.5_f64.to_radians());
    assert!(geometry::angular_distance(&rotations[&2], &ground_truth[&2]) < 5.5_f64.to_radians());
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let mut rng = StdRng::seed_from_u64(23);
    let ground_truth: HashMap<u32, Vector3<f64>> = (0..5)
        .map(|id| {
            let rotation = if id == 0 {
                Vector3::zeros()
            } else {
                random_axis_angle(&mut rng, 0.6)
            };
            (id, rotation)
        })
        .collect();
    let edges: Vec<(u32, u32)> = (0..5)
        .flat_map(|i| ((i + 1)..5).map(move |j| (i, j)))
        .collect();
    let view_pairs = consistent_view_pairs(&ground_truth, &edges);
    let ids: Vec<u32> = (0..5).collect();

    let mut first = identity_rotations(&ids);
    L1RotationGlobalEstimator::new(tight_options())
        .estimate_rotations(&view_pairs, &mut first)
        .unwrap();
    let mut second = identity_rotations(&ids);
    L1RotationGlobalEstimator::new(tight_options())
        .estimate_rotations(&view_pairs, &mut second)
        .unwrap();

    for id in 0..5 {
        assert_eq!(first[&id], second[&id]);
    }
}
