//! Integration tests for the hybrid (initialize-then-refine) estimator.


use std::collections::HashMap;

use apex_rotation::averaging::{
    HybridRotationEstimator, HybridRotationOptions, InitializerType, IrlsRefinerOptions,
    L1RotationOptions, RotationEstimator,
};
use apex_rotation::geometry;
use apex_rotation::solver::{L1SolverOptions, SdpSolverOptions, SdpSolverType};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rotation_test_utils::*;

fn tight_irls() -> IrlsRefinerOptions {
    IrlsRefinerOptions {
        max_num_irls_iterations: 200,
        irls_step_convergence_threshold: 1e-12,
        ..Default::default()
    }
}

fn l1_then_irls() -> HybridRotationOptions {
    HybridRotationOptions {
        initializer: InitializerType::L1(L1RotationOptions {
            max_num_l1_iterations: 20,
            l1_step_convergence_threshold: 1e-8,
            l1_solver: L1SolverOptions {
                max_num_iterations: 2000,
                ..Default::default()
            },
        }),
        irls: tight_irls(),
    }
}

fn sdp_then_irls() -> HybridRotationOptions {
    HybridRotationOptions {
        initializer: InitializerType::LagrangeDual(SdpSolverOptions {
            solver_type: SdpSolverType::RbrBcm,
            max_iterations: 1000,
            tolerance: 1e-10,
            ..Default::default()
        }),
        irls: tight_irls(),
    }
}

/// Complete graph over `num_views` views with seeded ground truth and
/// Gaussian-like angular noise on every edge.
fn noisy_complete_graph(
    num_views: u32,
    noise: f64,
    seed: u64,
) -> (
    HashMap<u32, Vector3<f64>>,
    HashMap<(u32, u32), apex_rotation::averaging::TwoViewGeometry>,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ground_truth = HashMap::from([(0_u32, Vector3::zeros())]);
    for id in 1..num_views {
        ground_truth.insert(id, random_axis_angle(&mut rng, 1.2));
    }
    let edges: Vec<(u32, u32)> = (0..num_views)
        .flat_map(|i| ((i + 1)..num_views).map(move |j| (i, j)))
        .collect();
    let mut view_pairs = consistent_view_pairs(&ground_truth, &edges);
    for geometry_entry in view_pairs.values_mut() {
        geometry_entry.relative_rotation =
            perturb(&mut rng, &geometry_entry.relative_rotation, noise);
    }
    (ground_truth, view_pairs)
}

#[test]
fn test_l1_irls_exact_on_noise_free_chain() {
    let mut rng = StdRng::seed_from_u64(13);
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

    let mut estimator = HybridRotationEstimator::new(l1_then_irls());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    assert!(max_angular_error(&rotations, &ground_truth) < 1e-8);
}

#[test]
fn test_sdp_irls_on_noisy_complete_graph() {
    let (ground_truth, view_pairs) = noisy_complete_graph(6, 1.5_f64.to_radians(), 97);
    let ids: Vec<u32> = (0..6).collect();
    let mut rotations = identity_rotations(&ids);

    let mut estimator = HybridRotationEstimator::new(sdp_then_irls());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    assert!(mean_angular_error(&rotations, &ground_truth) < 1.0_f64.to_radians());
}

#[test]
fn test_l1_irls_on_noisy_complete_graph() {
    let (ground_truth, view_pairs) = noisy_complete_graph(6, 1.5_f64.to_radians(), 53);
    let ids: Vec<u32> = (0..6).collect();
    let mut rotations = identity_rotations(&ids);

    let mut estimator = HybridRotationEstimator::new(l1_then_irls());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    assert!(mean_angular_error(&rotations, &ground_truth) < 1.0_f64.to_radians());
}

#[test]
fn test_gauge_shift_on_noise_free_graph() {
    // Composing every initial rotation with a fixed gauge rotation moves
    // every output by exactly that rotation on a consistent graph.
    let mut rng = StdRng::seed_from_u64(61);
    let mut ground_truth = HashMap::from([(0_u32, Vector3::zeros())]);
    for id in 1..5_u32 {
        ground_truth.insert(id, random_axis_angle(&mut rng, 0.8));
    }
    let edges: Vec<(u32, u32)> = (0..5)
        .flat_map(|i| ((i + 1)..5).map(move |j| (i, j)))
        .collect();
    let view_pairs = consistent_view_pairs(&ground_truth, &edges);
    let ids: Vec<u32> = (0..5).collect();

    let mut baseline = identity_rotations(&ids);
    HybridRotationEstimator::new(l1_then_irls())
        .estimate_rotations(&view_pairs, &mut baseline)
        .unwrap();

    let gauge = Vector3::new(0.0, 60.0_f64.to_radians(), 0.0);
    let mut shifted: HashMap<u32, Vector3<f64>> =
        ids.iter().map(|&id| (id, gauge)).collect();
    HybridRotationEstimator::new(l1_then_irls())
        .estimate_rotations(&view_pairs, &mut shifted)
        .unwrap();

    for id in 0..5 {
        let expected = geometry::multiply(&baseline[&id], &gauge);
        assert!(geometry::angular_distance(&shifted[&id], &expected) < 1e-8);
    }
}

#[test]
fn test_gauge_shift_approximate_on_noisy_graph() {
    let (_, view_pairs) = noisy_complete_graph(5, 1.0_f64.to_radians(), 71);
    let ids: Vec<u32> = (0..5).collect();

    let mut baseline = identity_rotations(&ids);
    HybridRotationEstimator::new(l1_then_irls())
        .estimate_rotations(&view_pairs, &mut baseline)
        .unwrap();

    let gauge = Vector3::new(0.0, 60.0_f64.to_radians(), 0.0);
    let mut shifted: HashMap<u32, Vector3<f64>> =
        ids.iter().map(|&id| (id, gauge)).collect();
    HybridRotationEstimator::new(l1_then_irls())
        .estimate_rotations(&view_pairs, &mut shifted)
        .unwrap();

    for id in 0..5 {
        let expected = geometry::multiply(&baseline[&id], &gauge);
        assert!(geometry::angular_distance(&shifted[&id], &expected) < 5e-3);
    }
}

#[test]
fn test_outputs_stay_in_principal_ball() {
    let (_, view_pairs) = noisy_complete_graph(6, 2.0_f64.to_radians(), 83);
    let ids: Vec<u32> = (0..6).collect();
    let mut rotations = identity_rotations(&ids);

    let mut estimator = HybridRotationEstimator::new(sdp_then_irls());
    estimator
        .estimate_rotations(&view_pairs, &mut rotations)
        .unwrap();

    for rotation in rotations.values() {
        assert!(rotation.norm() <= std::f64::consts::PI + 1e-9);
    }
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let (_, view_pairs) = noisy_complete_graph(5, 1.0_f64.to_radians(), 29);
    let ids: Vec<u32> = (0..5).collect();

    let mut first = identity_rotations(&ids);
    HybridRotationEstimator::new(sdp_then_irls())
        .estimate_rotations(&view_pairs, &mut first)
        .unwrap();
    let mut second = identity_rotations(&ids);
    HybridRotationEstimator::new(sdp_then_irls())
        .estimate_rotations(&view_pairs, &mut second)
        .unwrap();

    for id in 0..5 {
        assert_eq!(first[&id], second[&id]);
    }
}
