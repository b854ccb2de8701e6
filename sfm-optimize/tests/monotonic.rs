use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use sfm_core::nalgebra::{Rotation3, Vector3};
use sfm_core::{CameraIntrinsics, Pose, WorldPoint, WorldToCamera};
use sfm_optimize::{BundleAdjuster, Observation};

struct Scene {
    intrinsics: CameraIntrinsics,
    poses: Vec<WorldToCamera>,
    points: Vec<WorldPoint>,
    observations: Vec<Observation>,
}

/// Three cameras looking at a cloud around the origin from about six units away.
fn scene() -> Scene {
    let intrinsics = CameraIntrinsics::estimate(1000, 800, 1.2);
    let poses: Vec<WorldToCamera> = [-0.3f64, 0.0, 0.3]
        .iter()
        .map(|&yaw| {
            let rotation = Rotation3::from_euler_angles(0.0, yaw, 0.0);
            WorldToCamera::from_parts(Vector3::new(0.0, 0.0, 6.0), rotation)
        })
        .collect();
    let points: Vec<WorldPoint> = (0..15)
        .map(|i| {
            let i = i as f64;
            WorldPoint::new((i * 0.83).sin(), (i * 1.31).cos(), (i * 0.57).sin() * 0.9)
        })
        .collect();
    let mut observations = vec![];
    for (camera, &pose) in poses.iter().enumerate() {
        for (point, &world) in points.iter().enumerate() {
            observations.push(Observation {
                camera,
                point,
                keypoint: intrinsics.project(pose, world).unwrap(),
            });
        }
    }
    Scene {
        intrinsics,
        poses,
        points,
        observations,
    }
}

fn perturbed(scene: &Scene, seed: u64) -> (Vec<WorldToCamera>, Vec<WorldPoint>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let poses = scene
        .poses
        .iter()
        .map(|pose| {
            let delta = Rotation3::new(Vector3::new(
                rng.gen_range(-0.01..0.01),
                rng.gen_range(-0.01..0.01),
                rng.gen_range(-0.01..0.01),
            ));
            let shift = Vector3::new(
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
                rng.gen_range(-0.05..0.05),
            );
            WorldToCamera::from_parts(pose.0.translation.vector + shift, delta * pose.0.rotation)
        })
        .collect();
    let points = scene
        .points
        .iter()
        .map(|point| {
            WorldPoint(
                point.0
                    + Vector3::new(
                        rng.gen_range(-0.05..0.05),
                        rng.gen_range(-0.05..0.05),
                        rng.gen_range(-0.05..0.05),
                    ),
            )
        })
        .collect();
    (poses, points)
}

#[test]
fn exact_scene_stays_put() {
    let scene = scene();
    let adjustment = BundleAdjuster::new(
        scene.intrinsics,
        scene.poses.clone(),
        scene.points.clone(),
        scene.observations.clone(),
    )
    .solve();
    assert!(adjustment.report.initial_cost < 1e-12);
    assert!(adjustment.report.final_cost <= adjustment.report.initial_cost);
}

#[test]
fn cost_never_increases() {
    let scene = scene();
    for seed in 0..4 {
        let (poses, points) = perturbed(&scene, seed);
        let adjustment =
            BundleAdjuster::new(scene.intrinsics, poses, points, scene.observations.clone())
                .solve();
        let report = &adjustment.report;
        assert!(report.initial_cost > 1.0);
        assert!(report.final_cost <= report.initial_cost);
        assert!(report.final_cost < 1e-3 * report.initial_cost, "{:?}", report);
    }
}

#[test]
fn reprojection_error_is_small_after_adjustment() {
    let scene = scene();
    let (poses, points) = perturbed(&scene, 11);
    let adjustment = BundleAdjuster::new(scene.intrinsics, poses, points, scene.observations.clone())
        .max_evaluations(1000)
        .max_iterations(1000)
        .solve();
    for observation in &scene.observations {
        let error = scene.intrinsics.reprojection_error(
            adjustment.poses[observation.camera],
            adjustment.points[observation.point],
            observation.keypoint,
        );
        assert!(error < 0.5, "error {}", error);
    }
}

#[test]
fn capped_run_keeps_best_parameters() {
    let scene = scene();
    let (poses, points) = perturbed(&scene, 5);
    let adjustment = BundleAdjuster::new(scene.intrinsics, poses, points, scene.observations.clone())
        .max_evaluations(2)
        .solve();
    let report = &adjustment.report;
    assert!(!report.converged);
    assert!(report.final_cost <= report.initial_cost);

    // The returned parameters are the ones the final cost was measured at.
    let cost: f64 = scene
        .observations
        .iter()
        .map(|observation| {
            let error = scene.intrinsics.reprojection_error(
                adjustment.poses[observation.camera],
                adjustment.points[observation.point],
                observation.keypoint,
            );
            0.5 * error * error
        })
        .sum();
    assert!((cost - report.final_cost).abs() <= 1e-6 * report.initial_cost);
}

#[test]
fn observations_of_missing_points_are_dropped() {
    let scene = scene();
    let mut observations = scene.observations.clone();
    observations.push(Observation {
        camera: 0,
        point: scene.points.len(),
        keypoint: observations[0].keypoint,
    });
    let adjustment = BundleAdjuster::new(scene.intrinsics, scene.poses.clone(), scene.points.clone(), observations)
        .solve();
    assert_eq!(adjustment.points.len(), scene.points.len());
    assert!(adjustment.report.final_cost < 1e-12);
}

#[test]
fn fixed_camera_keeps_its_pose() {
    let scene = scene();
    let (mut poses, points) = perturbed(&scene, 2);
    poses[0] = scene.poses[0];
    let adjustment = BundleAdjuster::new(scene.intrinsics, poses, points, scene.observations.clone())
        .fix_camera(0)
        .max_evaluations(1000)
        .max_iterations(1000)
        .solve();

    assert_eq!(adjustment.poses[0], scene.poses[0]);
    assert_ne!(adjustment.poses[1], scene.poses[1]);
    let report = &adjustment.report;
    assert!(report.final_cost < 1e-3 * report.initial_cost, "{:?}", report);
}
