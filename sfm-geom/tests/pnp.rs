use arrsac::Arrsac;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use sfm_core::nalgebra::{Rotation3, Vector3};
use sfm_core::sample_consensus::Consensus;
use sfm_core::{FeatureWorldMatch, NormalizedKeyPoint, Pose, WorldPoint, WorldToCamera};
use sfm_geom::{DltPnp, LambdaTwist};

fn truth() -> WorldToCamera {
    WorldToCamera::from_parts(
        Vector3::new(-0.3, 0.2, 7.0),
        Rotation3::from_euler_angles(-0.2, 0.35, 0.1),
    )
}

/// The corners of a 3x3x3 lattice, seen by a camera a few units away.
fn lattice_matches(pose: WorldToCamera) -> Vec<FeatureWorldMatch> {
    let mut matches = vec![];
    for x in [-1.0, 0.0, 1.0] {
        for y in [-1.0, 0.0, 1.0] {
            for z in [-1.0, 0.0, 1.0] {
                let point = WorldPoint::new(x, y, z);
                matches.push(FeatureWorldMatch(
                    pose.transform(point).project().unwrap(),
                    point,
                ));
            }
        }
    }
    matches
}

fn assert_close(estimate: WorldToCamera, truth: WorldToCamera) {
    assert!(estimate.0.rotation.rotation_to(&truth.0.rotation).angle() < 1e-6);
    assert!((estimate.0.translation.vector - truth.0.translation.vector).norm() < 1e-5);
}

#[test]
fn dlt_recovers_lattice_pose() {
    let pose = truth();
    let estimate = DltPnp::new()
        .from_matches(lattice_matches(pose).into_iter())
        .unwrap();
    assert_close(estimate, pose);
}

#[test]
fn dlt_arrsac_rejects_outliers() {
    let pose = truth();
    let mut matches = lattice_matches(pose);
    for m in matches.iter_mut().step_by(6) {
        m.0 = NormalizedKeyPoint(m.0 .0 + Vector3::new(0.05, 0.04, 0.0).xy());
    }

    let mut arrsac =
        Arrsac::new(1e-4, Xoshiro256PlusPlus::seed_from_u64(3)).max_candidate_hypotheses(300);
    let (_, inliers) = arrsac
        .model_inliers(&DltPnp::new(), matches.iter().copied())
        .unwrap();
    assert!(inliers.iter().all(|ix| ix % 6 != 0));
    assert_eq!(inliers.len(), 27 - 5);

    let refit = DltPnp::new()
        .from_matches(inliers.iter().map(|&ix| matches[ix]))
        .unwrap();
    assert_close(refit, pose);
}

#[test]
fn lambda_twist_arrsac_with_four_points() {
    let pose = truth();
    let matches: Vec<_> = lattice_matches(pose)
        .into_iter()
        .filter(|m| m.1 .0.z == 1.0 && m.1 .0.x != 0.0 && m.1 .0.y != 0.0)
        .collect();
    assert_eq!(matches.len(), 4);

    let mut arrsac = Arrsac::new(1e-6, Xoshiro256PlusPlus::seed_from_u64(0));
    let (estimate, inliers) = arrsac
        .model_inliers(&LambdaTwist::new(), matches.iter().copied())
        .unwrap();
    assert_eq!(inliers.len(), 4);
    assert_close(estimate, pose);
}
