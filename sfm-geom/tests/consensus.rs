use approx::assert_relative_eq;
use arrsac::Arrsac;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use sfm_core::nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, Translation, Vector3};
use sfm_core::sample_consensus::{Consensus, Model};
use sfm_core::{
    CameraPoint, CameraToCamera, FeatureMatch, FeatureWorldMatch, NormalizedKeyPoint, Pose,
    WorldPoint,
};
use sfm_geom::{EssentialMatrix, FivePoint, LambdaTwist};

const EPSILON_APPROX: f64 = 1e-6;

#[test]
fn arrsac_lambda_twist() {
    let mut arrsac = Arrsac::new(0.01, Xoshiro256PlusPlus::seed_from_u64(0));

    let camera_depth_points = [
        [-0.228_125, -0.061_458_334, 1.0],
        [0.418_75, -0.581_25, 2.0],
        [1.128_125, 0.878_125, 3.0],
        [-0.528_125, 0.178_125, 2.5],
        [-0.923_424, -0.235_125, 2.8],
    ]
    .map(Point3::from);

    let rot = Rotation3::from_euler_angles(0.1, 0.2, 0.3);
    let trans = Translation::from(Vector3::new(0.1, 0.2, 0.3));
    let pose = IsometryMatrix3::from_parts(trans, rot);

    let samples: Vec<FeatureWorldMatch> = camera_depth_points
        .iter()
        .map(|&p| {
            FeatureWorldMatch(
                NormalizedKeyPoint((p / p.z).xy()),
                WorldPoint(pose.inverse() * p),
            )
        })
        .collect();

    // The extra points pick the single physical pose out of the P3P candidates.
    let estimate = arrsac
        .model(&LambdaTwist::new(), samples.iter().copied())
        .unwrap();

    assert_relative_eq!(rot, estimate.0.rotation, epsilon = EPSILON_APPROX);
    assert_relative_eq!(trans, estimate.0.translation, epsilon = EPSILON_APPROX);
}

#[test]
fn arrsac_degenerate_grid_terminates() {
    let mut arrsac = Arrsac::new(0.01, Xoshiro256PlusPlus::seed_from_u64(0));

    let observed = [
        (0.307_051_214_469_855_7, 0.193_176_680_160_260_52),
        (0.320_846_296_635_367_4, 0.207_417_029_479_130_13),
    ];
    let samples: Vec<FeatureWorldMatch> = [
        (0, [1.0, 1.0]),
        (1, [1.0, 1.5]),
        (0, [3.0, 1.0]),
        (1, [1.0, 2.0]),
        (1, [2.0, 2.0]),
        (0, [3.0, 2.0]),
    ]
    .iter()
    .map(|&(ix, [x, y])| {
        let (u, v) = observed[ix];
        FeatureWorldMatch(NormalizedKeyPoint(Point2::new(u, v)), WorldPoint::new(x, y, 0.0))
    })
    .collect();

    // Contradictory data must not loop forever, whatever model comes out.
    let _ = arrsac.model(&LambdaTwist::new(), samples.iter().copied());
}

#[test]
fn arrsac_five_point_rejects_outliers() {
    let relative = CameraToCamera::from_parts(
        Vector3::new(-0.9, 0.15, 0.1),
        Rotation3::from_euler_angles(0.05, 0.2, -0.02),
    );
    let mut matches: Vec<FeatureMatch> = (0..30)
        .map(|i| {
            let i = i as f64;
            let point = CameraPoint(Point3::new(
                (i * 0.61).sin() * 1.5,
                (i * 1.13).cos(),
                4.0 + (i * 0.29).sin() * 1.5,
            ));
            FeatureMatch(
                point.project().unwrap(),
                relative.transform(point).project().unwrap(),
            )
        })
        .collect();
    // Corrupt every fifth match.
    for m in matches.iter_mut().step_by(5) {
        m.1 = NormalizedKeyPoint(m.1 .0 + Vector3::new(0.2, -0.15, 0.0).xy());
    }

    let mut arrsac =
        Arrsac::new(1e-4, Xoshiro256PlusPlus::seed_from_u64(7)).max_candidate_hypotheses(500);
    let (essential, inliers): (EssentialMatrix, Vec<usize>) = arrsac
        .model_inliers(&FivePoint, matches.iter().copied())
        .unwrap();

    assert_eq!(inliers.len(), 24);
    assert!(inliers.iter().all(|ix| ix % 5 != 0));
    for &ix in &inliers {
        assert!(essential.residual(&matches[ix]) < 1e-4);
    }
}
