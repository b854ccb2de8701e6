use crate::{ImagePair, Reconstruction, SfmError, SfmSettings};
use arrsac::Arrsac;
use log::{debug, info, warn};
use rand::RngCore;
use sfm_core::{
    sample_consensus::{Consensus, Estimator},
    CameraIntrinsics, CorrespondenceStore, FeatureMatch, KeyPoint, Pose, TrackName,
    WorldToCamera,
};
use sfm_geom::{EightPoint, EssentialMatrix, FivePoint, LinearEigenTriangulator};

/// Creates a reconstruction from the relative pose of two images.
///
/// The first image is placed at the origin and the second one unit away from it. Every name
/// consistent with the essential matrix is triangulated and kept if it reprojects within
/// `max_reprojection_error` pixels in both images.
pub fn initialize<R>(
    store: &CorrespondenceStore,
    intrinsics: CameraIntrinsics,
    pair: ImagePair,
    settings: &SfmSettings,
    rng: &mut R,
) -> Result<Reconstruction, SfmError>
where
    R: RngCore,
{
    let image_id = |image| {
        store
            .image(image)
            .map(|info| info.id.clone())
            .ok_or_else(|| SfmError::UnknownImage(format!("#{}", image).into()))
    };
    let id_b = image_id(pair.b)?;
    image_id(pair.a)?;

    let common: Vec<(TrackName, KeyPoint, KeyPoint)> = store
        .common_points(pair.a, pair.b)
        .map(|(name, a, b)| (name.clone(), a, b))
        .collect();
    if common.len() < settings.min_common_points {
        return Err(SfmError::InsufficientCorrespondences {
            found: common.len(),
            required: settings.min_common_points,
        });
    }

    let matches: Vec<FeatureMatch> = common
        .iter()
        .map(|&(_, a, b)| FeatureMatch(intrinsics.calibrate(a), intrinsics.calibrate(b)))
        .collect();

    info!("estimate essential on {} matches", matches.len());
    let threshold = intrinsics.pixels_to_normalized(settings.essential_threshold);
    let mut consensus = estimate_essential(&FivePoint, &matches, threshold, settings, &mut *rng);
    let found = consensus.as_ref().map_or(0, |(_, inliers)| inliers.len());
    if found < settings.min_inliers_for_camera && matches.len() >= 8 {
        info!(
            "five-point consensus found {} inliers, trying the eight-point solver",
            found
        );
        let fallback =
            estimate_essential(&EightPoint::new(), &matches, threshold, settings, &mut *rng);
        if fallback.as_ref().map_or(0, |(_, inliers)| inliers.len()) > found {
            consensus = fallback;
        }
    }

    let (essential, inliers) = match consensus {
        Some((essential, inliers)) if inliers.len() >= settings.min_inliers_for_camera => {
            (essential, inliers)
        }
        consensus => {
            let inliers = consensus.map_or(0, |(_, inliers)| inliers.len());
            info!(
                "only found {} essential inliers, but needed {}",
                inliers, settings.min_inliers_for_camera
            );
            return Err(SfmError::PoseRecovery {
                image: id_b,
                inliers,
                required: settings.min_inliers_for_camera,
            });
        }
    };

    info!("perform chirality test on {} matches", inliers.len());
    let triangulator = LinearEigenTriangulator::new();
    let inlier_matches: Vec<FeatureMatch> = inliers.iter().map(|&ix| matches[ix]).collect();
    let (relative, in_front) = essential
        .recover_pose(&inlier_matches, &triangulator, 1e-12, 1000)
        .ok_or_else(|| SfmError::PoseRecovery {
            image: id_b.clone(),
            inliers: 0,
            required: settings.min_inliers_for_camera,
        })?;
    info!(
        "chirality test passed for {} of {} matches",
        in_front,
        inlier_matches.len()
    );

    let mut reconstruction = Reconstruction::new(intrinsics);
    let pose_a = WorldToCamera::identity();
    let pose_b = relative.to_world_to_camera();
    let (camera_a, camera_b) = match (
        reconstruction.add_camera(pair.a, pose_a),
        reconstruction.add_camera(pair.b, pose_b),
    ) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(SfmError::NotEnoughImages { found: 1 }),
    };

    for &ix in &inliers {
        let (ref name, ka, kb) = common[ix];
        let FeatureMatch(na, nb) = matches[ix];
        let point = match triangulator.triangulate_observations(&[(pose_a, na), (pose_b, nb)]) {
            Some(point) => point,
            None => {
                debug!("could not triangulate {}", name);
                continue;
            }
        };
        let error_a = intrinsics.reprojection_error(pose_a, point, ka);
        let error_b = intrinsics.reprojection_error(pose_b, point, kb);
        if error_a < settings.max_reprojection_error && error_b < settings.max_reprojection_error {
            reconstruction.add_point(name.clone(), point, [(camera_a, ka), (camera_b, kb)]);
        } else {
            debug!(
                "rejected {} with reprojection errors {} and {}",
                name, error_a, error_b
            );
        }
    }

    if reconstruction.num_points() == 0 {
        warn!("the initial image pair did not produce any points");
    }
    info!(
        "initialized reconstruction with {} points",
        reconstruction.num_points()
    );
    Ok(reconstruction)
}

/// Essential matrix consensus, drawing at most `essential_max_iterations` hypotheses.
fn estimate_essential<E, R>(
    estimator: &E,
    matches: &[FeatureMatch],
    threshold: f64,
    settings: &SfmSettings,
    rng: &mut R,
) -> Option<(EssentialMatrix, Vec<usize>)>
where
    E: Estimator<FeatureMatch, Model = EssentialMatrix>,
    R: RngCore,
{
    if matches.len() < E::MIN_SAMPLES {
        return None;
    }
    Arrsac::new(threshold, rng)
        .max_candidate_hypotheses(settings.essential_max_iterations)
        .model_inliers(estimator, matches.iter().copied())
}
