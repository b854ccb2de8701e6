use crate::{CameraKey, PointKey, Reconstruction, SfmError, SfmSettings};
use arrsac::Arrsac;
use log::{debug, info};
use rand::RngCore;
use sfm_core::{
    sample_consensus::{Consensus, Estimator, Model},
    CorrespondenceStore, FeatureWorldMatch, ImageIndex, KeyPoint, WorldToCamera,
};
use sfm_geom::{DltPnp, LambdaTwist};

/// The outcome of a successful resection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resection {
    pub camera: CameraKey,
    pub inliers: usize,
}

/// Registers an image by estimating its pose from the reconstructed points it observes.
///
/// The linear solver is tried first and refit on its inliers. If it doesn't reach
/// `min_inliers_for_camera` inliers, P3P consensus is tried. Only the inliers of the
/// winning pose are recorded as observations of the new camera.
///
/// An image that already has a camera is left as it is.
pub fn resect<R>(
    reconstruction: &mut Reconstruction,
    store: &CorrespondenceStore,
    image: ImageIndex,
    settings: &SfmSettings,
    rng: &mut R,
) -> Result<Resection, SfmError>
where
    R: RngCore,
{
    let id = store
        .image(image)
        .map(|info| info.id.clone())
        .ok_or_else(|| SfmError::UnknownImage(format!("#{}", image).into()))?;
    if let Some(camera) = reconstruction.image_camera(image) {
        return Ok(Resection { camera, inliers: 0 });
    }
    let intrinsics = reconstruction.intrinsics();

    let known: Vec<(PointKey, KeyPoint, FeatureWorldMatch)> = store
        .image_points(image)
        .filter_map(|(name, keypoint)| {
            let point = reconstruction.named_point(name)?;
            let position = reconstruction.point(point)?.position;
            Some((
                point,
                keypoint,
                FeatureWorldMatch(intrinsics.calibrate(keypoint), position),
            ))
        })
        .collect();
    if known.len() < settings.min_points_for_resection {
        info!(
            "image {} observes {} reconstructed points, but needs {}",
            id,
            known.len(),
            settings.min_points_for_resection
        );
        return Err(SfmError::InsufficientPnPCorrespondences {
            image: id,
            found: known.len(),
            required: settings.min_points_for_resection,
        });
    }

    let matches: Vec<FeatureWorldMatch> = known.iter().map(|&(_, _, m)| m).collect();
    let threshold = intrinsics.pixels_to_normalized(settings.pnp_threshold);
    let inliers_of = |pose: &WorldToCamera| -> Vec<usize> {
        matches
            .iter()
            .enumerate()
            .filter(|(_, m)| pose.residual(m) < threshold)
            .map(|(ix, _)| ix)
            .collect()
    };

    let mut best: Option<(WorldToCamera, Vec<usize>)> = None;
    if matches.len() >= 6 {
        let linear = estimate_pose(
            &DltPnp::new(),
            &matches,
            threshold,
            settings.pnp_max_iterations,
            &mut *rng,
        );
        if let Some((pose, inliers)) = linear {
            debug!("linear resection found {} inliers", inliers.len());
            let refit = DltPnp::new()
                .from_matches(inliers.iter().map(|&ix| matches[ix]))
                .map(|pose| {
                    let inliers = inliers_of(&pose);
                    (pose, inliers)
                })
                .filter(|(_, refit_inliers)| refit_inliers.len() >= inliers.len());
            best = Some(refit.unwrap_or((pose, inliers)));
        }
    }

    let found = best.as_ref().map_or(0, |(_, inliers)| inliers.len());
    if found < settings.min_inliers_for_camera {
        info!(
            "linear resection of image {} found {} inliers, trying P3P",
            id, found
        );
        let minimal = estimate_pose(
            &LambdaTwist::new(),
            &matches,
            threshold,
            settings.pnp_fallback_max_iterations,
            &mut *rng,
        );
        if let Some((pose, inliers)) = minimal {
            debug!("P3P resection found {} inliers", inliers.len());
            if inliers.len() > found {
                best = Some((pose, inliers));
            }
        }
    }

    let (pose, inliers) = match best {
        Some((pose, inliers)) if inliers.len() >= settings.min_inliers_for_camera => {
            (pose, inliers)
        }
        best => {
            let inliers = best.map_or(0, |(_, inliers)| inliers.len());
            info!(
                "image {} has {} resection inliers, but needs {}",
                id, inliers, settings.min_inliers_for_camera
            );
            return Err(SfmError::PoseRecovery {
                image: id,
                inliers,
                required: settings.min_inliers_for_camera,
            });
        }
    };

    let camera = reconstruction
        .add_camera(image, pose)
        .ok_or_else(|| SfmError::UnknownImage(id.clone()))?;
    for &ix in &inliers {
        let (point, keypoint, _) = known[ix];
        reconstruction.add_observation(point, camera, keypoint);
    }
    info!(
        "registered image {} with {} of {} points as inliers",
        id,
        inliers.len(),
        known.len()
    );
    Ok(Resection {
        camera,
        inliers: inliers.len(),
    })
}

fn estimate_pose<E, R>(
    estimator: &E,
    matches: &[FeatureWorldMatch],
    threshold: f64,
    max_hypotheses: usize,
    rng: &mut R,
) -> Option<(WorldToCamera, Vec<usize>)>
where
    E: Estimator<FeatureWorldMatch, Model = WorldToCamera>,
    R: RngCore,
{
    if matches.len() < E::MIN_SAMPLES {
        return None;
    }
    Arrsac::new(threshold, rng)
        .max_candidate_hypotheses(max_hypotheses)
        .model_inliers(estimator, matches.iter().copied())
}
