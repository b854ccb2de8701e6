use crate::{CameraKey, PointKey, Reconstruction, SfmSettings};
use float_ord::FloatOrd;
use itertools::Itertools;
use log::{debug, info};
use sfm_core::{CorrespondenceStore, KeyPoint, TrackName, WorldPoint};
use sfm_geom::{triangulation_angle, LinearEigenTriangulator};

/// Why a pair of views could not produce a point.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Degenerate {
    /// The rays don't meet at a finite point in front of both cameras.
    NoIntersection,
    /// The angle in degrees between the rays is below the minimum.
    SmallAngle(f64),
    /// The average reprojection error in pixels is above the maximum.
    LargeError(f64),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: WorldPoint,
    error: f64,
    views: [(CameraKey, KeyPoint); 2],
}

struct Triangulation<'a> {
    reconstruction: &'a mut Reconstruction,
    store: &'a CorrespondenceStore,
    settings: &'a SfmSettings,
    triangulator: LinearEigenTriangulator,
}

impl<'a> Triangulation<'a> {
    fn new(
        reconstruction: &'a mut Reconstruction,
        store: &'a CorrespondenceStore,
        settings: &'a SfmSettings,
    ) -> Self {
        Self {
            reconstruction,
            store,
            settings,
            triangulator: LinearEigenTriangulator::new(),
        }
    }

    /// The registered cameras that observe `name`, in image order.
    fn observers(&self, name: &TrackName) -> Vec<(CameraKey, KeyPoint)> {
        self.store
            .track(name)
            .into_iter()
            .flatten()
            .filter_map(|(&image, &keypoint)| {
                Some((self.reconstruction.image_camera(image)?, keypoint))
            })
            .collect()
    }

    fn candidate(
        &self,
        a: (CameraKey, KeyPoint),
        b: (CameraKey, KeyPoint),
    ) -> Result<Candidate, Degenerate> {
        let intrinsics = self.reconstruction.intrinsics();
        let pose = |camera| {
            self.reconstruction
                .camera(camera)
                .map(|camera| camera.pose)
                .ok_or(Degenerate::NoIntersection)
        };
        let (pose_a, pose_b) = (pose(a.0)?, pose(b.0)?);

        let position = self
            .triangulator
            .triangulate_observations(&[
                (pose_a, intrinsics.calibrate(a.1)),
                (pose_b, intrinsics.calibrate(b.1)),
            ])
            .ok_or(Degenerate::NoIntersection)?;

        let angle = triangulation_angle(pose_a, pose_b, position).to_degrees();
        if angle < self.settings.min_triangulation_angle_deg {
            return Err(Degenerate::SmallAngle(angle));
        }

        let error = 0.5
            * (intrinsics.reprojection_error(pose_a, position, a.1)
                + intrinsics.reprojection_error(pose_b, position, b.1));
        if !(error <= self.settings.max_reprojection_error) {
            return Err(Degenerate::LargeError(error));
        }

        Ok(Candidate {
            position,
            error,
            views: [a, b],
        })
    }

    /// Adds the candidate of `pairs` with the lowest error and attaches every other
    /// registered view of the name that agrees with it.
    fn add_best(
        &mut self,
        name: &TrackName,
        pairs: impl Iterator<Item = ((CameraKey, KeyPoint), (CameraKey, KeyPoint))>,
        observers: &[(CameraKey, KeyPoint)],
    ) -> Option<PointKey> {
        let best = pairs
            .filter_map(|(a, b)| match self.candidate(a, b) {
                Ok(candidate) => Some(candidate),
                Err(reason) => {
                    debug!("rejected {} from a pair of views: {:?}", name, reason);
                    None
                }
            })
            .min_by_key(|candidate| FloatOrd(candidate.error))?;

        let point = self
            .reconstruction
            .add_point(name.clone(), best.position, best.views)?;
        for &(camera, keypoint) in observers {
            if self.reconstruction.has_observation(point, camera) {
                continue;
            }
            let error = self
                .reconstruction
                .reprojection_error(best.position, camera, keypoint)
                .unwrap_or(f64::INFINITY);
            if error < self.settings.max_reprojection_error {
                self.reconstruction.add_observation(point, camera, keypoint);
            }
        }
        Some(point)
    }
}

/// Triangulates the names seen by a newly registered camera that have no point yet.
///
/// Each name is triangulated with the new camera and every other registered camera that
/// sees it. Returns the number of points added.
pub fn triangulate_camera(
    reconstruction: &mut Reconstruction,
    store: &CorrespondenceStore,
    camera: CameraKey,
    settings: &SfmSettings,
) -> usize {
    let image = match reconstruction.camera(camera) {
        Some(camera) => camera.image,
        None => return 0,
    };
    let names: Vec<(TrackName, KeyPoint)> = store
        .image_points(image)
        .filter(|(name, _)| reconstruction.named_point(name).is_none())
        .map(|(name, keypoint)| (name.clone(), keypoint))
        .collect();

    let mut triangulation = Triangulation::new(reconstruction, store, settings);
    let mut added = 0;
    for (name, keypoint) in names {
        let observers = triangulation.observers(&name);
        let pairs = observers
            .iter()
            .filter(|&&(other, _)| other != camera)
            .map(|&other| ((camera, keypoint), other));
        if triangulation.add_best(&name, pairs, &observers).is_some() {
            added += 1;
        }
    }
    info!("triangulated {} new points", added);
    added
}

/// Tries every name without a point that at least two registered cameras see, over all
/// pairs of those cameras. Returns the number of points added.
pub fn triangulate_remaining(
    reconstruction: &mut Reconstruction,
    store: &CorrespondenceStore,
    settings: &SfmSettings,
) -> usize {
    let names: Vec<TrackName> = store
        .tracks()
        .map(|(name, _)| name)
        .filter(|name| reconstruction.named_point(name).is_none())
        .cloned()
        .collect();

    let mut triangulation = Triangulation::new(reconstruction, store, settings);
    let mut added = 0;
    for name in names {
        let observers = triangulation.observers(&name);
        if observers.len() < 2 {
            continue;
        }
        let pairs = observers.iter().copied().tuple_combinations();
        if triangulation.add_best(&name, pairs, &observers).is_some() {
            added += 1;
        }
    }
    info!("global triangulation added {} points", added);
    added
}
