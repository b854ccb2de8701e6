use log::debug;
use sfm_core::{
    CameraIntrinsics, ImageIndex, KeyPoint, Pose, TrackName, WorldPoint, WorldToCamera,
    WorldToWorld,
};
use sfm_optimize::{BundleAdjustReport, BundleAdjuster, Observation};
use slotmap::{new_key_type, DenseSlotMap};
use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

new_key_type! {
    pub struct CameraKey;
    pub struct PointKey;
}

/// An image which has been registered into the reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// The image this camera was registered from.
    pub image: ImageIndex,
    pub pose: WorldToCamera,
}

/// A named point with a position in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub name: TrackName,
    pub position: WorldPoint,
    /// The pixel position of this point in each camera that observes it.
    pub observations: BTreeMap<CameraKey, KeyPoint>,
}

/// A reconstructed point as it is handed out to callers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CloudPoint {
    pub name: TrackName,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Bundle adjustment caps and tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustOptions {
    pub max_evaluations: usize,
    pub max_iterations: usize,
    pub epsilon: f64,
    pub tolerance: f64,
}

/// The cameras and points that exist in the same world space, and which camera observes which point.
///
/// Every observation refers to a camera and a point that exist, every point has at least two
/// observations and a name that no other point has, and every image has at most one camera.
/// Cameras and points are never removed.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    intrinsics: CameraIntrinsics,
    cameras: DenseSlotMap<CameraKey, Camera>,
    points: DenseSlotMap<PointKey, TrackPoint>,
    image_cameras: HashMap<ImageIndex, CameraKey>,
    named_points: HashMap<TrackName, PointKey>,
}

impl Reconstruction {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            cameras: DenseSlotMap::with_key(),
            points: DenseSlotMap::with_key(),
            image_cameras: HashMap::new(),
            named_points: HashMap::new(),
        }
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        self.intrinsics
    }

    /// Registers a camera for an image. Returns `None` if the image already has one.
    pub fn add_camera(&mut self, image: ImageIndex, pose: WorldToCamera) -> Option<CameraKey> {
        if self.image_cameras.contains_key(&image) {
            return None;
        }
        let camera = self.cameras.insert(Camera { image, pose });
        self.image_cameras.insert(image, camera);
        Some(camera)
    }

    pub fn camera(&self, camera: CameraKey) -> Option<&Camera> {
        self.cameras.get(camera)
    }

    /// The camera registered for an image, if any.
    pub fn image_camera(&self, image: ImageIndex) -> Option<CameraKey> {
        self.image_cameras.get(&image).copied()
    }

    /// All cameras in the order they were registered.
    pub fn cameras(&self) -> impl Iterator<Item = (CameraKey, &Camera)> + '_ {
        self.cameras.iter()
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn set_pose(&mut self, camera: CameraKey, pose: WorldToCamera) {
        if let Some(camera) = self.cameras.get_mut(camera) {
            camera.pose = pose;
        }
    }

    /// Adds a named point observed by at least two existing cameras.
    ///
    /// Returns `None` without adding anything if the name is taken or the observations
    /// don't come from two distinct existing cameras.
    pub fn add_point(
        &mut self,
        name: TrackName,
        position: WorldPoint,
        observations: impl IntoIterator<Item = (CameraKey, KeyPoint)>,
    ) -> Option<PointKey> {
        if self.named_points.contains_key(&name) {
            return None;
        }
        let observations: BTreeMap<CameraKey, KeyPoint> = observations.into_iter().collect();
        if observations.len() < 2
            || observations
                .keys()
                .any(|&camera| !self.cameras.contains_key(camera))
        {
            return None;
        }
        let point = self.points.insert(TrackPoint {
            name: name.clone(),
            position,
            observations,
        });
        self.named_points.insert(name, point);
        Some(point)
    }

    pub fn point(&self, point: PointKey) -> Option<&TrackPoint> {
        self.points.get(point)
    }

    pub fn named_point(&self, name: &TrackName) -> Option<PointKey> {
        self.named_points.get(name).copied()
    }

    /// All points in the order they were added.
    pub fn points(&self) -> impl Iterator<Item = (PointKey, &TrackPoint)> + '_ {
        self.points.iter()
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn set_position(&mut self, point: PointKey, position: WorldPoint) {
        if let Some(point) = self.points.get_mut(point) {
            point.position = position;
        }
    }

    /// Records that `camera` sees `point` at `keypoint`, replacing any previous observation.
    ///
    /// Returns `false` if the camera or the point doesn't exist.
    pub fn add_observation(
        &mut self,
        point: PointKey,
        camera: CameraKey,
        keypoint: KeyPoint,
    ) -> bool {
        if !self.cameras.contains_key(camera) {
            return false;
        }
        match self.points.get_mut(point) {
            Some(point) => {
                point.observations.insert(camera, keypoint);
                true
            }
            None => false,
        }
    }

    pub fn has_observation(&self, point: PointKey, camera: CameraKey) -> bool {
        self.points
            .get(point)
            .map_or(false, |point| point.observations.contains_key(&camera))
    }

    /// The number of observations over all points.
    pub fn num_observations(&self) -> usize {
        self.points
            .values()
            .map(|point| point.observations.len())
            .sum()
    }

    /// The pixel error of a point in a camera at the pixel position `keypoint`.
    pub fn reprojection_error(
        &self,
        point: WorldPoint,
        camera: CameraKey,
        keypoint: KeyPoint,
    ) -> Option<f64> {
        let camera = self.cameras.get(camera)?;
        Some(
            self.intrinsics
                .reprojection_error(camera.pose, point, keypoint),
        )
    }

    /// The pixel error of every observation.
    pub fn observation_errors(&self) -> impl Iterator<Item = (PointKey, CameraKey, f64)> + '_ {
        self.points.iter().flat_map(move |(key, point)| {
            point.observations.iter().map(move |(&camera, &keypoint)| {
                let error = self.cameras.get(camera).map_or(f64::INFINITY, |c| {
                    self.intrinsics
                        .reprojection_error(c.pose, point.position, keypoint)
                });
                (key, camera, error)
            })
        })
    }

    /// The reconstructed points in the order they were added.
    pub fn cloud(&self) -> Vec<CloudPoint> {
        self.points
            .values()
            .map(|point| CloudPoint {
                name: point.name.clone(),
                x: point.position.x,
                y: point.position.y,
                z: point.position.z,
            })
            .collect()
    }

    /// Moves the whole reconstruction by `transform`. Points are transformed directly and camera
    /// poses are changed so every camera still sees every point at the same pixel.
    pub fn apply_transform(&mut self, transform: WorldToWorld) {
        for point in self.points.values_mut() {
            point.position = transform.transform(point.position);
        }
        for camera in self.cameras.values_mut() {
            camera.pose = transform.transform_camera(camera.pose);
        }
    }

    /// Jointly refines every camera pose and point position, then writes the results back.
    ///
    /// The first registered camera is held fixed, so the world frame stays its camera frame.
    pub fn bundle_adjust(&mut self, options: AdjustOptions) -> BundleAdjustReport {
        let camera_keys: Vec<CameraKey> = self.cameras.keys().collect();
        let point_keys: Vec<PointKey> = self.points.keys().collect();
        let camera_index: HashMap<CameraKey, usize> = camera_keys
            .iter()
            .enumerate()
            .map(|(ix, &key)| (key, ix))
            .collect();

        let observations: Vec<Observation> = point_keys
            .iter()
            .enumerate()
            .flat_map(|(point, &key)| {
                let camera_index = &camera_index;
                self.points[key]
                    .observations
                    .iter()
                    .map(move |(camera, &keypoint)| Observation {
                        camera: camera_index[camera],
                        point,
                        keypoint,
                    })
            })
            .collect();

        debug!(
            "bundle adjusting {} cameras and {} points with {} observations",
            camera_keys.len(),
            point_keys.len(),
            observations.len()
        );

        let adjustment = BundleAdjuster::new(
            self.intrinsics,
            camera_keys.iter().map(|&key| self.cameras[key].pose).collect(),
            point_keys
                .iter()
                .map(|&key| self.points[key].position)
                .collect(),
            observations,
        )
        .fix_camera(0)
        .max_evaluations(options.max_evaluations)
        .max_iterations(options.max_iterations)
        .epsilon(options.epsilon)
        .tolerance(options.tolerance)
        .solve();

        for (key, pose) in camera_keys.into_iter().zip(adjustment.poses) {
            self.cameras[key].pose = pose;
        }
        for (key, position) in point_keys.into_iter().zip(adjustment.points) {
            self.points[key].position = position;
        }
        adjustment.report
    }
}
