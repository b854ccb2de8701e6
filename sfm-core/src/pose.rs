use crate::{CameraPoint, FeatureWorldMatch, WorldPoint};
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Point3, Rotation3, Vector3};
use sample_consensus::Model;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented by all the different poses in this library:
///
/// * [`CameraToWorld`] - Transforms [`CameraPoint`] into [`WorldPoint`]
/// * [`WorldToCamera`] - Transforms [`WorldPoint`] into [`CameraPoint`]
/// * [`CameraToCamera`] - Transforms [`CameraPoint`] from one camera into [`CameraPoint`] for another camera
/// * [`WorldToWorld`] - Transforms [`WorldPoint`] from one world frame into another
pub trait Pose: From<IsometryMatrix3<f64>> + Clone + Copy {
    type InputPoint: Into<Point3<f64>>;
    type OutputPoint: From<Point3<f64>>;
    type Inverse: Pose;

    /// Retrieve the isometry.
    fn isometry(self) -> IsometryMatrix3<f64>;

    /// Creates a pose with no change in position or orientation.
    fn identity() -> Self {
        IsometryMatrix3::identity().into()
    }

    /// Takes the inverse of the pose.
    fn inverse(self) -> Self::Inverse {
        self.isometry().inverse().into()
    }

    /// Applies a scale factor to the pose (scales the translation component)
    #[must_use]
    fn scale(self, scale: f64) -> Self {
        let mut isometry = self.isometry();
        isometry.translation.vector *= scale;
        isometry.into()
    }

    /// Create the pose from rotation and translation.
    fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        IsometryMatrix3::from_parts(translation.into(), rotation).into()
    }

    /// Transform the given point to an output point.
    fn transform(self, input: Self::InputPoint) -> Self::OutputPoint {
        (self.isometry() * input.into()).into()
    }
}

/// This contains a world pose, which is a pose of the world relative to the camera.
/// This maps [`WorldPoint`] into [`CameraPoint`], changing an absolute position into
/// a vector relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl Pose for WorldToCamera {
    type InputPoint = WorldPoint;
    type OutputPoint = CameraPoint;
    type Inverse = CameraToWorld;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl WorldToCamera {
    /// The position of the optical center in world coordinates.
    pub fn center(self) -> WorldPoint {
        self.inverse().transform(CameraPoint(Point3::origin()))
    }
}

/// The residual is the distance on the virtual image plane between the keypoint and the
/// projection of the world point. Points that land behind the camera are infinitely wrong.
impl Model<FeatureWorldMatch> for WorldToCamera {
    #[inline(always)]
    fn residual(&self, data: &FeatureWorldMatch) -> f64 {
        let &FeatureWorldMatch(keypoint, world) = data;

        self.transform(world)
            .project()
            .map(|projection| (projection.0 - keypoint.0).norm())
            .unwrap_or(f64::INFINITY)
    }
}

/// This contains a camera pose, which is a pose of the camera relative to the world.
/// This transforms camera points (with depth as `z`) into world coordinates.
/// This also tells you where the camera is located and oriented in the world.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub IsometryMatrix3<f64>);

impl Pose for CameraToWorld {
    type InputPoint = CameraPoint;
    type OutputPoint = WorldPoint;
    type Inverse = WorldToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// This contains a relative pose that transforms the [`CameraPoint`] of one image
/// into the corresponding [`CameraPoint`] of another image. This transforms
/// the point from the camera space of camera `A` to camera `B`.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToCamera(pub IsometryMatrix3<f64>);

impl Pose for CameraToCamera {
    type InputPoint = CameraPoint;
    type OutputPoint = CameraPoint;
    type Inverse = CameraToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl CameraToCamera {
    /// If camera `A` sits at the world origin, this is the world pose of camera `B`.
    pub fn to_world_to_camera(self) -> WorldToCamera {
        WorldToCamera(self.0)
    }
}

/// This contains a rigid transformation that moves the [`WorldPoint`] of one
/// reconstruction into the corresponding [`WorldPoint`] of another frame.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToWorld(pub IsometryMatrix3<f64>);

impl Pose for WorldToWorld {
    type InputPoint = WorldPoint;
    type OutputPoint = WorldPoint;
    type Inverse = WorldToWorld;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl WorldToWorld {
    /// Re-expresses a camera pose in the transformed world frame.
    ///
    /// A point `x` seen by the camera ends up at `self.transform(x)`, so the new pose
    /// must undo the transform before applying the old pose.
    pub fn transform_camera(self, pose: WorldToCamera) -> WorldToCamera {
        (pose.isometry() * self.isometry().inverse()).into()
    }

    /// Applies `self` first, then `next`.
    pub fn then(self, next: WorldToWorld) -> WorldToWorld {
        (next.isometry() * self.isometry()).into()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn camera_center_is_invariant_point() {
        let pose = WorldToCamera::from_parts(
            Vector3::new(0.3, -0.2, 1.5),
            Rotation3::from_euler_angles(0.1, 0.4, -0.2),
        );
        let center = pose.center();
        assert_relative_eq!(pose.transform(center).0, Point3::origin(), epsilon = 1e-12);
    }

    #[test]
    fn residual_is_infinite_behind_camera() {
        let pose = WorldToCamera::identity();
        let behind = FeatureWorldMatch(
            crate::NormalizedKeyPoint(nalgebra::Point2::new(0.0, 0.0)),
            WorldPoint::new(0.0, 0.0, -2.0),
        );
        assert!(pose.residual(&behind).is_infinite());
    }

    #[test]
    fn transformed_camera_sees_same_point() {
        let pose = WorldToCamera::from_parts(
            Vector3::new(-1.0, 0.5, 4.0),
            Rotation3::from_euler_angles(0.3, -0.1, 0.2),
        );
        let world = WorldToWorld::from_parts(
            Vector3::new(2.0, 3.0, -1.0),
            Rotation3::from_euler_angles(-0.7, 0.2, 1.1),
        );
        let point = WorldPoint::new(0.2, -0.4, 1.3);
        let before = pose.transform(point);
        let after = world.transform_camera(pose).transform(world.transform(point));
        assert_relative_eq!(before.0, after.0, epsilon = 1e-9);
    }
}
