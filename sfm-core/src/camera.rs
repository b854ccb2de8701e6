use crate::{KeyPoint, NormalizedKeyPoint, Pose, WorldPoint, WorldToCamera};
use nalgebra::{Matrix3, Point2, Vector2};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// No distortion is modeled. One set of intrinsics is shared by every camera of a reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    /// Approximates the intrinsics of an uncalibrated camera from the image size.
    ///
    /// The focal length is `scale * max(width, height)` on both axes and the principal
    /// point is the center of the image.
    ///
    /// ```
    /// use sfm_core::CameraIntrinsics;
    /// let intrinsics = CameraIntrinsics::estimate(1000, 800, 1.2);
    /// assert_eq!(intrinsics.focals.x, 1200.0);
    /// assert_eq!(intrinsics.principal_point.y, 400.0);
    /// ```
    pub fn estimate(width: u32, height: u32, scale: f64) -> Self {
        let (width, height) = (f64::from(width), f64::from(height));
        Self::identity()
            .focal(scale * width.max(height))
            .principal_point(Point2::new(width / 2.0, height / 2.0))
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// The mean focal length, used to convert pixel thresholds to normalized units.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.focals.x + self.focals.y)
    }

    /// Converts a pixel distance into a distance on the virtual image plane.
    pub fn pixels_to_normalized(&self, pixels: f64) -> f64 {
        pixels / self.mean_focal()
    }

    /// Takes in a point from an image in pixel coordinates and
    /// converts it to a [`NormalizedKeyPoint`].
    ///
    /// ```
    /// use sfm_core::{KeyPoint, CameraIntrinsics};
    /// use sfm_core::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.calibrate(kp);
    /// let ukp = intrinsics.uncalibrate(nkp);
    /// assert!((kp.0 - ukp.0).norm() < 1e-6);
    /// ```
    pub fn calibrate(&self, point: KeyPoint) -> NormalizedKeyPoint {
        let centered = point.0 - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        NormalizedKeyPoint(Point2::new(x, y))
    }

    /// Converts a [`NormalizedKeyPoint`] back into pixel coordinates.
    pub fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let y = projection.y * self.focals.y;
        let x = projection.x * self.focals.x + self.skew * projection.y;
        let centered = Point2::new(x, y);
        KeyPoint(centered + self.principal_point.coords)
    }

    /// Projects a world point through a camera into pixel coordinates.
    ///
    /// Returns `None` if the point is not in front of the camera.
    pub fn project(&self, pose: WorldToCamera, point: WorldPoint) -> Option<KeyPoint> {
        pose.transform(point)
            .project()
            .map(|projection| self.uncalibrate(projection))
    }

    /// The pixel distance between an observation and the projection of `point`.
    ///
    /// Points behind the camera have an infinite reprojection error.
    pub fn reprojection_error(
        &self,
        pose: WorldToCamera,
        point: WorldPoint,
        observation: KeyPoint,
    ) -> f64 {
        self.project(pose, point)
            .map(|projection| (projection.0 - observation.0).norm())
            .unwrap_or(f64::INFINITY)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    #[test]
    fn estimate_uses_longest_side() {
        let portrait = CameraIntrinsics::estimate(600, 900, 1.0);
        assert_eq!(portrait.focals, Vector2::new(900.0, 900.0));
        assert_eq!(portrait.principal_point, Point2::new(300.0, 450.0));
        assert_eq!(portrait.skew, 0.0);
    }

    #[test]
    fn projection_round_trip_has_no_error() {
        let intrinsics = CameraIntrinsics::estimate(1024, 768, 1.2);
        let pose = WorldToCamera::from_parts(
            Vector3::new(0.1, 0.2, 3.0),
            Rotation3::from_euler_angles(0.05, -0.1, 0.02),
        );
        let point = WorldPoint::new(0.4, -0.3, 0.5);
        let observed = intrinsics.project(pose, point).unwrap();
        assert!(intrinsics.reprojection_error(pose, point, observed) < 1e-9);
    }

    #[test]
    fn point_behind_camera_does_not_project() {
        let intrinsics = CameraIntrinsics::estimate(640, 480, 1.2);
        let point = WorldPoint::new(0.0, 0.0, -1.0);
        assert!(intrinsics.project(WorldToCamera::identity(), point).is_none());
        assert!(intrinsics
            .reprojection_error(WorldToCamera::identity(), point, KeyPoint::new(320.0, 240.0))
            .is_infinite());
    }
}
