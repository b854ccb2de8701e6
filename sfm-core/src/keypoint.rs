use crate::CameraPoint;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point2, Point3, Unit, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A point on an image in pixel coordinates, as placed by whoever annotated the image.
///
/// For calibrated coordinates, see [`NormalizedKeyPoint`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct KeyPoint(pub Point2<f64>);

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self(Point2::new(x, y))
    }
}

/// A point in normalized image coordinates. This keypoint has been normalized
/// based on the camera intrinsic matrix, so it lies on the virtual image plane
/// a distance of one focal length in front of the optical center.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct NormalizedKeyPoint(pub Point2<f64>);

impl NormalizedKeyPoint {
    /// Get the virtual image point as a [`Point3`].
    ///
    /// The virtual image point is the point that is formed on the virtual
    /// image plane at a depth 1.0 in front of the camera.
    pub fn virtual_image_point(self) -> Point3<f64> {
        self.coords.push(1.0).into()
    }

    /// Conceptually appends a `1.0` component to the normalized keypoint and then
    /// multiplies the point by `depth`.
    pub fn with_depth(self, depth: f64) -> CameraPoint {
        CameraPoint((self.coords.push(1.0) * depth).into())
    }

    /// The bearing of the ray leaving the optical center through this keypoint.
    pub fn bearing(self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.bearing_unnormalized())
    }

    pub fn bearing_unnormalized(self) -> Vector3<f64> {
        self.coords.push(1.0)
    }
}
