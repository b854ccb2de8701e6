use crate::NormalizedKeyPoint;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point2, Point3, Unit, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A 3d point which is relative to the camera's optical center and orientation where
/// the positive X axis is right, positive Y axis is down, and positive Z axis is forwards
/// from the optical center of the camera. The unit of distance of a `CameraPoint` is
/// unspecified and relative to the current reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraPoint(pub Point3<f64>);

impl CameraPoint {
    /// The depth of the point along the optical axis.
    ///
    /// Points with a depth that is not positive are behind the camera and can't be observed.
    pub fn depth(self) -> f64 {
        self.0.z
    }

    /// Retrieve the normalized bearing of the point from the optical center.
    pub fn bearing(self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.0.coords)
    }

    /// Projects the point onto the virtual image plane at `z = 1.0`.
    ///
    /// Returns `None` if the point is on or behind the optical center.
    pub fn project(self) -> Option<NormalizedKeyPoint> {
        if self.depth() > 0.0 {
            Point2::from_homogeneous(self.0.coords).map(NormalizedKeyPoint)
        } else {
            None
        }
    }
}

/// A point in "world" coordinates.
/// This means that the real-world units of the pose are unknown, but the
/// unit of distance and orientation are the same as the current reconstruction.
///
/// The reason that the unit of measurement is typically unknown is because if
/// the whole world is scaled by any factor `n` (excluding the camera itself), then
/// the normalized image coordinates will be exactly same on every image. Due to this,
/// the scale of the world is fixed by the baseline of the seed pair, which is one unit.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldPoint(pub Point3<f64>);

impl WorldPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Point3::new(x, y, z))
    }

    /// Checks that no coordinate is NaN or infinite.
    pub fn is_finite(self) -> bool {
        self.0.iter().all(|n| n.is_finite())
    }
}
