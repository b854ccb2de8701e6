use sfm_core::nalgebra::{Rotation3, Vector3};
use sfm_core::{Pose, WorldToWorld};

/// A rigid transform `X' = R·X + T` applied to the finished reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalTransform {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Default for GlobalTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl GlobalTransform {
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn to_world_to_world(self) -> WorldToWorld {
        WorldToWorld::from_parts(self.translation, self.rotation)
    }

    /// The single transform equal to applying `self` and then `next`.
    pub fn then(self, next: GlobalTransform) -> GlobalTransform {
        let combined = self.to_world_to_world().then(next.to_world_to_world());
        let isometry = combined.isometry();
        Self {
            rotation: isometry.rotation,
            translation: isometry.translation.vector,
        }
    }
}

impl From<GlobalTransform> for WorldToWorld {
    fn from(transform: GlobalTransform) -> Self {
        transform.to_world_to_world()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use sfm_core::WorldPoint;

    #[test]
    fn then_applies_in_order() {
        let a = GlobalTransform::new(
            Rotation3::from_euler_angles(0.0, 0.5, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        );
        let b = GlobalTransform::new(
            Rotation3::from_euler_angles(0.2, 0.0, -0.1),
            Vector3::new(0.0, -2.0, 0.5),
        );
        let point = WorldPoint::new(0.3, 0.7, -1.1);
        let twice = b
            .to_world_to_world()
            .transform(a.to_world_to_world().transform(point));
        let once = a.then(b).to_world_to_world().transform(point);
        assert_relative_eq!(twice.0, once.0, epsilon = 1e-12);
    }

    #[test]
    fn default_is_identity() {
        let point = WorldPoint::new(1.0, 2.0, 3.0);
        let transform = GlobalTransform::default();
        assert!(transform.is_identity());
        assert_eq!(transform.to_world_to_world().transform(point), point);
    }
}
