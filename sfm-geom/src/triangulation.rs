use float_ord::FloatOrd;
use sfm_core::{
    nalgebra::{zero, Matrix3x4, Matrix4, Point3},
    CameraPoint, CameraToCamera, NormalizedKeyPoint, Pose, WorldPoint, WorldToCamera,
};

/// Triangulates points from two or more posed observations.
///
/// Reffered to as the Linear-Eigen method by Hartley and Sturm in the paper
/// ["Triangulation"](https://users.cecs.anu.edu.au/~hartley/Papers/triangulation/triangulation.pdf).
///
/// Each observation contributes the part of its camera's `[R|t]` rows that is perpendicular to
/// the observed bearing, which is zero exactly when the point lies on the ray. The point is the
/// homogeneous null vector of the stacked constraints, found with a 4x4 symmetric eigen
/// decomposition. The method is linear and quick, and with the small errors of hand-placed
/// correspondences it is accurate enough to seed bundle adjustment.
///
/// A triangulated point is only returned if it is finite and lies in front of every camera
/// that observed it.
///
/// ```
/// use sfm_core::nalgebra::{Vector3, Point3, Rotation3};
/// use sfm_core::{CameraToCamera, CameraPoint, Pose};
/// use sfm_geom::LinearEigenTriangulator;
///
/// let point = CameraPoint(Point3::new(0.3, 0.1, 2.0));
/// let pose = CameraToCamera::from_parts(Vector3::new(0.1, 0.1, 0.1), Rotation3::new(Vector3::new(0.1, 0.1, 0.1)));
/// let a = point.project().unwrap();
/// let b = pose.transform(point).project().unwrap();
/// let triangulated = LinearEigenTriangulator::new().triangulate_relative(pose, a, b).unwrap();
/// assert!((point.0 - triangulated.0).norm() < 1e-6);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct LinearEigenTriangulator {
    epsilon: f64,
    max_iterations: usize,
}

impl LinearEigenTriangulator {
    /// Creates a `LinearEigenTriangulator` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the epsilon used in the symmetric eigen solver.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations for the symmetric eigen solver.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Triangulates a world point from its observations in posed cameras.
    ///
    /// Returns `None` with fewer than two observations, if the rays don't meet at a finite
    /// point, or if that point is not in front of every camera.
    pub fn triangulate_observations(
        &self,
        observations: &[(WorldToCamera, NormalizedKeyPoint)],
    ) -> Option<WorldPoint> {
        if observations.len() < 2 {
            return None;
        }

        let mut design: Matrix4<f64> = zero();
        for &(pose, keypoint) in observations {
            let bearing = keypoint.bearing().into_inner();
            let isometry = pose.isometry();
            let rot = isometry.rotation.matrix();
            let trans = isometry.translation.vector;
            let projection = Matrix3x4::<f64>::from_columns(&[
                rot.column(0),
                rot.column(1),
                rot.column(2),
                trans.column(0),
            ]);
            let term = projection - bearing * bearing.transpose() * projection;
            design += term.transpose() * term;
        }

        let se = design.try_symmetric_eigen(self.epsilon, self.max_iterations)?;

        se.eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| FloatOrd(n))
            .and_then(|(ix, _)| Point3::from_homogeneous(se.eigenvectors.column(ix).into_owned()))
            .map(WorldPoint)
            .filter(|point| point.is_finite())
            .filter(|&point| {
                observations
                    .iter()
                    .all(|&(pose, _)| pose.transform(point).depth() > 0.0)
            })
    }

    /// Triangulates a point seen by camera `A` at `a` and by camera `B` at `b`, where `relative`
    /// maps `A`'s camera space into `B`'s. The point is expressed in `A`'s camera space.
    pub fn triangulate_relative(
        &self,
        relative: CameraToCamera,
        a: NormalizedKeyPoint,
        b: NormalizedKeyPoint,
    ) -> Option<CameraPoint> {
        self.triangulate_observations(&[
            (WorldToCamera::identity(), a),
            (relative.to_world_to_camera(), b),
        ])
        .map(|point| CameraPoint(point.0))
    }
}

impl Default for LinearEigenTriangulator {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }
}

/// The angle in radians subtended at `point` by the optical centers of two cameras.
///
/// Small angles mean nearly parallel rays, whose intersection depth is poorly conditioned.
pub fn triangulation_angle(a: WorldToCamera, b: WorldToCamera, point: WorldPoint) -> f64 {
    let ray_a = a.center().0 - point.0;
    let ray_b = b.center().0 - point.0;
    ray_a.angle(&ray_b)
}
