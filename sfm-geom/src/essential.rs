use crate::LinearEigenTriangulator;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use sfm_core::{
    nalgebra::{Matrix3, Rotation3, Vector3, SVD},
    sample_consensus::Model,
    CameraToCamera, FeatureMatch, Pose,
};

/// This stores an essential matrix, which is satisfied by the following constraint:
///
/// transpose(x') * E * x = 0
///
/// Where `x'` and `x` are homogeneous normalized image coordinates of the same point in
/// image `B` and image `A`. You can get a homogeneous normalized image coordinate by appending
/// `1.0` to a `NormalizedKeyPoint`.
///
/// For a normalized image coordinate, the bearing of the ray it came from is `(x, y, 1.0)`.
/// Every point along that ray projects onto a line in the other image, the epipolar line.
/// `E * x` is the normal of the plane containing the ray and both optical centers, so any
/// observation `x'` of the same point in the second image is perpendicular to it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Can be used to enforce the constraints of an essential matrix to fix it.
    ///
    /// This finds the closest essential matrix in frobenius form. This just means
    /// that the two singular values are averaged and the null singular value is
    /// forced to zero.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.try_svd(true, true, epsilon, max_iterations)?;
        svd.singular_values[2] = 0.0;
        let new_singular = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
        svd.singular_values[0] = new_singular;
        svd.singular_values[1] = new_singular;
        svd.recompose().ok().map(Self)
    }

    /// Returns two possible rotations for the essential matrix along with a translation
    /// bearing of arbitrary length and sign.
    ///
    /// `epsilon` is the threshold by which the singular value decomposition is considered
    /// complete and `max_iterations` caps its execution time.
    ///
    /// ```
    /// use sfm_core::{CameraToCamera, Pose};
    /// use sfm_core::nalgebra::{Rotation3, Vector3};
    /// use sfm_geom::EssentialMatrix;
    /// let pose = CameraToCamera::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// );
    /// let (rot_a, rot_b, t) = EssentialMatrix::from(pose)
    ///     .possible_rotations_unscaled_translation(1e-6, 50)
    ///     .unwrap();
    /// let a_close = rot_a.rotation_to(&pose.0.rotation).angle() < 1e-4;
    /// let b_close = rot_b.rotation_to(&pose.0.rotation).angle() < 1e-4;
    /// assert!(a_close || b_close);
    /// let t_res = 1.0 - t.normalize().dot(&pose.0.translation.vector.normalize()).abs();
    /// assert!(t_res < 1e-4);
    /// ```
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        let Self(essential) = *self;

        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        let svd = SVD::try_new(essential, true, true, epsilon, max_iterations)?;
        let (mut u, mut v_t) = (svd.u?, svd.v_t?);

        // The last singular vectors are only determined up to sign since d = (a a 0),
        // so flip them to give both factors a positive determinant.
        if u.determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        if v_t.determinant() < 0.0 {
            v_t.row_mut(2).neg_mut();
        }

        Some((
            Rotation3::from_matrix_unchecked(u * w * v_t),
            Rotation3::from_matrix_unchecked(u * wt * v_t),
            u.column(2).into_owned(),
        ))
    }

    /// The four relative poses consistent with the essential matrix. Exactly one of them
    /// places the observed points in front of both cameras.
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }

    /// Recovers the relative pose of camera `B` from camera `A` by testing the cheirality of
    /// the matches against each of the four possible poses.
    ///
    /// The translation has unit length. Returns the pose with the most matches in front of
    /// both cameras and that count, or `None` if no pose has any.
    pub fn recover_pose(
        &self,
        matches: &[FeatureMatch],
        triangulator: &LinearEigenTriangulator,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(CameraToCamera, usize)> {
        let poses = self.possible_unscaled_poses(epsilon, max_iterations)?;
        poses
            .iter()
            .map(|&pose| {
                let pose = CameraToCamera::from_parts(
                    pose.0.translation.vector.normalize(),
                    pose.0.rotation,
                );
                let in_front = matches
                    .iter()
                    .filter(|&&FeatureMatch(a, b)| {
                        triangulator.triangulate_relative(pose, a, b).is_some()
                    })
                    .count();
                (pose, in_front)
            })
            .fold(None, |best: Option<(CameraToCamera, usize)>, candidate| match best {
                Some(best) if best.1 >= candidate.1 => Some(best),
                _ => Some(candidate),
            })
            .filter(|&(_, in_front)| in_front > 0)
    }
}

/// Generates an essential matrix corresponding to this relative camera pose.
///
/// If a point `a` is transformed using [`Pose::transform`] into
/// a point `b`, then the essential matrix returned by this method will
/// give a residual of approximately `0.0` when you call
/// `essential.residual(&FeatureMatch(a, b))` on their projections.
impl From<CameraToCamera> for EssentialMatrix {
    fn from(pose: CameraToCamera) -> Self {
        Self(pose.0.translation.vector.cross_matrix() * *pose.0.rotation.matrix())
    }
}

/// The residual is the Sampson distance, a first order approximation of the distance on the
/// virtual image plane between the observations and the closest pair of points that satisfy
/// the epipolar constraint exactly.
impl Model<FeatureMatch> for EssentialMatrix {
    fn residual(&self, data: &FeatureMatch) -> f64 {
        let Self(mat) = *self;
        let &FeatureMatch(a, b) = data;
        let a = a.bearing_unnormalized();
        let b = b.bearing_unnormalized();

        let epipolar = b.dot(&(mat * a));
        let line_b = mat * a;
        let line_a = mat.transpose() * b;
        let gradient =
            line_b.x * line_b.x + line_b.y * line_b.y + line_a.x * line_a.x + line_a.y * line_a.y;
        if gradient <= f64::EPSILON {
            return epipolar.abs();
        }
        epipolar.abs() / gradient.sqrt()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sfm_core::{CameraPoint, NormalizedKeyPoint};
    use sfm_core::nalgebra::Point3;

    fn relative_pose() -> CameraToCamera {
        CameraToCamera::from_parts(
            Vector3::new(-1.0, 0.1, 0.05),
            Rotation3::from_euler_angles(0.02, 0.17, -0.03),
        )
    }

    fn matches(pose: CameraToCamera) -> Vec<FeatureMatch> {
        [
            [0.1, 0.2, 4.0],
            [-0.4, 0.3, 5.0],
            [0.6, -0.5, 3.5],
            [-0.2, -0.6, 6.0],
            [0.9, 0.8, 4.5],
            [-0.7, 0.1, 3.0],
        ]
        .iter()
        .map(|&[x, y, z]| {
            let point = CameraPoint(Point3::new(x, y, z));
            FeatureMatch(
                point.project().unwrap(),
                pose.transform(point).project().unwrap(),
            )
        })
        .collect()
    }

    #[test]
    fn residual_vanishes_for_consistent_matches() {
        let pose = relative_pose();
        let essential = EssentialMatrix::from(pose);
        for m in matches(pose) {
            assert!(essential.residual(&m) < 1e-12);
        }
    }

    #[test]
    fn residual_approximates_image_distance() {
        let pose = relative_pose();
        let essential = EssentialMatrix::from(pose);
        let FeatureMatch(a, b) = matches(pose)[0];
        // The baseline is mostly along x, so epipolar lines are close to horizontal.
        let shifted = FeatureMatch(a, NormalizedKeyPoint(b.0 + Vector3::y().xy() * 0.01));
        let residual = essential.residual(&shifted);
        assert!(residual > 0.003 && residual < 0.01, "residual {}", residual);
    }

    #[test]
    fn recover_pose_picks_the_physical_solution() {
        let pose = relative_pose();
        let essential = EssentialMatrix::from(pose);
        let matches = matches(pose);
        let (recovered, in_front) = essential
            .recover_pose(&matches, &LinearEigenTriangulator::new(), 1e-12, 1000)
            .unwrap();
        assert_eq!(in_front, matches.len());
        assert!(recovered.0.rotation.rotation_to(&pose.0.rotation).angle() < 1e-6);
        let direction = pose.0.translation.vector.normalize();
        assert!((recovered.0.translation.vector - direction).norm() < 1e-6);
    }
}
