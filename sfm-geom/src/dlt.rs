use float_ord::FloatOrd;
use sfm_core::{
    nalgebra::{dimension::U12, Matrix3, Matrix3x4, OMatrix, OVector, Rotation3},
    sample_consensus::Estimator,
    FeatureWorldMatch, Pose, WorldToCamera,
};

/// Linear perspective-n-point solver using the direct linear transform.
///
/// Each match of a normalized keypoint `(u, v)` with a world point `X` gives two rows of
/// the homogeneous system `A p = 0`, where `p` holds the twelve entries of `P = [R|t]` in
/// row-major order. `p` is the eigenvector of `AᵀA` with the smallest eigenvalue. The
/// left 3x3 block of `P` is then scaled to unit rows and projected onto the closest rotation.
///
/// Six matches are needed, but any larger number is solved in the least squares sense,
/// so the same solver refits a pose on all of its inliers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DltPnp {
    pub epsilon: f64,
    pub max_iterations: usize,
}

impl DltPnp {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<WorldToCamera>
    where
        I: Iterator<Item = FeatureWorldMatch>,
    {
        let mut normal = OMatrix::<f64, U12, U12>::zeros();
        let mut count = 0;
        for FeatureWorldMatch(keypoint, point) in data {
            let (u, v) = (keypoint.x, keypoint.y);
            let homogeneous = point.0.to_homogeneous();
            let mut row_u = OVector::<f64, U12>::zeros();
            let mut row_v = OVector::<f64, U12>::zeros();
            row_u.fixed_rows_mut::<4>(0).copy_from(&homogeneous);
            row_u.fixed_rows_mut::<4>(8).copy_from(&(-u * homogeneous));
            row_v.fixed_rows_mut::<4>(4).copy_from(&homogeneous);
            row_v.fixed_rows_mut::<4>(8).copy_from(&(-v * homogeneous));
            normal += row_u * row_u.transpose() + row_v * row_v.transpose();
            count += 1;
        }
        if count < 6 {
            return None;
        }

        let eigens = normal.try_symmetric_eigen(self.epsilon, self.max_iterations)?;
        let p = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        let mut projection = Matrix3x4::from_row_slice(p.as_slice());

        // The null vector has an arbitrary sign, pick the one with a right-handed rotation.
        if projection.fixed_columns::<3>(0).into_owned().determinant() < 0.0 {
            projection.neg_mut();
        }

        let block: Matrix3<f64> = projection.fixed_columns::<3>(0).into_owned();
        let scale = (block.row(0).norm() + block.row(1).norm() + block.row(2).norm()) / 3.0;
        if scale <= f64::EPSILON || !scale.is_finite() {
            return None;
        }

        let svd = (block / scale).try_svd(true, true, self.epsilon, self.max_iterations)?;
        let (mut u, v_t) = (svd.u?, svd.v_t?);
        if (u * v_t).determinant() < 0.0 {
            u.column_mut(2).neg_mut();
        }
        let rotation = Rotation3::from_matrix_unchecked(u * v_t);
        let translation = projection.column(3) / scale;

        Some(WorldToCamera::from_parts(translation, rotation))
    }
}

impl Default for DltPnp {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
        }
    }
}

impl Estimator<FeatureWorldMatch> for DltPnp {
    type Model = WorldToCamera;
    type ModelIter = Option<WorldToCamera>;
    const MIN_SAMPLES: usize = 6;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureWorldMatch> + Clone,
    {
        self.from_matches(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sfm_core::{nalgebra::Vector3, sample_consensus::Model, WorldPoint};

    fn pose() -> WorldToCamera {
        WorldToCamera::from_parts(
            Vector3::new(0.2, -0.1, 6.0),
            Rotation3::from_euler_angles(0.1, -0.3, 0.05),
        )
    }

    fn matches(pose: WorldToCamera) -> Vec<FeatureWorldMatch> {
        (0..10)
            .map(|i| {
                let i = i as f64;
                let point = WorldPoint::new((i * 0.9).sin(), (i * 1.7).cos(), (i * 0.4).sin() * 0.8);
                FeatureWorldMatch(pose.transform(point).project().unwrap(), point)
            })
            .collect()
    }

    #[test]
    fn recovers_pose_from_exact_matches() {
        let truth = pose();
        let matches = matches(truth);
        let estimate = DltPnp::new().from_matches(matches.iter().copied()).unwrap();
        assert!(estimate.0.rotation.rotation_to(&truth.0.rotation).angle() < 1e-6);
        assert!((estimate.0.translation.vector - truth.0.translation.vector).norm() < 1e-6);
        for m in &matches {
            assert!(estimate.residual(m) < 1e-8);
        }
    }

    #[test]
    fn five_matches_are_not_enough() {
        let matches = matches(pose());
        assert!(DltPnp::new().from_matches(matches.into_iter().take(5)).is_none());
    }
}
