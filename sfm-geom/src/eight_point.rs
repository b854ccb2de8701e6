use crate::EssentialMatrix;
use float_ord::FloatOrd;
use sfm_core::{
    nalgebra::{dimension::U9, Matrix3, OMatrix, OVector},
    sample_consensus::Estimator,
    FeatureMatch,
};

/// Performs the
/// [eight-point algorithm](https://en.wikipedia.org/wiki/Eight-point_algorithm)
/// by Richard Hartley and Andrew Zisserman.
///
/// Unlike the five-point solver this accepts any number of matches from eight up and
/// solves them in the least squares sense, so it can also refit a model on all inliers.
/// The estimate is reconditioned into a proper essential matrix.
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<EssentialMatrix>
    where
        I: Iterator<Item = FeatureMatch>,
    {
        let mut normal = OMatrix::<f64, U9, U9>::zeros();
        let mut count = 0;
        for FeatureMatch(a, b) in data {
            let (a, b) = (a.bearing_unnormalized(), b.bearing_unnormalized());
            let mut row = OVector::<f64, U9>::zeros();
            for j in 0..3 {
                row.fixed_rows_mut::<3>(3 * j).copy_from(&(a[j] * b));
            }
            normal += row * row.transpose();
            count += 1;
        }
        if count < 8 {
            return None;
        }
        let eigens = normal.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let eigenvector = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        let mat = Matrix3::from_iterator(eigenvector.iter().copied());
        EssentialMatrix(mat).recondition(self.epsilon, self.iterations)
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<FeatureMatch> for EightPoint {
    type Model = EssentialMatrix;
    type ModelIter = Option<EssentialMatrix>;
    const MIN_SAMPLES: usize = 8;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch> + Clone,
    {
        self.from_matches(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sfm_core::{
        nalgebra::{Point3, Rotation3, Vector3},
        sample_consensus::Model,
        CameraPoint, CameraToCamera, Pose,
    };

    #[test]
    fn recovers_essential_from_exact_matches() {
        let pose = CameraToCamera::from_parts(
            Vector3::new(0.7, -0.2, 0.1),
            Rotation3::from_euler_angles(-0.03, -0.2, 0.05),
        );
        let matches: Vec<FeatureMatch> = (0..12)
            .map(|i| {
                let i = i as f64;
                let point = CameraPoint(Point3::new(
                    (i * 0.7).sin(),
                    (i * 1.3).cos() * 0.8,
                    3.0 + (i * 0.37).sin().abs() * 2.0,
                ));
                FeatureMatch(
                    point.project().unwrap(),
                    pose.transform(point).project().unwrap(),
                )
            })
            .collect();
        let essential = EightPoint::new()
            .from_matches(matches.iter().copied())
            .unwrap();
        for m in &matches {
            assert!(essential.residual(m) < 1e-8);
        }
    }

    #[test]
    fn too_few_matches() {
        assert!(EightPoint::new()
            .from_matches(core::iter::empty())
            .is_none());
    }
}
