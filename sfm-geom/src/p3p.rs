// Copyright (c) 2018 Michael Persson
// Adapted to openMVG by Romain Janvier and Pierre Moulon
// Adapted to Rust by Matthieu Pizenberg

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use arrayvec::ArrayVec;
use num_traits::Float;
use sfm_core::{
    nalgebra::{Matrix3, Rotation3, Vector3},
    sample_consensus::Estimator,
    FeatureWorldMatch, Pose, WorldToCamera,
};

type Mat3 = Matrix3<f64>;
type Vec3 = Vector3<f64>;

/// Perspective-three-point solver named Lambda Twist. Estimates up to 4 [`WorldToCamera`] poses
/// that satisfy `lambda_i * y_i = R * x_i + t` for three world points `x_i` observed along the
/// bearings `y_i` at unknown depths `lambda_i`.
///
/// Implementation based on
/// "Lambda Twist: An Accurate Fast Robust Perspective Three Point (P3P) Solver"
/// Persson, M. and Nordberg, K. ECCV 2018.
///
/// It is the fallback pose solver for images with too few correspondences, or too
/// many bad ones, for the linear solver to produce a camera.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LambdaTwist {
    /// Iterations of Gauss-Newton refinement of the depths. The paper notes it rarely improves
    /// after two iterations.
    pub gauss_newton_iterations: usize,
    /// Iterations spent converging on a proper rotation matrix.
    pub rotation_convergence_iterations: usize,
    /// The epsilon at which the rotation is considered converged.
    pub rotation_convergence_epsilon: f64,
}

impl LambdaTwist {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn gauss_newton_iterations(self, gauss_newton_iterations: usize) -> Self {
        Self {
            gauss_newton_iterations,
            ..self
        }
    }

    /// Computes the candidate poses from exactly three matches.
    pub fn poses(&self, samples: [FeatureWorldMatch; 3]) -> ArrayVec<WorldToCamera, 4> {
        let world = samples.map(|FeatureWorldMatch(_, point)| point.0);
        let bearings = samples.map(|FeatureWorldMatch(keypoint, _)| keypoint.bearing().into_inner());

        let d12 = world[0] - world[1];
        let d13 = world[0] - world[2];
        let d23 = world[1] - world[2];

        // Squared distances between the world points.
        let a12 = d12.norm_squared();
        let a13 = d13.norm_squared();
        let a23 = d23.norm_squared();

        // Cosines between the bearings.
        let c12 = bearings[0].dot(&bearings[1]);
        let c23 = bearings[1].dot(&bearings[2]);
        let c31 = bearings[2].dot(&bearings[0]);

        let geometry = Geometry {
            a12,
            a13,
            a23,
            b12: -2.0 * c12,
            b13: -2.0 * c31,
            b23: -2.0 * c23,
        };

        let depths = geometry.depth_candidates(c12, c23, c31);

        // Recover R from the triangles spanned by the points before and after the transform.
        let cross = d12.cross(&d13);
        let world_frame = match Mat3::from_columns(&[d12, d13, cross]).try_inverse() {
            Some(inverse) => inverse,
            None => return ArrayVec::new(),
        };

        depths
            .into_iter()
            .map(|depths| {
                let depths = geometry.refine(depths, self.gauss_newton_iterations);
                let ry1 = depths[0] * bearings[0];
                let ry2 = depths[1] * bearings[1];
                let ry3 = depths[2] * bearings[2];

                let yd1 = ry1 - ry2;
                let yd2 = ry1 - ry3;
                let camera_frame = Mat3::from_columns(&[yd1, yd2, yd1.cross(&yd2)]);

                let rot = camera_frame * world_frame;
                let rotation = Rotation3::from_matrix_eps(
                    &rot,
                    self.rotation_convergence_epsilon,
                    self.rotation_convergence_iterations,
                    Rotation3::identity(),
                );
                WorldToCamera::from_parts(ry1 - rotation * world[0].coords, rotation)
            })
            .collect()
    }
}

impl Default for LambdaTwist {
    fn default() -> Self {
        Self {
            gauss_newton_iterations: 5,
            rotation_convergence_iterations: 100,
            rotation_convergence_epsilon: 1e-12,
        }
    }
}

impl Estimator<FeatureWorldMatch> for LambdaTwist {
    type Model = WorldToCamera;
    type ModelIter = ArrayVec<WorldToCamera, 4>;
    const MIN_SAMPLES: usize = 3;

    fn estimate<I>(&self, mut data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureWorldMatch> + Clone,
    {
        match (data.next(), data.next(), data.next()) {
            (Some(a), Some(b), Some(c)) => self.poses([a, b, c]),
            _ => ArrayVec::new(),
        }
    }
}

/// The squared side lengths `a` of the world triangle and the terms `b = -2 cos` of the
/// bearing angles, which define the three quadrics the depths lie on.
struct Geometry {
    a12: f64,
    a13: f64,
    a23: f64,
    b12: f64,
    b13: f64,
    b23: f64,
}

impl Geometry {
    /// Solves the depths along each bearing. There might be between 0 and 4 solutions.
    fn depth_candidates(&self, c12: f64, c23: f64, c31: f64) -> ArrayVec<Vec3, 4> {
        let &Self {
            a12,
            a13,
            a23,
            b12,
            b13,
            b23,
        } = self;
        let blob = c12 * c23 * c31 - 1.0;
        let s12_sqr = 1.0 - c12 * c12;
        let s23_sqr = 1.0 - c23 * c23;
        let s31_sqr = 1.0 - c31 * c31;

        // The cubic of equation (10) in the paper.
        let p3 = a13 * (a23 * s31_sqr - a13 * s23_sqr);
        let p2 = 2.0 * blob * a23 * a13
            + a13 * (2.0 * a12 + a13) * s23_sqr
            + a23 * (a23 - a12) * s31_sqr;
        let p1 = a23 * (a13 - a23) * s12_sqr
            - a12 * a12 * s23_sqr
            - 2.0 * a12 * (blob * a23 + a13 * s23_sqr);
        let p0 = a12 * (a12 * s23_sqr - a23 * s12_sqr);

        let g = cubic_root(p2 / p3, p1 / p3, p0 / p3);

        // The matrix called D0 in the paper, which is singular for the root `g`.
        #[rustfmt::skip]
        let d0 = Mat3::new(
            a23 * (1.0 - g),   -(a23 * c12),              a23 * c31 * g,
            -(a23 * c12),      a23 - a12 + a13 * g,       -c23 * (a13 * g - a12),
            a23 * c31 * g,     -c23 * (a13 * g - a12),    g * (a13 - a23) - a12,
        );
        let (vectors, values) = singular_eigen_decomposition(d0);

        let mut depths = ArrayVec::new();
        let ratio = (0.0_f64.max(-values[1] / values[0])).sqrt();
        for ratio in [ratio, -ratio] {
            // Equation (15) in the paper.
            let w2 = 1.0 / (ratio * vectors.m12 - vectors.m11);
            let w0 = w2 * (vectors.m21 - ratio * vectors.m22);
            let w1 = w2 * (vectors.m31 - ratio * vectors.m32);

            let a = 1.0 / ((a13 - a12) * w1 * w1 - a12 * b13 * w1 - a12);
            let b = a * (a13 * b12 * w1 - a12 * b13 * w0 - 2.0 * w0 * w1 * (a12 - a13));
            let c = a * ((a13 - a12) * w0 * w0 + a13 * b12 * w0 + a13);

            if let Some((tau1, tau2)) = quadratic_roots(b, c) {
                for tau in [tau1, tau2] {
                    if tau <= 0.0 {
                        continue;
                    }
                    // Equation (16) in the paper.
                    let d = a23 / (tau * (b23 + tau) + 1.0);
                    if d > 0.0 {
                        let l2 = d.sqrt();
                        let l3 = tau * l2;
                        let l1 = w0 * l2 + w1 * l3;
                        if l1 >= 0.0 {
                            depths.push(Vec3::new(l1, l2, l3));
                        }
                    }
                }
            }
        }
        depths
    }

    fn residual(&self, l: &Vec3) -> Vec3 {
        Vec3::new(
            l.x * l.x + l.y * l.y + self.b12 * l.x * l.y - self.a12,
            l.x * l.x + l.z * l.z + self.b13 * l.x * l.z - self.a13,
            l.y * l.y + l.z * l.z + self.b23 * l.y * l.z - self.a23,
        )
    }

    /// Gauss-Newton refinement of a depth triplet, stopping as soon as a step does not help.
    fn refine(&self, mut lambda: Vec3, iterations: usize) -> Vec3 {
        let mut res = self.residual(&lambda);
        for _ in 0..iterations {
            if res.lp_norm(1) < 1e-10 {
                break;
            }
            let (l1, l2, l3) = (lambda.x, lambda.y, lambda.z);
            let dr1dl1 = 2.0 * l1 + self.b12 * l2;
            let dr1dl2 = 2.0 * l2 + self.b12 * l1;
            let dr2dl1 = 2.0 * l1 + self.b13 * l3;
            let dr2dl3 = 2.0 * l3 + self.b13 * l1;
            let dr3dl2 = 2.0 * l2 + self.b23 * l3;
            let dr3dl3 = 2.0 * l3 + self.b23 * l2;
            let det = 1.0 / (-dr1dl1 * dr2dl3 * dr3dl2 - dr1dl2 * dr2dl1 * dr3dl3);

            // Adjugate of the Jacobian.
            #[rustfmt::skip]
            let adjugate = Mat3::new(
                -dr2dl3 * dr3dl2, -dr1dl2 * dr3dl3,  dr1dl2 * dr2dl3,
                -dr2dl1 * dr3dl3,  dr1dl1 * dr3dl3, -dr1dl1 * dr2dl3,
                 dr2dl1 * dr3dl2, -dr1dl1 * dr3dl2, -dr1dl2 * dr2dl1,
            );
            let next = lambda - det * (adjugate * res);
            let next_res = self.residual(&next);
            if next_res.lp_norm(1) > res.lp_norm(1) {
                break;
            }
            lambda = next;
            res = next_res;
        }
        lambda
    }
}

/// The real roots of `r^2 + b*r + c = 0`, computed without cancellation.
fn quadratic_roots(b: f64, c: f64) -> Option<(f64, f64)> {
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        return None;
    }
    let y = Float::sqrt(discriminant);
    if b < 0.0 {
        Some((0.5 * (-b + y), 0.5 * (-b - y)))
    } else {
        Some((2.0 * c / (-b + y), 2.0 * c / (-b - y)))
    }
}

/// A single root of `r^3 + b*r^2 + c*r + d = 0`, chosen where the derivative is as large
/// as possible so that the root is stable.
///
/// Newton-Raphson is started from the leftmost or rightmost root of a second order
/// approximation around the stationary points, or from the inflection point when the
/// cubic is monotonic.
#[allow(clippy::many_single_char_names)]
fn cubic_root(b: f64, c: f64, d: f64) -> f64 {
    let mut r0;
    if b * b >= 3.0 * c {
        let v = (b * b - 3.0 * c).sqrt();
        let t1 = (-b - v) / 3.0;
        let k = ((t1 + b) * t1 + c) * t1 + d;
        if k > 0.0 {
            r0 = t1 - (-k / (3.0 * t1 + b)).sqrt();
        } else {
            let t2 = (-b + v) / 3.0;
            let k = ((t2 + b) * t2 + c) * t2 + d;
            r0 = t2 + (-k / (3.0 * t2 + b)).sqrt();
        }
    } else {
        r0 = -b / 3.0;
        if ((3.0 * r0 + 2.0 * b) * r0 + c).abs() < 1e-4 {
            r0 += 1.0;
        }
    }

    // At least 7 and at most 50 Newton-Raphson iterations.
    for iteration in 0..50 {
        let fx = ((r0 + b) * r0 + c) * r0 + d;
        if iteration >= 7 && fx.abs() <= 1e-13 {
            break;
        }
        let fpx = (3.0 * r0 + 2.0 * b) * r0 + c;
        r0 -= fx / fpx;
    }
    r0
}

/// Eigen decomposition of a symmetric matrix known to have a zero eigenvalue.
///
/// The eigenvectors are the columns of the first matrix, ordered with the largest magnitude
/// eigenvalue first and the null vector last.
fn singular_eigen_decomposition(x: Mat3) -> (Mat3, Vec3) {
    let null = Vec3::new(
        x[1] * x[5] - x[2] * x[4],
        x[2] * x[3] - x[5] * x[0],
        x[4] * x[0] - x[1] * x[3],
    )
    .normalize();

    let x12_sqr = x.m12 * x.m12;
    let b = -x.m11 - x.m22 - x.m33;
    let c = -x12_sqr - x.m13 * x.m13 - x.m23 * x.m23 + x.m11 * (x.m22 + x.m33) + x.m22 * x.m33;
    let (mut e1, mut e2) = quadratic_roots(b, c).unwrap_or((0.5 * b, 0.5 * b));
    if e1.abs() < e2.abs() {
        core::mem::swap(&mut e1, &mut e2);
    }

    let mx0011 = -x.m11 * x.m22;
    let prec_0 = x.m12 * x.m23 - x.m13 * x.m22;
    let prec_1 = x.m12 * x.m13 - x.m11 * x.m23;
    let eigenvector = |e: f64| {
        let tmp = 1.0 / (e * (x.m11 + x.m22) + mx0011 - e * e + x12_sqr);
        let a1 = -(e * x.m13 + prec_0) * tmp;
        let a2 = -(e * x.m23 + prec_1) * tmp;
        let rnorm = 1.0 / (a1 * a1 + a2 * a2 + 1.0).sqrt();
        Vec3::new(a1 * rnorm, a2 * rnorm, rnorm)
    };

    (
        Mat3::from_columns(&[eigenvector(e1), eigenvector(e2), null]),
        Vec3::new(e1, e2, 0.0),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use sfm_core::{
        nalgebra::{IsometryMatrix3, Point3},
        sample_consensus::Model,
        NormalizedKeyPoint, WorldPoint,
    };

    #[test]
    fn one_pose_matches_ground_truth() {
        let pose = WorldToCamera(IsometryMatrix3::from_parts(
            Vector3::new(0.1, 0.2, 0.3).into(),
            Rotation3::from_euler_angles(0.1, 0.2, 0.3),
        ));
        let camera_points = [
            Point3::new(-0.228_125, -0.061_458_334, 1.0),
            Point3::new(0.418_75, -0.581_25, 2.0),
            Point3::new(1.128_125, 0.878_125, 3.0),
        ];
        let samples = camera_points.map(|p| {
            let world = WorldPoint(pose.0.inverse() * p);
            FeatureWorldMatch(NormalizedKeyPoint((p / p.z).xy()), world)
        });

        let poses = LambdaTwist::new().poses(samples);
        assert!(!poses.is_empty());
        assert!(poses.iter().all(|candidate| samples
            .iter()
            .all(|sample| candidate.residual(sample) < 1e-6)));
        assert!(poses.iter().any(|candidate| {
            candidate.0.rotation.rotation_to(&pose.0.rotation).angle() < 1e-6
                && (candidate.0.translation.vector - pose.0.translation.vector).norm() < 1e-6
        }));
    }

    #[test]
    fn cubic_root_is_a_root() {
        // (r - 1)(r - 2)(r + 3) = r^3 - 7r + 6
        let r = cubic_root(0.0, -7.0, 6.0);
        assert!((((r * r) * r) - 7.0 * r + 6.0).abs() < 1e-9);
    }
}
