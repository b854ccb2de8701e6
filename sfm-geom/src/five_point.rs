use crate::EssentialMatrix;
use arrayvec::ArrayVec;
use float_ord::FloatOrd;
use sfm_core::{
    nalgebra::{
        dimension::{U10, U20, U4, U9},
        Matrix3, OMatrix, OVector, Vector3, Vector4,
    },
    sample_consensus::Estimator,
    FeatureMatch,
};

// Monomials of the unknowns `x`, `y`, `z` of `E = x*E0 + y*E1 + z*E2 + E3`.
// The ten cubic monomials come first so that Gauss-Jordan elimination of the constraint
// matrix expresses every cubic monomial in terms of the ten lower degree ones.
const XXX: usize = 0;
const XXY: usize = 1;
const XYY: usize = 2;
const YYY: usize = 3;
const XXZ: usize = 4;
const XYZ: usize = 5;
const YYZ: usize = 6;
const XZZ: usize = 7;
const YZZ: usize = 8;
const ZZZ: usize = 9;
const XX: usize = 10;
const XY: usize = 11;
const YY: usize = 12;
const XZ: usize = 13;
const YZ: usize = 14;
const ZZ: usize = 15;
const X: usize = 16;
const Y: usize = 17;
const Z: usize = 18;
const ONE: usize = 19;

/// A polynomial of degree at most three in `x`, `y` and `z`, indexed by the monomials above.
type Poly = OVector<f64, U20>;
type NullSpace = OMatrix<f64, U9, U4>;
type Constraints = OMatrix<f64, U10, U20>;
type Square10 = OMatrix<f64, U10, U10>;

/// Imaginary parts below this (relative to the real part) are treated as rounding noise.
const REAL_ROOT_TOLERANCE: f64 = 1e-10;
/// Relative size of the smallest singular value for a matrix to be considered singular.
const SINGULAR_TOLERANCE: f64 = 1e-6;

/// Multiplies two linear polynomials `a.x*x + a.y*y + a.z*z + a.w`.
fn linear_times_linear(a: Vector4<f64>, b: Vector4<f64>) -> Poly {
    let mut res = Poly::zeros();
    res[XX] = a.x * b.x;
    res[XY] = a.x * b.y + a.y * b.x;
    res[XZ] = a.x * b.z + a.z * b.x;
    res[YY] = a.y * b.y;
    res[YZ] = a.y * b.z + a.z * b.y;
    res[ZZ] = a.z * b.z;
    res[X] = a.x * b.w + a.w * b.x;
    res[Y] = a.y * b.w + a.w * b.y;
    res[Z] = a.z * b.w + a.w * b.z;
    res[ONE] = a.w * b.w;
    res
}

/// Multiplies a quadratic polynomial by a linear one.
fn quadratic_times_linear(a: &Poly, b: Vector4<f64>) -> Poly {
    let mut res = Poly::zeros();
    res[XXX] = a[XX] * b.x;
    res[XXY] = a[XX] * b.y + a[XY] * b.x;
    res[XXZ] = a[XX] * b.z + a[XZ] * b.x;
    res[XYY] = a[XY] * b.y + a[YY] * b.x;
    res[XYZ] = a[XY] * b.z + a[YZ] * b.x + a[XZ] * b.y;
    res[XZZ] = a[XZ] * b.z + a[ZZ] * b.x;
    res[YYY] = a[YY] * b.y;
    res[YYZ] = a[YY] * b.z + a[YZ] * b.y;
    res[YZZ] = a[YZ] * b.z + a[ZZ] * b.y;
    res[ZZZ] = a[ZZ] * b.z;
    res[XX] = a[XX] * b.w + a[X] * b.x;
    res[XY] = a[XY] * b.w + a[X] * b.y + a[Y] * b.x;
    res[XZ] = a[XZ] * b.w + a[X] * b.z + a[Z] * b.x;
    res[YY] = a[YY] * b.w + a[Y] * b.y;
    res[YZ] = a[YZ] * b.w + a[Y] * b.z + a[Z] * b.y;
    res[ZZ] = a[ZZ] * b.w + a[Z] * b.z;
    res[X] = a[X] * b.w + a[ONE] * b.x;
    res[Y] = a[Y] * b.w + a[ONE] * b.y;
    res[Z] = a[Z] * b.w + a[ONE] * b.z;
    res[ONE] = a[ONE] * b.w;
    res
}

/// Four vectors spanning the space of matrices that satisfy the epipolar constraint of all
/// five matches. Entry `3 * j + k` of each vector multiplies `a_j * b_k`.
fn null_space(a: &[Vector3<f64>; 5], b: &[Vector3<f64>; 5]) -> Option<NullSpace> {
    let mut normal = OMatrix::<f64, U9, U9>::zeros();
    for (a, b) in a.iter().zip(b) {
        let mut row = OVector::<f64, U9>::zeros();
        for j in 0..3 {
            row.fixed_rows_mut::<3>(3 * j).copy_from(&(a[j] * b));
        }
        normal += row * row.transpose();
    }
    let eigen = normal.try_symmetric_eigen(1e-12, 1000)?;
    let mut order = [0, 1, 2, 3, 4, 5, 6, 7, 8];
    order.sort_unstable_by_key(|&ix| FloatOrd(eigen.eigenvalues[ix]));
    let mut basis = NullSpace::zeros();
    for (&ix, mut column) in order.iter().zip(basis.column_iter_mut()) {
        column.copy_from(&eigen.eigenvectors.column(ix));
    }
    Some(basis)
}

/// The ten cubic constraints every essential matrix satisfies, expanded over the null space.
///
/// The first row is `det(E) = 0`, the other nine are `2 E E^T E - trace(E E^T) E = 0`.
/// The basis vectors are laid out so that they describe `E^T`, which satisfies the same
/// constraints.
fn constraint_matrix(basis: &NullSpace) -> Constraints {
    let mut e = [[Vector4::zeros(); 3]; 3];
    for (i, row) in e.iter_mut().enumerate() {
        for (j, entry) in row.iter_mut().enumerate() {
            *entry = basis.row(3 * i + j).transpose();
        }
    }

    let mut m = Constraints::zeros();
    let det = quadratic_times_linear(
        &(linear_times_linear(e[0][1], e[1][2]) - linear_times_linear(e[0][2], e[1][1])),
        e[2][0],
    ) + quadratic_times_linear(
        &(linear_times_linear(e[0][2], e[1][0]) - linear_times_linear(e[0][0], e[1][2])),
        e[2][1],
    ) + quadratic_times_linear(
        &(linear_times_linear(e[0][0], e[1][1]) - linear_times_linear(e[0][1], e[1][0])),
        e[2][2],
    );
    m.row_mut(0).copy_from(&det.transpose());

    let mut eet = [[Poly::zeros(); 3]; 3];
    for i in 0..3 {
        for j in i..3 {
            eet[i][j] = linear_times_linear(e[i][0], e[j][0])
                + linear_times_linear(e[i][1], e[j][1])
                + linear_times_linear(e[i][2], e[j][2]);
            eet[j][i] = eet[i][j];
        }
    }

    let half_trace = 0.5 * (eet[0][0] + eet[1][1] + eet[2][2]);
    for (i, row) in eet.iter_mut().enumerate() {
        row[i] -= half_trace;
    }

    for i in 0..3 {
        for j in 0..3 {
            let entry = quadratic_times_linear(&eet[i][0], e[0][j])
                + quadratic_times_linear(&eet[i][1], e[1][j])
                + quadratic_times_linear(&eet[i][2], e[2][j]);
            m.row_mut(1 + 3 * i + j).copy_from(&entry.transpose());
        }
    }

    m
}

/// Builds the matrix of multiplication by `x` acting on the lower degree monomials
/// `[xx, xy, yy, xz, yz, zz, x, y, z, 1]`, negated.
///
/// After elimination each cubic monomial equals minus a row of `reduced` applied to the lower
/// degree monomials. The vector of lower degree monomials evaluated at a solution is then an
/// eigenvector of the returned matrix with eigenvalue `-x`.
fn action_matrix(reduced: &Square10) -> Square10 {
    let mut at = Square10::zeros();
    // x*xx, x*xy, x*yy are the cubic monomials xxx, xxy, xyy.
    at.fixed_slice_mut::<3, 10>(0, 0)
        .copy_from(&reduced.fixed_slice::<3, 10>(0, 0));
    // x*xz, x*yz, x*zz are xxz, xyz, xzz.
    at.row_mut(3).copy_from(&reduced.row(XXZ));
    at.row_mut(4).copy_from(&reduced.row(XYZ));
    at.row_mut(5).copy_from(&reduced.row(XZZ));
    // x*x, x*y, x*z, x*1 are already lower degree monomials.
    at[(6, 0)] = -1.0;
    at[(7, 1)] = -1.0;
    at[(8, 3)] = -1.0;
    at[(9, 6)] = -1.0;
    at
}

fn null_vector(m: &Square10) -> Option<OVector<f64, U10>> {
    let svd = m.try_svd(false, true, 1e-12, 1000)?;
    if svd.singular_values[9] > SINGULAR_TOLERANCE * svd.singular_values[0].max(1.0) {
        return None;
    }
    Some(svd.v_t?.row(9).transpose())
}

/// Takes in two sets of homogeneous normalized key points.
/// Returns all real essential matrix solutions.
fn five_point_essentials(
    a: &[Vector3<f64>; 5],
    b: &[Vector3<f64>; 5],
) -> ArrayVec<EssentialMatrix, 10> {
    let mut solutions = ArrayVec::new();

    let basis = match null_space(a, b) {
        Some(basis) => basis,
        None => return solutions,
    };
    let constraints = constraint_matrix(&basis);

    // Gauss-Jordan elimination of the cubic monomials.
    let lu = constraints.fixed_slice::<10, 10>(0, 0).full_piv_lu();
    let reduced = match lu.solve(&constraints.fixed_slice::<10, 10>(0, 10).into_owned()) {
        Some(reduced) => reduced,
        None => return solutions,
    };

    let at = action_matrix(&reduced);
    for eigenvalue in at.complex_eigenvalues().iter() {
        if eigenvalue.im.abs() > REAL_ROOT_TOLERANCE * eigenvalue.re.abs().max(1.0) {
            continue;
        }
        let shifted = at - Square10::from_diagonal_element(eigenvalue.re);
        let monomials = match null_vector(&shifted) {
            Some(monomials) => monomials,
            None => continue,
        };
        // The monomial `1` must not vanish for the solution to be finite.
        if monomials[9].abs() < 1e-12 {
            continue;
        }
        // Entries six to nine are `x`, `y`, `z` and `1` up to a common scale.
        let coefficients: Vector4<f64> = monomials.fixed_rows::<4>(6).into_owned();
        let e = basis * coefficients;
        solutions.push(EssentialMatrix(Matrix3::from_iterator(e.iter().copied())));
    }
    solutions
}

/// Implements the 5-point algorithm from the paper "Recent developments on direct relative orientation"
/// by Stewenius, Engels and Nister.
///
/// Estimates up to ten essential matrices from five matches. The relative pose is recovered from
/// the consensus winner with [`EssentialMatrix::recover_pose`].
#[derive(Copy, Clone, Debug, Default)]
pub struct FivePoint;

impl FivePoint {
    pub fn new() -> Self {
        Self
    }
}

impl Estimator<FeatureMatch> for FivePoint {
    type Model = EssentialMatrix;
    type ModelIter = ArrayVec<EssentialMatrix, 10>;
    const MIN_SAMPLES: usize = 5;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch> + Clone,
    {
        let mut a = [Vector3::z(); 5];
        let mut b = [Vector3::z(); 5];
        let mut count = 0;
        for ((a, b), FeatureMatch(ka, kb)) in a.iter_mut().zip(b.iter_mut()).zip(data) {
            *a = ka.bearing_unnormalized();
            *b = kb.bearing_unnormalized();
            count += 1;
        }
        if count < 5 {
            return ArrayVec::new();
        }
        five_point_essentials(&a, &b)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sfm_core::{
        nalgebra::{Point3, Rotation3},
        sample_consensus::Model,
        CameraPoint, CameraToCamera, Pose,
    };

    fn linear(v: Vector4<f64>) -> Poly {
        let mut res = Poly::zeros();
        res[X] = v.x;
        res[Y] = v.y;
        res[Z] = v.z;
        res[ONE] = v.w;
        res
    }

    fn eval(p: &Poly, x: f64, y: f64, z: f64) -> f64 {
        p[XXX] * x * x * x
            + p[XXY] * x * x * y
            + p[XXZ] * x * x * z
            + p[XYY] * x * y * y
            + p[XYZ] * x * y * z
            + p[XZZ] * x * z * z
            + p[YYY] * y * y * y
            + p[YYZ] * y * y * z
            + p[YZZ] * y * z * z
            + p[ZZZ] * z * z * z
            + p[XX] * x * x
            + p[XY] * x * y
            + p[XZ] * x * z
            + p[YY] * y * y
            + p[YZ] * y * z
            + p[ZZ] * z * z
            + p[X] * x
            + p[Y] * y
            + p[Z] * z
            + p[ONE]
    }

    #[test]
    fn products_match_evaluation() {
        let p1 = Vector4::new(0.1, 0.8, 0.3, 0.2);
        let p2 = Vector4::new(0.5, 0.45, 0.82, 0.15);
        let p3 = Vector4::new(-0.3, 0.25, 0.6, -0.9);
        let quadratic = linear_times_linear(p1, p2);
        let cubic = quadratic_times_linear(&quadratic, p3);
        for z in -3..3 {
            for y in -3..3 {
                for x in -3..3 {
                    let (x, y, z) = (x as f64, y as f64, z as f64);
                    let l1 = eval(&linear(p1), x, y, z);
                    let l2 = eval(&linear(p2), x, y, z);
                    let l3 = eval(&linear(p3), x, y, z);
                    assert!((eval(&quadratic, x, y, z) - l1 * l2).abs() < 1e-9);
                    assert!((eval(&cubic, x, y, z) - l1 * l2 * l3).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn one_solution_matches_ground_truth() {
        let pose = CameraToCamera::from_parts(
            Vector3::new(-0.9, 0.15, 0.2),
            Rotation3::from_euler_angles(0.05, 0.18, -0.04),
        );
        let points = [
            [0.1, 0.2, 4.0],
            [-0.4, 0.3, 5.0],
            [0.6, -0.5, 3.5],
            [-0.2, -0.6, 6.0],
            [0.9, 0.8, 4.5],
        ];
        let matches: Vec<FeatureMatch> = points
            .iter()
            .map(|&[x, y, z]| {
                let point = CameraPoint(Point3::new(x, y, z));
                FeatureMatch(
                    point.project().unwrap(),
                    pose.transform(point).project().unwrap(),
                )
            })
            .collect();

        let solutions = FivePoint.estimate(matches.iter().copied());
        assert!(!solutions.is_empty());
        for essential in &solutions {
            for m in &matches {
                assert!(essential.residual(m) < 1e-8);
            }
        }

        let truth = EssentialMatrix::from(pose).0.normalize();
        let found = solutions.iter().any(|essential| {
            let candidate = essential.0.normalize();
            (candidate - truth).norm() < 1e-6 || (candidate + truth).norm() < 1e-6
        });
        assert!(found);
    }
}
