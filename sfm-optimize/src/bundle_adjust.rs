use core::cell::{Cell, RefCell};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::{debug, warn};
use sfm_core::nalgebra::{
    dimension::Dynamic, storage::Owned, DMatrix, DVector, Point3, Rotation3, Vector2, Vector3,
    Vector6,
};
use sfm_core::{CameraIntrinsics, KeyPoint, Pose, WorldPoint, WorldToCamera};

/// Residual given to both pixel components of an observation that lands behind its camera.
///
/// It is finite so the solver can still compare costs, and large enough that no step which
/// moves a point behind a camera is ever accepted.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e4;

/// A pixel observation of the point at index `point` by the camera at index `camera`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub camera: usize,
    pub point: usize,
    pub keypoint: KeyPoint,
}

/// The summary of one bundle adjustment run.
///
/// Costs are half the sum of squared pixel residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleAdjustReport {
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Residual evaluations requested by the solver.
    pub evaluations: usize,
    /// Jacobian evaluations, one per solver iteration.
    pub iterations: usize,
    /// `false` if a cap was hit or the solver stopped for a numerical reason.
    pub converged: bool,
    pub termination: String,
}

/// The refined poses and points, in the order they were given to the [`BundleAdjuster`].
#[derive(Debug, Clone)]
pub struct BundleAdjustment {
    pub poses: Vec<WorldToCamera>,
    pub points: Vec<WorldPoint>,
    pub report: BundleAdjustReport,
}

/// Refines poses and points to minimize the pixel reprojection error of every observation.
///
/// Each camera is parameterized by its axis-angle rotation and its translation, and each
/// point by its coordinates. The intrinsics are held fixed, as are the cameras passed to
/// [`BundleAdjuster::fix_camera`]. The parameter vector is laid out as all free cameras
/// followed by all points.
///
/// The Jacobian is computed with forward differences, where each observation only perturbs
/// the parameters of its own camera and point.
///
/// The best parameters ever evaluated are returned, so the final cost never exceeds the
/// initial cost, even when the solver stops on a cap.
#[derive(Debug, Clone)]
pub struct BundleAdjuster {
    intrinsics: CameraIntrinsics,
    poses: Vec<WorldToCamera>,
    points: Vec<WorldPoint>,
    observations: Vec<Observation>,
    fixed: Vec<bool>,
    max_evaluations: usize,
    max_iterations: usize,
    epsilon: f64,
    tolerance: f64,
}

impl BundleAdjuster {
    /// Observations which refer to a camera or point that was not given are dropped.
    pub fn new(
        intrinsics: CameraIntrinsics,
        poses: Vec<WorldToCamera>,
        points: Vec<WorldPoint>,
        observations: Vec<Observation>,
    ) -> Self {
        let total = observations.len();
        let observations: Vec<Observation> = observations
            .into_iter()
            .filter(|o| o.camera < poses.len() && o.point < points.len())
            .collect();
        if observations.len() != total {
            warn!(
                "dropped {} observations referring to missing cameras or points",
                total - observations.len()
            );
        }
        let fixed = vec![false; poses.len()];
        Self {
            intrinsics,
            poses,
            points,
            observations,
            fixed,
            max_evaluations: 200,
            max_iterations: 200,
            epsilon: 1e-6,
            tolerance: 1e-10,
        }
    }

    /// Keeps the pose of the camera at index `camera` exactly as it was given.
    ///
    /// Fixing one camera removes the freedom to move the whole reconstruction rigidly.
    #[must_use]
    pub fn fix_camera(mut self, camera: usize) -> Self {
        if let Some(fixed) = self.fixed.get_mut(camera) {
            *fixed = true;
        }
        self
    }

    /// The most residual evaluations the solver may request. Default is `200`.
    #[must_use]
    pub fn max_evaluations(self, max_evaluations: usize) -> Self {
        Self {
            max_evaluations,
            ..self
        }
    }

    /// The most solver iterations. Default is `200`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// The forward difference step of the Jacobian. Default is `1e-6`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// The relative reduction of the cost and of the parameters below which the solver
    /// considers itself converged. Default is `1e-10`.
    #[must_use]
    pub fn tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    pub fn solve(self) -> BundleAdjustment {
        if self.observations.is_empty() {
            return BundleAdjustment {
                poses: self.poses,
                points: self.points,
                report: BundleAdjustReport {
                    initial_cost: 0.0,
                    final_cost: 0.0,
                    evaluations: 0,
                    iterations: 0,
                    converged: true,
                    termination: "no observations".into(),
                },
            };
        }

        let problem = ReprojectionProblem::new(&self);
        let initial_cost = problem.best.borrow().0;

        let patience = self.max_evaluations.max(1);
        let (problem, report) = LevenbergMarquardt::new()
            .with_ftol(self.tolerance)
            .with_xtol(self.tolerance)
            .with_patience(patience)
            .minimize(problem);

        let evaluations = problem.evaluations.get();
        let iterations = problem.iterations.get();
        let capped = evaluations > self.max_evaluations || iterations > self.max_iterations;
        let converged = report.termination.was_successful() && !capped;
        let (final_cost, params) = problem.best.into_inner();
        let termination = if capped {
            format!("cap reached ({:?})", report.termination)
        } else {
            format!("{:?}", report.termination)
        };

        if converged {
            debug!(
                "bundle adjustment converged after {} evaluations, cost {} -> {}",
                evaluations, initial_cost, final_cost
            );
        } else {
            warn!(
                "bundle adjustment stopped without converging: {}, cost {} -> {}",
                termination, initial_cost, final_cost
            );
        }

        let layout = Layout::new(&self.fixed);
        BundleAdjustment {
            poses: self
                .poses
                .iter()
                .zip(&layout.slots)
                .map(|(&pose, slot)| match slot {
                    Some(slot) => pose_from_camera_params(&slot_params(&params, *slot)),
                    None => pose,
                })
                .collect(),
            points: (0..self.points.len())
                .map(|ix| WorldPoint(Point3::from(layout.point(&params, ix))))
                .collect(),
            report: BundleAdjustReport {
                initial_cost,
                final_cost,
                evaluations,
                iterations,
                converged,
                termination,
            },
        }
    }
}

fn camera_to_params(pose: WorldToCamera) -> Vector6<f64> {
    let isometry = pose.isometry();
    let rotation = isometry.rotation.scaled_axis();
    let translation = isometry.translation.vector;
    Vector6::new(
        rotation.x,
        rotation.y,
        rotation.z,
        translation.x,
        translation.y,
        translation.z,
    )
}

fn pose_from_camera_params(camera: &Vector6<f64>) -> WorldToCamera {
    WorldToCamera::from_parts(
        camera.fixed_rows::<3>(3).into_owned(),
        Rotation3::new(camera.fixed_rows::<3>(0).into_owned()),
    )
}

fn slot_params(params: &DVector<f64>, slot: usize) -> Vector6<f64> {
    params.fixed_rows::<6>(6 * slot).into_owned()
}

/// Where each camera and point lives in the parameter vector.
struct Layout {
    /// The block of each camera, or `None` for a fixed camera.
    slots: Vec<Option<usize>>,
    free: usize,
}

impl Layout {
    fn new(fixed: &[bool]) -> Self {
        let mut free = 0;
        let slots = fixed
            .iter()
            .map(|&fixed| {
                if fixed {
                    None
                } else {
                    free += 1;
                    Some(free - 1)
                }
            })
            .collect();
        Self { slots, free }
    }

    fn point_offset(&self) -> usize {
        6 * self.free
    }

    fn point(&self, params: &DVector<f64>, point: usize) -> Vector3<f64> {
        params
            .fixed_rows::<3>(self.point_offset() + 3 * point)
            .into_owned()
    }
}

struct ReprojectionProblem<'a> {
    intrinsics: CameraIntrinsics,
    observations: &'a [Observation],
    layout: Layout,
    /// The parameters of every camera as given, used for the fixed ones.
    initial_cameras: Vec<Vector6<f64>>,
    params: DVector<f64>,
    epsilon: f64,
    max_evaluations: usize,
    max_iterations: usize,
    evaluations: Cell<usize>,
    iterations: Cell<usize>,
    /// The lowest cost evaluated so far and its parameters.
    best: RefCell<(f64, DVector<f64>)>,
}

impl<'a> ReprojectionProblem<'a> {
    fn new(adjuster: &'a BundleAdjuster) -> Self {
        let layout = Layout::new(&adjuster.fixed);
        let initial_cameras: Vec<Vector6<f64>> =
            adjuster.poses.iter().map(|&pose| camera_to_params(pose)).collect();
        let mut params = Vec::with_capacity(layout.point_offset() + 3 * adjuster.points.len());
        for (camera, slot) in initial_cameras.iter().zip(&layout.slots) {
            if slot.is_some() {
                params.extend_from_slice(camera.as_slice());
            }
        }
        for point in &adjuster.points {
            params.extend_from_slice(point.0.coords.as_slice());
        }
        let params = DVector::from_vec(params);
        let mut problem = Self {
            intrinsics: adjuster.intrinsics,
            observations: &adjuster.observations,
            layout,
            initial_cameras,
            params: params.clone(),
            epsilon: adjuster.epsilon,
            max_evaluations: adjuster.max_evaluations,
            max_iterations: adjuster.max_iterations,
            evaluations: Cell::new(0),
            iterations: Cell::new(0),
            best: RefCell::new((0.0, params)),
        };
        let cost = problem.cost(&problem.all_residuals());
        problem.best.get_mut().0 = cost;
        problem
    }

    fn camera(&self, camera: usize) -> Vector6<f64> {
        match self.layout.slots[camera] {
            Some(slot) => slot_params(&self.params, slot),
            None => self.initial_cameras[camera],
        }
    }

    fn observation_residual(
        &self,
        camera: &Vector6<f64>,
        point: &Vector3<f64>,
        observation: &Observation,
    ) -> Vector2<f64> {
        self.intrinsics
            .project(
                pose_from_camera_params(camera),
                WorldPoint(Point3::from(*point)),
            )
            .map(|projection| projection.0 - observation.keypoint.0)
            .unwrap_or_else(|| Vector2::repeat(BEHIND_CAMERA_RESIDUAL))
    }

    fn all_residuals(&self) -> DVector<f64> {
        let mut residuals = DVector::zeros(2 * self.observations.len());
        for (ix, observation) in self.observations.iter().enumerate() {
            let camera = self.camera(observation.camera);
            let point = self.layout.point(&self.params, observation.point);
            residuals
                .fixed_rows_mut::<2>(2 * ix)
                .copy_from(&self.observation_residual(&camera, &point, observation));
        }
        residuals
    }

    fn cost(&self, residuals: &DVector<f64>) -> f64 {
        0.5 * residuals.norm_squared()
    }
}

impl<'a> LeastSquaresProblem<f64, Dynamic, Dynamic> for ReprojectionProblem<'a> {
    type ResidualStorage = Owned<f64, Dynamic>;
    type JacobianStorage = Owned<f64, Dynamic, Dynamic>;
    type ParameterStorage = Owned<f64, Dynamic>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let evaluations = self.evaluations.get() + 1;
        self.evaluations.set(evaluations);
        if evaluations > self.max_evaluations {
            return None;
        }

        let residuals = self.all_residuals();
        let cost = self.cost(&residuals);
        if !cost.is_finite() {
            return None;
        }
        let mut best = self.best.borrow_mut();
        if cost < best.0 {
            *best = (cost, self.params.clone());
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let iterations = self.iterations.get() + 1;
        self.iterations.set(iterations);
        if iterations > self.max_iterations {
            return None;
        }

        let point_offset = self.layout.point_offset();
        let mut jacobian = DMatrix::zeros(2 * self.observations.len(), self.params.len());
        for (row, observation) in self.observations.iter().enumerate() {
            let camera = self.camera(observation.camera);
            let point = self.layout.point(&self.params, observation.point);
            let base = self.observation_residual(&camera, &point, observation);

            if let Some(slot) = self.layout.slots[observation.camera] {
                for k in 0..6 {
                    let mut perturbed = camera;
                    perturbed[k] += self.epsilon;
                    let derivative = (self.observation_residual(&perturbed, &point, observation)
                        - base)
                        / self.epsilon;
                    jacobian
                        .fixed_slice_mut::<2, 1>(2 * row, 6 * slot + k)
                        .copy_from(&derivative);
                }
            }
            for k in 0..3 {
                let mut perturbed = point;
                perturbed[k] += self.epsilon;
                let derivative =
                    (self.observation_residual(&camera, &perturbed, observation) - base) / self.epsilon;
                jacobian
                    .fixed_slice_mut::<2, 1>(2 * row, point_offset + 3 * observation.point + k)
                    .copy_from(&derivative);
            }
        }
        Some(jacobian)
    }
}
