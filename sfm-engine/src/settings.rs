#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for the reconstruction process.
///
/// Distances are in pixels and angles in degrees.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SfmSettings {
    /// The minimum number of names shared by the two images that start the reconstruction.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_common_points")
    )]
    pub min_common_points: usize,
    /// The maximum reprojection error of a triangulated point or an attached observation.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_reprojection_error")
    )]
    pub max_reprojection_error: f64,
    /// The minimum angle between the two rays that triangulate a new point.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_triangulation_angle_deg")
    )]
    pub min_triangulation_angle_deg: f64,
    /// The minimum number of consensus inliers needed to place a camera.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_inliers_for_camera")
    )]
    pub min_inliers_for_camera: usize,
    /// The minimum number of reconstructed points an image must observe to attempt resection.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_min_points_for_resection")
    )]
    pub min_points_for_resection: usize,
    /// Run bundle adjustment after every camera that is registered.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_enable_incremental_ba")
    )]
    pub enable_incremental_ba: bool,
    /// The maximum residual evaluations of an incremental bundle adjustment.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_evaluations")
    )]
    pub max_evaluations: usize,
    /// The maximum iterations of an incremental bundle adjustment.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// The maximum residual evaluations of the final bundle adjustment.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_final_max_evaluations")
    )]
    pub final_max_evaluations: usize,
    /// The maximum iterations of the final bundle adjustment.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_final_max_iterations")
    )]
    pub final_max_iterations: usize,
    /// The focal length is estimated as this factor times the longest image side.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_focal_scale"))]
    pub focal_scale: f64,
    /// The inlier threshold of essential matrix consensus.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_essential_threshold")
    )]
    pub essential_threshold: f64,
    /// The most hypotheses drawn by essential matrix consensus.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_essential_max_iterations")
    )]
    pub essential_max_iterations: usize,
    /// The inlier threshold of camera resection consensus.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_pnp_threshold"))]
    pub pnp_threshold: f64,
    /// The most hypotheses drawn by the linear resection consensus.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_pnp_max_iterations")
    )]
    pub pnp_max_iterations: usize,
    /// The most hypotheses drawn by the P3P consensus tried when the linear one fails.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_pnp_fallback_max_iterations")
    )]
    pub pnp_fallback_max_iterations: usize,
    /// How many times an image may be tried for registration in total.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_max_resection_attempts")
    )]
    pub max_resection_attempts: usize,
    /// The forward difference step of the bundle adjustment Jacobian.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_jacobian_epsilon")
    )]
    pub jacobian_epsilon: f64,
    /// The relative improvement below which bundle adjustment stops.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_ba_tolerance"))]
    pub ba_tolerance: f64,
    /// Seeds the random number generator of every consensus process.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_seed"))]
    pub seed: u64,
}

impl Default for SfmSettings {
    fn default() -> Self {
        Self {
            min_common_points: default_min_common_points(),
            max_reprojection_error: default_max_reprojection_error(),
            min_triangulation_angle_deg: default_min_triangulation_angle_deg(),
            min_inliers_for_camera: default_min_inliers_for_camera(),
            min_points_for_resection: default_min_points_for_resection(),
            enable_incremental_ba: default_enable_incremental_ba(),
            max_evaluations: default_max_evaluations(),
            max_iterations: default_max_iterations(),
            final_max_evaluations: default_final_max_evaluations(),
            final_max_iterations: default_final_max_iterations(),
            focal_scale: default_focal_scale(),
            essential_threshold: default_essential_threshold(),
            essential_max_iterations: default_essential_max_iterations(),
            pnp_threshold: default_pnp_threshold(),
            pnp_max_iterations: default_pnp_max_iterations(),
            pnp_fallback_max_iterations: default_pnp_fallback_max_iterations(),
            max_resection_attempts: default_max_resection_attempts(),
            jacobian_epsilon: default_jacobian_epsilon(),
            ba_tolerance: default_ba_tolerance(),
            seed: default_seed(),
        }
    }
}

fn default_min_common_points() -> usize {
    5
}

fn default_max_reprojection_error() -> f64 {
    6.0
}

fn default_min_triangulation_angle_deg() -> f64 {
    3.0
}

fn default_min_inliers_for_camera() -> usize {
    6
}

fn default_min_points_for_resection() -> usize {
    4
}

fn default_enable_incremental_ba() -> bool {
    true
}

fn default_max_evaluations() -> usize {
    200
}

fn default_max_iterations() -> usize {
    200
}

fn default_final_max_evaluations() -> usize {
    5000
}

fn default_final_max_iterations() -> usize {
    5000
}

fn default_focal_scale() -> f64 {
    1.2
}

fn default_essential_threshold() -> f64 {
    1.0
}

fn default_essential_max_iterations() -> usize {
    10000
}

fn default_pnp_threshold() -> f64 {
    10.0
}

fn default_pnp_max_iterations() -> usize {
    100
}

fn default_pnp_fallback_max_iterations() -> usize {
    200
}

fn default_max_resection_attempts() -> usize {
    2
}

fn default_jacobian_epsilon() -> f64 {
    1e-6
}

fn default_ba_tolerance() -> f64 {
    1e-10
}

fn default_seed() -> u64 {
    0
}

#[cfg(all(test, feature = "serde-serialize"))]
mod test {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: SfmSettings =
            serde_json::from_str(r#"{ "max_reprojection_error": 2.5, "seed": 42 }"#).unwrap();
        assert_eq!(settings.max_reprojection_error, 2.5);
        assert_eq!(settings.seed, 42);
        assert_eq!(
            SfmSettings {
                max_reprojection_error: 2.5,
                seed: 42,
                ..SfmSettings::default()
            },
            settings
        );
    }
}
