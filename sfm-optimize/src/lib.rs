//! Nonlinear refinement of reconstructions.
//!
//! [`BundleAdjuster`] jointly refines camera poses and point positions with
//! Levenberg-Marquardt so that the total squared pixel reprojection error is minimal.

mod bundle_adjust;

pub use bundle_adjust::*;
