//! Computational geometry used by the reconstruction engine.
//!
//! This crate contains the minimal solvers ([`FivePoint`], [`EightPoint`], [`LambdaTwist`],
//! [`DltPnp`]), the [`EssentialMatrix`] and its decomposition into relative poses, and the
//! [`LinearEigenTriangulator`] with the gates that decide whether a triangulated point is
//! trustworthy.
//!
//! Every solver implements [`Estimator`](sfm_core::sample_consensus::Estimator), so any
//! consensus algorithm from the `sample-consensus` ecosystem, such as `arrsac`, can drive them.

mod dlt;
mod eight_point;
mod essential;
mod five_point;
mod p3p;
mod triangulation;

pub use dlt::*;
pub use eight_point::*;
pub use essential::*;
pub use five_point::*;
pub use p3p::*;
pub use triangulation::*;
