//! # SfM Core
//!
//! Common types shared by every crate of the reconstruction workspace: poses, points,
//! keypoints, matches, the pinhole intrinsics and the store of named correspondences
//! that the reconstruction is built from.
//!
//! Points that share a name across images are the same physical point. Such a set of
//! observations is called a track and is the only source of correspondence the engine has.
//! No feature detection or matching is performed anywhere in this workspace.
//!
//! ## Coordinate frames
//!
//! Camera space for a given camera is defined as thus:
//!
//! * Origin is the optical center
//! * Positive z axis is forwards
//! * Positive y axis is down
//! * Positive x axis is right
//!
//! A [`WorldToCamera`] pose maps a [`WorldPoint`] into a [`CameraPoint`]. The world frame of a
//! reconstruction is the camera frame of the first registered camera, so that camera always sits
//! at the identity pose until a global transform is applied.
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```

mod camera;
mod correspondence;
mod keypoint;
mod matches;
mod point;
mod pose;

pub use camera::*;
pub use correspondence::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use sample_consensus;
