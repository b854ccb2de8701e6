//! # SfM Engine
//!
//! Incremental structure from motion over manually named correspondences.
//!
//! The [`Engine`] takes a [`CorrespondenceStore`] and builds a [`Reconstruction`]:
//!
//! 1. The two images sharing the most names are selected with [`select_initial_pair`].
//! 2. Their relative pose is estimated from the essential matrix and the first points are
//!    triangulated by [`initialize`].
//! 3. The other images are registered with [`resect`] one at a time, always the one which
//!    observes the most reconstructed points first. After each, the names it shares with
//!    registered images are triangulated by [`triangulate_camera`] and, optionally, the whole
//!    reconstruction is bundle adjusted.
//! 4. Names that are still missing are tried once more over every pair of cameras by
//!    [`triangulate_remaining`], followed by a final bundle adjustment.
//! 5. The [`GlobalTransform`] is applied.
//!
//! Images which can't be registered are skipped and reported in [`SfmOutput`]. All random
//! sampling is driven by one seeded generator, so a run is reproducible.

mod error;
mod export;
mod external;
mod init;
mod pair;
mod reconstruction;
mod resection;
mod settings;
mod transform;
mod triangulate;

pub use error::*;
pub use export::*;
pub use external::*;
pub use init::*;
pub use pair::*;
pub use reconstruction::*;
pub use resection::*;
pub use settings::*;
pub use transform::*;
pub use triangulate::*;

use log::{info, warn};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use sfm_core::nalgebra::{Rotation3, Vector3};
use sfm_core::{CameraIntrinsics, CorrespondenceStore, ImageId, ImageIndex};
use sfm_optimize::BundleAdjustReport;
use std::cell::RefCell;
use std::cmp::Reverse;

/// The result of [`Engine::reconstruct`].
#[derive(Debug, Clone)]
pub struct SfmOutput {
    pub reconstruction: Reconstruction,
    /// Images that never got a camera, in image order.
    pub skipped_images: Vec<ImageId>,
    /// Every bundle adjustment that ran, the final one last.
    pub adjustments: Vec<BundleAdjustReport>,
}

impl SfmOutput {
    pub fn cloud(&self) -> Vec<CloudPoint> {
        self.reconstruction.cloud()
    }
}

/// An image waiting to be registered.
#[derive(Debug, Clone, Copy)]
struct Pending {
    image: ImageIndex,
    attempts: usize,
    /// The number of points in the cloud when the last attempt failed.
    failed_at: Option<usize>,
    registered: bool,
}

impl Pending {
    /// Whether the image may be tried with a cloud of `points` points.
    fn is_ready(&self, points: usize, max_attempts: usize) -> bool {
        !self.registered
            && self.attempts < max_attempts
            && self.failed_at.map_or(true, |size| points > size)
    }
}

/// The number of names on `image` which already have a point.
fn known_points(
    reconstruction: &Reconstruction,
    store: &CorrespondenceStore,
    image: ImageIndex,
) -> usize {
    store
        .image_points(image)
        .filter(|(name, _)| reconstruction.named_point(name).is_some())
        .count()
}

pub struct Engine<R = Xoshiro256PlusPlus> {
    /// Settings variables
    pub settings: SfmSettings,
    /// Applied to the cloud and the cameras as the last step
    pub transform: GlobalTransform,
    /// The random number generator
    pub rng: RefCell<R>,
}

impl Engine<Xoshiro256PlusPlus> {
    /// Creates an engine whose generator is seeded from `settings.seed`.
    pub fn new(settings: SfmSettings) -> Self {
        Self::with_rng(settings, Xoshiro256PlusPlus::seed_from_u64(settings.seed))
    }
}

impl Default for Engine<Xoshiro256PlusPlus> {
    fn default() -> Self {
        Self::new(SfmSettings::default())
    }
}

impl<R> Engine<R>
where
    R: RngCore,
{
    pub fn with_rng(settings: SfmSettings, rng: R) -> Self {
        Self {
            settings,
            transform: GlobalTransform::identity(),
            rng: RefCell::new(rng),
        }
    }

    /// Sets `Rg` of the global transform `X' = Rg·X + Tg`.
    pub fn set_rotation(&mut self, rotation: Rotation3<f64>) {
        self.transform.rotation = rotation;
    }

    /// Sets `Tg` of the global transform `X' = Rg·X + Tg`.
    pub fn set_translation(&mut self, translation: Vector3<f64>) {
        self.transform.translation = translation;
    }

    /// Applies the global transform to a reconstruction.
    pub fn apply_transform(&self, reconstruction: &mut Reconstruction) {
        if !self.transform.is_identity() {
            reconstruction.apply_transform(self.transform.to_world_to_world());
        }
    }

    fn incremental_options(&self) -> AdjustOptions {
        AdjustOptions {
            max_evaluations: self.settings.max_evaluations,
            max_iterations: self.settings.max_iterations,
            epsilon: self.settings.jacobian_epsilon,
            tolerance: self.settings.ba_tolerance,
        }
    }

    fn final_options(&self) -> AdjustOptions {
        AdjustOptions {
            max_evaluations: self.settings.final_max_evaluations,
            max_iterations: self.settings.final_max_iterations,
            ..self.incremental_options()
        }
    }

    /// Reconstructs every image of the store that can be registered.
    ///
    /// Fails if no pair of images can start a reconstruction. Each step tries the image that
    /// observes the most reconstructed points, the earliest one on ties, and images that
    /// observe fewer than `min_points_for_resection` are not tried. An image that can't be
    /// registered is retried once the cloud has grown, up to `max_resection_attempts`
    /// attempts, and is skipped after that.
    pub fn reconstruct(&self, store: &CorrespondenceStore) -> Result<SfmOutput, SfmError> {
        let settings = &self.settings;
        let pair = select_initial_pair(store, settings.min_common_points)?;
        let seed = store
            .image(pair.a)
            .ok_or_else(|| SfmError::UnknownImage(format!("#{}", pair.a).into()))?;
        let intrinsics =
            CameraIntrinsics::estimate(seed.width, seed.height, settings.focal_scale);
        info!(
            "estimated focal length {} from image {}",
            intrinsics.mean_focal(),
            seed.id
        );

        let mut reconstruction =
            initialize(store, intrinsics, pair, settings, &mut *self.rng.borrow_mut())?;
        let mut adjustments = vec![];

        let mut pending: Vec<Pending> = store
            .images()
            .map(|(image, _)| image)
            .filter(|&image| image != pair.a && image != pair.b)
            .map(|image| Pending {
                image,
                attempts: 0,
                failed_at: None,
                registered: false,
            })
            .collect();

        loop {
            let points = reconstruction.num_points();
            let next = pending
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.is_ready(points, settings.max_resection_attempts))
                .map(|(ix, entry)| (ix, known_points(&reconstruction, store, entry.image)))
                .filter(|&(_, known)| known >= settings.min_points_for_resection)
                .min_by_key(|&(ix, known)| (Reverse(known), ix));
            let entry = match next {
                Some((ix, _)) => &mut pending[ix],
                None => break,
            };
            entry.attempts += 1;

            match resect(
                &mut reconstruction,
                store,
                entry.image,
                settings,
                &mut *self.rng.borrow_mut(),
            ) {
                Ok(resection) => {
                    entry.registered = true;
                    let camera = resection.camera;
                    triangulate_camera(&mut reconstruction, store, camera, settings);
                    if settings.enable_incremental_ba {
                        let options = self.incremental_options();
                        adjustments.push(reconstruction.bundle_adjust(options));
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!("attempt {} failed: {}", entry.attempts, e);
                    entry.failed_at = Some(reconstruction.num_points());
                }
                Err(e) => return Err(e),
            }
        }

        triangulate_remaining(&mut reconstruction, store, settings);
        adjustments.push(reconstruction.bundle_adjust(self.final_options()));

        self.apply_transform(&mut reconstruction);

        let skipped_images: Vec<ImageId> = pending
            .iter()
            .filter(|entry| !entry.registered)
            .filter_map(|entry| store.image(entry.image))
            .map(|info| info.id.clone())
            .collect();
        for id in &skipped_images {
            warn!("skipped image {}", id);
        }
        info!(
            "reconstructed {} points from {} cameras",
            reconstruction.num_points(),
            reconstruction.num_cameras()
        );

        Ok(SfmOutput {
            reconstruction,
            skipped_images,
            adjustments,
        })
    }
}
