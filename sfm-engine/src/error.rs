use sfm_core::ImageId;
use std::io;
use thiserror::Error;

/// Errors that can occur during reconstruction.
#[derive(Debug, Error)]
pub enum SfmError {
    /// A reconstruction needs two images to start from.
    #[error("need at least two images, got {found}")]
    NotEnoughImages { found: usize },
    /// No pair of images shares enough names to start the reconstruction.
    #[error("the best image pair shares {found} points, but at least {required} are needed")]
    InsufficientCorrespondences { found: usize, required: usize },
    /// An image observes too few reconstructed points to be resected.
    #[error("image {image} observes {found} reconstructed points, but at least {required} are needed")]
    InsufficientPnPCorrespondences {
        image: ImageId,
        found: usize,
        required: usize,
    },
    /// Consensus did not find enough inliers for a pose, or no pose put the points in
    /// front of the cameras.
    #[error("could not recover the pose of image {image} with {inliers} inliers, {required} needed")]
    PoseRecovery {
        image: ImageId,
        inliers: usize,
        required: usize,
    },
    #[error("unknown image {0}")]
    UnknownImage(ImageId),
    /// The external reconstruction program could not be run or failed.
    #[error("external reconstruction failed: {message}")]
    ExternalProcess {
        message: String,
        #[source]
        source: Option<io::Error>,
    },
}

impl SfmError {
    /// Whether the error only concerns one image, so the reconstruction can go on without it.
    ///
    /// A failed pose recovery is only recoverable during registration, since
    /// initialization has no other pose to fall back on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientPnPCorrespondences { .. } | Self::PoseRecovery { .. }
        )
    }

    pub(crate) fn external(message: impl Into<String>) -> Self {
        Self::ExternalProcess {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn external_io(message: impl Into<String>, source: io::Error) -> Self {
        Self::ExternalProcess {
            message: message.into(),
            source: Some(source),
        }
    }
}
