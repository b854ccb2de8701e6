use crate::{NormalizedKeyPoint, WorldPoint};

/// Normalized keypoint match between image `A` (`.0`) and image `B` (`.1`).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FeatureMatch(pub NormalizedKeyPoint, pub NormalizedKeyPoint);

/// Normalized keypoint to world point match
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FeatureWorldMatch(pub NormalizedKeyPoint, pub WorldPoint);
