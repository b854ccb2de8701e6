use crate::KeyPoint;
use derive_more::{AsRef, Display, From, Into};
use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The unique key of an image, usually its file name or path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, AsRef, Display, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(transparent))]
pub struct ImageId(pub String);

impl From<&str> for ImageId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// The user-assigned name of a physical point. Every keypoint sharing a name,
/// across all images, observes the same point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, AsRef, Display, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(transparent))]
pub struct TrackName(pub String);

impl From<&str> for TrackName {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// The position of an image in the [`CorrespondenceStore`].
///
/// Images are enumerated in the order they were added, which makes every
/// iteration over images deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
pub struct ImageIndex(pub usize);

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ImageInfo {
    pub id: ImageId,
    pub width: u32,
    pub height: u32,
}

/// All of the named 2d points of a set of images.
///
/// The points are stored by track, `TrackName -> {ImageIndex -> KeyPoint}`, so that finding
/// every image observing a name or every name shared by two images never needs to rescan
/// the per-image point lists.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceStore {
    images: Vec<ImageInfo>,
    lookup: HashMap<ImageId, ImageIndex>,
    tracks: BTreeMap<TrackName, BTreeMap<ImageIndex, KeyPoint>>,
}

impl CorrespondenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an image and returns its index.
    ///
    /// Adding an id a second time updates its dimensions and returns the existing index.
    pub fn add_image(&mut self, id: impl Into<ImageId>, width: u32, height: u32) -> ImageIndex {
        let id = id.into();
        if let Some(&index) = self.lookup.get(&id) {
            let info = &mut self.images[index.0];
            info.width = width;
            info.height = height;
            return index;
        }
        let index = ImageIndex(self.images.len());
        self.lookup.insert(id.clone(), index);
        self.images.push(ImageInfo { id, width, height });
        index
    }

    /// Places the named point on an image.
    ///
    /// Names are unique per image, so this replaces and returns any point of the same
    /// name already on the image. Returns `None` without inserting if the image doesn't exist.
    pub fn insert(
        &mut self,
        image: ImageIndex,
        name: impl Into<TrackName>,
        point: KeyPoint,
    ) -> Option<Option<KeyPoint>> {
        if image.0 >= self.images.len() {
            return None;
        }
        Some(
            self.tracks
                .entry(name.into())
                .or_default()
                .insert(image, point),
        )
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> impl Iterator<Item = (ImageIndex, &ImageInfo)> + '_ {
        self.images
            .iter()
            .enumerate()
            .map(|(ix, info)| (ImageIndex(ix), info))
    }

    pub fn image(&self, image: ImageIndex) -> Option<&ImageInfo> {
        self.images.get(image.0)
    }

    pub fn image_index(&self, id: &ImageId) -> Option<ImageIndex> {
        self.lookup.get(id).copied()
    }

    /// Every track with its observations, in name order.
    pub fn tracks(&self) -> impl Iterator<Item = (&TrackName, &BTreeMap<ImageIndex, KeyPoint>)> + '_ {
        self.tracks.iter()
    }

    pub fn track(&self, name: &TrackName) -> Option<&BTreeMap<ImageIndex, KeyPoint>> {
        self.tracks.get(name)
    }

    pub fn observation(&self, image: ImageIndex, name: &TrackName) -> Option<KeyPoint> {
        self.tracks.get(name)?.get(&image).copied()
    }

    /// All named points of one image, in name order.
    pub fn image_points(
        &self,
        image: ImageIndex,
    ) -> impl Iterator<Item = (&TrackName, KeyPoint)> + '_ {
        self.tracks
            .iter()
            .filter_map(move |(name, track)| track.get(&image).map(|&point| (name, point)))
    }

    /// The names observed by both images with the pair of observations, in name order.
    pub fn common_points(
        &self,
        a: ImageIndex,
        b: ImageIndex,
    ) -> impl Iterator<Item = (&TrackName, KeyPoint, KeyPoint)> + '_ {
        self.tracks.iter().filter_map(move |(name, track)| {
            Some((name, *track.get(&a)?, *track.get(&b)?))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_names_replace_the_point() {
        let mut store = CorrespondenceStore::new();
        let image = store.add_image("a.jpg", 100, 100);
        assert_eq!(store.insert(image, "corner", KeyPoint::new(1.0, 2.0)), Some(None));
        assert_eq!(
            store.insert(image, "corner", KeyPoint::new(3.0, 4.0)),
            Some(Some(KeyPoint::new(1.0, 2.0)))
        );
        assert_eq!(store.image_points(image).count(), 1);
        assert_eq!(
            store.observation(image, &"corner".into()),
            Some(KeyPoint::new(3.0, 4.0))
        );
    }

    #[test]
    fn unknown_image_is_rejected() {
        let mut store = CorrespondenceStore::new();
        assert_eq!(store.insert(ImageIndex(0), "corner", KeyPoint::new(1.0, 2.0)), None);
        assert_eq!(store.tracks().count(), 0);
    }

    #[test]
    fn common_points_are_name_matched() {
        let mut store = CorrespondenceStore::new();
        let a = store.add_image("a.jpg", 100, 100);
        let b = store.add_image("b.jpg", 100, 100);
        store.insert(a, "p1", KeyPoint::new(1.0, 1.0));
        store.insert(a, "p2", KeyPoint::new(2.0, 2.0));
        store.insert(b, "p2", KeyPoint::new(5.0, 5.0));
        store.insert(b, "p3", KeyPoint::new(6.0, 6.0));
        let common: Vec<_> = store.common_points(a, b).collect();
        assert_eq!(common.len(), 1);
        assert_eq!(common[0].0, &TrackName::from("p2"));
        assert_eq!(common[0].1, KeyPoint::new(2.0, 2.0));
        assert_eq!(common[0].2, KeyPoint::new(5.0, 5.0));
    }

    #[test]
    fn re_adding_image_keeps_index() {
        let mut store = CorrespondenceStore::new();
        let a = store.add_image("a.jpg", 100, 100);
        let again = store.add_image("a.jpg", 200, 50);
        assert_eq!(a, again);
        assert_eq!(store.num_images(), 1);
        assert_eq!(store.image(a).unwrap().width, 200);
    }
}
