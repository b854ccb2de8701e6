use crate::SfmError;
use itertools::Itertools;
use log::info;
use sfm_core::{CorrespondenceStore, ImageIndex};
use std::collections::HashMap;

/// Two images and the number of names they share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePair {
    pub a: ImageIndex,
    pub b: ImageIndex,
    pub common: usize,
}

/// Picks the two images sharing the most names to start the reconstruction.
///
/// Pairs are visited as `(i, j)` with `i < j` in image order and ties keep the first pair,
/// so the result only depends on the order images were added.
pub fn select_initial_pair(
    store: &CorrespondenceStore,
    min_common: usize,
) -> Result<ImagePair, SfmError> {
    let num_images = store.num_images();
    if num_images < 2 {
        return Err(SfmError::NotEnoughImages { found: num_images });
    }

    let mut counts: HashMap<(ImageIndex, ImageIndex), usize> = HashMap::new();
    for (_, track) in store.tracks() {
        // Track images are sorted, so every combination is already ordered.
        for (&a, &b) in track.keys().tuple_combinations() {
            *counts.entry((a, b)).or_default() += 1;
        }
    }

    let mut best: Option<ImagePair> = None;
    for (a, b) in (0..num_images).tuple_combinations() {
        let (a, b) = (ImageIndex(a), ImageIndex(b));
        let common = counts.get(&(a, b)).copied().unwrap_or(0);
        if best.map_or(true, |best| common > best.common) {
            best = Some(ImagePair { a, b, common });
        }
    }

    match best {
        Some(pair) if pair.common >= min_common => {
            info!(
                "starting from images {} and {} with {} common points",
                pair.a, pair.b, pair.common
            );
            Ok(pair)
        }
        best => Err(SfmError::InsufficientCorrespondences {
            found: best.map_or(0, |pair| pair.common),
            required: min_common,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sfm_core::KeyPoint;

    fn store(images: &[&[&str]]) -> CorrespondenceStore {
        let mut store = CorrespondenceStore::new();
        for (ix, names) in images.iter().enumerate() {
            let image = store.add_image(format!("{}.jpg", ix).as_str(), 100, 100);
            for name in names.iter() {
                store.insert(image, *name, KeyPoint::new(1.0, 1.0));
            }
        }
        store
    }

    #[test]
    fn most_shared_names_win() {
        let store = store(&[&["a", "b"], &["a", "b", "c", "d"], &["b", "c", "d"]]);
        let pair = select_initial_pair(&store, 2).unwrap();
        assert_eq!((pair.a, pair.b, pair.common), (ImageIndex(1), ImageIndex(2), 3));
    }

    #[test]
    fn ties_keep_first_pair() {
        let store = store(&[&["a", "b"], &["a", "b"], &["a", "b"]]);
        for _ in 0..3 {
            let pair = select_initial_pair(&store, 2).unwrap();
            assert_eq!((pair.a, pair.b), (ImageIndex(0), ImageIndex(1)));
        }
    }

    #[test]
    fn one_image_is_not_enough() {
        let store = store(&[&["a"]]);
        assert!(matches!(
            select_initial_pair(&store, 1),
            Err(SfmError::NotEnoughImages { found: 1 })
        ));
    }
}
