use log::warn;
use serde::{Deserialize, Serialize};
use sfm_core::{CorrespondenceStore, ImageId, KeyPoint, TrackName};

/// A named pixel position on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPoint {
    pub name: TrackName,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectImage {
    pub id: ImageId,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub points: Vec<ProjectPoint>,
}

/// The images of a project and the points annotated on them.
///
/// The order of the images is the order they are considered in by the reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub images: Vec<ProjectImage>,
}

impl Project {
    pub fn to_store(&self) -> CorrespondenceStore {
        let mut store = CorrespondenceStore::new();
        for image in &self.images {
            let index = store.add_image(image.id.clone(), image.width, image.height);
            for point in &image.points {
                let replaced =
                    store.insert(index, point.name.clone(), KeyPoint::new(point.x, point.y));
                if let Some(Some(_)) = replaced {
                    warn!(
                        "image {} has the name {} more than once, keeping the last",
                        image.id, point.name
                    );
                }
            }
        }
        store
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn images_keep_file_order() {
        let project: Project = serde_json::from_str(
            r#"{
                "images": [
                    { "id": "b.jpg", "width": 640, "height": 480,
                      "points": [ { "name": "door", "x": 10.0, "y": 20.0 } ] },
                    { "id": "a.jpg", "width": 640, "height": 480 }
                ]
            }"#,
        )
        .unwrap();
        let store = project.to_store();
        let ids: Vec<&ImageId> = store.images().map(|(_, info)| &info.id).collect();
        assert_eq!(ids, [&ImageId::from("b.jpg"), &ImageId::from("a.jpg")]);
        let door = store.track(&"door".into()).unwrap();
        assert_eq!(door.len(), 1);
    }
}
