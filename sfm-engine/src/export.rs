use crate::{CloudPoint, Reconstruction};
use ply_rs::{
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use sfm_core::nalgebra::{Point3, Vector3};
use sfm_core::Pose;
use std::io::{self, Write};

const CAMERA_COLOR: [u8; 3] = [255, 0, 255];
const POINT_COLOR: [u8; 3] = [255, 255, 255];

/// How cameras appear in an exported PLY file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraExport {
    /// Cameras are left out.
    None,
    /// One vertex at each optical center.
    Centers,
    /// A pyramid of faces per camera with its apex at the optical center, `size` world
    /// units deep.
    Frustums { size: f64 },
}

/// The vertices and faces of a PLY document being assembled.
#[derive(Default)]
struct PlyBuilder {
    vertices: Vec<DefaultElement>,
    faces: Vec<DefaultElement>,
}

impl PlyBuilder {
    fn add_vertex(&mut self, p: Point3<f64>, [r, g, b]: [u8; 3]) -> usize {
        let pos = self.vertices.len();
        let mut point = DefaultElement::new();
        point.insert("x".to_string(), Property::Double(p.x));
        point.insert("y".to_string(), Property::Double(p.y));
        point.insert("z".to_string(), Property::Double(p.z));
        point.insert("red".to_string(), Property::UChar(r));
        point.insert("green".to_string(), Property::UChar(g));
        point.insert("blue".to_string(), Property::UChar(b));
        self.vertices.push(point);
        pos
    }

    fn add_triangle(&mut self, a: usize, b: usize, c: usize) {
        let mut face = DefaultElement::new();
        face.insert(
            "vertex_index".to_string(),
            Property::ListInt(vec![a as i32, b as i32, c as i32]),
        );
        self.faces.push(face);
    }

    fn write(self, mut writer: impl Write, comment: String) -> io::Result<usize> {
        let camera_faces = !self.faces.is_empty();

        let mut ply = Ply::<DefaultElement>::new();
        ply.header.encoding = Encoding::Ascii;
        ply.header.comments.push(comment);

        let mut point_element = ElementDef::new("vertex".to_string());
        for (name, scalar) in [
            ("x", ScalarType::Double),
            ("y", ScalarType::Double),
            ("z", ScalarType::Double),
            ("red", ScalarType::UChar),
            ("green", ScalarType::UChar),
            ("blue", ScalarType::UChar),
        ] {
            point_element
                .properties
                .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(scalar)));
        }
        ply.header.elements.add(point_element);

        if camera_faces {
            let mut face_element = ElementDef::new("face".to_string());
            let vertex_list = PropertyDef::new(
                "vertex_index".to_string(),
                PropertyType::List(ScalarType::UChar, ScalarType::Int),
            );
            face_element.properties.add(vertex_list);
            ply.header.elements.add(face_element);
        }

        ply.payload.insert("vertex".to_string(), self.vertices);
        if camera_faces {
            ply.payload.insert("face".to_string(), self.faces);
        }

        Writer::new().write_ply(&mut writer, &mut ply)
    }
}

/// Writes the reconstructed points and the cameras as an ASCII PLY file.
///
/// Returns the number of bytes written.
pub fn export_ply(
    writer: impl Write,
    reconstruction: &Reconstruction,
    cameras: CameraExport,
) -> io::Result<usize> {
    let mut ply = PlyBuilder::default();

    for (_, camera) in reconstruction.cameras() {
        let center = camera.pose.center().0;
        match cameras {
            CameraExport::None => {}
            CameraExport::Centers => {
                ply.add_vertex(center, CAMERA_COLOR);
            }
            CameraExport::Frustums { size } => {
                // Camera space has y pointing down and z forwards.
                let rotation = camera.pose.isometry().rotation.inverse();
                let up = rotation * -Vector3::y();
                let forward = rotation * Vector3::z();
                let right = forward.cross(&up);
                let apex = ply.add_vertex(center, CAMERA_COLOR);
                let [up_right, up_left, down_left, down_right] =
                    [(1.0, 1.0), (1.0, -1.0), (-1.0, -1.0), (-1.0, 1.0)].map(|(u, r)| {
                        ply.add_vertex(
                            center + (forward + u * up + r * right) * size,
                            CAMERA_COLOR,
                        )
                    });
                ply.add_triangle(apex, down_right, up_right);
                ply.add_triangle(apex, up_right, up_left);
                ply.add_triangle(apex, up_left, down_left);
                ply.add_triangle(apex, down_left, down_right);
            }
        }
    }

    for (_, point) in reconstruction.points() {
        ply.add_vertex(point.position.0, POINT_COLOR);
    }

    ply.write(
        writer,
        format!(
            "{} points, {} cameras",
            reconstruction.num_points(),
            reconstruction.num_cameras()
        ),
    )
}

/// Writes bare cloud points, such as those of an external reconstruction, as an ASCII PLY file.
pub fn export_cloud_ply(writer: impl Write, cloud: &[CloudPoint]) -> io::Result<usize> {
    let mut ply = PlyBuilder::default();
    for point in cloud {
        ply.add_vertex(Point3::new(point.x, point.y, point.z), POINT_COLOR);
    }
    ply.write(writer, format!("{} points", cloud.len()))
}

#[cfg(test)]
mod test {
    use super::*;
    use ply_rs::parser::Parser;
    use sfm_core::nalgebra::Rotation3;
    use sfm_core::{CameraIntrinsics, ImageIndex, KeyPoint, WorldPoint, WorldToCamera};

    fn reconstruction() -> Reconstruction {
        let mut reconstruction = Reconstruction::new(CameraIntrinsics::estimate(640, 480, 1.2));
        let a = reconstruction
            .add_camera(ImageIndex(0), WorldToCamera::identity())
            .unwrap();
        let b = reconstruction
            .add_camera(
                ImageIndex(1),
                WorldToCamera::from_parts(Vector3::new(-1.0, 0.0, 0.0), Rotation3::identity()),
            )
            .unwrap();
        for (ix, z) in [4.0, 5.0, 6.0].iter().enumerate() {
            let kp = KeyPoint::new(320.0, 240.0);
            reconstruction.add_point(
                format!("p{}", ix).as_str().into(),
                WorldPoint::new(0.5, 0.0, *z),
                [(a, kp), (b, kp)],
            );
        }
        reconstruction
    }

    fn read(bytes: &[u8]) -> Ply<DefaultElement> {
        Parser::<DefaultElement>::new()
            .read_ply(&mut &bytes[..])
            .unwrap()
    }

    #[test]
    fn centers_and_points_are_vertices() {
        let mut bytes = vec![];
        export_ply(&mut bytes, &reconstruction(), CameraExport::Centers).unwrap();
        let ply = read(&bytes);
        assert_eq!(ply.payload["vertex"].len(), 5);
        assert!(!ply.payload.contains_key("face"));
        match ply.payload["vertex"][1]["x"] {
            Property::Double(x) => assert!((x - 1.0).abs() < 1e-12),
            ref other => panic!("unexpected property {:?}", other),
        }
    }

    #[test]
    fn frustums_have_four_faces() {
        let mut bytes = vec![];
        export_ply(
            &mut bytes,
            &reconstruction(),
            CameraExport::Frustums { size: 0.1 },
        )
        .unwrap();
        let ply = read(&bytes);
        assert_eq!(ply.payload["vertex"].len(), 2 * 5 + 3);
        assert_eq!(ply.payload["face"].len(), 8);
    }

    #[test]
    fn bare_cloud_has_only_vertices() {
        let cloud = reconstruction().cloud();
        let mut bytes = vec![];
        export_cloud_ply(&mut bytes, &cloud).unwrap();
        let ply = read(&bytes);
        assert_eq!(ply.payload["vertex"].len(), 3);
        assert!(!ply.payload.contains_key("face"));
    }
}
