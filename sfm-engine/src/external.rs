use crate::{CloudPoint, SfmError};
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Runs a COLMAP-compatible program over image files and reads back its sparse cloud.
///
/// The images are copied into a temporary workspace, which is removed again on every path
/// out of [`ExternalReconstructor::reconstruct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalReconstructor {
    program: PathBuf,
}

impl Default for ExternalReconstructor {
    fn default() -> Self {
        Self::new("colmap")
    }
}

impl ExternalReconstructor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Checks that the program can be started and exits successfully.
    pub fn check(&self) -> Result<(), SfmError> {
        self.run(&[OsStr::new("--version")], None)
    }

    /// Extracts features, matches them exhaustively, maps and converts the first model to
    /// text. The names of the returned points are the point ids of the program.
    pub fn reconstruct<P>(&self, images: &[P]) -> Result<Vec<CloudPoint>, SfmError>
    where
        P: AsRef<Path>,
    {
        self.check()?;
        if images.is_empty() {
            return Err(SfmError::external("no images to reconstruct"));
        }

        let workspace = tempfile::Builder::new()
            .prefix("sfm-external")
            .tempdir()
            .map_err(|e| SfmError::external_io("failed to create the workspace", e))?;
        let root = workspace.path();
        let image_dir = root.join("images");
        let database = root.join("database.db");
        let sparse = root.join("sparse");
        let text = root.join("text");
        for dir in [&image_dir, &sparse, &text] {
            fs::create_dir(dir).map_err(|e| {
                SfmError::external_io(format!("failed to create {}", dir.display()), e)
            })?;
        }

        for image in images {
            let source = image.as_ref();
            if !source.is_file() {
                return Err(SfmError::external(format!(
                    "image {} is not a file",
                    source.display()
                )));
            }
            let file_name = source.file_name().ok_or_else(|| {
                SfmError::external(format!("image {} has no file name", source.display()))
            })?;
            fs::copy(source, image_dir.join(file_name)).map_err(|e| {
                SfmError::external_io(format!("failed to copy {}", source.display()), e)
            })?;
        }
        info!(
            "copied {} images into {}",
            images.len(),
            image_dir.display()
        );

        let arg = |s: &'static str| OsStr::new(s);
        self.run(
            &[
                arg("feature_extractor"),
                arg("--database_path"),
                database.as_os_str(),
                arg("--image_path"),
                image_dir.as_os_str(),
            ],
            Some(root),
        )?;
        self.run(
            &[
                arg("exhaustive_matcher"),
                arg("--database_path"),
                database.as_os_str(),
            ],
            Some(root),
        )?;
        self.run(
            &[
                arg("mapper"),
                arg("--database_path"),
                database.as_os_str(),
                arg("--image_path"),
                image_dir.as_os_str(),
                arg("--output_path"),
                sparse.as_os_str(),
            ],
            Some(root),
        )?;
        self.run(
            &[
                arg("model_converter"),
                arg("--input_path"),
                sparse.join("0").as_os_str(),
                arg("--output_path"),
                text.as_os_str(),
                arg("--output_type"),
                arg("TXT"),
            ],
            Some(root),
        )?;

        let points_path = text.join("points3D.txt");
        let file = fs::File::open(&points_path).map_err(|e| {
            SfmError::external_io(format!("failed to open {}", points_path.display()), e)
        })?;
        let points = parse_points(BufReader::new(file))?;
        info!("external reconstruction produced {} points", points.len());

        if let Err(e) = workspace.close() {
            warn!("failed to remove the external workspace: {}", e);
        }
        Ok(points)
    }

    fn run(&self, args: &[&OsStr], dir: Option<&Path>) -> Result<(), SfmError> {
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let step = args
            .first()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        debug!("running {:?}", command);

        let output = command.output().map_err(|e| {
            SfmError::external_io(
                format!("failed to start {} {}", self.program.display(), step),
                e,
            )
        })?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("[{}] {}", step, line);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SfmError::external(format!(
                "{} {} failed with {}: {}",
                self.program.display(),
                step,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Reads a `points3D.txt` model file.
///
/// Each line that isn't empty or a `#` comment starts with `ID X Y Z`. The color, error and
/// track columns that follow are ignored.
pub fn parse_points(reader: impl BufRead) -> Result<Vec<CloudPoint>, SfmError> {
    let mut points = vec![];
    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| SfmError::external_io("failed to read the points file", e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = || {
            SfmError::external(format!(
                "malformed points file at line {}: {}",
                number + 1,
                line
            ))
        };
        let mut tokens = line.split_whitespace();
        let id = tokens.next().ok_or_else(malformed)?;
        let mut coordinate = || -> Result<f64, SfmError> {
            tokens
                .next()
                .and_then(|token| token.parse().ok())
                .ok_or_else(malformed)
        };
        let (x, y, z) = (coordinate()?, coordinate()?, coordinate()?);
        points.push(CloudPoint {
            name: id.into(),
            x,
            y,
            z,
        });
    }
    Ok(points)
}

#[cfg(test)]
mod test {
    use super::*;
    use sfm_core::TrackName;

    #[test]
    fn comments_and_extra_columns_are_skipped() {
        let text = "# 3D point list with one line of data per point:\n\
                    #   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)\n\
                    \n\
                    1 0.5 -1.25 3 255 128 0 0.4 1 0 2 5\n\
                    7 1e-3 2 -4.5\n";
        let points = parse_points(text.as_bytes()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].name, TrackName::from("1"));
        assert_eq!((points[0].x, points[0].y, points[0].z), (0.5, -1.25, 3.0));
        assert_eq!(points[1].name, TrackName::from("7"));
        assert_eq!(points[1].x, 1e-3);
    }

    #[test]
    fn short_line_is_an_error() {
        let result = parse_points("1 0.5 2.0\n".as_bytes());
        assert!(matches!(result, Err(SfmError::ExternalProcess { .. })));
    }

    #[test]
    fn bad_number_is_an_error() {
        let result = parse_points("1 0.5 x 2.0\n".as_bytes());
        assert!(matches!(result, Err(SfmError::ExternalProcess { .. })));
    }

    #[test]
    fn missing_program_is_an_error() {
        let reconstructor = ExternalReconstructor::new("/nonexistent/sfm-external-program");
        match reconstructor.reconstruct(&["a.jpg"]) {
            Err(SfmError::ExternalProcess { source, .. }) => assert!(source.is_some()),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
