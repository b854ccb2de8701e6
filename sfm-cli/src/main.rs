mod alignment;
mod project;

use alignment::{rotation_onto, AxisAlignment};
use log::*;
use project::Project;
use sfm_core::nalgebra::{Rotation3, Vector3};
use sfm_engine::{
    export_cloud_ply, export_ply, CameraExport, CloudPoint, Engine, ExternalReconstructor,
    SfmSettings,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::exit;
use structopt::StructOpt;

#[derive(StructOpt, Clone)]
#[structopt(
    name = "sfm",
    about = "Reconstructs a sparse point cloud from manually named correspondences"
)]
struct Opt {
    /// The project file with the images and their named points.
    ///
    /// This is a JSON object `{ "images": [ { "id", "width", "height", "points": [ { "name", "x", "y" } ] } ] }`.
    #[structopt(parse(from_os_str))]
    project: PathBuf,
    /// The file where settings are specified.
    ///
    /// This is in the format of `sfm_engine::SfmSettings`. Missing fields take their defaults.
    #[structopt(short, long, default_value = "sfm-settings.json")]
    settings: PathBuf,
    /// Output PLY file to deposit point cloud
    #[structopt(short, long)]
    output: Option<PathBuf>,
    /// Output JSON file with the name and position of every point
    #[structopt(long)]
    json: Option<PathBuf>,
    /// Export the cameras as small pyramids of this depth instead of single vertices
    #[structopt(long)]
    camera_size: Option<f64>,
    /// Translate the cloud so the point with this name is at the origin
    #[structopt(long)]
    origin: Option<String>,
    /// Rotate the cloud about the origin so the direction between two named points lies on an
    /// axis, given as `FROM,TO,AXIS`
    #[structopt(long)]
    align_axis: Option<AxisAlignment>,
    /// Run this COLMAP-compatible program on the image files instead of the built-in engine.
    ///
    /// The image ids of the project must be paths to the image files.
    #[structopt(long, parse(from_os_str))]
    external_program: Option<PathBuf>,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    if let Err(message) = run(&opt) {
        error!("{}", message);
        exit(1);
    }
}

fn run(opt: &Opt) -> Result<(), String> {
    let project: Project = File::open(&opt.project)
        .map_err(|e| format!("failed to open {}: {}", opt.project.display(), e))
        .and_then(|file| {
            serde_json::from_reader(BufReader::new(file))
                .map_err(|e| format!("failed to parse {}: {}", opt.project.display(), e))
        })?;
    info!("loaded {} images", project.images.len());

    let settings = File::open(&opt.settings)
        .ok()
        .and_then(|file| serde_json::from_reader(BufReader::new(file)).ok());
    if settings.is_some() {
        info!("loaded existing settings");
    } else {
        info!("used default settings");
    }
    let settings: SfmSettings = settings.unwrap_or_default();

    if let Some(program) = &opt.external_program {
        let images: Vec<PathBuf> = project
            .images
            .iter()
            .map(|image| PathBuf::from(&image.id.0))
            .collect();
        let cloud = ExternalReconstructor::new(program)
            .reconstruct(&images)
            .map_err(|e| e.to_string())?;
        if let Some(path) = &opt.output {
            let file = create(path)?;
            export_cloud_ply(BufWriter::new(file), &cloud)
                .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        }
        return write_json(opt, &cloud);
    }

    let mut engine = Engine::new(settings);
    let mut output = engine
        .reconstruct(&project.to_store())
        .map_err(|e| e.to_string())?;

    if opt.origin.is_some() || opt.align_axis.is_some() {
        let (rotation, translation) = alignment(opt, &output.cloud())?;
        engine.set_rotation(rotation);
        engine.set_translation(translation);
        engine.apply_transform(&mut output.reconstruction);
    }

    for id in &output.skipped_images {
        warn!("image {} was not registered", id);
    }
    info!(
        "reconstructed {} points from {} of {} images",
        output.reconstruction.num_points(),
        output.reconstruction.num_cameras(),
        project.images.len()
    );

    if let Some(path) = &opt.output {
        let cameras = opt
            .camera_size
            .map_or(CameraExport::Centers, |size| CameraExport::Frustums { size });
        let file = create(path)?;
        export_ply(BufWriter::new(file), &output.reconstruction, cameras)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        info!("exported point cloud to {}", path.display());
    }
    write_json(opt, &output.cloud())
}

/// The rotation and translation given by `--origin` and `--align-axis`.
///
/// The cloud is first translated and then rotated about the origin.
fn alignment(opt: &Opt, cloud: &[CloudPoint]) -> Result<(Rotation3<f64>, Vector3<f64>), String> {
    let positions: HashMap<&str, Vector3<f64>> = cloud
        .iter()
        .map(|point| (point.name.0.as_str(), Vector3::new(point.x, point.y, point.z)))
        .collect();
    let position = |name: &str| {
        positions
            .get(name)
            .copied()
            .ok_or_else(|| format!("the point {} was not reconstructed", name))
    };

    let offset = match &opt.origin {
        Some(name) => -position(name)?,
        None => Vector3::zeros(),
    };
    let rotation = match &opt.align_axis {
        Some(alignment) => {
            let direction = position(&alignment.to)? - position(&alignment.from)?;
            rotation_onto(direction, alignment.axis).ok_or_else(|| {
                format!(
                    "the points {} and {} are at the same position",
                    alignment.from, alignment.to
                )
            })?
        }
        None => Rotation3::identity(),
    };
    Ok((rotation, rotation * offset))
}

fn create(path: &Path) -> Result<File, String> {
    File::create(path).map_err(|e| format!("failed to create {}: {}", path.display(), e))
}

fn write_json(opt: &Opt, cloud: &[CloudPoint]) -> Result<(), String> {
    if let Some(path) = &opt.json {
        let file = create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), cloud)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        info!("exported {} points to {}", cloud.len(), path.display());
    }
    Ok(())
}
