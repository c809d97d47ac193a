//! Normalization of meshes into a padded unit cube
//!
//! Each scaled mesh is written as `<stem>.ply` next to `<stem>.json`, which
//! records the [`TransformParams`] needed to bring it back.

use crate::batch::{run_batch, AbortSignal, BatchReport};
use meshfusion_core::{Bounded, Error, Result, TransformParams, TriangleMesh};
use meshfusion_io::{list_meshes, read_mesh, write_atomically, write_mesh, MeshFormat};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Extension of the transform files
pub const TRANSFORM_EXTENSION: &str = "json";

/// Settings for the scale step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Margin on each side of the unit cube
    #[serde(default = "default_padding")]
    pub padding: f32,
}

fn default_padding() -> f32 {
    0.1
}

impl ScaleParams {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(in_dir: P, out_dir: Q) -> Self {
        Self {
            in_dir: in_dir.into(),
            out_dir: out_dir.into(),
            padding: default_padding(),
        }
    }

    #[must_use]
    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..0.5).contains(&self.padding) {
            return Err(Error::Configuration(format!(
                "scale padding must lie in [0, 0.5), got {}",
                self.padding
            )));
        }
        Ok(())
    }
}

/// Center `mesh` on the origin and scale its longest side to
/// `1 - 2 * padding`, returning the applied parameters
pub fn scale_mesh(mesh: &mut TriangleMesh, padding: f32) -> Result<TransformParams> {
    let bbox = mesh
        .bounding_box()
        .ok_or_else(|| Error::InvalidMesh("mesh has no vertices".to_string()))?;
    let params = TransformParams::normalizing(&bbox, padding)?;
    mesh.map_vertices(|v| params.apply(v));
    Ok(params)
}

/// Path of the transform file belonging to a mesh key
pub fn transform_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", key, TRANSFORM_EXTENSION))
}

pub fn write_transform(path: &Path, params: &TransformParams) -> Result<()> {
    write_atomically(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, params)
            .map_err(|e| Error::InvalidData(format!("cannot encode transform: {}", e)))
    })
}

pub fn read_transform(path: &Path) -> Result<TransformParams> {
    let file = File::open(path)?;
    let params: TransformParams = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::InvalidData(format!("{}: {}", path.display(), e)))?;
    if !(params.scale.is_finite() && params.scale > 0.0) {
        return Err(Error::InvalidData(format!(
            "{}: scale must be positive, got {}",
            path.display(),
            params.scale
        )));
    }
    Ok(params)
}

/// Scale every mesh of `in_dir` into `out_dir`
pub fn scale_directory(params: &ScaleParams, abort: &AbortSignal) -> Result<BatchReport> {
    params.validate()?;
    let meshes = list_meshes(&params.in_dir)?;

    Ok(run_batch("scale", &meshes, abort, |key, path| {
        let mut mesh = read_mesh(path)?;
        mesh.validate()?;
        let transform = scale_mesh(&mut mesh, params.padding)?;

        let out = params
            .out_dir
            .join(format!("{}.{}", key, MeshFormat::Ply.extension()));
        write_mesh(&mesh, &out)?;
        write_transform(&transform_path(&params.out_dir, key), &transform)
    }))
}
