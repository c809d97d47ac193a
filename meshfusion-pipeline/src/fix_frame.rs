//! Restoring fused meshes to the coordinate frame of their source meshes

use crate::batch::{run_batch, AbortSignal, BatchReport};
use crate::scale::{read_transform, transform_path};
use meshfusion_core::{Error, Result, TransformParams, TriangleMesh};
use meshfusion_io::{list_meshes, read_mesh, write_mesh, MeshFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the fix-frame step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixFrameParams {
    /// Meshes in the scaled frame
    pub in_dir: PathBuf,
    /// Directory with the `<stem>.json` files written by the scale step
    pub transform_dir: PathBuf,
    pub out_dir: PathBuf,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_output_extension() -> String {
    MeshFormat::Ply.extension().to_string()
}

impl FixFrameParams {
    pub fn new<P, Q, R>(in_dir: P, transform_dir: Q, out_dir: R) -> Self
    where
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
        R: Into<PathBuf>,
    {
        Self {
            in_dir: in_dir.into(),
            transform_dir: transform_dir.into(),
            out_dir: out_dir.into(),
            output_extension: default_output_extension(),
        }
    }

    #[must_use]
    pub fn with_output_extension(mut self, extension: &str) -> Self {
        self.output_extension = extension.to_string();
        self
    }

    pub fn output_format(&self) -> Result<MeshFormat> {
        MeshFormat::from_extension(&self.output_extension).ok_or_else(|| {
            Error::Configuration(format!(
                "cannot write meshes with extension '{}'",
                self.output_extension
            ))
        })
    }
}

/// Undo the scale step on a mesh
pub fn restore_frame(mesh: &mut TriangleMesh, params: &TransformParams) {
    mesh.map_vertices(|v| params.invert(v));
}

/// Restore every mesh of `in_dir` using its recorded transform
pub fn fix_frame_directory(params: &FixFrameParams, abort: &AbortSignal) -> Result<BatchReport> {
    let format = params.output_format()?;
    let meshes = list_meshes(&params.in_dir)?;

    Ok(run_batch("fix-frame", &meshes, abort, |key, path| {
        let transform = read_transform(&transform_path(&params.transform_dir, key))?;
        let mut mesh = read_mesh(path)?;
        restore_frame(&mut mesh, &transform);
        write_mesh(&mesh, params.out_dir.join(format!("{}.{}", key, format.extension())))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::scale_mesh;
    use approx::assert_relative_eq;
    use meshfusion_core::{shapes, Vector3f};

    #[test]
    fn test_restore_frame_inverts_scale() {
        let mut original = shapes::icosphere(3.0, 1);
        original.map_vertices(|v| v + Vector3f::new(-4.0, 7.5, 1.0));

        let mut mesh = original.clone();
        let params = scale_mesh(&mut mesh, 0.1).unwrap();
        restore_frame(&mut mesh, &params);

        for (a, b) in mesh.vertices.iter().zip(&original.vertices) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
        assert_eq!(mesh.faces, original.faces);
    }

    #[test]
    fn test_missing_transform_fails_only_that_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let meshes = dir.path().join("meshes");
        write_mesh(&shapes::cube(1.0), meshes.join("a.ply")).unwrap();
        write_mesh(&shapes::cube(1.0), meshes.join("b.ply")).unwrap();
        crate::scale::write_transform(
            &transform_path(&meshes, "a"),
            &TransformParams { scale: 0.5, translation: Vector3f::zeros() },
        )
        .unwrap();

        let params = FixFrameParams::new(&meshes, &meshes, dir.path().join("out"));
        let report = fix_frame_directory(&params, &AbortSignal::new()).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);

        let restored = read_mesh(dir.path().join("out").join("a.ply")).unwrap();
        assert_relative_eq!(restored.vertices[0].x, -1.0, epsilon = 1e-6);
    }
}
