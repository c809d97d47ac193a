//! Reducing the face count of converted meshes

use crate::batch::{run_batch, AbortSignal, BatchReport};
use meshfusion_core::{Error, Result};
use meshfusion_io::{list_meshes, read_mesh, write_mesh, MeshFormat};
use meshfusion_simplification::{DecimationParams, EdgeCollapseSimplifier};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the simplify step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplifyParams {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    #[serde(default)]
    pub decimation: DecimationParams,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_output_extension() -> String {
    MeshFormat::Ply.extension().to_string()
}

impl SimplifyParams {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(in_dir: P, out_dir: Q) -> Self {
        Self {
            in_dir: in_dir.into(),
            out_dir: out_dir.into(),
            decimation: DecimationParams::default(),
            output_extension: default_output_extension(),
        }
    }

    #[must_use]
    pub fn with_decimation(mut self, decimation: DecimationParams) -> Self {
        self.decimation = decimation;
        self
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

    pub fn validate(&self) -> Result<()> {
        self.decimation.validate()?;
        self.output_format().map(|_| ())
    }
}

/// Decimate every mesh of `in_dir` down to the configured face count
pub fn simplify_directory(params: &SimplifyParams, abort: &AbortSignal) -> Result<BatchReport> {
    params.decimation.validate()?;
    let format = params.output_format()?;
    let meshes = list_meshes(&params.in_dir)?;
    let simplifier = EdgeCollapseSimplifier::new(params.decimation);

    Ok(run_batch("simplify", &meshes, abort, |key, path| {
        let mesh = read_mesh(path)?;
        let simplified = simplifier.decimate(&mesh)?;
        write_mesh(&simplified, params.out_dir.join(format!("{}.{}", key, format.extension())))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshfusion_core::{shapes, MeshReport};

    #[test]
    fn test_simplify_directory_reduces_faces() {
        let dir = tempfile::tempdir().unwrap();
        let meshes = dir.path().join("meshes");
        write_mesh(&shapes::icosphere(1.0, 3), meshes.join("ball.ply")).unwrap();
        write_mesh(&shapes::cube(1.0), meshes.join("box.off")).unwrap();

        let params = SimplifyParams::new(&meshes, dir.path().join("out"))
            .with_decimation(DecimationParams::default().with_target_faces(200))
            .with_output_extension("obj");
        let report = simplify_directory(&params, &AbortSignal::new()).unwrap();
        assert!(report.is_success(), "{:?}", report);

        let ball = read_mesh(dir.path().join("out").join("ball.obj")).unwrap();
        assert!(ball.face_count() <= 200);
        assert!(MeshReport::analyze(&ball).is_watertight());

        // already under the target
        let cube = read_mesh(dir.path().join("out").join("box.obj")).unwrap();
        assert_eq!(cube.face_count(), 12);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let params = SimplifyParams::new(dir.path(), dir.path().join("out")).with_output_extension("stl");
        assert!(matches!(simplify_directory(&params, &AbortSignal::new()), Err(Error::Configuration(_))));

        let params = SimplifyParams::new(dir.path(), dir.path().join("out"))
            .with_decimation(DecimationParams::default().with_target_faces(0));
        assert!(matches!(params.validate(), Err(Error::Configuration(_))));
    }
}
