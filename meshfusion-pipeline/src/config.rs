//! Driver configuration
//!
//! Render and fuse must agree on every view parameter: fuse re-samples the
//! camera poses from [`ViewParams`] and rejects stored depth maps that were
//! produced with different ones.

use meshfusion_core::{Error, Result};
use meshfusion_io::MeshFormat;
use meshfusion_reconstruction::{ExtractionParams, TsdfParams};
use meshfusion_render::{CameraSampler, Intrinsics};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Camera views shared by the render and fuse modes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewParams {
    pub n_views: usize,
    pub image_width: u32,
    pub image_height: u32,
    pub focal_length_x: f32,
    pub focal_length_y: f32,
    pub principal_point_x: f32,
    pub principal_point_y: f32,
    /// Random rotation of the view sphere; `None` keeps the canonical spiral
    pub seed: Option<u64>,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            n_views: 100,
            image_width: 640,
            image_height: 640,
            focal_length_x: 640.0,
            focal_length_y: 640.0,
            principal_point_x: 320.0,
            principal_point_y: 320.0,
            seed: None,
        }
    }
}

impl ViewParams {
    /// Square images of `size` pixels with a centered principal point and a
    /// focal length equal to the image size
    pub fn square(n_views: usize, size: u32) -> Self {
        let half = size as f32 / 2.0;
        Self {
            n_views,
            image_width: size,
            image_height: size,
            focal_length_x: size as f32,
            focal_length_y: size as f32,
            principal_point_x: half,
            principal_point_y: half,
            seed: None,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics::new(
            self.focal_length_x,
            self.focal_length_y,
            self.principal_point_x,
            self.principal_point_y,
            self.image_width,
            self.image_height,
        )
    }

    pub fn sampler(&self) -> CameraSampler {
        let sampler = CameraSampler::new(self.n_views, self.intrinsics());
        match self.seed {
            Some(seed) => sampler.with_seed(seed),
            None => sampler,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_views == 0 {
            return Err(Error::Configuration("view count must be positive".to_string()));
        }
        self.intrinsics().validate()
    }
}

/// Settings for rendering depth maps of every mesh in a directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    pub in_dir: PathBuf,
    pub depth_dir: PathBuf,
    #[serde(default)]
    pub views: ViewParams,
    /// Radius of the square minimum filter applied to each depth map
    #[serde(default = "default_erosion_radius")]
    pub erosion_radius: usize,
}

fn default_erosion_radius() -> usize {
    1
}

impl RenderParams {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(in_dir: P, depth_dir: Q) -> Self {
        Self {
            in_dir: in_dir.into(),
            depth_dir: depth_dir.into(),
            views: ViewParams::default(),
            erosion_radius: default_erosion_radius(),
        }
    }

    #[must_use]
    pub fn with_views(mut self, views: ViewParams) -> Self {
        self.views = views;
        self
    }

    #[must_use]
    pub fn with_erosion_radius(mut self, radius: usize) -> Self {
        self.erosion_radius = radius;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.views.validate()
    }
}

/// Settings for fusing stored depth maps into watertight meshes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuseParams {
    pub in_dir: PathBuf,
    pub depth_dir: PathBuf,
    pub out_dir: PathBuf,
    #[serde(default)]
    pub views: ViewParams,
    #[serde(default)]
    pub tsdf: TsdfParams,
    #[serde(default)]
    pub extraction: ExtractionParams,
    /// Extension of the written meshes
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
}

fn default_output_extension() -> String {
    MeshFormat::Ply.extension().to_string()
}

impl FuseParams {
    pub fn new<P, Q, R>(in_dir: P, depth_dir: Q, out_dir: R) -> Self
    where
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
        R: Into<PathBuf>,
    {
        Self {
            in_dir: in_dir.into(),
            depth_dir: depth_dir.into(),
            out_dir: out_dir.into(),
            views: ViewParams::default(),
            tsdf: TsdfParams::default(),
            extraction: ExtractionParams::default(),
            output_extension: default_output_extension(),
        }
    }

    #[must_use]
    pub fn with_views(mut self, views: ViewParams) -> Self {
        self.views = views;
        self
    }

    #[must_use]
    pub fn with_tsdf(mut self, tsdf: TsdfParams) -> Self {
        self.tsdf = tsdf;
        self
    }

    #[must_use]
    pub fn with_extraction(mut self, extraction: ExtractionParams) -> Self {
        self.extraction = extraction;
        self
    }

    #[must_use]
    pub fn with_output_extension(mut self, extension: &str) -> Self {
        self.output_extension = extension.to_string();
        self
    }

    /// Parsed output format
    pub fn output_format(&self) -> Result<MeshFormat> {
        MeshFormat::from_extension(&self.output_extension).ok_or_else(|| {
            Error::Configuration(format!(
                "cannot write meshes with extension '{}'",
                self.output_extension
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.views.validate()?;
        self.tsdf.validate()?;
        self.extraction.validate()?;
        self.output_format().map(|_| ())
    }
}

/// What the driver does with each mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Mode {
    Render(RenderParams),
    Fuse(FuseParams),
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Render(_) => "render",
            Mode::Fuse(_) => "fuse",
        }
    }

    /// Directory holding the input meshes
    pub fn in_dir(&self) -> &PathBuf {
        match self {
            Mode::Render(params) => &params.in_dir,
            Mode::Fuse(params) => &params.in_dir,
        }
    }

    /// Directory holding the depth maps
    pub fn depth_dir(&self) -> &PathBuf {
        match self {
            Mode::Render(params) => &params.depth_dir,
            Mode::Fuse(params) => &params.depth_dir,
        }
    }
}

/// Complete configuration of a [`crate::FusionDriver`] run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub mode: Mode,
    /// Worker threads; `None` uses one per logical CPU
    #[serde(default)]
    pub num_threads: Option<usize>,
}

impl FusionConfig {
    pub fn render(params: RenderParams) -> Self {
        Self { mode: Mode::Render(params), num_threads: None }
    }

    pub fn fuse(params: FuseParams) -> Self {
        Self { mode: Mode::Fuse(params), num_threads: None }
    }

    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Check every parameter before any mesh is touched
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == Some(0) {
            return Err(Error::Configuration("thread count must be positive".to_string()));
        }
        match &self.mode {
            Mode::Render(params) => params.validate(),
            Mode::Fuse(params) => params.validate(),
        }
    }
}
