//! End-to-end conversion: scale, render, fuse, fix frame, simplify

use crate::batch::{AbortSignal, BatchReport, MeshStatus};
use crate::config::{FuseParams, FusionConfig, RenderParams, ViewParams};
use crate::driver::FusionDriver;
use crate::fix_frame::{fix_frame_directory, FixFrameParams};
use crate::scale::{scale_directory, ScaleParams};
use crate::simplify::{simplify_directory, SimplifyParams};
use meshfusion_core::Result;
use meshfusion_reconstruction::{ExtractionParams, TsdfParams};
use meshfusion_simplification::DecimationParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Settings for a full conversion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    pub padding: f32,
    pub views: ViewParams,
    pub erosion_radius: usize,
    pub tsdf: TsdfParams,
    pub extraction: ExtractionParams,
    pub output_extension: String,
    /// Decimate the restored meshes; `None` writes them as fused
    pub simplify: Option<DecimationParams>,
    /// Keep intermediate results here instead of a temporary directory
    pub work_dir: Option<PathBuf>,
    pub num_threads: Option<usize>,
}

impl PipelineParams {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(in_dir: P, out_dir: Q) -> Self {
        Self {
            in_dir: in_dir.into(),
            out_dir: out_dir.into(),
            padding: 0.1,
            views: ViewParams::default(),
            erosion_radius: 1,
            tsdf: TsdfParams::default(),
            extraction: ExtractionParams::default(),
            output_extension: "ply".to_string(),
            simplify: Some(DecimationParams::default()),
            work_dir: None,
            num_threads: None,
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
    pub fn with_simplify(mut self, simplify: Option<DecimationParams>) -> Self {
        self.simplify = simplify;
        self
    }

    #[must_use]
    pub fn with_work_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    fn render_config(&self, work: &Path) -> FusionConfig {
        let params = RenderParams::new(work.join("scaled"), work.join("depth"))
            .with_views(self.views)
            .with_erosion_radius(self.erosion_radius);
        FusionConfig { num_threads: self.num_threads, ..FusionConfig::render(params) }
    }

    fn fuse_config(&self, work: &Path) -> FusionConfig {
        let params = FuseParams::new(work.join("scaled"), work.join("depth"), work.join("fused"))
            .with_views(self.views)
            .with_tsdf(self.tsdf)
            .with_extraction(self.extraction);
        FusionConfig { num_threads: self.num_threads, ..FusionConfig::fuse(params) }
    }

    /// Check every stage's settings up front
    pub fn validate(&self) -> Result<()> {
        let work = Path::new(".");
        ScaleParams::new(&self.in_dir, work)
            .with_padding(self.padding)
            .validate()?;
        self.render_config(work).validate()?;
        self.fuse_config(work).validate()?;
        FixFrameParams::new(work, work, &self.out_dir)
            .with_output_extension(&self.output_extension)
            .output_format()?;
        match self.simplify {
            Some(decimation) => SimplifyParams::new(work, &self.out_dir)
                .with_decimation(decimation)
                .with_output_extension(&self.output_extension)
                .validate(),
            None => Ok(()),
        }
    }
}

/// Reports of each stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub scale: BatchReport,
    pub render: BatchReport,
    pub fuse: BatchReport,
    pub fix_frame: BatchReport,
    #[serde(default)]
    pub simplify: Option<BatchReport>,
}

impl PipelineReport {
    /// Meshes that made it through every stage
    pub fn succeeded(&self) -> usize {
        self.simplify.as_ref().unwrap_or(&self.fix_frame).succeeded()
    }

    /// Distinct meshes that failed in at least one stage
    pub fn failed(&self) -> usize {
        let mut failed = BTreeSet::new();
        let stages = [&self.scale, &self.render, &self.fuse, &self.fix_frame];
        for report in stages.into_iter().chain(self.simplify.as_ref()) {
            for outcome in &report.outcomes {
                if matches!(outcome.status, MeshStatus::Failed { .. }) {
                    failed.insert(outcome.mesh.as_str());
                }
            }
        }
        failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.succeeded() == self.scale.len()
    }
}

/// Run every stage, ending with simplify when it is enabled. Each stage works on the files the previous one
/// produced, so a mesh that fails early either disappears from the later
/// stages or fails them too.
pub fn run_pipeline(params: &PipelineParams, abort: &AbortSignal) -> Result<PipelineReport> {
    params.validate()?;

    let temp;
    let work = match &params.work_dir {
        Some(dir) => dir.as_path(),
        None => {
            temp = TempDir::new()?;
            temp.path()
        }
    };
    info!("pipeline working directory: {}", work.display());

    let scale = scale_directory(
        &ScaleParams::new(&params.in_dir, work.join("scaled")).with_padding(params.padding),
        abort,
    )?;

    // later stages list their input directory, which may not exist yet
    std::fs::create_dir_all(work.join("scaled"))?;
    std::fs::create_dir_all(work.join("fused"))?;

    let render = FusionDriver::new(params.render_config(work))
        .with_abort_signal(abort.clone())
        .run()?;
    let fuse = FusionDriver::new(params.fuse_config(work))
        .with_abort_signal(abort.clone())
        .run()?;

    let restored = match params.simplify {
        Some(_) => work.join("fixed"),
        None => params.out_dir.clone(),
    };
    let fix_frame = fix_frame_directory(
        &FixFrameParams::new(work.join("fused"), work.join("scaled"), &restored)
            .with_output_extension(&params.output_extension),
        abort,
    )?;

    let simplify = match params.simplify {
        Some(decimation) => {
            std::fs::create_dir_all(&restored)?;
            let simplify = SimplifyParams::new(&restored, &params.out_dir)
                .with_decimation(decimation)
                .with_output_extension(&params.output_extension);
            Some(simplify_directory(&simplify, abort)?)
        }
        None => None,
    };

    Ok(PipelineReport { scale, render, fuse, fix_frame, simplify })
}
