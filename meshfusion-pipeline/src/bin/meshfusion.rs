//! MeshFusion command line interface

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use meshfusion_pipeline::{
    fix_frame_directory, run_pipeline, scale_directory, simplify_directory, AbortSignal, BatchReport,
    FixFrameParams, FuseParams, FusionConfig, FusionDriver, PipelineParams, RenderParams, ScaleParams,
    SimplifyParams, ViewParams,
};
use meshfusion_reconstruction::{ExtractionParams, IntegrationStrategy, TsdfParams};
use meshfusion_simplification::DecimationParams;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshfusion")]
#[command(about = "Convert arbitrary triangle meshes into watertight meshes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Worker threads (defaults to one per logical CPU)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Write the batch report as JSON to this file
    #[arg(long, global = true, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render depth maps of every mesh in a directory
    Render {
        #[arg(long)]
        in_dir: PathBuf,

        #[arg(long)]
        depth_dir: PathBuf,

        #[command(flatten)]
        views: ViewArgs,

        /// Radius of the depth erosion filter in pixels (0 disables it)
        #[arg(long, default_value_t = 1)]
        erosion_radius: usize,
    },

    /// Fuse rendered depth maps into watertight meshes
    Fuse {
        #[arg(long)]
        in_dir: PathBuf,

        #[arg(long)]
        depth_dir: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        #[command(flatten)]
        views: ViewArgs,

        #[command(flatten)]
        fusion: FusionArgs,
    },

    /// Scale, render, fuse, restore the frame and simplify in one go
    Pipeline {
        #[arg(long)]
        in_dir: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        /// Margin around the normalized mesh
        #[arg(long, default_value_t = 0.1)]
        padding: f32,

        #[arg(long, default_value_t = 1)]
        erosion_radius: usize,

        /// Keep intermediate files in this directory
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Write the restored meshes without decimating them
        #[arg(long)]
        no_simplify: bool,

        #[command(flatten)]
        decimation: DecimationArgs,

        #[command(flatten)]
        views: ViewArgs,

        #[command(flatten)]
        fusion: FusionArgs,
    },

    /// Normalize meshes into a padded unit cube
    Scale {
        #[arg(long)]
        in_dir: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long, default_value_t = 0.1)]
        padding: f32,
    },

    /// Move meshes back into the frame recorded by `scale`
    FixFrame {
        #[arg(long)]
        in_dir: PathBuf,

        /// Directory holding the `<mesh>.json` transforms
        #[arg(long)]
        transform_dir: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long, default_value = "ply")]
        format: String,
    },

    /// Reduce the face count of every mesh in a directory
    Simplify {
        #[arg(long)]
        in_dir: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        #[command(flatten)]
        decimation: DecimationArgs,

        #[arg(long, default_value = "ply")]
        format: String,
    },
}

/// Quadric decimation settings
#[derive(Args)]
struct DecimationArgs {
    /// Stop once a mesh has at most this many faces
    #[arg(long, default_value_t = 10_000)]
    target_faces: usize,

    /// Never collapse an edge whose quadric error exceeds this
    #[arg(long)]
    max_error: Option<f64>,
}

impl From<&DecimationArgs> for DecimationParams {
    fn from(args: &DecimationArgs) -> Self {
        DecimationParams {
            target_faces: args.target_faces,
            max_error: args.max_error,
            ..DecimationParams::default()
        }
    }
}

/// Camera parameters; render and fuse must be given the same values
#[derive(Args)]
struct ViewArgs {
    #[arg(long, default_value_t = 100)]
    n_views: usize,

    #[arg(long, default_value_t = 640)]
    image_width: u32,

    #[arg(long, default_value_t = 640)]
    image_height: u32,

    #[arg(long, default_value_t = 640.0)]
    focal_length_x: f32,

    #[arg(long, default_value_t = 640.0)]
    focal_length_y: f32,

    #[arg(long, default_value_t = 320.0)]
    principal_point_x: f32,

    #[arg(long, default_value_t = 320.0)]
    principal_point_y: f32,

    /// Randomly rotate the views; the same seed gives the same views
    #[arg(long)]
    seed: Option<u64>,
}

impl From<&ViewArgs> for ViewParams {
    fn from(args: &ViewArgs) -> Self {
        ViewParams {
            n_views: args.n_views,
            image_width: args.image_width,
            image_height: args.image_height,
            focal_length_x: args.focal_length_x,
            focal_length_y: args.focal_length_y,
            principal_point_x: args.principal_point_x,
            principal_point_y: args.principal_point_y,
            seed: args.seed,
        }
    }
}

/// Volume and surface parameters
#[derive(Args)]
struct FusionArgs {
    #[arg(long, default_value_t = 256)]
    resolution: usize,

    /// Truncation distance in voxels
    #[arg(long, default_value_t = 10.0)]
    truncation_factor: f32,

    /// Zero-level shift in voxels
    #[arg(long, default_value_t = 1.5)]
    depth_offset_factor: f32,

    /// Volume margin as a fraction of the largest mesh extent
    #[arg(long, default_value_t = 0.1)]
    volume_padding: f32,

    /// `voxels` or `views`
    #[arg(long, default_value = "voxels")]
    strategy: IntegrationStrategy,

    #[arg(long, default_value_t = 0)]
    smoothing_iterations: usize,

    /// Output mesh format (ply, obj, off)
    #[arg(long, default_value = "ply")]
    format: String,
}

impl FusionArgs {
    fn tsdf(&self) -> TsdfParams {
        TsdfParams::default()
            .with_resolution(self.resolution)
            .with_truncation_factor(self.truncation_factor)
            .with_depth_offset_factor(self.depth_offset_factor)
            .with_volume_padding(self.volume_padding)
            .with_strategy(self.strategy)
    }

    fn extraction(&self) -> ExtractionParams {
        ExtractionParams {
            smoothing_iterations: self.smoothing_iterations,
            ..ExtractionParams::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))
}

fn finish(report: &BatchReport) -> Result<()> {
    println!(
        "{} of {} meshes done, {} failed, {} aborted",
        report.succeeded(),
        report.len(),
        report.failed(),
        report.aborted()
    );
    for (kind, count) in report.failures_by_kind() {
        println!("  {:?}: {}", kind, count);
    }
    if report.failed() > 0 {
        bail!("{} meshes failed", report.failed());
    }
    Ok(())
}

fn run_driver(config: FusionConfig, threads: Option<usize>, report_path: Option<&Path>) -> Result<()> {
    let config = FusionConfig { num_threads: threads, ..config };
    let report = FusionDriver::new(config).run()?;
    if let Some(path) = report_path {
        write_report(path, &report)?;
    }
    finish(&report)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let abort = AbortSignal::new();
    let report_path = cli.report.as_deref();

    match &cli.command {
        Commands::Render { in_dir, depth_dir, views, erosion_radius } => {
            let params = RenderParams::new(in_dir, depth_dir)
                .with_views(views.into())
                .with_erosion_radius(*erosion_radius);
            run_driver(FusionConfig::render(params), cli.threads, report_path)
        }
        Commands::Fuse { in_dir, depth_dir, out_dir, views, fusion } => {
            let params = FuseParams::new(in_dir, depth_dir, out_dir)
                .with_views(views.into())
                .with_tsdf(fusion.tsdf())
                .with_extraction(fusion.extraction())
                .with_output_extension(&fusion.format);
            run_driver(FusionConfig::fuse(params), cli.threads, report_path)
        }
        Commands::Pipeline {
            in_dir,
            out_dir,
            padding,
            erosion_radius,
            work_dir,
            no_simplify,
            decimation,
            views,
            fusion,
        } => {
            let params = PipelineParams {
                padding: *padding,
                views: views.into(),
                erosion_radius: *erosion_radius,
                tsdf: fusion.tsdf(),
                extraction: fusion.extraction(),
                output_extension: fusion.format.clone(),
                simplify: (!*no_simplify).then(|| decimation.into()),
                work_dir: work_dir.clone(),
                num_threads: cli.threads,
                ..PipelineParams::new(in_dir, out_dir)
            };
            let report = run_pipeline(&params, &abort)?;
            if let Some(path) = report_path {
                write_report(path, &report)?;
            }
            println!(
                "{} of {} meshes converted, {} failed",
                report.succeeded(),
                report.scale.len(),
                report.failed()
            );
            if !report.is_success() {
                bail!("{} meshes failed", report.failed());
            }
            Ok(())
        }
        Commands::Scale { in_dir, out_dir, padding } => {
            let params = ScaleParams::new(in_dir, out_dir).with_padding(*padding);
            let report = scale_directory(&params, &abort)?;
            if let Some(path) = report_path {
                write_report(path, &report)?;
            }
            finish(&report)
        }
        Commands::FixFrame { in_dir, transform_dir, out_dir, format } => {
            let params = FixFrameParams::new(in_dir, transform_dir, out_dir).with_output_extension(format);
            let report = fix_frame_directory(&params, &abort)?;
            if let Some(path) = report_path {
                write_report(path, &report)?;
            }
            finish(&report)
        }
        Commands::Simplify { in_dir, out_dir, decimation, format } => {
            let params = SimplifyParams::new(in_dir, out_dir)
                .with_decimation(decimation.into())
                .with_output_extension(format);
            let report = simplify_directory(&params, &abort)?;
            if let Some(path) = report_path {
                write_report(path, &report)?;
            }
            finish(&report)
        }
    }
}
