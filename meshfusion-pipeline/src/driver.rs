//! The fusion driver
//!
//! Render mode, per mesh: load mesh, sample views, render views, persist depth
//! maps. Fuse mode, per mesh: load mesh, load depth maps, build the volume
//! geometry, integrate, extract, write the watertight mesh.

use crate::batch::{run_batch, AbortSignal, BatchReport};
use crate::config::{FuseParams, FusionConfig, Mode, RenderParams};
use meshfusion_core::{Bounded, Error, Result, TriangleMesh};
use meshfusion_io::{list_meshes, read_mesh, write_mesh};
use meshfusion_reconstruction::{init_thread_pool, SurfaceExtractor, ThreadPoolConfig, TsdfVolumizer};
use meshfusion_render::{
    CameraPose, DepthMap, DepthMapStore, DepthRenderer, DirectoryDepthStore, SoftwareRasterizer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Poses read back from disk must match the sampler to this relative precision
const POSE_TOLERANCE: f32 = 1e-5;

/// Runs one mode over every mesh of the input directory
pub struct FusionDriver {
    config: FusionConfig,
    renderer: Arc<dyn DepthRenderer>,
    store: Arc<dyn DepthMapStore>,
    abort: AbortSignal,
}

impl FusionDriver {
    /// Driver with the software rasterizer and depth maps stored under the
    /// configured depth directory
    pub fn new(config: FusionConfig) -> Self {
        let store = DirectoryDepthStore::new(config.mode.depth_dir());
        Self {
            config,
            renderer: Arc::new(SoftwareRasterizer::default()),
            store: Arc::new(store),
            abort: AbortSignal::new(),
        }
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn DepthRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DepthMapStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Handle for stopping the batch from another thread
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Process the whole batch.
    ///
    /// Configuration problems and an unreadable input directory fail the
    /// batch before any mesh starts; everything else is reported per mesh.
    pub fn run(&self) -> Result<BatchReport> {
        self.config.validate()?;
        if let Some(threads) = self.config.num_threads {
            init_thread_pool(ThreadPoolConfig::default().with_threads(threads))?;
        }

        let meshes = list_meshes(self.config.mode.in_dir())?;
        info!(
            "{}: {} meshes in {}",
            self.config.mode.name(),
            meshes.len(),
            self.config.mode.in_dir().display()
        );

        let report = match &self.config.mode {
            Mode::Render(params) => run_batch("render", &meshes, &self.abort, |key, path| {
                self.render_mesh(params, key, path)
            }),
            Mode::Fuse(params) => run_batch("fuse", &meshes, &self.abort, |key, path| {
                self.fuse_mesh(params, key, path).map(|_| ())
            }),
        };
        Ok(report)
    }

    /// Render and persist every view of one mesh
    pub fn render_mesh(&self, params: &RenderParams, key: &str, path: &Path) -> Result<()> {
        let mesh = load_mesh(path)?;
        let poses = params.views.sampler().sample_for_mesh(&mesh)?;

        // stale views from an earlier run must not mix with the new ones
        self.store.clear(key)?;
        for (view, pose) in poses.iter().enumerate() {
            let map = self.renderer.render(&mesh, pose, view)?;
            let map = if params.erosion_radius > 0 {
                map.erode(params.erosion_radius)
            } else {
                map
            };
            debug!("{} view {}: {} surface pixels", key, view, map.hit_count());
            self.store.save(key, &map)?;
        }
        Ok(())
    }

    /// Fuse the stored views of one mesh and write the watertight result.
    ///
    /// Returns the path of the written mesh.
    pub fn fuse_mesh(&self, params: &FuseParams, key: &str, path: &Path) -> Result<PathBuf> {
        let mesh = load_mesh(path)?;
        let bbox = mesh
            .bounding_box()
            .ok_or_else(|| Error::InvalidMesh("mesh has no vertices".to_string()))?;
        let expected = params.views.sampler().sample(&bbox)?;
        let maps = self.load_views(key, &expected)?;

        let volumizer = TsdfVolumizer::new(params.tsdf);
        let geometry = volumizer.geometry_for(&bbox)?;
        let (volume, stats) = volumizer.integrate(geometry, &maps)?;
        debug!(
            "{}: {} updates, {} background, {} occluded, {} degenerate",
            key, stats.updated, stats.skipped_background, stats.skipped_occluded, stats.degenerate
        );

        let surface = SurfaceExtractor::new(params.extraction).extract(&volume)?;
        let out_path = params
            .out_dir
            .join(format!("{}.{}", key, params.output_format()?.extension()));
        write_mesh(&surface, &out_path)?;
        Ok(out_path)
    }

    /// Load the stored views of a mesh, insisting on exactly the poses the
    /// current configuration produces
    fn load_views(&self, key: &str, expected: &[CameraPose]) -> Result<Vec<DepthMap>> {
        let views = self.store.list_views(key)?;
        let complete = views.len() == expected.len() && views.iter().enumerate().all(|(i, &v)| i == v);
        if !complete {
            return Err(Error::MissingDepthMaps(format!(
                "'{}' has {} stored views, expected {}",
                key,
                views.len(),
                expected.len()
            )));
        }

        let maps = self.store.load_all(key)?;
        for (map, pose) in maps.iter().zip(expected) {
            if !map.pose.approx_eq(pose, POSE_TOLERANCE) {
                return Err(Error::MissingDepthMaps(format!(
                    "view {} of '{}' was rendered with a different camera",
                    map.view_index, key
                )));
            }
        }
        Ok(maps)
    }
}

fn load_mesh(path: &Path) -> Result<TriangleMesh> {
    let mesh = read_mesh(path)?;
    mesh.validate()?;
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewParams;
    use meshfusion_core::shapes;
    use meshfusion_reconstruction::TsdfParams;

    fn small_views() -> ViewParams {
        ViewParams::square(6, 32)
    }

    #[test]
    fn test_render_then_fuse_single_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let mesh_path = dir.path().join("meshes").join("cube.ply");
        write_mesh(&shapes::cube(1.0), &mesh_path).unwrap();

        let render = RenderParams::new(dir.path().join("meshes"), dir.path().join("depth"))
            .with_views(small_views());
        let driver = FusionDriver::new(FusionConfig::render(render.clone()));
        driver.render_mesh(&render, "cube", &mesh_path).unwrap();

        let store = DirectoryDepthStore::new(dir.path().join("depth"));
        assert_eq!(store.list_views("cube").unwrap(), (0..6).collect::<Vec<_>>());

        let fuse = FuseParams::new(dir.path().join("meshes"), dir.path().join("depth"), dir.path().join("out"))
            .with_views(small_views())
            .with_tsdf(TsdfParams::default().with_resolution(12));
        let driver = FusionDriver::new(FusionConfig::fuse(fuse.clone()));
        let written = driver.fuse_mesh(&fuse, "cube", &mesh_path).unwrap();
        assert!(written.ends_with("out/cube.ply"));
        assert!(written.exists());
    }

    #[test]
    fn test_stale_views_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mesh_path = dir.path().join("cube.off");
        write_mesh(&shapes::cube(1.0), &mesh_path).unwrap();

        let many = RenderParams::new(dir.path(), dir.path().join("depth")).with_views(ViewParams::square(8, 16));
        let few = RenderParams::new(dir.path(), dir.path().join("depth")).with_views(ViewParams::square(3, 16));
        let driver = FusionDriver::new(FusionConfig::render(many.clone()));
        driver.render_mesh(&many, "cube", &mesh_path).unwrap();
        driver.render_mesh(&few, "cube", &mesh_path).unwrap();

        let store = DirectoryDepthStore::new(dir.path().join("depth"));
        assert_eq!(store.list_views("cube").unwrap(), vec![0, 1, 2]);
    }
}
