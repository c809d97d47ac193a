//! Truncated signed-distance volumes fused from depth maps
//!
//! Distances are measured along each camera's viewing axis: positive in front
//! of the observed surface, negative behind it. A voxel that no view has
//! observed keeps weight zero and is treated as unknown, which is different
//! from a voxel sitting exactly on the surface.

use crate::parallel::{execute_parallel, parallel_reduce};
use meshfusion_core::{BoundingBox, Error, Point3f, Result, Vector3f};
use meshfusion_render::{is_background, DepthMap};
use nalgebra::Matrix3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use tracing::{debug, info};

/// Placement of a cubic voxel grid in mesh coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    /// Minimum corner of the grid (corner of voxel `(0, 0, 0)`)
    pub origin: Point3f,
    /// Edge length of one voxel
    pub voxel_size: f32,
    /// Voxels along each axis
    pub resolution: usize,
}

impl VolumeGeometry {
    pub fn new(origin: Point3f, voxel_size: f32, resolution: usize) -> Result<Self> {
        if resolution == 0 {
            return Err(Error::Configuration("volume resolution must be positive".to_string()));
        }
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(Error::Configuration(format!(
                "voxel size must be positive and finite, got {}",
                voxel_size
            )));
        }
        Ok(Self { origin, voxel_size, resolution })
    }

    /// Cubic grid centered on the bounding box, with side
    /// `max_extent · (1 + 2·padding)`
    pub fn from_bounds(bbox: &BoundingBox, resolution: usize, padding: f32) -> Result<Self> {
        if !(padding.is_finite() && padding >= 0.0) {
            return Err(Error::Configuration(format!(
                "volume padding must be non-negative, got {}",
                padding
            )));
        }
        let extent = bbox.max_extent();
        if !(extent.is_finite() && extent > 0.0) {
            return Err(Error::InvalidMesh(format!(
                "bounding box has no extent ({} .. {})",
                bbox.min, bbox.max
            )));
        }
        if resolution == 0 {
            return Err(Error::Configuration("volume resolution must be positive".to_string()));
        }

        let side = extent * (1.0 + 2.0 * padding);
        let origin = bbox.center() - Vector3f::repeat(side * 0.5);
        Self::new(origin, side / resolution as f32, resolution)
    }

    pub fn voxel_count(&self) -> usize {
        self.resolution * self.resolution * self.resolution
    }

    /// Edge length of the whole grid
    pub fn side_length(&self) -> f32 {
        self.voxel_size * self.resolution as f32
    }

    /// Flat index of voxel `(x, y, z)`
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.resolution * (y + self.resolution * z)
    }

    /// Center of voxel `(x, y, z)`
    #[inline]
    pub fn voxel_center(&self, x: usize, y: usize, z: usize) -> Point3f {
        self.lattice_to_world(x as f32, y as f32, z as f32)
    }

    /// Map continuous coordinates on the voxel-center lattice to mesh
    /// coordinates. Integer coordinates land on voxel centers.
    #[inline]
    pub fn lattice_to_world(&self, x: f32, y: f32, z: f32) -> Point3f {
        self.origin + Vector3f::new(x + 0.5, y + 0.5, z + 0.5) * self.voxel_size
    }
}

/// Dense TSDF with one weight per voxel
#[derive(Debug, Clone, PartialEq)]
pub struct TsdfVolume {
    pub geometry: VolumeGeometry,
    /// Distances are clamped to `[-truncation, truncation]`
    pub truncation: f32,
    pub tsdf: Vec<f32>,
    /// Number of views that observed each voxel; zero means unknown
    pub weight: Vec<f32>,
}

impl TsdfVolume {
    /// A volume where every voxel is unknown
    pub fn new(geometry: VolumeGeometry, truncation: f32) -> Result<Self> {
        if !(truncation.is_finite() && truncation > 0.0) {
            return Err(Error::Configuration(format!(
                "truncation must be positive and finite, got {}",
                truncation
            )));
        }
        let n = geometry.voxel_count();
        Ok(Self {
            geometry,
            truncation,
            tsdf: vec![0.0; n],
            weight: vec![0.0; n],
        })
    }

    pub fn resolution(&self) -> usize {
        self.geometry.resolution
    }

    /// Distance and weight at voxel `(x, y, z)`, `None` outside the grid
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<(f32, f32)> {
        let res = self.resolution();
        if x >= res || y >= res || z >= res {
            return None;
        }
        let i = self.geometry.index(x, y, z);
        Some((self.tsdf[i], self.weight[i]))
    }

    #[inline]
    pub fn is_known(&self, index: usize) -> bool {
        self.weight[index] > 0.0
    }

    /// Voxels observed by at least one view
    pub fn known_count(&self) -> usize {
        parallel_reduce(&self.weight, 0, |w| usize::from(*w > 0.0), |a, b| a + b)
    }

    /// Largest absolute distance over the observed voxels
    pub fn max_abs_tsdf(&self) -> f32 {
        self.tsdf
            .iter()
            .zip(&self.weight)
            .filter(|(_, w)| **w > 0.0)
            .fold(0.0f32, |acc, (v, _)| acc.max(v.abs()))
    }

    /// Fold another partial volume into this one with a weighted average
    pub fn merge(&mut self, other: &TsdfVolume) -> Result<()> {
        if self.geometry != other.geometry || self.truncation != other.truncation {
            return Err(Error::Configuration(
                "cannot merge volumes with different geometry".to_string(),
            ));
        }

        for ((v1, w1), (v2, w2)) in self
            .tsdf
            .iter_mut()
            .zip(self.weight.iter_mut())
            .zip(other.tsdf.iter().zip(&other.weight))
        {
            let total = *w1 + *w2;
            if *w2 > 0.0 {
                *v1 = (*v1 * *w1 + *v2 * *w2) / total;
                *w1 = total;
            }
        }
        Ok(())
    }
}

/// How views are distributed over worker threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStrategy {
    /// Views in order, z-slabs of the volume in parallel
    #[default]
    Voxels,
    /// Workers fold disjoint view subsets into private volumes that are merged
    Views,
}

impl fmt::Display for IntegrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationStrategy::Voxels => write!(f, "voxels"),
            IntegrationStrategy::Views => write!(f, "views"),
        }
    }
}

impl FromStr for IntegrationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "voxels" => Ok(IntegrationStrategy::Voxels),
            "views" => Ok(IntegrationStrategy::Views),
            other => Err(Error::Configuration(format!(
                "unknown integration strategy '{}'",
                other
            ))),
        }
    }
}

/// Parameters for TSDF integration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsdfParams {
    /// Voxels along each axis
    pub resolution: usize,
    /// Truncation distance in voxels
    pub truncation_factor: f32,
    /// Shift of the zero level away from the camera, behind the observed
    /// surface, in voxels
    pub depth_offset_factor: f32,
    /// Margin around the mesh on each side, as a fraction of its largest extent
    pub volume_padding: f32,
    pub strategy: IntegrationStrategy,
    /// Largest depth difference between the four pixels around a projected
    /// voxel, in voxels. Wider spreads mark silhouettes and grazing surfaces,
    /// which give no evidence for that view.
    pub max_depth_step_factor: f32,
}

impl Default for TsdfParams {
    fn default() -> Self {
        Self {
            resolution: 256,
            truncation_factor: 10.0,
            depth_offset_factor: 1.5,
            volume_padding: 0.1,
            strategy: IntegrationStrategy::Voxels,
            max_depth_step_factor: 2.0,
        }
    }
}

impl TsdfParams {
    #[must_use]
    pub fn with_resolution(mut self, resolution: usize) -> Self {
        self.resolution = resolution;
        self
    }

    #[must_use]
    pub fn with_truncation_factor(mut self, factor: f32) -> Self {
        self.truncation_factor = factor;
        self
    }

    #[must_use]
    pub fn with_depth_offset_factor(mut self, factor: f32) -> Self {
        self.depth_offset_factor = factor;
        self
    }

    #[must_use]
    pub fn with_volume_padding(mut self, padding: f32) -> Self {
        self.volume_padding = padding;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: IntegrationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_max_depth_step_factor(mut self, factor: f32) -> Self {
        self.max_depth_step_factor = factor;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 {
            return Err(Error::Configuration("volume resolution must be positive".to_string()));
        }
        if !(self.truncation_factor.is_finite() && self.truncation_factor > 0.0) {
            return Err(Error::Configuration(format!(
                "truncation factor must be positive, got {}",
                self.truncation_factor
            )));
        }
        if !self.depth_offset_factor.is_finite() {
            return Err(Error::Configuration(format!(
                "depth offset factor must be finite, got {}",
                self.depth_offset_factor
            )));
        }
        if !(self.volume_padding.is_finite() && self.volume_padding >= 0.0) {
            return Err(Error::Configuration(format!(
                "volume padding must be non-negative, got {}",
                self.volume_padding
            )));
        }
        if !(self.max_depth_step_factor.is_finite() && self.max_depth_step_factor > 0.0) {
            return Err(Error::Configuration(format!(
                "max depth step factor must be positive, got {}",
                self.max_depth_step_factor
            )));
        }
        Ok(())
    }
}

/// Per-voxel outcomes of integration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub updated: u64,
    /// Behind the near plane or projected outside the image
    pub skipped_out_of_view: u64,
    /// At least one of the surrounding pixels saw no surface
    pub skipped_background: u64,
    /// Surrounding pixels straddle a depth discontinuity or a grazing surface
    pub skipped_grazing: u64,
    /// Far behind the observed surface
    pub skipped_occluded: u64,
    /// Non-finite distances
    pub degenerate: u64,
}

impl IntegrationStats {
    pub fn total(&self) -> u64 {
        self.updated
            + self.skipped_out_of_view
            + self.skipped_background
            + self.skipped_grazing
            + self.skipped_occluded
            + self.degenerate
    }
}

impl Add for IntegrationStats {
    type Output = IntegrationStats;

    fn add(self, other: IntegrationStats) -> IntegrationStats {
        IntegrationStats {
            updated: self.updated + other.updated,
            skipped_out_of_view: self.skipped_out_of_view + other.skipped_out_of_view,
            skipped_background: self.skipped_background + other.skipped_background,
            skipped_grazing: self.skipped_grazing + other.skipped_grazing,
            skipped_occluded: self.skipped_occluded + other.skipped_occluded,
            degenerate: self.degenerate + other.degenerate,
        }
    }
}

impl AddAssign for IntegrationStats {
    fn add_assign(&mut self, other: IntegrationStats) {
        *self = *self + other;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Sample {
    Update(f32),
    OutOfView,
    Background,
    Grazing,
    Occluded,
    Degenerate,
}

/// One depth map prepared for voxel lookups
struct ViewContext<'a> {
    map: &'a DepthMap,
    rotation: Matrix3<f32>,
    translation: Vector3f,
    width: usize,
    height: usize,
    offset: f32,
    truncation: f32,
    max_step: f32,
}

impl<'a> ViewContext<'a> {
    fn new(map: &'a DepthMap, params: &TsdfParams, voxel_size: f32, truncation: f32) -> Self {
        let world_to_camera = map.pose.world_to_camera();
        Self {
            map,
            rotation: world_to_camera.rotation.to_rotation_matrix().into_inner(),
            translation: world_to_camera.translation.vector,
            width: map.width(),
            height: map.height(),
            offset: params.depth_offset_factor * voxel_size,
            truncation,
            max_step: params.max_depth_step_factor * voxel_size,
        }
    }

    #[inline]
    fn sample(&self, p: &Point3f) -> Sample {
        if !(p.z > self.map.pose.near) {
            return if p.z.is_finite() { Sample::OutOfView } else { Sample::Degenerate };
        }

        // bilinear lookup between the four pixel centers around the projection
        let pixel = self.map.pose.intrinsics.project(p);
        let (u0, v0) = (pixel.x.floor(), pixel.y.floor());
        if !(u0 >= 0.0
            && v0 >= 0.0
            && u0 + 1.0 < self.width as f32
            && v0 + 1.0 < self.height as f32)
        {
            return Sample::OutOfView;
        }

        let top = v0 as usize * self.width + u0 as usize;
        let bottom = top + self.width;
        let taps = [
            self.map.data[top],
            self.map.data[top + 1],
            self.map.data[bottom],
            self.map.data[bottom + 1],
        ];
        if taps.iter().any(|d| is_background(*d)) {
            return Sample::Background;
        }
        let (lo, hi) = taps
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), d| (lo.min(*d), hi.max(*d)));
        if hi - lo > self.max_step {
            return Sample::Grazing;
        }

        let (fu, fv) = (pixel.x - u0, pixel.y - v0);
        let upper = taps[0] + (taps[1] - taps[0]) * fu;
        let lower = taps[2] + (taps[3] - taps[2]) * fu;
        let depth = upper + (lower - upper) * fv;

        let sd = depth - p.z + self.offset;
        if !sd.is_finite() {
            Sample::Degenerate
        } else if sd < -self.truncation {
            Sample::Occluded
        } else {
            Sample::Update(sd.min(self.truncation))
        }
    }

    /// Integrate this view into one z-slab of the volume
    fn integrate_slab(
        &self,
        geometry: &VolumeGeometry,
        z: usize,
        tsdf: &mut [f32],
        weight: &mut [f32],
    ) -> IntegrationStats {
        let res = geometry.resolution;
        let step = self.rotation.column(0) * geometry.voxel_size;
        let mut stats = IntegrationStats::default();

        for y in 0..res {
            let row_start = self.rotation * geometry.voxel_center(0, y, z).coords + self.translation;
            for x in 0..res {
                let p = Point3f::from(row_start + step * x as f32);
                let i = x + res * y;
                match self.sample(&p) {
                    Sample::Update(sd) => {
                        let w = weight[i];
                        tsdf[i] = (tsdf[i] * w + sd) / (w + 1.0);
                        weight[i] = w + 1.0;
                        stats.updated += 1;
                    }
                    Sample::OutOfView => stats.skipped_out_of_view += 1,
                    Sample::Background => stats.skipped_background += 1,
                    Sample::Grazing => stats.skipped_grazing += 1,
                    Sample::Occluded => stats.skipped_occluded += 1,
                    Sample::Degenerate => stats.degenerate += 1,
                }
            }
        }
        stats
    }
}

/// Fuses depth maps into a [`TsdfVolume`]
#[derive(Debug, Clone, Default)]
pub struct TsdfVolumizer {
    pub params: TsdfParams,
}

impl TsdfVolumizer {
    pub fn new(params: TsdfParams) -> Self {
        Self { params }
    }

    /// Grid for a mesh with the given bounds
    pub fn geometry_for(&self, bbox: &BoundingBox) -> Result<VolumeGeometry> {
        VolumeGeometry::from_bounds(bbox, self.params.resolution, self.params.volume_padding)
    }

    /// An empty volume on `geometry` with the configured truncation
    pub fn empty_volume(&self, geometry: VolumeGeometry) -> Result<TsdfVolume> {
        TsdfVolume::new(geometry, self.params.truncation_factor * geometry.voxel_size)
    }

    /// Integrate a single depth map, splitting the volume into parallel z-slabs
    pub fn integrate_view(&self, volume: &mut TsdfVolume, map: &DepthMap) -> Result<IntegrationStats> {
        check_map(map)?;
        let geometry = volume.geometry;
        let slab = geometry.resolution * geometry.resolution;
        let view = ViewContext::new(map, &self.params, geometry.voxel_size, volume.truncation);

        let stats = execute_parallel(|| {
            volume
                .tsdf
                .par_chunks_mut(slab)
                .zip(volume.weight.par_chunks_mut(slab))
                .enumerate()
                .map(|(z, (tsdf, weight))| view.integrate_slab(&geometry, z, tsdf, weight))
                .reduce(IntegrationStats::default, |a, b| a + b)
        });

        debug!(
            "view {}: {} voxels updated, {} background, {} grazing, {} occluded",
            map.view_index,
            stats.updated,
            stats.skipped_background,
            stats.skipped_grazing,
            stats.skipped_occluded
        );
        Ok(stats)
    }

    /// Integrate every depth map of a mesh into a fresh volume on `geometry`
    pub fn integrate(
        &self,
        geometry: VolumeGeometry,
        maps: &[DepthMap],
    ) -> Result<(TsdfVolume, IntegrationStats)> {
        self.params.validate()?;
        if maps.is_empty() {
            return Err(Error::MissingDepthMaps("no depth maps to integrate".to_string()));
        }
        for map in maps {
            check_map(map)?;
        }

        let (volume, stats) = match self.params.strategy {
            IntegrationStrategy::Voxels => {
                let mut volume = self.empty_volume(geometry)?;
                let mut stats = IntegrationStats::default();
                for map in maps {
                    stats += self.integrate_view(&mut volume, map)?;
                }
                (volume, stats)
            }
            IntegrationStrategy::Views => self.integrate_by_views(geometry, maps)?,
        };

        info!(
            "integrated {} views into a {}^3 volume: {} of {} voxels observed",
            maps.len(),
            geometry.resolution,
            volume.known_count(),
            geometry.voxel_count()
        );
        Ok((volume, stats))
    }

    fn integrate_by_views(
        &self,
        geometry: VolumeGeometry,
        maps: &[DepthMap],
    ) -> Result<(TsdfVolume, IntegrationStats)> {
        let partials = execute_parallel(|| {
            let chunk = maps.len().div_ceil(rayon::current_num_threads().max(1));
            maps.par_chunks(chunk)
                .map(|views| self.integrate_serial(geometry, views))
                .collect::<Result<Vec<_>>>()
        })?;

        // partials are merged in view order so the result is reproducible
        let mut partials = partials.into_iter();
        let (mut volume, mut stats) = match partials.next() {
            Some(first) => first,
            None => return Err(Error::MissingDepthMaps("no depth maps to integrate".to_string())),
        };
        for (partial, partial_stats) in partials {
            volume.merge(&partial)?;
            stats += partial_stats;
        }
        Ok((volume, stats))
    }

    fn integrate_serial(
        &self,
        geometry: VolumeGeometry,
        maps: &[DepthMap],
    ) -> Result<(TsdfVolume, IntegrationStats)> {
        let mut volume = self.empty_volume(geometry)?;
        let slab = geometry.resolution * geometry.resolution;
        let mut stats = IntegrationStats::default();

        for map in maps {
            let view = ViewContext::new(map, &self.params, geometry.voxel_size, volume.truncation);
            for (z, (tsdf, weight)) in volume
                .tsdf
                .chunks_mut(slab)
                .zip(volume.weight.chunks_mut(slab))
                .enumerate()
            {
                stats += view.integrate_slab(&geometry, z, tsdf, weight);
            }
        }
        Ok((volume, stats))
    }
}

fn check_map(map: &DepthMap) -> Result<()> {
    map.pose.intrinsics.validate()?;
    if map.data.len() != map.pose.intrinsics.pixel_count() {
        return Err(Error::InvalidData(format!(
            "depth map {} has {} values for a {}x{} image",
            map.view_index,
            map.data.len(),
            map.width(),
            map.height()
        )));
    }
    Ok(())
}
