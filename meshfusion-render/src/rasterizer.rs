//! Software depth rasterization
//!
//! Triangles are moved into the camera frame, clipped against the near plane,
//! projected and scan-converted with edge functions. Depth is interpolated
//! linearly in `1/z`, which is exact under perspective projection, and the
//! nearest surface wins per pixel. Both windings are drawn so open and
//! inside-out surfaces still produce depth.

use crate::camera::CameraPose;
use crate::depth::DepthMap;
use meshfusion_core::{Error, Point3f, Result, TriangleMesh};
use rayon::prelude::*;
use tracing::debug;

/// Renders a mesh into a depth map as seen from one camera
pub trait DepthRenderer: Send + Sync {
    fn render(&self, mesh: &TriangleMesh, pose: &CameraPose, view_index: usize) -> Result<DepthMap>;
}

/// Counters collected while rasterizing one view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub triangles: usize,
    /// Non-finite or zero-area triangles that were skipped
    pub degenerate: usize,
    /// Triangles entirely behind the near plane
    pub culled: usize,
    /// Screen-space triangles handed to the scan converter
    pub rasterized: usize,
}

/// CPU rasterizer that processes horizontal bands of rows in parallel
#[derive(Debug, Clone)]
pub struct SoftwareRasterizer {
    /// Rows per parallel work item
    pub band_height: usize,
}

impl Default for SoftwareRasterizer {
    fn default() -> Self {
        Self { band_height: 16 }
    }
}

/// Projected triangle: pixel coordinates and inverse depth per corner
#[derive(Debug, Clone, Copy)]
struct ScreenTriangle {
    u: [f32; 3],
    v: [f32; 3],
    inv_z: [f32; 3],
    area: f32,
    // inclusive pixel bounds
    x0: usize,
    x1: usize,
    y0: usize,
    y1: usize,
}

#[inline]
fn edge(ax: f32, ay: f32, bx: f32, by: f32, px: f32, py: f32) -> f32 {
    (bx - ax) * (py - ay) - (by - ay) * (px - ax)
}

impl SoftwareRasterizer {
    pub fn new(band_height: usize) -> Self {
        Self {
            band_height: band_height.max(1),
        }
    }

    /// Render and also return per-view counters
    pub fn render_with_stats(
        &self,
        mesh: &TriangleMesh,
        pose: &CameraPose,
        view_index: usize,
    ) -> Result<(DepthMap, RenderStats)> {
        pose.intrinsics.validate()?;
        let n = mesh.vertices.len();
        if let Some(f) = mesh.faces.iter().position(|face| face.iter().any(|&i| i >= n)) {
            return Err(Error::InvalidMesh(format!(
                "face {} references a vertex outside 0..{}",
                f, n
            )));
        }

        let w2c = pose.world_to_camera();
        let camera_vertices: Vec<Point3f> = mesh.vertices.iter().map(|v| w2c * v).collect();

        let mut stats = RenderStats {
            triangles: mesh.faces.len(),
            ..Default::default()
        };
        let mut triangles = Vec::new();
        for face in &mesh.faces {
            let corners = [
                camera_vertices[face[0]],
                camera_vertices[face[1]],
                camera_vertices[face[2]],
            ];
            let finite = corners.iter().all(|p| p.coords.iter().all(|c| c.is_finite()));
            let area = (corners[1] - corners[0]).cross(&(corners[2] - corners[0])).norm();
            if !finite || !(area > 0.0) {
                stats.degenerate += 1;
                continue;
            }

            let polygon = clip_near(&corners, pose.near);
            if polygon.len() < 3 {
                stats.culled += 1;
                continue;
            }
            for i in 1..polygon.len() - 1 {
                match self.setup(pose, [polygon[0], polygon[i], polygon[i + 1]]) {
                    Some(Some(tri)) => {
                        stats.rasterized += 1;
                        triangles.push(tri);
                    }
                    // projected outside the image
                    Some(None) => {}
                    None => stats.degenerate += 1,
                }
            }
        }

        let mut map = DepthMap::background(view_index, *pose);
        let width = map.width();
        let height = map.height();
        let band = self.band_height.max(1);

        map.data
            .par_chunks_mut(width * band)
            .enumerate()
            .for_each(|(b, rows)| {
                let y_start = b * band;
                let y_end = (y_start + band).min(height) - 1;
                for tri in triangles.iter().filter(|t| t.y1 >= y_start && t.y0 <= y_end) {
                    rasterize_band(tri, rows, width, y_start, y_end);
                }
            });

        debug!(
            view = view_index,
            triangles = stats.triangles,
            rasterized = stats.rasterized,
            degenerate = stats.degenerate,
            culled = stats.culled,
            hits = map.hit_count(),
            "rendered depth map"
        );

        Ok((map, stats))
    }

    /// Project a clipped camera-frame triangle. `None` when it is degenerate
    /// on screen, `Some(None)` when it misses every pixel center.
    fn setup(&self, pose: &CameraPose, corners: [Point3f; 3]) -> Option<Option<ScreenTriangle>> {
        let k = &pose.intrinsics;
        let mut u = [0.0; 3];
        let mut v = [0.0; 3];
        let mut inv_z = [0.0; 3];
        for (i, p) in corners.iter().enumerate() {
            let pixel = k.project(p);
            u[i] = pixel.x;
            v[i] = pixel.y;
            inv_z[i] = 1.0 / p.z;
        }

        let area = edge(u[0], v[0], u[1], v[1], u[2], v[2]);
        if !(area.abs() > f32::EPSILON) || !area.is_finite() {
            return None;
        }

        let min_u = u.iter().copied().fold(f32::INFINITY, f32::min).ceil();
        let max_u = u.iter().copied().fold(f32::NEG_INFINITY, f32::max).floor();
        let min_v = v.iter().copied().fold(f32::INFINITY, f32::min).ceil();
        let max_v = v.iter().copied().fold(f32::NEG_INFINITY, f32::max).floor();

        let last_x = (k.width - 1) as f32;
        let last_y = (k.height - 1) as f32;
        if max_u < 0.0 || max_v < 0.0 || min_u > last_x || min_v > last_y || min_u > max_u || min_v > max_v {
            return Some(None);
        }

        Some(Some(ScreenTriangle {
            u,
            v,
            inv_z,
            area,
            x0: min_u.max(0.0) as usize,
            x1: max_u.min(last_x) as usize,
            y0: min_v.max(0.0) as usize,
            y1: max_v.min(last_y) as usize,
        }))
    }
}

impl DepthRenderer for SoftwareRasterizer {
    fn render(&self, mesh: &TriangleMesh, pose: &CameraPose, view_index: usize) -> Result<DepthMap> {
        self.render_with_stats(mesh, pose, view_index).map(|(map, _)| map)
    }
}

fn rasterize_band(tri: &ScreenTriangle, rows: &mut [f32], width: usize, y_start: usize, y_end: usize) {
    let [u0, u1, u2] = tri.u;
    let [v0, v1, v2] = tri.v;
    let inv_area = 1.0 / tri.area;

    for y in tri.y0.max(y_start)..=tri.y1.min(y_end) {
        let py = y as f32;
        let row = &mut rows[(y - y_start) * width..(y - y_start + 1) * width];
        for x in tri.x0..=tri.x1 {
            let px = x as f32;
            // barycentric weights, positive inside for either winding
            let b0 = edge(u1, v1, u2, v2, px, py) * inv_area;
            let b1 = edge(u2, v2, u0, v0, px, py) * inv_area;
            let b2 = edge(u0, v0, u1, v1, px, py) * inv_area;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }

            let inv_z = b0 * tri.inv_z[0] + b1 * tri.inv_z[1] + b2 * tri.inv_z[2];
            if !(inv_z > 0.0) {
                continue;
            }
            let depth = 1.0 / inv_z;
            let pixel = &mut row[x];
            if depth < *pixel {
                *pixel = depth;
            }
        }
    }
}

/// Sutherland-Hodgman clip of a triangle against the half-space `z >= near`
fn clip_near(corners: &[Point3f; 3], near: f32) -> Vec<Point3f> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = corners[i];
        let b = corners[(i + 1) % 3];
        let a_in = a.z >= near;
        let b_in = b.z >= near;
        if a_in {
            out.push(a);
        }
        if a_in != b_in {
            let t = (near - a.z) / (b.z - a.z);
            let mut p = a + (b - a) * t;
            p.z = near;
            out.push(p);
        }
    }
    out
}
