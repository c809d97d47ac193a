//! Integration tests for meshfusion-reconstruction
//!
//! These tests render real meshes, fuse the depth maps and check the
//! extracted surfaces for closedness and accuracy.

use approx::assert_relative_eq;
use meshfusion_core::{shapes, signed_volume, Bounded, MeshReport, Point3f, TriangleMesh};
use meshfusion_reconstruction::*;
use meshfusion_render::{CameraSampler, DepthMap, DepthRenderer, Intrinsics, SoftwareRasterizer};
use proptest::prelude::*;
use std::sync::OnceLock;

fn intrinsics(size: u32) -> Intrinsics {
    let half = size as f32 / 2.0;
    Intrinsics::new(size as f32, size as f32, half, half, size, size)
}

fn render_views(mesh: &TriangleMesh, n_views: usize, image_size: u32) -> Vec<DepthMap> {
    let poses = CameraSampler::new(n_views, intrinsics(image_size))
        .sample_for_mesh(mesh)
        .unwrap();
    let renderer = SoftwareRasterizer::default();
    poses
        .iter()
        .enumerate()
        .map(|(i, pose)| renderer.render(mesh, pose, i).unwrap())
        .collect()
}

/// Views as the batch driver stores them, with one pixel of depth erosion
fn render_eroded(mesh: &TriangleMesh, n_views: usize, image_size: u32) -> Vec<DepthMap> {
    render_views(mesh, n_views, image_size)
        .iter()
        .map(|map| map.erode(1))
        .collect()
}

fn fuse(mesh: &TriangleMesh, maps: &[DepthMap], params: TsdfParams) -> TsdfVolume {
    let volumizer = TsdfVolumizer::new(params);
    let geometry = volumizer.geometry_for(&mesh.bounding_box().unwrap()).unwrap();
    volumizer.integrate(geometry, maps).unwrap().0
}

fn assert_same_volume(a: &TsdfVolume, b: &TsdfVolume) {
    assert_eq!(a.geometry, b.geometry);
    assert_eq!(a.weight, b.weight);
    for (x, y) in a.tsdf.iter().zip(&b.tsdf) {
        assert_relative_eq!(*x, *y, epsilon = 1e-4);
    }
}

/// Views of the unit cube shared by the order-independence cases
fn cube_views() -> &'static (TriangleMesh, Vec<DepthMap>) {
    static VIEWS: OnceLock<(TriangleMesh, Vec<DepthMap>)> = OnceLock::new();
    VIEWS.get_or_init(|| {
        let mesh = shapes::cube(1.0);
        let maps = render_views(&mesh, 8, 48);
        (mesh, maps)
    })
}

fn cube_params() -> TsdfParams {
    TsdfParams::default().with_resolution(16)
}

fn sphere_roundtrip(resolution: usize, n_views: usize, image_size: u32) -> (f32, f32, MeshReport) {
    let radius = 0.35;
    let sphere = shapes::icosphere(radius, 4);
    let maps = render_views(&sphere, n_views, image_size);

    let params = TsdfParams::default()
        .with_resolution(resolution)
        .with_depth_offset_factor(0.0);
    let volume = fuse(&sphere, &maps, params);
    let mesh = SurfaceExtractor::default().extract(&volume).unwrap();

    let center = sphere.center().unwrap();
    let errors: Vec<f32> = mesh
        .vertices
        .iter()
        .map(|v| ((v - center).norm() - radius).abs() / volume.geometry.voxel_size)
        .collect();
    let mean = errors.iter().sum::<f32>() / errors.len() as f32;
    let max = errors.iter().cloned().fold(0.0, f32::max);
    (mean, max, MeshReport::analyze(&mesh))
}

#[test]
fn test_sphere_roundtrip_reduced() {
    let (mean, max, report) = sphere_roundtrip(64, 40, 256);

    assert!(report.is_watertight(), "{:?}", report);
    assert_eq!(report.components, 1);
    assert_eq!(report.degenerate_faces, 0);
    assert!(mean < 0.75, "mean radial error {} voxels", mean);
    assert!(max < 2.5, "max radial error {} voxels", max);
}

#[test]
#[ignore = "long running: 256^3 volume from 100 full-size views"]
fn test_sphere_roundtrip_full() {
    let (mean, max, report) = sphere_roundtrip(256, 100, 640);

    assert!(report.is_watertight(), "{:?}", report);
    assert_eq!(report.components, 1);
    assert!(mean < 0.75, "mean radial error {} voxels", mean);
    assert!(max < 2.5, "max radial error {} voxels", max);
}

#[test]
fn test_strategies_agree() {
    let (mesh, maps) = cube_views();
    let by_voxels = fuse(mesh, maps, cube_params().with_strategy(IntegrationStrategy::Voxels));
    let by_views = fuse(mesh, maps, cube_params().with_strategy(IntegrationStrategy::Views));

    assert!(by_voxels.known_count() > 0);
    assert_same_volume(&by_voxels, &by_views);
}

#[test]
fn test_truncation_bound() {
    let (mesh, maps) = cube_views();
    for strategy in [IntegrationStrategy::Voxels, IntegrationStrategy::Views] {
        let volume = fuse(mesh, maps, cube_params().with_strategy(strategy));
        assert!(volume.max_abs_tsdf() <= volume.truncation);
        assert!(volume.tsdf.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_fusion_is_deterministic() {
    let (mesh, maps) = cube_views();
    let extractor = SurfaceExtractor::default();
    let first = extractor.extract(&fuse(mesh, maps, cube_params())).unwrap();
    let second = extractor.extract(&fuse(mesh, maps, cube_params())).unwrap();

    assert_eq!(first.faces, second.faces);
    assert_eq!(first.vertices, second.vertices);
}

#[test]
fn test_cube_becomes_closed_surface() {
    let (mesh, maps) = cube_views();
    let volume = fuse(mesh, maps, cube_params());
    let surface = SurfaceExtractor::default().extract(&volume).unwrap();

    let report = MeshReport::analyze(&surface);
    assert!(report.is_watertight(), "{:?}", report);
    assert!(report.is_clean());
    assert_eq!(report.components, 1);

    // vertices stay close to the original box
    let bbox = surface.bounding_box().unwrap();
    let tolerance = 3.0 * volume.geometry.voxel_size;
    assert!((bbox.min - Point3f::new(-0.5, -0.5, -0.5)).norm() < tolerance * 3f32.sqrt());
    assert!((bbox.max - Point3f::new(0.5, 0.5, 0.5)).norm() < tolerance * 3f32.sqrt());
}

#[test]
fn test_cube_with_default_settings_has_no_stray_shells() {
    let mesh = shapes::cube(1.0);
    let maps = render_eroded(&mesh, 100, 256);
    let volume = fuse(&mesh, &maps, TsdfParams::default().with_resolution(64));
    let surface = SurfaceExtractor::default().extract(&volume).unwrap();

    let report = MeshReport::analyze(&surface);
    assert!(report.is_watertight(), "{:?}", report);
    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.components, 1);
    assert_eq!(report.euler_characteristic(), 2);

    let bbox = surface.bounding_box().unwrap();
    let tolerance = 3.0 * volume.geometry.voxel_size;
    for axis in 0..3 {
        assert!((bbox.min[axis] + 0.5).abs() < tolerance, "min {} on axis {}", bbox.min[axis], axis);
        assert!((bbox.max[axis] - 0.5).abs() < tolerance, "max {} on axis {}", bbox.max[axis], axis);
    }
}

#[test]
fn test_self_intersecting_mesh_becomes_single_closed_surface() {
    // two interpenetrating cubes, never merged into one shell
    let mut mesh = shapes::cube(1.0);
    let offset = mesh.vertex_count();
    let other = shapes::cube(1.0);
    mesh.vertices
        .extend(other.vertices.iter().map(|v| v + nalgebra::Vector3::new(0.4, 0.3, 0.2)));
    mesh.faces
        .extend(other.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
    assert!(MeshReport::analyze(&mesh).is_watertight());

    let maps = render_views(&mesh, 12, 64);
    let volume = fuse(&mesh, &maps, TsdfParams::default().with_resolution(24));
    let surface = SurfaceExtractor::default().extract(&volume).unwrap();

    let report = MeshReport::analyze(&surface);
    assert!(report.is_watertight(), "{:?}", report);
    assert_eq!(report.components, 1);
}

#[test]
fn test_open_mesh_yields_closed_surface() {
    let mesh = shapes::open_box(1.0);
    assert!(!MeshReport::analyze(&mesh).is_watertight());

    let maps = render_eroded(&mesh, 40, 128);
    let volume = fuse(&mesh, &maps, TsdfParams::default().with_resolution(32));
    let surface = SurfaceExtractor::default().extract(&volume).unwrap();

    let report = MeshReport::analyze(&surface);
    assert!(report.is_watertight(), "{:?}", report);
    assert!(report.is_clean(), "{:?}", report);
    assert!(signed_volume(&surface) > 0.0);

    // the surface hugs the walls of the box
    let bbox = surface.bounding_box().unwrap();
    let margin = 3.0 * volume.geometry.voxel_size;
    for axis in 0..3 {
        assert!(bbox.min[axis] > -0.5 - margin && bbox.max[axis] < 0.5 + margin);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_view_order_does_not_matter(order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()) {
        let (mesh, maps) = cube_views();
        let reference = fuse(mesh, maps, cube_params());

        let shuffled: Vec<DepthMap> = order.iter().map(|&i| maps[i].clone()).collect();
        for strategy in [IntegrationStrategy::Voxels, IntegrationStrategy::Views] {
            let volume = fuse(mesh, &shuffled, cube_params().with_strategy(strategy));
            prop_assert_eq!(&volume.weight, &reference.weight);
            for (a, b) in volume.tsdf.iter().zip(&reference.tsdf) {
                prop_assert!((a - b).abs() <= 1e-4, "{} vs {}", a, b);
            }
        }
    }
}
