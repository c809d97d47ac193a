//! Benchmarks for TSDF integration and surface extraction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use meshfusion_core::{shapes, Bounded};
use meshfusion_reconstruction::{IntegrationStrategy, SurfaceExtractor, TsdfParams, TsdfVolumizer};
use meshfusion_render::{CameraSampler, DepthMap, DepthRenderer, Intrinsics, SoftwareRasterizer};

fn sphere_views(n_views: usize) -> (meshfusion_core::BoundingBox, Vec<DepthMap>) {
    let sphere = shapes::icosphere(0.4, 4);
    let intrinsics = Intrinsics::new(256.0, 256.0, 128.0, 128.0, 256, 256);
    let renderer = SoftwareRasterizer::default();
    let maps = CameraSampler::new(n_views, intrinsics)
        .sample_for_mesh(&sphere)
        .expect("valid sampler")
        .iter()
        .enumerate()
        .map(|(i, pose)| renderer.render(&sphere, pose, i).expect("render"))
        .collect();
    (sphere.bounding_box().expect("non-empty mesh"), maps)
}

fn bench_integration(c: &mut Criterion) {
    let mut group = c.benchmark_group("integrate_sphere");
    group.sample_size(10);
    let (bbox, maps) = sphere_views(16);

    for strategy in [IntegrationStrategy::Voxels, IntegrationStrategy::Views] {
        for &resolution in &[32usize, 64] {
            let volumizer = TsdfVolumizer::new(
                TsdfParams::default()
                    .with_resolution(resolution)
                    .with_strategy(strategy),
            );
            let geometry = volumizer.geometry_for(&bbox).expect("valid bounds");

            group.throughput(Throughput::Elements((geometry.voxel_count() * maps.len()) as u64));
            group.bench_with_input(
                BenchmarkId::new(strategy.to_string(), resolution),
                &resolution,
                |b, _| b.iter(|| black_box(volumizer.integrate(geometry, black_box(&maps)).expect("integrate"))),
            );
        }
    }

    group.finish();
}

fn bench_extraction(c: &mut Criterion) {
    let (bbox, maps) = sphere_views(16);
    let volumizer = TsdfVolumizer::new(TsdfParams::default().with_resolution(64));
    let geometry = volumizer.geometry_for(&bbox).expect("valid bounds");
    let (volume, _) = volumizer.integrate(geometry, &maps).expect("integrate");
    let extractor = SurfaceExtractor::default();

    c.bench_function("extract_sphere_64", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&volume)).expect("surface")))
    });
}

criterion_group!(benches, bench_integration, bench_extraction);
criterion_main!(benches);
