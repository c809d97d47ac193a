//! Benchmarks for software depth rasterization

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use meshfusion_core::shapes;
use meshfusion_render::{CameraSampler, DepthRenderer, Intrinsics, SoftwareRasterizer};

fn bench_render_sphere(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_sphere");
    let renderer = SoftwareRasterizer::default();

    for &size in &[128u32, 256, 640] {
        let intrinsics = Intrinsics::new(size as f32, size as f32, size as f32 / 2.0, size as f32 / 2.0, size, size);
        let sphere = shapes::icosphere(0.4, 4);
        let poses = CameraSampler::new(4, intrinsics)
            .sample_for_mesh(&sphere)
            .expect("valid sampler");

        group.throughput(Throughput::Elements(intrinsics.pixel_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                for (i, pose) in poses.iter().enumerate() {
                    black_box(renderer.render(black_box(&sphere), pose, i).expect("render"));
                }
            })
        });
    }

    group.finish();
}

fn bench_erosion(c: &mut Criterion) {
    let intrinsics = Intrinsics::default();
    let sphere = shapes::icosphere(0.4, 3);
    let pose = CameraSampler::new(1, intrinsics)
        .sample_for_mesh(&sphere)
        .expect("valid sampler")[0];
    let map = SoftwareRasterizer::default()
        .render(&sphere, &pose, 0)
        .expect("render");

    c.bench_function("erode_640_r1", |b| b.iter(|| black_box(map.erode(1))));
}

criterion_group!(benches, bench_render_sphere, bench_erosion);
criterion_main!(benches);
