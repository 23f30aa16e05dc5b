use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scatterflow_gpu::downsample::reference::random01;
use scatterflow_gpu::{
    density_field, downsample_cpu, DownsampleConfig, RendererConfig, ViewportState,
};

fn points(count: u32) -> (Vec<f32>, Vec<f32>) {
    let xs = (0..count).map(|i| random01(1, i) * 2.0 - 1.0).collect();
    let ys = (0..count).map(|i| random01(2, i) * 2.0 - 1.0).collect();
    (xs, ys)
}

fn bench_density_field(c: &mut Criterion) {
    let config = RendererConfig::default();
    let viewport = ViewportState::default();
    let (xs, ys) = points(1_000_000);
    c.bench_function("density field, 1M points", |b| {
        b.iter(|| black_box(density_field(&xs, &ys, &viewport, &config)))
    });
}

fn bench_downsample(c: &mut Criterion) {
    let config = RendererConfig::default();
    let viewport = ViewportState::default();
    let (xs, ys) = points(1_000_000);
    let grid = density_field(&xs, &ys, &viewport, &config);
    let mut seed = 0;
    c.bench_function("downsample 1M -> 10k", |b| {
        b.iter(|| {
            seed += 1;
            let frame = DownsampleConfig::new(10_000, 5.0, seed).unwrap();
            black_box(downsample_cpu(&xs, &ys, &grid, &viewport, &config, &frame, 10_000))
        })
    });
}

criterion_group!(benches, bench_density_field, bench_downsample);
criterion_main!(benches);
