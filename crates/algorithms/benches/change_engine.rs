//! Benchmarks for the change engine and alignment

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use geoshift_algorithms::engine::{analyze, EngineConfig};
use geoshift_algorithms::reproject::{align, AlignParams, AlignedPair};
use geoshift_core::change::AnalysisMode;
use geoshift_core::raster::RasterFormat;
use geoshift_core::{GeoTransform, RasterHandle, CRS};
use ndarray::Array3;

fn create_image(size: usize, bands: usize, base: f32) -> Array3<f32> {
    Array3::from_shape_fn((bands, size, size), |(b, row, col)| {
        base + ((row * 7 + col * 13 + b * 31) % 200) as f32
    })
}

fn create_pair(size: usize) -> AlignedPair {
    AlignedPair::new(
        create_image(size, 4, 20.0),
        create_image(size, 4, 35.0),
        GeoTransform::new(10.0, 50.0, 0.0001, -0.0001),
        Some(CRS::wgs84()),
    )
    .unwrap()
}

fn bench_modes(c: &mut Criterion) {
    let config = EngineConfig::default();
    for &mode in AnalysisMode::ALL {
        let mut group = c.benchmark_group(format!("engine/{}", mode));
        for size in [256, 512, 1024] {
            let pair = create_pair(size);
            group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
                b.iter(|| analyze(black_box(&pair), mode, &config).unwrap())
            });
        }
        group.finish();
    }
}

fn bench_rethreshold(c: &mut Criterion) {
    let pair = create_pair(1024);
    let result = analyze(&pair, AnalysisMode::LandUse, &EngineConfig::default()).unwrap();
    c.bench_function("engine/rethreshold/1024", |b| {
        b.iter(|| result.rethreshold(black_box(0.25)).unwrap())
    });
}

fn bench_align_utm(c: &mut Criterion) {
    let mut group = c.benchmark_group("reproject/align_utm");
    for size in [128, 256, 512] {
        let before = RasterHandle::new(create_image(size, 3, 0.0), RasterFormat::GeoTiff, "a.tif")
            .with_transform(GeoTransform::new(500_000.0, 5_000_000.0, 10.0, -10.0))
            .with_crs(Some(CRS::from_epsg(32633)));
        let after = RasterHandle::new(create_image(size, 3, 5.0), RasterFormat::GeoTiff, "b.tif")
            .with_transform(GeoTransform::new(500_000.0, 5_000_000.0, 10.0, -10.0))
            .with_crs(Some(CRS::from_epsg(32633)));
        let params = AlignParams::default();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| align(black_box(&before), black_box(&after), &params).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_modes, bench_rethreshold, bench_align_utm);
criterion_main!(benches);
