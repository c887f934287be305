//! End-to-end analyses of rasters written to a temporary directory.

use geoshift_algorithms::engine::{analyze, CancelToken, CollectingSink, EngineConfig};
use geoshift_algorithms::pipeline::{run, AnalysisConfig, AnalysisOutput, AnalysisRequest};
use geoshift_algorithms::reproject::{align, AlignParams};
use geoshift_algorithms::scorer::NoRuntimeLoader;
use geoshift_algorithms::statistics::AreaUnits;
use geoshift_core::change::{AnalysisMode, AnalysisWarning, ChangeClass, ScoreSource};
use geoshift_core::io::{open, write_geotiff, ReadOptions};
use geoshift_core::{Error, GeoTransform, Raster, Result, Stage, CRS};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn geotiff(
    dir: &Path,
    name: &str,
    (rows, cols): (usize, usize),
    transform: GeoTransform,
    crs: CRS,
    value: impl Fn(usize, usize) -> f32,
) -> PathBuf {
    let mut raster = Raster::<f32>::new(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            raster.set(r, c, value(r, c)).unwrap();
        }
    }
    raster.set_transform(transform);
    raster.set_crs(Some(crs));
    let path = dir.join(name);
    write_geotiff(&raster, &path).unwrap();
    path
}

fn png(dir: &Path, name: &str, (w, h): (u32, u32), pixel: impl Fn(u32, u32) -> [u8; 3]) -> PathBuf {
    let img = RgbImage::from_fn(w, h, |x, y| Rgb(pixel(x, y)));
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

/// Checkerboard texture with a brightness ramp.
fn textured(x: u32, y: u32) -> [u8; 3] {
    let v = if (x / 4 + y / 4) % 2 == 0 { 60 } else { 180 };
    [v, (v / 2 + x as u8) / 2, 255 - v]
}

fn run_mode(
    before: &Path,
    after: &Path,
    config: &AnalysisConfig,
) -> (Result<AnalysisOutput>, Vec<AnalysisWarning>) {
    let sink = Arc::new(CollectingSink::new());
    let out = run(
        &AnalysisRequest::new(before, after),
        config,
        &NoRuntimeLoader,
        sink.clone(),
        &CancelToken::new(),
    );
    (out, sink.warnings())
}

#[test]
fn utm_and_wgs84_rasters_share_one_grid() {
    let dir = TempDir::new().unwrap();
    // 1 km square on the UTM 33N central meridian, around 45.15N
    let before = geotiff(
        dir.path(),
        "utm.tif",
        (100, 100),
        GeoTransform::new(500_000.0, 5_000_000.0, 10.0, -10.0),
        CRS::from_epsg(32633),
        |_, _| 100.0,
    );
    let after = geotiff(
        dir.path(),
        "wgs84.tif",
        (300, 100),
        GeoTransform::new(14.95, 45.3, 0.001, -0.001),
        CRS::wgs84(),
        |_, _| 100.0,
    );

    let a = open(&before, ReadOptions::default()).unwrap();
    let b = open(&after, ReadOptions::default()).unwrap();
    let pair = align(&a, &b, &AlignParams::default()).unwrap();

    assert_eq!(pair.before().dim(), pair.after().dim());
    assert_eq!(pair.crs(), Some(&CRS::wgs84()));

    let (rows, cols) = pair.shape();
    let t = pair.transform();
    for (r, c) in [(0, 0), (rows / 2, cols / 2), (rows - 1, cols - 1)] {
        let (x, y) = t.pixel_to_geo(c, r);
        let (pc, pr) = t.geo_to_pixel(x, y);
        assert!((pc - (c as f64 + 0.5)).abs() < 1e-6);
        assert!((pr - (r as f64 + 0.5)).abs() < 1e-6);
    }

    let (min_x, min_y, max_x, max_y) = pair.bounds();
    assert!(min_x > 14.99 && max_x < 15.03, "{:?}", pair.bounds());
    assert!(min_y > 45.1 && max_y < 45.2, "{:?}", pair.bounds());

    let centre = (rows / 2, cols / 2);
    assert!((pair.before_band(0)[centre] - 100.0).abs() < 1e-3);
    assert!((pair.after_band(0)[centre] - 100.0).abs() < 1e-3);

    let result = analyze(&pair, AnalysisMode::LandUse, &EngineConfig::default()).unwrap();
    assert_eq!(result.changed_count(), 0);
}

#[test]
fn heuristic_analysis_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let before = png(dir.path(), "before.png", (48, 32), textured);
    let after = png(dir.path(), "after.png", (48, 32), |x, y| {
        if x > 24 {
            [200, 200, 200]
        } else {
            textured(x, y)
        }
    });

    for &mode in AnalysisMode::ALL {
        let config = AnalysisConfig::for_mode(mode);
        let (first, _) = run_mode(&before, &after, &config);
        let (second, _) = run_mode(&before, &after, &config);
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.result.mask().data(), second.result.mask().data(), "{mode}");
        assert_eq!(first.overlay, second.overlay, "{mode}");
        assert_eq!(first.stats, second.stats, "{mode}");
    }
}

#[test]
fn identical_rasters_show_no_change_in_every_mode() {
    let dir = TempDir::new().unwrap();
    let scene = png(dir.path(), "scene.png", (40, 30), textured);

    for &mode in AnalysisMode::ALL {
        let (out, _) = run_mode(&scene, &scene, &AnalysisConfig::for_mode(mode));
        let out = out.unwrap();
        assert_eq!(out.stats.changed_pixels, 0, "{mode}");
        assert_eq!(out.stats.percent_changed, 0.0, "{mode}");
        assert_eq!(out.overlay.opaque_count(), 0, "{mode}");
    }
}

#[test]
fn water_mode_splits_expansion_and_retraction() {
    let dir = TempDir::new().unwrap();
    let water = [20, 80, 200];
    let land = [200, 80, 20];
    let before = png(dir.path(), "before.png", (20, 10), |x, _| if x < 10 { water } else { land });
    let after = png(dir.path(), "after.png", (20, 10), |x, _| if x < 10 { land } else { water });

    let (out, warnings) = run_mode(&before, &after, &AnalysisConfig::for_mode(AnalysisMode::Water));
    let out = out.unwrap();
    assert!(warnings.is_empty());

    let result = &out.result;
    let gained = result.count(ChangeClass::Increase);
    let lost = result.count(ChangeClass::Decrease);
    assert_eq!(gained, 100);
    assert_eq!(lost, 100);
    assert_eq!(result.changed_count(), gained + lost);
    assert_eq!(result.mask().get(0, 0), Some(ChangeClass::Decrease as i8));
    assert_eq!(result.mask().get(0, 19), Some(ChangeClass::Increase as i8));
}

#[test]
fn deforestation_ignores_regrowth() {
    let dir = TempDir::new().unwrap();
    let forest = [40, 180, 40];
    let bare = [180, 100, 60];
    let before = png(dir.path(), "before.png", (10, 10), |_, _| forest);
    let after = png(dir.path(), "after.png", (10, 10), |_, _| bare);
    let config = AnalysisConfig::for_mode(AnalysisMode::Deforestation);

    let (loss, _) = run_mode(&before, &after, &config);
    assert_eq!(loss.unwrap().result.count(ChangeClass::Decrease), 100);

    let (regrowth, _) = run_mode(&after, &before, &config);
    assert_eq!(regrowth.unwrap().stats.changed_pixels, 0);
}

#[test]
fn disaster_without_model_warns_and_completes() {
    let dir = TempDir::new().unwrap();
    let before = png(dir.path(), "before.png", (32, 32), textured);
    let after = png(dir.path(), "after.png", (32, 32), |_, _| [90, 90, 90]);

    let (out, warnings) = run_mode(&before, &after, &AnalysisConfig::for_mode(AnalysisMode::Disaster));
    let out = out.unwrap();
    assert_eq!(out.result.source(), &ScoreSource::Heuristic);
    assert!(matches!(
        warnings.as_slice(),
        [AnalysisWarning::ScorerUnavailable { mode: AnalysisMode::Disaster, .. }]
    ));
    assert_eq!(out.summary.warnings, warnings);
    assert!(out.stats.changed_pixels > 0);
}

#[test]
fn missing_model_file_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let scene = png(dir.path(), "scene.png", (16, 16), textured);
    let mut config = AnalysisConfig::for_mode(AnalysisMode::Structures);
    config.overrides_mut(AnalysisMode::Structures).model = Some(dir.path().join("absent.onnx"));

    let (out, warnings) = run_mode(&scene, &scene, &config);
    assert!(out.is_ok());
    match warnings.as_slice() {
        [AnalysisWarning::ScorerUnavailable { reason, .. }] => {
            assert!(reason.contains("not found"), "{reason}")
        }
        other => panic!("unexpected warnings {other:?}"),
    }
}

#[test]
fn disjoint_rasters_fail_with_no_overlap() {
    let dir = TempDir::new().unwrap();
    let a = geotiff(
        dir.path(),
        "a.tif",
        (10, 10),
        GeoTransform::new(10.0, 50.0, 0.01, -0.01),
        CRS::wgs84(),
        |_, _| 1.0,
    );
    let b = geotiff(
        dir.path(),
        "b.tif",
        (10, 10),
        GeoTransform::new(50.0, 10.0, 0.01, -0.01),
        CRS::wgs84(),
        |_, _| 1.0,
    );

    let (out, _) = run_mode(&a, &b, &AnalysisConfig::default());
    let err = out.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Align));
    assert!(matches!(err.root(), Error::NoOverlap { .. }), "{err}");
}

#[test]
fn corrupt_header_fails_at_open() {
    let dir = TempDir::new().unwrap();
    let good = png(dir.path(), "good.png", (8, 8), textured);
    let broken = dir.path().join("broken.tif");
    std::fs::write(&broken, b"this is not a tiff header").unwrap();

    let (out, _) = run_mode(&good, &broken, &AnalysisConfig::default());
    let err = out.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Open));
    match err.root() {
        Error::CorruptFile { path, .. } => assert_eq!(path, &broken),
        other => panic!("expected CorruptFile, got {other}"),
    }
}

#[test]
fn plain_images_cannot_report_hectares() {
    let dir = TempDir::new().unwrap();
    let scene = png(dir.path(), "scene.png", (8, 8), textured);
    let config = AnalysisConfig {
        area_units: AreaUnits::Hectares,
        ..AnalysisConfig::default()
    };

    let (out, _) = run_mode(&scene, &scene, &config);
    let err = out.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Summarize));
    assert!(matches!(err.root(), Error::MissingGeoreference));
}

#[test]
fn projected_pair_reports_hectares() {
    let dir = TempDir::new().unwrap();
    let t = GeoTransform::new(500_000.0, 5_000_000.0, 10.0, -10.0);
    let utm = CRS::from_epsg(32633);
    let before = geotiff(dir.path(), "before.tif", (50, 50), t, utm.clone(), |_, _| 0.0);
    let after = geotiff(dir.path(), "after.tif", (50, 50), t, utm.clone(), |r, c| {
        if r < 10 && c < 10 {
            255.0
        } else {
            0.0
        }
    });

    let config = AnalysisConfig {
        target_crs: utm,
        area_units: AreaUnits::Hectares,
        ..AnalysisConfig::default()
    };
    let (out, _) = run_mode(&before, &after, &config);
    let out = out.unwrap();
    assert_eq!(out.pair.shape(), (50, 50));
    assert_eq!(out.stats.changed_pixels, 100);
    // 100 pixels of 10 m x 10 m
    assert!((out.stats.changed_hectares.unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(out.summary.grid.crs.as_deref(), Some("EPSG:32633"));
}

#[test]
fn raising_the_threshold_never_adds_change() {
    let dir = TempDir::new().unwrap();
    let before = png(dir.path(), "before.png", (32, 24), textured);
    let after = png(dir.path(), "after.png", (32, 24), |x, y| {
        let [r, g, b] = textured(x, y);
        [r.saturating_add((x * 4) as u8), g, b]
    });

    let (out, _) = run_mode(&before, &after, &AnalysisConfig::default());
    let result = out.unwrap().result;
    let mut last = result.changed_count();
    for t in [0.2, 0.3, 0.5, 0.8] {
        let r = result.rethreshold(t).unwrap();
        assert!(Arc::ptr_eq(r.shared_score(), result.shared_score()));
        assert!(r.changed_count() <= last);
        last = r.changed_count();
    }
}

#[test]
fn one_count_flicker_on_flat_scene_is_not_change() {
    let dir = TempDir::new().unwrap();
    let before = png(dir.path(), "before.png", (16, 16), |_, _| [100, 100, 100]);
    let after = png(dir.path(), "after.png", (16, 16), |x, y| {
        let v = if (x + y) % 2 == 0 { 101 } else { 100 };
        [v, v, v]
    });

    for mode in [AnalysisMode::LandUse, AnalysisMode::Structures, AnalysisMode::Disaster] {
        let (out, _) = run_mode(&before, &after, &AnalysisConfig::for_mode(mode));
        let out = out.unwrap();
        assert_eq!(out.stats.changed_pixels, 0, "{mode}");
        assert_eq!(out.overlay.opaque_count(), 0, "{mode}");
    }
}

#[test]
fn same_count_step_scores_alike_at_any_contrast() {
    let dir = TempDir::new().unwrap();
    let low = |x: u32, y: u32| {
        let v = 100 + ((x + y) % 3) as u8;
        [v, v, v]
    };
    let high = |x: u32, y: u32| {
        let v = if (x / 4 + y / 4) % 2 == 0 { 10 } else { 200 };
        [v, v, v]
    };
    let stepped = |base: [u8; 3], x: u32, step: u8| {
        if x < 8 {
            base.map(|v| v + step)
        } else {
            base
        }
    };

    let bases: [(&str, &dyn Fn(u32, u32) -> [u8; 3]); 2] = [("low", &low), ("high", &high)];

    for (step, expected) in [(20u8, 0usize), (45, 8 * 16)] {
        let mut masks = Vec::new();
        for (name, base) in bases {
            let before = png(dir.path(), &format!("{name}_before.png"), (16, 16), |x, y| base(x, y));
            let after = png(dir.path(), &format!("{name}_after_{step}.png"), (16, 16), |x, y| {
                stepped(base(x, y), x, step)
            });
            let (out, _) = run_mode(&before, &after, &AnalysisConfig::default());
            let out = out.unwrap();
            assert_eq!(out.stats.changed_pixels, expected, "{name} contrast, step {step}");
            masks.push(out.result.mask().data().clone());
        }
        assert_eq!(masks[0], masks[1], "step {step}");
    }
}

#[test]
fn union_footprint_keeps_uncovered_cells_out_of_results() {
    let dir = TempDir::new().unwrap();
    let before = geotiff(
        dir.path(),
        "west.tif",
        (10, 10),
        GeoTransform::new(10.0, 50.0, 0.1, -0.1),
        CRS::wgs84(),
        |_, _| 0.0,
    );
    let after = geotiff(
        dir.path(),
        "east.tif",
        (10, 10),
        GeoTransform::new(10.5, 50.0, 0.1, -0.1),
        CRS::wgs84(),
        |_, _| 1.0,
    );
    let config = AnalysisConfig {
        footprint: geoshift_algorithms::reproject::FootprintPolicy::Union,
        ..AnalysisConfig::default()
    };

    let (out, _) = run_mode(&before, &after, &config);
    let out = out.unwrap();
    assert_eq!(out.pair.shape(), (10, 15));
    assert_eq!(out.stats.valid_pixels, 50);
    assert_eq!(out.stats.nodata_pixels, 100);
    assert_eq!(out.stats.valid_pixels + out.stats.nodata_pixels, 150);
    assert_eq!(out.stats.changed_pixels, 50);
    assert!((out.stats.percent_changed - 100.0).abs() < 1e-9);

    // Only one raster covers the outer columns.
    for row in [0, 5, 9] {
        assert_eq!(out.overlay.pixel(row, 0).map(|p| p[3]), Some(0));
        assert_eq!(out.overlay.pixel(row, 14).map(|p| p[3]), Some(0));
        assert!(out.overlay.pixel(row, 7).is_some_and(|p| p[3] > 0));
    }
    assert_eq!(out.overlay.opaque_count(), 50);
}

#[test]
fn far_apart_union_exceeds_memory_budget_at_align() {
    let dir = TempDir::new().unwrap();
    let a = geotiff(
        dir.path(),
        "a.tif",
        (10, 10),
        GeoTransform::new(0.0, 10.0, 1e-6, -1e-6),
        CRS::wgs84(),
        |_, _| 1.0,
    );
    let b = geotiff(
        dir.path(),
        "b.tif",
        (10, 10),
        GeoTransform::new(100.0, 80.0, 1e-6, -1e-6),
        CRS::wgs84(),
        |_, _| 1.0,
    );
    let config = AnalysisConfig {
        footprint: geoshift_algorithms::reproject::FootprintPolicy::Union,
        ..AnalysisConfig::default()
    };

    let (out, _) = run_mode(&a, &b, &config);
    let err = out.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Align));
    assert!(matches!(err.root(), Error::ResourceExceeded { .. }), "{err}");
}
