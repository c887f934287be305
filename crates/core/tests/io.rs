//! Reading rasters back from files written to a temporary directory.

use geoshift_core::io::{open, write_geotiff, RasterSource, ReadOptions, Window};
use geoshift_core::raster::{RasterFormat, SampleKind};
use geoshift_core::{Error, GeoTransform, Raster, CRS};
use image::{Rgb, RgbImage};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use tiff::encoder::colortype::RGB8;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

fn ramp(rows: usize, cols: usize) -> Raster<f32> {
    let data = (0..rows * cols).map(|i| i as f32).collect();
    let mut r = Raster::from_vec(data, rows, cols).unwrap();
    r.set_transform(GeoTransform::new(10.0, 50.0, 0.001, -0.001));
    r.set_crs(Some(CRS::wgs84()));
    r
}

#[test]
fn geotiff_full_read_keeps_georeference() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.tif");
    write_geotiff(&ramp(40, 30), &path).unwrap();

    let handle = open(&path, ReadOptions::default()).unwrap();
    assert_eq!(handle.format(), RasterFormat::GeoTiff);
    assert_eq!(handle.shape(), (40, 30));
    assert_eq!(handle.bands(), 1);
    assert!(handle.is_georeferenced());
    assert_eq!(handle.crs(), Some(&CRS::wgs84()));
    assert_eq!(handle.kind(), SampleKind::Continuous);
    assert_eq!(handle.band(0)[[3, 4]], (3 * 30 + 4) as f32);
}

#[test]
fn window_read_matches_full_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.tif");
    write_geotiff(&ramp(300, 120), &path).unwrap();

    let source = RasterSource::open(&path, ReadOptions::default()).unwrap();
    assert!(source.info().supports_windowed_reads());
    let full = source.read().unwrap();
    let win = source.read_window(Window::new(150, 20, 30, 50)).unwrap();

    assert_eq!(win.shape(), (30, 50));
    for r in 0..30 {
        for c in 0..50 {
            assert_eq!(win.band(0)[[r, c]], full.band(0)[[r + 150, c + 20]]);
        }
    }
    let (x, y) = win.transform().pixel_to_geo_corner(0, 0);
    let (fx, fy) = full.transform().pixel_to_geo_corner(20, 150);
    assert!((x - fx).abs() < 1e-9 && (y - fy).abs() < 1e-9);
}

#[test]
fn window_outside_raster_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.tif");
    write_geotiff(&ramp(10, 10), &path).unwrap();

    let source = RasterSource::open(&path, ReadOptions::default()).unwrap();
    let err = source.read_window(Window::new(20, 0, 5, 5)).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { name: "window", .. }));
}

#[test]
fn decimated_read_covers_same_footprint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.tif");
    let raster = ramp(100, 60);
    write_geotiff(&raster, &path).unwrap();

    let source = RasterSource::open(&path, ReadOptions::default()).unwrap();
    let small = source.read_decimated(25).unwrap();
    assert_eq!(small.shape(), (25, 15));
    assert_eq!(small.band(0)[[1, 1]], raster.get(4, 4).unwrap());
    assert_eq!(small.transform().pixel_width, 0.004);
    assert_eq!(small.transform().origin_x, 10.0);
}

#[test]
fn max_dimension_option_decimates_on_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.tif");
    write_geotiff(&ramp(100, 60), &path).unwrap();

    let options = ReadOptions {
        max_dimension: Some(50),
        ..ReadOptions::default()
    };
    let handle = open(&path, options).unwrap();
    assert_eq!(handle.shape(), (50, 30));
}

#[test]
fn tight_budget_fails_before_decoding() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.tif");
    write_geotiff(&ramp(100, 100), &path).unwrap();

    let options = ReadOptions {
        memory_budget_bytes: 1_000,
        ..ReadOptions::default()
    };
    let err = open(&path, options).unwrap_err();
    assert!(matches!(err, Error::ResourceExceeded { .. }), "{err}");
}

/// Test pattern shared by the hand-assembled TIFFs below.
fn sample(band: usize, row: usize, col: usize) -> u8 {
    ((row * 7 + col * 3 + band * 50) % 251) as u8
}

#[derive(Clone, Copy)]
enum Chunking {
    /// Square tiles, samples interleaved
    Tiles(usize),
    /// Strips of this many rows, one plane per band
    PlanarStrips(usize),
    /// Strips of this many rows, samples interleaved
    Strips(usize),
}

/// Write an uncompressed 8-bit TIFF with an explicit chunk layout.
///
/// The stock image encoder only emits interleaved strips, so tiled and
/// planar files are assembled directory entry by directory entry.
fn hand_built_tiff(path: &Path, (rows, cols): (usize, usize), bands: usize, photometric: u16, chunking: Chunking) {
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    match chunking {
        Chunking::Tiles(t) => {
            for ty in 0..rows.div_ceil(t) {
                for tx in 0..cols.div_ceil(t) {
                    let mut tile = vec![0u8; t * t * bands];
                    for y in 0..t {
                        for x in 0..t {
                            let (r, c) = (ty * t + y, tx * t + x);
                            if r < rows && c < cols {
                                for b in 0..bands {
                                    tile[(y * t + x) * bands + b] = sample(b, r, c);
                                }
                            }
                        }
                    }
                    chunks.push(tile);
                }
            }
        }
        Chunking::PlanarStrips(n) | Chunking::Strips(n) => {
            let planar = matches!(chunking, Chunking::PlanarStrips(_));
            let planes = if planar { bands } else { 1 };
            let per_pixel = if planar { 1 } else { bands };
            for p in 0..planes {
                for start in (0..rows).step_by(n) {
                    let mut strip = Vec::new();
                    for r in start..(start + n).min(rows) {
                        for c in 0..cols {
                            for s in 0..per_pixel {
                                strip.push(sample(p + s, r, c));
                            }
                        }
                    }
                    chunks.push(strip);
                }
            }
        }
    }

    let file = std::fs::File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut dir = encoder.new_directory().unwrap();
    let mut offsets = Vec::new();
    for chunk in &chunks {
        offsets.push(dir.write_data(&chunk[..]).unwrap() as u32);
    }
    let counts: Vec<u32> = chunks.iter().map(|c| c.len() as u32).collect();

    dir.write_tag(Tag::ImageWidth, cols as u32).unwrap();
    dir.write_tag(Tag::ImageLength, rows as u32).unwrap();
    dir.write_tag(Tag::BitsPerSample, &vec![8u16; bands][..]).unwrap();
    dir.write_tag(Tag::SamplesPerPixel, bands as u16).unwrap();
    dir.write_tag(Tag::PhotometricInterpretation, photometric).unwrap();
    dir.write_tag(Tag::Compression, 1u16).unwrap();
    dir.write_tag(Tag::SampleFormat, &vec![1u16; bands][..]).unwrap();
    match chunking {
        Chunking::Tiles(t) => {
            dir.write_tag(Tag::PlanarConfiguration, 1u16).unwrap();
            dir.write_tag(Tag::TileWidth, t as u32).unwrap();
            dir.write_tag(Tag::TileLength, t as u32).unwrap();
            dir.write_tag(Tag::TileOffsets, &offsets[..]).unwrap();
            dir.write_tag(Tag::TileByteCounts, &counts[..]).unwrap();
        }
        Chunking::PlanarStrips(n) | Chunking::Strips(n) => {
            let planar = matches!(chunking, Chunking::PlanarStrips(_));
            dir.write_tag(Tag::PlanarConfiguration, if planar { 2u16 } else { 1u16 })
                .unwrap();
            dir.write_tag(Tag::RowsPerStrip, n as u32).unwrap();
            dir.write_tag(Tag::StripOffsets, &offsets[..]).unwrap();
            dir.write_tag(Tag::StripByteCounts, &counts[..]).unwrap();
        }
    }
    if photometric == 3 {
        let ramp: Vec<u16> = (0..256u16).map(|v| v * 257).collect();
        let colormap: Vec<u16> = ramp.iter().chain(&ramp).chain(&ramp).copied().collect();
        dir.write_tag(Tag::ColorMap, &colormap[..]).unwrap();
    }
    dir.finish().unwrap();
}

fn assert_pattern(handle: &geoshift_core::raster::RasterHandle, (row0, col0): (usize, usize)) {
    let (rows, cols) = handle.shape();
    for b in 0..handle.bands() {
        for r in 0..rows {
            for c in 0..cols {
                assert_eq!(
                    handle.band(b)[[r, c]],
                    f32::from(sample(b, row0 + r, col0 + c)),
                    "band {b} at ({r}, {c})"
                );
            }
        }
    }
}

#[test]
fn tiled_geotiff_reads_across_padded_tiles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tiled.tif");
    hand_built_tiff(&path, (37, 21), 1, 1, Chunking::Tiles(16));

    let source = RasterSource::open(&path, ReadOptions::default()).unwrap();
    assert_eq!(source.info().chunk_shape, (16, 16));
    let full = source.read().unwrap();
    assert_eq!(full.shape(), (37, 21));
    assert_pattern(&full, (0, 0));

    // Straddles all four tiles around (16, 16) and the padded right edge.
    let win = source.read_window(Window::new(10, 12, 25, 9)).unwrap();
    assert_eq!(win.shape(), (25, 9));
    assert_pattern(&win, (10, 12));
}

#[test]
fn interleaved_rgb_geotiff_reads_every_band() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rgb.tif");
    let (rows, cols) = (6usize, 9usize);
    let mut data = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            data.extend((0..3).map(|b| sample(b, r, c)));
        }
    }
    let file = std::fs::File::create(&path).unwrap();
    TiffEncoder::new(file)
        .unwrap()
        .write_image::<RGB8>(cols as u32, rows as u32, &data)
        .unwrap();

    let handle = open(&path, ReadOptions::default()).unwrap();
    assert_eq!(handle.bands(), 3);
    assert_eq!(handle.value_scale(), 255.0);
    assert_pattern(&handle, (0, 0));
}

#[test]
fn tiled_rgb_geotiff_keeps_band_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tiled_rgb.tif");
    hand_built_tiff(&path, (20, 20), 3, 2, Chunking::Tiles(16));

    let handle = open(&path, ReadOptions::default()).unwrap();
    assert_eq!(handle.bands(), 3);
    assert_pattern(&handle, (0, 0));
}

#[test]
fn planar_geotiff_reads_one_plane_per_band() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("planar.tif");
    hand_built_tiff(&path, (11, 7), 3, 2, Chunking::PlanarStrips(4));

    let source = RasterSource::open(&path, ReadOptions::default()).unwrap();
    assert_eq!(source.info().bands, 3);
    assert_pattern(&source.read().unwrap(), (0, 0));
    assert_pattern(&source.read_window(Window::new(5, 2, 6, 4)).unwrap(), (5, 2));
}

#[test]
fn palette_geotiff_is_categorical_with_raw_indices() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("classes.tif");
    hand_built_tiff(&path, (9, 13), 1, 3, Chunking::Strips(4));

    let handle = open(&path, ReadOptions::default()).unwrap();
    assert_eq!(handle.kind(), SampleKind::Categorical);
    assert_eq!(handle.bands(), 1);
    assert_pattern(&handle, (0, 0));
}

#[test]
fn value_scale_follows_storage_type_unless_overridden() {
    let dir = TempDir::new().unwrap();
    let float_path = dir.path().join("ramp.tif");
    write_geotiff(&ramp(4, 4), &float_path).unwrap();
    let png_path = dir.path().join("scene.png");
    RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])).save(&png_path).unwrap();

    assert_eq!(open(&float_path, ReadOptions::default()).unwrap().value_scale(), 1.0);
    assert_eq!(open(&png_path, ReadOptions::default()).unwrap().value_scale(), 255.0);

    let options = ReadOptions {
        value_scale: Some(10_000.0),
        ..ReadOptions::default()
    };
    assert_eq!(open(&float_path, options).unwrap().value_scale(), 10_000.0);
}

#[test]
fn png_opens_without_georeference() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.png");
    RgbImage::from_pixel(8, 5, Rgb([200, 100, 50])).save(&path).unwrap();

    let handle = open(&path, ReadOptions::default()).unwrap();
    assert_eq!(handle.format(), RasterFormat::Png);
    assert_eq!(handle.bands(), 3);
    assert_eq!(handle.shape(), (5, 8));
    assert!(!handle.is_georeferenced());
    assert!(handle.transform().is_identity());
    assert_eq!(handle.band(1)[[0, 0]], 100.0);
}

#[test]
fn truncated_png_header_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.png");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(b"\x89PNG\r\n\x1a\n\x00\x00").unwrap();
    drop(f);

    let err = open(&path, ReadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::CorruptFile { .. }), "{err}");
}

#[test]
fn text_file_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "not a raster").unwrap();

    let err = open(&path, ReadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat { .. }), "{err}");
}

#[test]
fn missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = open(dir.path().join("absent.tif"), ReadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "{err}");
}
