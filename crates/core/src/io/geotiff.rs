//! Native GeoTIFF reading/writing on top of the `tiff` crate
//!
//! Pixel data is decoded one strip or tile at a time, so a full read peaks at
//! the output buffer plus a single chunk, and window or decimated reads only
//! touch the chunks they need.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::window::Window;
use crate::raster::{integer_value_scale, GeoTransform, Raster, RasterElement, SampleKind};
use ndarray::Array3;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tiff::TiffError;
use tracing::debug;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

const RASTER_PIXEL_IS_POINT: u16 = 2;
const PHOTOMETRIC_PALETTE: u32 = 3;
const COMPRESSION_NONE: u32 = 1;
const PLANAR_SEPARATE: u32 = 2;
const SAMPLE_FORMAT_INT: u32 = 2;
const SAMPLE_FORMAT_FLOAT: u32 = 3;

/// Header-level description of a GeoTIFF.
#[derive(Debug, Clone)]
pub(crate) struct TiffInfo {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub chunk_rows: usize,
    pub chunk_cols: usize,
    pub transform: Option<GeoTransform>,
    pub crs: Option<CRS>,
    pub nodata: Option<f32>,
    pub kind: SampleKind,
    /// Full-scale value of integer samples; `None` for floating point
    pub sample_scale: Option<f32>,
    /// One plane of chunks per band instead of interleaved samples
    pub planar: bool,
    /// Set for palette images, whose chunks are read without the decoder
    raw: Option<RawLayout>,
}

impl TiffInfo {
    fn chunks_across(&self) -> usize {
        self.cols.div_ceil(self.chunk_cols)
    }

    fn chunks_per_plane(&self) -> usize {
        self.chunks_across() * self.rows.div_ceil(self.chunk_rows)
    }

    /// Samples interleaved in one decoded chunk.
    fn chunk_samples(&self) -> usize {
        if self.planar {
            1
        } else {
            self.bands
        }
    }
}

/// Location of uncompressed palette-index chunks.
///
/// The `tiff` decoder does not expand palette colour types, and class maps
/// need the raw indices anyway, so these chunks are copied straight from the
/// file. Tiles are stored padded to the full tile width.
#[derive(Debug, Clone)]
struct RawLayout {
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    bytes_per_sample: usize,
    big_endian: bool,
}

impl RawLayout {
    fn locate<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path, big_endian: bool) -> Result<Self> {
        let compression = decoder.get_tag_u32(Tag::Compression).unwrap_or(COMPRESSION_NONE);
        if compression != COMPRESSION_NONE {
            return Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
                detail: format!("compressed palette image (compression {})", compression),
            });
        }
        let bits = first_u32(decoder, Tag::BitsPerSample).unwrap_or(8);
        if bits != 8 && bits != 16 {
            return Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
                detail: format!("{}-bit palette image", bits),
            });
        }
        let (offsets, byte_counts) = match decoder.get_tag_u64_vec(Tag::TileOffsets) {
            Ok(offsets) => (offsets, decoder.get_tag_u64_vec(Tag::TileByteCounts)),
            Err(_) => (
                decoder
                    .get_tag_u64_vec(Tag::StripOffsets)
                    .map_err(|e| Error::corrupt(path, e))?,
                decoder.get_tag_u64_vec(Tag::StripByteCounts),
            ),
        };
        let byte_counts = byte_counts.map_err(|e| Error::corrupt(path, e))?;
        if offsets.len() != byte_counts.len() {
            return Err(Error::corrupt(path, "chunk offsets and byte counts differ in length"));
        }
        Ok(Self {
            offsets,
            byte_counts,
            bytes_per_sample: bits as usize / 8,
            big_endian,
        })
    }

    fn read_chunk(&self, file: &mut File, path: &Path, index: usize, budget: u64) -> Result<Vec<f32>> {
        let (Some(&offset), Some(&len)) = (self.offsets.get(index), self.byte_counts.get(index)) else {
            return Err(Error::corrupt(path, format!("chunk {} is missing", index)));
        };
        if len > budget {
            return Err(Error::ResourceExceeded {
                path: path.to_path_buf(),
                required_bytes: len,
                budget_bytes: budget,
            });
        }
        let mut bytes = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut bytes))
            .map_err(|e| Error::corrupt(path, format!("chunk {}: {}", index, e)))?;

        Ok(match self.bytes_per_sample {
            1 => bytes.into_iter().map(f32::from).collect(),
            _ => bytes
                .chunks_exact(2)
                .map(|b| {
                    let v = if self.big_endian {
                        u16::from_be_bytes([b[0], b[1]])
                    } else {
                        u16::from_le_bytes([b[0], b[1]])
                    };
                    f32::from(v)
                })
                .collect(),
        })
    }
}

fn tiff_error(path: &Path, budget: u64) -> impl Fn(TiffError) -> Error + '_ {
    move |e| match e {
        TiffError::LimitsExceeded => Error::ResourceExceeded {
            path: path.to_path_buf(),
            required_bytes: budget.saturating_add(1),
            budget_bytes: budget,
        },
        TiffError::UnsupportedError(u) => Error::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: u.to_string(),
        },
        TiffError::IoError(io) if io.kind() != std::io::ErrorKind::UnexpectedEof => {
            Error::io(path, io)
        }
        other => Error::corrupt(path, other),
    }
}

fn open_decoder(path: &Path, budget: u64) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut limits = Limits::default();
    let cap = usize::try_from(budget).unwrap_or(usize::MAX);
    limits.decoding_buffer_size = cap;
    limits.intermediate_buffer_size = cap;
    let decoder = Decoder::new(BufReader::new(file)).map_err(tiff_error(path, budget))?;
    Ok(decoder.with_limits(limits))
}

fn first_u32<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Option<u32> {
    decoder
        .get_tag_u32_vec(tag)
        .ok()
        .and_then(|v| v.first().copied())
}

fn is_big_endian(path: &Path) -> Result<bool> {
    let mut order = [0u8; 2];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut order))
        .map_err(|e| Error::io(path, e))?;
    Ok(&order == b"MM")
}

/// Read dimensions, chunk layout and GeoTIFF keys without decoding pixels.
pub(crate) fn read_header(path: &Path, budget: u64) -> Result<TiffInfo> {
    let mut decoder = open_decoder(path, budget)?;
    let (width, height) = decoder.dimensions().map_err(tiff_error(path, budget))?;
    if width == 0 || height == 0 {
        return Err(Error::corrupt(path, "image has zero size"));
    }

    let bands = decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1) as usize;
    let planar = bands > 1
        && decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1) == PLANAR_SEPARATE;

    let bits = first_u32(&mut decoder, Tag::BitsPerSample).unwrap_or(1);
    let sample_scale = match first_u32(&mut decoder, Tag::SampleFormat) {
        Some(SAMPLE_FORMAT_FLOAT) => None,
        Some(SAMPLE_FORMAT_INT) => Some(integer_value_scale(bits, true)),
        _ => Some(integer_value_scale(bits, false)),
    };

    let (kind, raw) = match decoder.get_tag_u32(Tag::PhotometricInterpretation) {
        Ok(PHOTOMETRIC_PALETTE) => (
            SampleKind::Categorical,
            Some(RawLayout::locate(&mut decoder, path, is_big_endian(path)?)?),
        ),
        _ => (SampleKind::Continuous, None),
    };

    let (chunk_cols, chunk_rows) = decoder.chunk_dimensions();
    let keys = read_geokeys(&mut decoder);
    let transform = read_geotransform(&mut decoder).map(|t| {
        if keys.pixel_is_point {
            corner_registered(t)
        } else {
            t
        }
    });
    let nodata = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse::<f32>().ok());

    debug!(
        "{}: {}x{}x{}{} chunks {}x{} crs={:?} nodata={:?}",
        path.display(),
        height,
        width,
        bands,
        if planar { " planar" } else { "" },
        chunk_rows,
        chunk_cols,
        keys.crs.as_ref().map(CRS::identifier),
        nodata
    );

    Ok(TiffInfo {
        rows: height as usize,
        cols: width as usize,
        bands,
        chunk_rows: chunk_rows.max(1) as usize,
        chunk_cols: chunk_cols.max(1) as usize,
        transform,
        crs: keys.crs,
        nodata,
        kind,
        sample_scale,
        planar,
        raw,
    })
}

/// GeoTransform from ModelPixelScale + ModelTiepoint, or from ModelTransformation.
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE)).ok();
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT)).ok();

    if let (Some(scale), Some(tiepoint)) = (&scale, &tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 {
            // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
            let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
            let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
            return Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
        }
    }

    let matrix = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION)).ok()?;
    if matrix.len() >= 16 {
        // Row-major 4x4: x = t[3] + col * t[0] + row * t[1], y = t[7] + col * t[4] + row * t[5]
        return Some(GeoTransform {
            origin_x: matrix[3],
            origin_y: matrix[7],
            pixel_width: matrix[0],
            pixel_height: matrix[5],
            row_rotation: matrix[1],
            col_rotation: matrix[4],
        });
    }
    None
}

/// Point-registered rasters tie raster (0, 0) to the centre of the first
/// pixel; move the origin to its outer corner.
fn corner_registered(t: GeoTransform) -> GeoTransform {
    let (origin_x, origin_y) = t.apply(-0.5, -0.5);
    GeoTransform {
        origin_x,
        origin_y,
        ..t
    }
}

#[derive(Debug, Default)]
struct GeoKeys {
    crs: Option<CRS>,
    pixel_is_point: bool,
}

/// CRS (ProjectedCSType, else GeographicType) and raster registration.
fn read_geokeys<R: Read + Seek>(decoder: &mut Decoder<R>) -> GeoKeys {
    let Ok(keys) = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY)) else {
        return GeoKeys::default();
    };
    if keys.len() < 4 {
        return GeoKeys::default();
    }
    // Header: [version, revision, minor, count], then 4 shorts per key:
    // [key_id, tiff_tag_location, count, value_or_index]
    let num_keys = keys[3] as usize;
    let mut out = GeoKeys::default();
    let mut projected = None;
    let mut geographic = None;
    for entry in keys[4..].chunks_exact(4).take(num_keys) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key_id {
            GT_RASTER_TYPE_KEY => out.pixel_is_point = value == RASTER_PIXEL_IS_POINT,
            PROJECTED_CS_TYPE_KEY if value != 0 && value != 32767 => {
                projected = Some(CRS::from_epsg(value as u32))
            }
            GEOGRAPHIC_TYPE_KEY if value != 0 && value != 32767 => {
                geographic = Some(CRS::from_epsg(value as u32))
            }
            _ => {}
        }
    }
    out.crs = projected.or(geographic);
    out
}

fn samples_to_f32(result: DecodingResult) -> Vec<f32> {
    #[allow(unreachable_patterns)]
    match result {
        DecodingResult::U8(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::U16(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::U32(b) => b.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(b) => b.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::I16(b) => b.into_iter().map(f32::from).collect(),
        DecodingResult::I32(b) => b.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(b) => b.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(b) => b,
        DecodingResult::F64(b) => b.into_iter().map(|v| v as f32).collect(),
        _ => Vec::new(),
    }
}

/// Whether `[start, end)` contains a row `origin + k * step` for some k >= 0.
fn has_sample(start: usize, end: usize, origin: usize, step: usize) -> bool {
    if end <= origin {
        return false;
    }
    let first = if start <= origin {
        origin
    } else {
        origin + (start - origin).div_ceil(step) * step
    };
    first < end
}

/// Where one decoded chunk lands in the output.
struct ChunkPlacement {
    /// Top-left pixel of the chunk in the image
    origin: (usize, usize),
    /// Rows and columns holding image data
    data: (usize, usize),
    /// Samples between the starts of consecutive chunk rows
    row_stride: usize,
    /// Interleaved samples per pixel
    samples: usize,
    /// Output band of the first sample
    band: usize,
}

/// Decode `window`, keeping every `step`-th row and column.
///
/// Only chunks intersecting the window (and holding at least one kept row)
/// are decoded. Output is `(bands, ceil(rows/step), ceil(cols/step))`.
pub(crate) fn read_region(
    path: &Path,
    info: &TiffInfo,
    window: &Window,
    step: usize,
    budget: u64,
) -> Result<Array3<f32>> {
    let (out_rows, out_cols) = window.decimated_shape(step);
    let mut out = Array3::<f32>::from_elem((info.bands, out_rows, out_cols), f32::NAN);
    let mut decoder = open_decoder(path, budget)?;
    let mut raw_file = match info.raw {
        Some(_) => Some(File::open(path).map_err(|e| Error::io(path, e))?),
        None => None,
    };

    let across = info.chunks_across();
    let planes = if info.planar { info.bands } else { 1 };
    let samples = info.chunk_samples();
    let first_chunk_row = window.row_off / info.chunk_rows;
    let last_chunk_row = (window.row_end() - 1) / info.chunk_rows;
    let first_chunk_col = window.col_off / info.chunk_cols;
    let last_chunk_col = (window.col_end() - 1) / info.chunk_cols;

    let mut decoded = 0usize;
    for plane in 0..planes {
        for chunk_row in first_chunk_row..=last_chunk_row {
            let row0 = chunk_row * info.chunk_rows;
            let row_end = (row0 + info.chunk_rows).min(info.rows);
            if !has_sample(row0, row_end, window.row_off, step) {
                continue;
            }
            for chunk_col in first_chunk_col..=last_chunk_col {
                let col0 = chunk_col * info.chunk_cols;
                let index = plane * info.chunks_per_plane() + chunk_row * across + chunk_col;
                let (data_cols, data_rows) = decoder.chunk_data_dimensions(index as u32);
                let (data_rows, data_cols) = (data_rows as usize, data_cols as usize);

                let (chunk, row_stride) = match (&info.raw, raw_file.as_mut()) {
                    (Some(raw), Some(file)) => {
                        (raw.read_chunk(file, path, index, budget)?, info.chunk_cols)
                    }
                    _ => {
                        let decoded = decoder
                            .read_chunk(index as u32)
                            .map_err(tiff_error(path, budget))?;
                        (samples_to_f32(decoded), data_cols)
                    }
                };
                let needed = (data_rows.saturating_sub(1) * row_stride + data_cols) * samples;
                if chunk.len() < needed {
                    return Err(Error::corrupt(
                        path,
                        format!("chunk {} holds {} samples, expected {}", index, chunk.len(), needed),
                    ));
                }
                let placement = ChunkPlacement {
                    origin: (row0, col0),
                    data: (data_rows, data_cols),
                    row_stride,
                    samples,
                    band: plane,
                };
                blit_chunk(&mut out, &chunk, &placement, window, step);
                decoded += 1;
            }
        }
    }
    debug!("{}: decoded {} chunks for window {:?} step {}", path.display(), decoded, window, step);
    Ok(out)
}

fn blit_chunk(out: &mut Array3<f32>, chunk: &[f32], at: &ChunkPlacement, window: &Window, step: usize) {
    let (row0, col0) = at.origin;
    let (data_rows, data_cols) = at.data;
    for r in 0..data_rows {
        let row = row0 + r;
        if row < window.row_off || row >= window.row_end() || (row - window.row_off) % step != 0 {
            continue;
        }
        let out_r = (row - window.row_off) / step;
        for c in 0..data_cols {
            let col = col0 + c;
            if col < window.col_off || col >= window.col_end() || (col - window.col_off) % step != 0
            {
                continue;
            }
            let out_c = (col - window.col_off) / step;
            let base = (r * at.row_stride + c) * at.samples;
            for s in 0..at.samples {
                out[[at.band + s, out_r, out_c]] = chunk[base + s];
            }
        }
    }
}

/// Write a Raster to a single-band 32-bit float GeoTIFF.
///
/// Georeferenced rasters get ModelPixelScale, ModelTiepoint and a
/// GeoKeyDirectory naming their EPSG code; pixel-frame rasters are written
/// as plain TIFF.
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    encode_geotiff(raster, file).map_err(|e| Error::corrupt(path, e))
}

/// Encode a Raster as GeoTIFF into an in-memory buffer.
pub fn write_geotiff_to_buffer<T: RasterElement>(raster: &Raster<T>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf))
        .map_err(|e| Error::corrupt("<buffer>", e))?;
    Ok(buf)
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> std::result::Result<(), TiffError>
where
    T: RasterElement,
    W: std::io::Write + std::io::Seek,
{
    let mut encoder = TiffEncoder::new(writer)?;
    let (rows, cols) = raster.shape();
    let nodata = raster.nodata();

    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| {
            if v.is_nodata(nodata) {
                f32::NAN
            } else {
                num_traits::cast(v).unwrap_or(f32::NAN)
            }
        })
        .collect();

    let mut image = encoder.new_image::<Gray32Float>(cols as u32, rows as u32)?;

    let gt = raster.transform();
    if !gt.is_identity() {
        let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &scale[..])?;
        let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &tiepoint[..])?;

        let mut geokeys: Vec<u16> = vec![1, 1, 0, 2, GT_RASTER_TYPE_KEY, 0, 1, 1];
        match raster.crs().and_then(|c| c.epsg().map(|e| (c.is_geographic(), e))) {
            Some((geographic, epsg)) => {
                let (model, key) = if geographic {
                    (2, GEOGRAPHIC_TYPE_KEY)
                } else {
                    (1, PROJECTED_CS_TYPE_KEY)
                };
                geokeys[3] = 3;
                geokeys.splice(4..4, [GT_MODEL_TYPE_KEY, 0, 1, model]);
                geokeys.extend_from_slice(&[key, 0, 1, epsg as u16]);
            }
            None => {
                geokeys.splice(4..4, [GT_MODEL_TYPE_KEY, 0, 1, 1]);
            }
        }
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY), &geokeys[..])?;
    }

    if nodata.is_some() {
        image.encoder().write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), "nan")?;
    }

    image.write_data(&data)?;
    Ok(())
}
