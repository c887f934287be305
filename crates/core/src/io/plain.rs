//! PNG/JPEG decoding through the `image` crate
//!
//! Plain images have no chunked layout to stream from, so they are decoded
//! whole; the memory budget is checked against the header before any pixel
//! is decoded.

use crate::error::{Error, Result};
use crate::raster::{integer_value_scale, RasterFormat};
use image::{DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader, Limits};
use ndarray::Array3;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PlainInfo {
    pub rows: usize,
    pub cols: usize,
    /// Colour bands, alpha excluded
    pub bands: usize,
    /// Full-scale value of integer channels; `None` for floating point
    pub sample_scale: Option<f32>,
}

fn image_error(path: &Path, budget: u64) -> impl Fn(ImageError) -> Error + '_ {
    move |e| match e {
        ImageError::Limits(_) => Error::ResourceExceeded {
            path: path.to_path_buf(),
            required_bytes: budget.saturating_add(1),
            budget_bytes: budget,
        },
        ImageError::Unsupported(u) => Error::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: u.to_string(),
        },
        ImageError::IoError(io) if io.kind() != std::io::ErrorKind::UnexpectedEof => {
            Error::io(path, io)
        }
        other => Error::corrupt(path, other),
    }
}

fn reader(path: &Path, format: RasterFormat, budget: u64) -> Result<ImageReader<BufReader<File>>> {
    let mut reader = ImageReader::open(path).map_err(|e| Error::io(path, e))?;
    reader.set_format(match format {
        RasterFormat::Png => ImageFormat::Png,
        RasterFormat::Jpeg => ImageFormat::Jpeg,
        RasterFormat::GeoTiff => ImageFormat::Tiff,
    });
    let mut limits = Limits::default();
    limits.max_alloc = Some(budget);
    reader.limits(limits);
    Ok(reader)
}

/// Read dimensions and channel layout from the header.
pub(crate) fn read_header(path: &Path, format: RasterFormat, budget: u64) -> Result<PlainInfo> {
    let decoder = reader(path, format, budget)?
        .into_decoder()
        .map_err(image_error(path, budget))?;
    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    let bands = color.channel_count() as usize - usize::from(color.has_alpha());
    let sample_scale = match color.bytes_per_pixel() / color.channel_count() {
        1 => Some(integer_value_scale(8, false)),
        2 => Some(integer_value_scale(16, false)),
        _ => None,
    };
    if width == 0 || height == 0 {
        return Err(Error::corrupt(path, "image has zero size"));
    }
    Ok(PlainInfo {
        rows: height as usize,
        cols: width as usize,
        bands,
        sample_scale,
    })
}

/// Decode the whole image as `(band, row, col)`.
///
/// Pixels with zero alpha become NaN in every band.
pub(crate) fn decode(path: &Path, format: RasterFormat, budget: u64) -> Result<Array3<f32>> {
    let image = reader(path, format, budget)?
        .decode()
        .map_err(image_error(path, budget))?;
    let (cols, rows) = (image.width() as usize, image.height() as usize);
    let has_alpha = image.color().has_alpha();
    let (samples, channels) = interleaved_samples(image);
    let bands = channels - usize::from(has_alpha);

    let mut out = Array3::<f32>::zeros((bands, rows, cols));
    for (i, pixel) in samples.chunks_exact(channels).enumerate() {
        let (row, col) = (i / cols, i % cols);
        let transparent = has_alpha && pixel[channels - 1] == 0.0;
        for b in 0..bands {
            out[[b, row, col]] = if transparent { f32::NAN } else { pixel[b] };
        }
    }
    Ok(out)
}

/// Raw interleaved samples at their native scale, plus channel count.
fn interleaved_samples(image: DynamicImage) -> (Vec<f32>, usize) {
    let channels = image.color().channel_count() as usize;
    let u8s = |v: Vec<u8>| v.into_iter().map(f32::from).collect::<Vec<_>>();
    let u16s = |v: Vec<u16>| v.into_iter().map(f32::from).collect::<Vec<_>>();
    match image {
        DynamicImage::ImageLuma8(b) => (u8s(b.into_raw()), channels),
        DynamicImage::ImageLumaA8(b) => (u8s(b.into_raw()), channels),
        DynamicImage::ImageRgb8(b) => (u8s(b.into_raw()), channels),
        DynamicImage::ImageRgba8(b) => (u8s(b.into_raw()), channels),
        DynamicImage::ImageLuma16(b) => (u16s(b.into_raw()), channels),
        DynamicImage::ImageLumaA16(b) => (u16s(b.into_raw()), channels),
        DynamicImage::ImageRgb16(b) => (u16s(b.into_raw()), channels),
        DynamicImage::ImageRgba16(b) => (u16s(b.into_raw()), channels),
        DynamicImage::ImageRgb32F(b) => (b.into_raw(), channels),
        other => (other.to_rgba32f().into_raw(), 4),
    }
}
