//! Format detection by file signature and extension

use crate::error::{Error, Result};
use crate::raster::RasterFormat;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

fn format_from_extension(path: &Path) -> Option<RasterFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "tif" | "tiff" | "gtiff" => Some(RasterFormat::GeoTiff),
        "png" => Some(RasterFormat::Png),
        "jpg" | "jpeg" => Some(RasterFormat::Jpeg),
        _ => None,
    }
}

fn format_from_signature(head: &[u8]) -> Option<RasterFormat> {
    match head {
        [b'I', b'I', 42, 0, ..] | [b'M', b'M', 0, 42, ..] => Some(RasterFormat::GeoTiff),
        [b'I', b'I', 43, 0, ..] | [b'M', b'M', 0, 43, ..] => Some(RasterFormat::GeoTiff),
        [0x89, b'P', b'N', b'G', ..] => Some(RasterFormat::Png),
        [0xFF, 0xD8, 0xFF, ..] => Some(RasterFormat::Jpeg),
        _ => None,
    }
}

/// Determine the raster format of `path`.
///
/// The signature wins over the extension. A known extension whose signature
/// does not match is a damaged header (`CorruptFile`); a file matching
/// neither is `UnsupportedFormat`.
pub fn detect_format(path: &Path) -> Result<RasterFormat> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut head = [0u8; 8];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let by_ext = format_from_extension(path);
    let by_sig = format_from_signature(&head[..filled]);

    match (by_ext, by_sig) {
        (Some(ext), Some(sig)) if ext != sig => {
            debug!("{}: extension says {}, signature says {}", path.display(), ext, sig);
            Ok(sig)
        }
        (_, Some(sig)) => Ok(sig),
        (Some(ext), None) => Err(Error::corrupt(
            path,
            format!("header does not carry a {} signature", ext),
        )),
        (None, None) => Err(Error::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: "expected GeoTIFF, PNG or JPEG".into(),
        }),
    }
}
