//! Raster I/O: GeoTIFF (chunked) and PNG/JPEG (whole-image) readers

mod format;
mod geotiff;
mod plain;
mod source;
mod window;

pub use format::detect_format;
pub use geotiff::{write_geotiff, write_geotiff_to_buffer};
pub use source::{open, RasterInfo, RasterSource, ReadOptions, DEFAULT_MEMORY_BUDGET};
pub use window::Window;
