//! Raster data structures

mod element;
mod geotransform;
mod grid;
mod handle;

pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::Raster;
pub use handle::{
    integer_value_scale, RasterFormat, RasterHandle, SampleKind, DEFAULT_VALUE_SCALE,
    FLOAT_VALUE_SCALE,
};
