//! # geoshift core
//!
//! Core types and raster I/O for geoshift change detection.
//!
//! This crate provides:
//! - `Raster<T>`: single-band georeferenced grid
//! - `RasterHandle`: decoded multi-band image with its georeference
//! - `GeoTransform` and `CRS`: georeferencing
//! - `RasterSource`: lazy GeoTIFF/PNG/JPEG reading with windowed and decimated reads
//! - The change result model shared by the engine and the renderer

pub mod change;
pub mod crs;
pub mod error;
pub mod io;
pub mod raster;

pub use crs::CRS;
pub use error::{Error, Result, Stage};
pub use raster::{GeoTransform, Raster, RasterElement, RasterHandle};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::change::{
        AnalysisMode, AnalysisWarning, ChangeClass, ChangeResult, ScoreSource, Severity,
        ThresholdPolicy,
    };
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result, Stage};
    pub use crate::io::{RasterSource, ReadOptions, Window};
    pub use crate::raster::{GeoTransform, Raster, RasterElement, RasterHandle};
}
