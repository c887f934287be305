//! Imagery analysis
//!
//! Spectral proxies used by the index-based change modes:
//! - Vegetation: NDVI, or NGRDI without a near-infrared band
//! - Water: NDWI, or a blue/red proxy without a near-infrared band

mod indices;

pub use indices::{normalized_difference, BandMapping, SpectralIndex};
