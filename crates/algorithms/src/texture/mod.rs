//! Texture measures
//!
//! - **Sobel**: gradient magnitude with clamped borders
//! - **Edge density**: local mean of gradient magnitude

mod edge;

pub use edge::{edge_density, sobel_magnitude, EdgeDensityParams};
