//! Reprojection and grid alignment
//!
//! - `Projector`: point and bbox projection between CRSs
//! - `ResamplingMethod`: nearest / bilinear point sampling
//! - `align`: two rasters onto one shared grid

mod align;
mod projection;
mod resample;

pub use align::{align, AlignParams, AlignedPair, FootprintPolicy};
pub use projection::Projector;
pub use resample::ResamplingMethod;
