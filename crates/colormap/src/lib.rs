//! # geoshift colormap
//!
//! Change-mask and score rendering for geoshift.
//!
//! [`render`] maps every class and severity grade of a [`ChangeResult`] to a
//! fixed RGBA value. No-change pixels are fully transparent so the overlay
//! can be composited over the base imagery. [`raster_to_rgba`] renders a
//! continuous score raster through a multi-stop color ramp.
//!
//! ## Usage
//!
//! ```ignore
//! use geoshift_colormap::render;
//!
//! let overlay = render(&result)?;
//! let rgba: &[u8] = overlay.as_bytes();
//! ```
//!
//! [`ChangeResult`]: geoshift_core::change::ChangeResult

mod render;
mod scheme;

pub use render::{auto_params, raster_to_rgba, render, render_mask, ColormapParams, OverlayImage};
pub use scheme::{evaluate, ClassPalette, ColorScheme, ColorStop, Rgb};
