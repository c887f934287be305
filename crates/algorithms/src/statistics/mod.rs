//! Change statistics
//!
//! - **area**: changed pixels, percentages and ground area of a change mask

pub mod area;

pub use area::{
    geographic_cell_area, row_cell_areas, summarize, summarize_result, AreaStats, AreaUnits,
    ChangeExtent, ClassArea, SeverityArea,
};
