//! Change analysis data model: modes, threshold policies and results

mod mode;
mod result;

pub use mode::{AnalysisMode, ModelUse, ThresholdPolicy};
pub use result::{
    AnalysisWarning, ChangeClass, ChangeResult, ScoreSource, Severity, MASK_NODATA,
    SEVERITY_NODATA,
};
