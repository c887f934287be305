//! Error types for geoshift

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Open,
    Align,
    Analyze,
    Summarize,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Align => "align",
            Stage::Analyze => "analyze",
            Stage::Summarize => "summarize",
            Stage::Render => "render",
        };
        f.write_str(name)
    }
}

/// Geographic bounding box (min_x, min_y, max_x, max_y) used in error reports.
pub type Bounds = (f64, f64, f64, f64);

/// Main error type for geoshift operations.
///
/// Every variant is fatal to the analysis request that produced it.
/// Recoverable model failures are reported as warnings instead, see
/// [`crate::change::AnalysisWarning`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported format for {path}: {detail}")]
    UnsupportedFormat { path: PathBuf, detail: String },

    #[error("corrupt file {path}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },

    #[error("{path} is georeferenced but carries no CRS and no override was supplied")]
    CrsUndefined { path: PathBuf },

    #[error("rasters do not overlap: before {before:?}, after {after:?}")]
    NoOverlap { before: Bounds, after: Bounds },

    #[error("shape mismatch in {stage}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("invalid analysis mode: {0}")]
    InvalidMode(String),

    #[error("hectare output requested for a raster without georeference")]
    MissingGeoreference,

    #[error("{path} needs {required_bytes} bytes decoded, budget is {budget_bytes}")]
    ResourceExceeded {
        path: PathBuf,
        required_bytes: u64,
        budget_bytes: u64,
    },

    #[error("projection from {from} to {to} failed: {reason}")]
    Projection {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("analysis cancelled before stage {stage}")]
    Cancelled { stage: Stage },

    #[error("{stage} stage failed{}: {source}", mode_suffix(.mode))]
    Stage {
        stage: Stage,
        mode: Option<String>,
        #[source]
        source: Box<Error>,
    },
}

fn mode_suffix(mode: &Option<String>) -> String {
    match mode {
        Some(m) => format!(" (mode {})", m),
        None => String::new(),
    }
}

impl Error {
    /// Attach pipeline stage and analysis mode to an error.
    pub fn at_stage(self, stage: Stage, mode: Option<&str>) -> Self {
        Error::Stage {
            stage,
            mode: mode.map(str::to_string),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all stage context stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stage the error was raised in, if it has been annotated.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            Error::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::CorruptFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for geoshift operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_strips_stage_context() {
        let err = Error::MissingGeoreference
            .at_stage(Stage::Summarize, Some("water"))
            .at_stage(Stage::Summarize, None);
        assert!(matches!(err.root(), Error::MissingGeoreference));
        assert_eq!(err.stage(), Some(Stage::Summarize));
    }

    #[test]
    fn stage_message_names_mode() {
        let err = Error::InvalidMode("foo".into()).at_stage(Stage::Analyze, Some("foo"));
        let msg = err.to_string();
        assert!(msg.contains("analyze"), "{msg}");
        assert!(msg.contains("mode foo"), "{msg}");
    }
}
