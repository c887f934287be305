//! Warning reporting and coarse cancellation

use geoshift_core::change::AnalysisWarning;
use geoshift_core::{Error, Result, Stage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Receives non-fatal analysis warnings as they happen.
pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: &AnalysisWarning);
}

/// Forwards warnings to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn warn(&self, warning: &AnalysisWarning) {
        warn!("{}", warning);
    }
}

/// Keeps warnings for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    warnings: Mutex<Vec<AnalysisWarning>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings received so far.
    pub fn warnings(&self) -> Vec<AnalysisWarning> {
        self.warnings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl WarningSink for CollectingSink {
    fn warn(&self, warning: &AnalysisWarning) {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(warning.clone());
    }
}

/// Shared flag asking a running analysis not to start its next stage.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if cancellation was requested before `stage`.
    pub fn check(&self, stage: Stage) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoshift_core::change::AnalysisMode;

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        for reason in ["a", "b"] {
            sink.warn(&AnalysisWarning::ScorerUnavailable {
                mode: AnalysisMode::Disaster,
                reason: reason.into(),
            });
        }
        let got = sink.warnings();
        assert_eq!(got.len(), 2);
        assert!(matches!(&got[1], AnalysisWarning::ScorerUnavailable { reason, .. } if reason == "b"));
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check(Stage::Align).is_ok());
        other.cancel();
        assert!(matches!(token.check(Stage::Analyze), Err(Error::Cancelled { stage: Stage::Analyze })));
    }
}
