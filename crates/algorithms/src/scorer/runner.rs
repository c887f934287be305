//! Timeout-bounded scorer invocation

use super::{ModelScorer, ScoreOutput, ScorerError};
use crate::reproject::AlignedPair;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Scorer time limit used when the caller sets none.
pub const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(120);

/// Run `scorer` on a worker thread, waiting at most `timeout`.
///
/// A scorer that overruns is abandoned: its thread is detached and its
/// eventual output dropped. A panicking scorer is reported as `Failed`.
pub fn run_with_timeout(
    scorer: Arc<dyn ModelScorer>,
    pair: Arc<AlignedPair>,
    timeout: Duration,
) -> Result<ScoreOutput, ScorerError> {
    let (tx, rx) = bounded(1);
    let name = scorer.name().to_string();
    let started = Instant::now();

    thread::Builder::new()
        .name(format!("scorer-{}", name))
        .spawn(move || {
            // The receiver is gone once the caller has timed out.
            let _ = tx.send(scorer.score(&pair));
        })
        .map_err(|e| ScorerError::Failed(format!("could not start scorer thread: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            debug!("scorer {} finished in {:?}", name, started.elapsed());
            result
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!("scorer {} exceeded {:?}; abandoning it", name, timeout);
            Err(ScorerError::Timeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(ScorerError::Failed(format!("scorer {} panicked", name)))
        }
    }
}
