use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::config::VoteRecord;
use crate::errors::{Diagnostic, FallbackError};

pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a fallback extractor gets to see about one document.
#[derive(PartialEq, Debug, Clone)]
pub struct FallbackRequest {
    pub document_identifier: String,
    pub city: String,
    pub meeting_date: NaiveDate,
    /// The normalized text.
    pub document_text: String,
    /// The low-confidence deterministic records, as hints.
    pub deterministic: Vec<VoteRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A slower extractor that is consulted when the deterministic pass is not
/// trusted. Implementations are called from a worker thread.
pub trait FallbackExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError>;
}

/// Runs the fallback with a deadline.
///
/// The call is made on a separate thread. When the deadline passes, the
/// thread is left to finish on its own and its answer is discarded.
pub fn run_fallback(
    extractor: &Arc<dyn FallbackExtractor>,
    request: FallbackRequest,
    timeout: Duration,
) -> Result<Vec<VoteRecord>, FallbackError> {
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(extractor);
    let identifier = request.document_identifier.clone();
    let start = Instant::now();
    let spawned = thread::Builder::new()
        .name(format!("fallback-{}", worker.name()))
        .spawn(move || {
            let res = worker.extract(&request);
            // The receiver is gone after a timeout.
            let _ = tx.send(res);
        });
    if let Err(e) = spawned {
        warn!("run_fallback: cannot start the worker for {}: {}", identifier, e);
        return Err(FallbackError::Unavailable {
            reason: format!("cannot start worker thread: {}", e),
        });
    }

    match rx.recv_timeout(timeout) {
        Ok(res) => {
            debug!(
                "run_fallback: {} answered for {} in {:?}",
                extractor.name(),
                identifier,
                start.elapsed()
            );
            if let Ok(records) = &res {
                info!("run_fallback: {} returned {} records", extractor.name(), records.len());
            }
            res
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(
                "run_fallback: {} did not answer for {} within {:?}",
                extractor.name(),
                identifier,
                timeout
            );
            Err(FallbackError::Timeout { timeout })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(FallbackError::Unavailable {
            reason: format!("{} stopped without an answer", extractor.name()),
        }),
    }
}

/// A fallback that returns a fixed set of records.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct StaticFallback {
    records: Vec<VoteRecord>,
}

impl StaticFallback {
    pub fn new(records: Vec<VoteRecord>) -> StaticFallback {
        StaticFallback { records }
    }
}

impl FallbackExtractor for StaticFallback {
    fn name(&self) -> &str {
        "static"
    }

    fn extract(&self, _request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    struct SlowFallback(Duration);

    impl FallbackExtractor for SlowFallback {
        fn name(&self) -> &str {
            "slow"
        }

        fn extract(&self, _request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError> {
            thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    struct BrokenFallback;

    impl FallbackExtractor for BrokenFallback {
        fn name(&self) -> &str {
            "broken"
        }

        fn extract(&self, _request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError> {
            Err(FallbackError::Unavailable {
                reason: "no credentials".to_string(),
            })
        }
    }

    fn request() -> FallbackRequest {
        FallbackRequest {
            document_identifier: "doc-1".to_string(),
            city: "testville".to_string(),
            meeting_date: NaiveDate::from_ymd_opt(2023, 5, 2).unwrap(),
            document_text: "1. Item".to_string(),
            deterministic: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn returns_the_records() {
        let rec = VoteRecord::new(
            AgendaItem::new("1", "Item"),
            Some(Outcome::Pass),
            Tally::default(),
        );
        let f: Arc<dyn FallbackExtractor> = Arc::new(StaticFallback::new(vec![rec.clone()]));
        let res = run_fallback(&f, request(), Duration::from_secs(5)).unwrap();
        assert_eq!(res, vec![rec]);
    }

    #[test]
    fn times_out() {
        let f: Arc<dyn FallbackExtractor> = Arc::new(SlowFallback(Duration::from_secs(2)));
        let res = run_fallback(&f, request(), Duration::from_millis(50));
        assert_eq!(
            res,
            Err(FallbackError::Timeout {
                timeout: Duration::from_millis(50)
            })
        );
    }

    #[test]
    fn passes_errors_through() {
        let f: Arc<dyn FallbackExtractor> = Arc::new(BrokenFallback);
        let res = run_fallback(&f, request(), Duration::from_secs(5));
        assert!(matches!(res, Err(FallbackError::Unavailable { .. })));
    }
}
