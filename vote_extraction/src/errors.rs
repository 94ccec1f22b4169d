use std::time::Duration;

use serde::Serialize;
use snafu::prelude::*;

use crate::config::MotionType;

/// Errors that prevent the extraction of one document, or the compilation of
/// a city profile.
///
/// Problems inside a document (unparseable spans, inconsistent tallies) are not
/// errors: they are reported as diagnostics and in the validation report.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExtractionError {
    #[snafu(display("document {identifier} has no text to extract from"))]
    EmptyDocument { identifier: String },

    #[snafu(display("document {identifier} does not look like text: {reason}"))]
    MalformedDocument { identifier: String, reason: String },

    #[snafu(display(
        "document {identifier} belongs to {found}, but the profile is for {expected}"
    ))]
    CityMismatch {
        identifier: String,
        found: String,
        expected: String,
    },

    #[snafu(display("invalid pattern {pattern:?}"))]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfig { message: String },

    #[snafu(display("extraction worker for {identifier} stopped unexpectedly"))]
    WorkerPanicked { identifier: String },
}

impl ExtractionError {
    /// True for errors caused by the document itself, which only abort that
    /// document.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            ExtractionError::EmptyDocument { .. }
                | ExtractionError::MalformedDocument { .. }
                | ExtractionError::CityMismatch { .. }
        )
    }
}

/// A span that could not be understood. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    #[snafu(display("unrecognized outcome vocabulary"))]
    UnrecognizedOutcome { excerpt: String },

    #[snafu(display("cannot expand item range {start} through {end}"))]
    InvalidRange { start: String, end: String },
}

/// Failures of the fallback extractor. The pipeline treats both the same way.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum FallbackError {
    #[snafu(display("fallback extractor unavailable: {reason}"))]
    Unavailable { reason: String },

    #[snafu(display("fallback extractor did not answer within {timeout:?}"))]
    Timeout { timeout: Duration },
}

/// A recoverable problem met while extracting one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    ParseError {
        item_number: Option<String>,
        offset: usize,
        reason: String,
        excerpt: String,
    },
    /// Items of a consent range that are missing, or covered twice.
    RangeCoverageConflict {
        range: String,
        missing: Vec<String>,
        duplicated: Vec<String>,
    },
    ExceptionOutsideRange {
        range: String,
        exceptions: Vec<String>,
    },
    MergeConflict {
        item_number: String,
        reason: String,
    },
    /// Several motions of the same type on one item. The last one is kept.
    RepeatedMotion {
        item_number: String,
        motion_type: MotionType,
        dropped: usize,
    },
    FallbackTimeout {
        timeout_ms: u64,
    },
    FallbackUnavailable {
        reason: String,
    },
    LowConfidence {
        score: f64,
        threshold: f64,
    },
}

impl Diagnostic {
    pub(crate) fn from_parse_error(
        err: &ParseError,
        item_number: Option<&str>,
        offset: usize,
    ) -> Diagnostic {
        let excerpt = match err {
            ParseError::UnrecognizedOutcome { excerpt } => excerpt.clone(),
            ParseError::InvalidRange { start, end } => format!("{} - {}", start, end),
        };
        Diagnostic::ParseError {
            item_number: item_number.map(|s| s.to_string()),
            offset,
            reason: err.to_string(),
            excerpt,
        }
    }

    pub(crate) fn from_fallback_error(err: &FallbackError) -> Diagnostic {
        match err {
            FallbackError::Timeout { timeout } => Diagnostic::FallbackTimeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            FallbackError::Unavailable { reason } => Diagnostic::FallbackUnavailable {
                reason: reason.clone(),
            },
        }
    }
}
