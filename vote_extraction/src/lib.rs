mod config;
mod consent;
mod deterministic;
mod errors;
mod fallback;
mod merger;
mod normalizer;
mod output;
mod registry;
mod strategy;
mod validator;

pub mod builder;
pub mod manual;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use snafu::prelude::*;

pub use crate::config::*;
pub use crate::consent::{ConsentCalendarExpander, ConsentCalendarVote, ConsentExpansion};
pub use crate::deterministic::{DeterministicExtractor, DeterministicPass};
pub use crate::errors::{Diagnostic, ExtractionError, FallbackError, ParseError};
pub use crate::fallback::{
    run_fallback, FallbackExtractor, FallbackRequest, StaticFallback, DEFAULT_FALLBACK_TIMEOUT,
};
pub use crate::merger::{MergeOutcome, ResultMerger};
pub use crate::normalizer::TextNormalizer;
pub use crate::output::{CanonicalDocument, CanonicalVote, StandardOutputBuilder};
pub use crate::registry::{normalize_name, MemberRegistry, Resolution};
pub use crate::strategy::{
    detect_motion_type, AgendaEntry, AgendaIndex, CityPatternStrategy, CityStrategy,
    CompiledVocabulary, MemberList, NarrativeStrategy, ParseContext, ParsedMotion, ParsedOutcome,
    RollCallStrategy, VoteBlocks, VoteSpan,
};
pub use crate::validator::{
    CheckKind, CheckResult, ConsentCoverage, RecordIssue, ValidationContext, ValidationReport,
    Validator,
};

use crate::errors::{
    CityMismatchSnafu, EmptyDocumentSnafu, InvalidConfigSnafu, MalformedDocumentSnafu,
    WorkerPanickedSnafu,
};

// Beyond this share of control characters, the text is not minutes.
const MAX_CONTROL_RATIO: f64 = 0.1;

/// The compiled form of a city configuration: patterns, vocabulary and
/// scoring. Compiled once, shared by every document of the city.
#[derive(Debug, Clone)]
pub struct CityProfile {
    config: CityConfig,
    extractor: DeterministicExtractor,
    validator: Validator,
    merger: ResultMerger,
    output: StandardOutputBuilder,
}

impl CityProfile {
    pub fn compile(config: CityConfig) -> Result<CityProfile, ExtractionError> {
        if config.city.trim().is_empty() {
            return InvalidConfigSnafu {
                message: "the city identifier is empty".to_string(),
            }
            .fail();
        }
        let t = config.low_confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return InvalidConfigSnafu {
                message: format!("low confidence threshold {} is not between 0 and 1", t),
            }
            .fail();
        }
        let w = &config.weights;
        let weights = [w.tally, w.uniqueness, w.roster, w.required_fields, w.coverage];
        if weights.iter().any(|x| !x.is_finite() || *x < 0.0) || weights.iter().sum::<f64>() <= 0.0
        {
            return InvalidConfigSnafu {
                message: format!("invalid validation weights {:?}", w),
            }
            .fail();
        }
        if !(0.0..=1.0).contains(&w.critical_failure_cap) {
            return InvalidConfigSnafu {
                message: format!(
                    "critical failure cap {} is not between 0 and 1",
                    w.critical_failure_cap
                ),
            }
            .fail();
        }
        if config.roster_size == Some(0) {
            return InvalidConfigSnafu {
                message: "the roster size cannot be 0".to_string(),
            }
            .fail();
        }

        let extractor = DeterministicExtractor::new(
            TextNormalizer::new(&config.ocr_corrections)?,
            CityStrategy::new(config.strategy, &config.vocabulary)?,
            ConsentCalendarExpander::new(&config.excluded_item_categories),
        );
        info!(
            "compile: profile for {} ({:?}), {} OCR corrections",
            config.city,
            config.strategy,
            config.ocr_corrections.len()
        );
        Ok(CityProfile {
            validator: Validator::new(config.weights),
            config,
            extractor,
            merger: ResultMerger::new(),
            output: StandardOutputBuilder::new(),
        })
    }

    pub fn config(&self) -> &CityConfig {
        &self.config
    }

    pub fn city(&self) -> &str {
        &self.config.city
    }

    pub fn extractor(&self) -> &DeterministicExtractor {
        &self.extractor
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }
}

/// Everything produced for one document.
#[derive(PartialEq, Debug, Clone)]
pub struct ExtractionOutcome {
    pub identifier: String,
    pub document: CanonicalDocument,
    pub records: Vec<VoteRecord>,
    pub report: ValidationReport,
    pub diagnostics: Vec<Diagnostic>,
    pub fallback_invoked: bool,
    /// True when the final score is still below the city threshold.
    pub low_confidence: bool,
}

/// Runs the extraction for the documents of one city.
pub struct ExtractionPipeline {
    profile: CityProfile,
    registry: MemberRegistry,
    fallback: Option<Arc<dyn FallbackExtractor>>,
    fallback_timeout: Duration,
}

impl ExtractionPipeline {
    pub fn new(
        profile: CityProfile,
        registry: MemberRegistry,
    ) -> Result<ExtractionPipeline, ExtractionError> {
        if !registry.city().eq_ignore_ascii_case(profile.city()) {
            return InvalidConfigSnafu {
                message: format!(
                    "the roster is for {}, the profile for {}",
                    registry.city(),
                    profile.city()
                ),
            }
            .fail();
        }
        Ok(ExtractionPipeline {
            profile,
            registry,
            fallback: None,
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
        })
    }

    pub fn with_fallback(
        self,
        fallback: Arc<dyn FallbackExtractor>,
        timeout: Duration,
    ) -> ExtractionPipeline {
        ExtractionPipeline {
            fallback: Some(fallback),
            fallback_timeout: timeout,
            ..self
        }
    }

    pub fn profile(&self) -> &CityProfile {
        &self.profile
    }

    pub fn registry(&self) -> &MemberRegistry {
        &self.registry
    }

    /// Extracts the votes of one document.
    ///
    /// Only problems with the document as a whole are errors. Everything
    /// else ends up in the diagnostics and the validation report.
    pub fn extract(&self, doc: &RawDocument) -> Result<ExtractionOutcome, ExtractionError> {
        check_document(doc, self.profile.city())?;
        info!(
            "extract: {} ({} on {}), {} bytes",
            doc.identifier,
            doc.source_city,
            doc.meeting_date,
            doc.text.len()
        );
        let validator = &self.profile.validator;
        let threshold = self.profile.config.low_confidence_threshold;
        let ctx = ParseContext::new(
            &self.registry,
            doc.meeting_date,
            self.profile.config.roster_size,
        );

        let pass = self.profile.extractor.extract(&doc.text, &ctx, validator);
        let vctx = pass.validation_context(&ctx);
        let mut report = validator.validate(&pass.records, &vctx);
        let mut records = pass.records.clone();
        let mut diagnostics = pass.diagnostics.clone();
        let mut fallback_invoked = false;

        if report.is_below(threshold) {
            warn!(
                "extract: {} scored {:.3}, below {}",
                doc.identifier, report.score, threshold
            );
            diagnostics.push(Diagnostic::LowConfidence {
                score: report.score,
                threshold,
            });
            match &self.fallback {
                Some(fallback) => {
                    fallback_invoked = true;
                    let request = FallbackRequest {
                        document_identifier: doc.identifier.clone(),
                        city: doc.source_city.clone(),
                        meeting_date: doc.meeting_date,
                        document_text: pass.normalized_text.clone(),
                        deterministic: records.clone(),
                        diagnostics: diagnostics.clone(),
                    };
                    match run_fallback(fallback, request, self.fallback_timeout) {
                        Ok(fallback_records) => {
                            let merged = self.profile.merger.merge(
                                &records,
                                fallback_records,
                                validator,
                                &vctx,
                            );
                            records = merged.records;
                            report = validator.validate(&records, &vctx);
                            report
                                .issues
                                .extend(merged.conflicts.iter().filter_map(conflict_issue));
                            diagnostics.extend(merged.conflicts);
                        }
                        Err(e) => {
                            warn!(
                                "extract: {}: {}, keeping the deterministic result",
                                doc.identifier, e
                            );
                            diagnostics.push(Diagnostic::from_fallback_error(&e));
                        }
                    }
                }
                None => {
                    debug!("extract: no fallback configured for {}", self.profile.city());
                    diagnostics.push(Diagnostic::FallbackUnavailable {
                        reason: "no fallback extractor configured".to_string(),
                    });
                }
            }
        }

        let low_confidence = report.is_below(threshold);
        let document = self
            .profile
            .output
            .build(&MeetingMetadata::from(doc), &records);
        info!(
            "extract: {} done, {} votes, score {:.3}, {} diagnostics",
            doc.identifier,
            document.votes.len(),
            report.score,
            diagnostics.len()
        );
        Ok(ExtractionOutcome {
            identifier: doc.identifier.clone(),
            document,
            records,
            report,
            diagnostics,
            fallback_invoked,
            low_confidence,
        })
    }

    // A panic on one document only fails that document.
    fn extract_isolated(&self, doc: &RawDocument) -> Result<ExtractionOutcome, ExtractionError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.extract(doc))) {
            Ok(res) => res,
            Err(_) => {
                warn!("extract_many: extraction of {} panicked", doc.identifier);
                WorkerPanickedSnafu {
                    identifier: doc.identifier.clone(),
                }
                .fail()
            }
        }
    }

    /// Extracts many documents on worker threads. The results are in the
    /// order of the documents; a failed document does not affect the others.
    pub fn extract_many(
        &self,
        docs: &[RawDocument],
    ) -> Vec<Result<ExtractionOutcome, ExtractionError>> {
        if docs.is_empty() {
            return Vec::new();
        }
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(docs.len());
        let chunk_size = (docs.len() + workers - 1) / workers;
        debug!(
            "extract_many: {} documents on {} workers",
            docs.len(),
            workers
        );
        thread::scope(|s| {
            let handles: Vec<_> = docs
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = s.spawn(move || {
                        chunk
                            .iter()
                            .map(|d| self.extract_isolated(d))
                            .collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect();
            let mut results: Vec<Result<ExtractionOutcome, ExtractionError>> = Vec::new();
            for (chunk, handle) in handles {
                match handle.join() {
                    Ok(res) => results.extend(res),
                    Err(_) => {
                        warn!("extract_many: a worker panicked on {} documents", chunk.len());
                        results.extend(chunk.iter().map(|d| {
                            Err(ExtractionError::WorkerPanicked {
                                identifier: d.identifier.clone(),
                            })
                        }))
                    }
                }
            }
            results
        })
    }
}

/// One-shot extraction without a fallback.
pub fn extract_votes(
    doc: &RawDocument,
    config: CityConfig,
    members: Vec<Member>,
) -> Result<ExtractionOutcome, ExtractionError> {
    let registry = MemberRegistry::new(&config.city, members, config.max_edit_distance);
    let pipeline = ExtractionPipeline::new(CityProfile::compile(config)?, registry)?;
    pipeline.extract(doc)
}

fn conflict_issue(d: &Diagnostic) -> Option<RecordIssue> {
    match d {
        Diagnostic::MergeConflict {
            item_number,
            reason,
        } => Some(RecordIssue {
            item_number: item_number.clone(),
            check: CheckKind::Coverage,
            message: reason.clone(),
        }),
        _ => None,
    }
}

fn check_document(doc: &RawDocument, city: &str) -> Result<(), ExtractionError> {
    if doc.text.trim().is_empty() {
        return EmptyDocumentSnafu {
            identifier: doc.identifier.clone(),
        }
        .fail();
    }
    if doc.text.contains('\0') {
        return MalformedDocumentSnafu {
            identifier: doc.identifier.clone(),
            reason: "contains NUL bytes".to_string(),
        }
        .fail();
    }
    let total = doc.text.chars().count();
    let control = doc
        .text
        .chars()
        .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{000C}'))
        .count();
    if control as f64 > MAX_CONTROL_RATIO * total as f64 {
        return MalformedDocumentSnafu {
            identifier: doc.identifier.clone(),
            reason: format!("{} control characters out of {}", control, total),
        }
        .fail();
    }
    ensure!(
        doc.source_city.trim().eq_ignore_ascii_case(city.trim()),
        CityMismatchSnafu {
            identifier: doc.identifier.clone(),
            found: doc.source_city.clone(),
            expected: city.to_string(),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use chrono::NaiveDate;

    const SANTA_ANA_MEMBERS: [(&str, &str); 7] = [
        ("Valerie Amezcua", "Amezcua"),
        ("Thai Viet Phan", "Phan"),
        ("Jessie Lopez", "Lopez"),
        ("Phil Bacerra", "Bacerra"),
        ("Johnathan Ryan Hernandez", "Hernandez"),
        ("Nelida Mendoza", "Mendoza"),
        ("David Penaloza", "Penaloza"),
    ];

    fn roll_call_pipeline() -> ExtractionPipeline {
        let _ = env_logger::try_init();
        let mut builder = Builder::new("santa_ana", StrategyKind::RollCall)
            .unwrap()
            .roster_size(7)
            .unwrap();
        for (name, variant) in SANTA_ANA_MEMBERS.iter() {
            builder
                .add_member(name, "2022-12-06", None, &[variant])
                .unwrap();
        }
        // Sarmiento left before the 2023 meetings in this roster.
        builder
            .add_member("Vicente Sarmiento", "2020-12-08", Some("2022-12-05"), &[])
            .unwrap();
        builder.build().unwrap()
    }

    fn doc(city: &str, text: &str) -> RawDocument {
        RawDocument {
            identifier: "minutes-2023-01-17".to_string(),
            source_city: city.to_string(),
            meeting_date: NaiveDate::from_ymd_opt(2023, 1, 17).unwrap(),
            text: text.to_string(),
        }
    }

    const ROLL_CALL: &str = "26. Approve Agreement with Acme\nMOTION: Phan SECOND: Lopez\nYES: 7 \u{2013} Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza, Amezcua / NO: 0 / Status: 7\u{2013}0\u{2013}0\u{2013}0 \u{2013} Pass";

    #[test]
    fn single_roll_call_vote() {
        let p = roll_call_pipeline();
        let out = p.extract(&doc("santa_ana", ROLL_CALL)).unwrap();
        assert_eq!(out.document.votes.len(), 1);
        let v = &out.document.votes[0];
        assert_eq!(v.agenda_item_number, "26");
        assert_eq!(v.outcome, Some(Outcome::Pass));
        assert_eq!(v.tally, Tally::new(7, 0, 0, 0, 0));
        assert_eq!(v.member_votes.len(), 7);
        assert!(v.member_votes.values().all(|c| *c == VoteChoice::Aye));
        assert_eq!(v.provenance, Provenance::Deterministic);
        assert_eq!(v.confidence, 1.0);
        assert!(!out.fallback_invoked);
        assert!(!out.low_confidence);
        assert!(out.diagnostics.is_empty());
        assert!((out.report.score - 1.0).abs() < 1e-9);
    }

    // The 2022 council, before Amezcua took office.
    fn council_2022_pipeline() -> ExtractionPipeline {
        let _ = env_logger::try_init();
        let mut builder = Builder::new("santa_ana", StrategyKind::RollCall)
            .unwrap()
            .roster_size(7)
            .unwrap();
        for name in [
            "David Penaloza",
            "Thai Viet Phan",
            "Jessie Lopez",
            "Phil Bacerra",
            "Johnathan Ryan Hernandez",
            "Nelida Mendoza",
            "Vicente Sarmiento",
        ] {
            builder.add_member(name, "2020-12-08", None, &[]).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn status_line_with_seven_ayes() {
        let p = council_2022_pipeline();
        let text = "26. Approve Agreement with Acme\nYES: 7 \u{2013} Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza, Sarmiento / NO: 0 / Status: 7\u{2013}0\u{2013}0\u{2013}0 \u{2013} Pass";
        let mut d = doc("santa_ana", text);
        d.meeting_date = NaiveDate::from_ymd_opt(2022, 11, 15).unwrap();
        let out = p.extract(&d).unwrap();
        assert_eq!(out.records.len(), 1);
        let rec = &out.records[0];
        assert_eq!(rec.item_number(), "26");
        assert_eq!(rec.outcome, Some(Outcome::Pass));
        assert_eq!(rec.tally, Tally::new(7, 0, 0, 0, 0));
        assert_eq!(rec.member_votes.len(), 7);
        assert_eq!(rec.member_votes.get("Vicente Sarmiento"), Some(&VoteChoice::Aye));
        assert!(rec.member_votes.values().all(|c| *c == VoteChoice::Aye));
        assert!(out.report.check(CheckKind::RosterMembership).unwrap().passed);
    }

    #[test]
    fn former_member_is_not_on_the_roster() {
        let p = roll_call_pipeline();
        let text = ROLL_CALL.replace("Amezcua", "Sarmiento");
        let out = p.extract(&doc("santa_ana", &text)).unwrap();
        let roster = out.report.check(CheckKind::RosterMembership).unwrap();
        assert!(!roster.passed);
        assert!(out.records[0].confidence < 1.0);
    }

    #[test]
    fn unrecognized_outcome_goes_to_the_fallback() {
        let p = roll_call_pipeline().with_fallback(
            Arc::new(StaticFallback::new(Vec::new())),
            Duration::from_secs(5),
        );
        let text = "1. Street resurfacing contract\nMOTION: Phan SECOND: Lopez\nYES: 7 - Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza, Amezcua / NO: 0 / Status: 7-0-0-0 - Pass\n\n2. Library hours\nMOTION: Bacerra SECOND: Mendoza\nYES: 7 - Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza, Amezcua / NO: 0 / Status: 7-0-0-0 - Postponed\n\n3. Park improvements\nMOTION: Lopez SECOND: Phan\nYES: 6 - Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza / NO: 1 - Amezcua / Status: 6-1-0-0 - Pass";
        let out = p.extract(&doc("santa_ana", text)).unwrap();

        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::ParseError { item_number: Some(n), reason, .. }
                if n == "2" && reason == "unrecognized outcome vocabulary"
        )));
        assert!(out.report.score <= 0.5);
        assert!(out.fallback_invoked);
        assert!(out.low_confidence);

        let numbers: Vec<&str> = out
            .document
            .votes
            .iter()
            .map(|v| v.agenda_item_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["1", "2", "3"]);
        assert_eq!(out.document.votes[0].outcome, Some(Outcome::Pass));
        assert_eq!(out.document.votes[2].tally, Tally::new(6, 1, 0, 0, 0));
        let unresolved = &out.document.votes[1];
        assert_eq!(unresolved.outcome, None);
        assert!(unresolved.confidence <= 0.2);
        assert!(out.records[1].has_flag(&RecordFlag::UnrecognizedOutcome));
    }

    #[test]
    fn low_confidence_without_fallback_is_reported() {
        let p = roll_call_pipeline();
        let text = ROLL_CALL.replace("Pass", "Postponed");
        let out = p.extract(&doc("santa_ana", &text)).unwrap();
        assert!(!out.fallback_invoked);
        assert!(out
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::FallbackUnavailable { .. })));
        assert_eq!(out.document.votes.len(), 1);
    }

    struct Answering(Vec<VoteRecord>);

    impl FallbackExtractor for Answering {
        fn name(&self) -> &str {
            "answering"
        }

        fn extract(&self, request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError> {
            assert_eq!(request.deterministic.len(), 1);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn fallback_answer_is_merged() {
        let mut answer = VoteRecord::new(
            AgendaItem::new("26", "Approve Agreement with Acme"),
            Some(Outcome::Continued),
            Tally::default(),
        );
        answer.mover = "Thai Viet Phan".to_string();
        answer.seconder = "Jessie Lopez".to_string();
        let p = roll_call_pipeline()
            .with_fallback(Arc::new(Answering(vec![answer])), Duration::from_secs(5));
        let text = ROLL_CALL.replace("Pass", "Postponed");
        let out = p.extract(&doc("santa_ana", &text)).unwrap();
        assert!(out.fallback_invoked);
        assert_eq!(out.document.votes.len(), 1);
        let v = &out.document.votes[0];
        assert_eq!(v.outcome, Some(Outcome::Continued));
        assert_eq!(v.provenance, Provenance::Merged);
        assert!(!out.low_confidence);
    }

    #[test]
    fn merge_conflicts_are_in_the_report() {
        let mut answer = VoteRecord::new(
            AgendaItem::new("26", "Approve Agreement with Acme"),
            Some(Outcome::Continued),
            Tally::default(),
        );
        answer.mover = "Thai Viet Phan".to_string();
        answer.seconder = "Jessie Lopez".to_string();
        let p = roll_call_pipeline().with_fallback(
            Arc::new(Answering(vec![answer.clone(), answer])),
            Duration::from_secs(5),
        );
        let text = ROLL_CALL.replace("Pass", "Postponed");
        let out = p.extract(&doc("santa_ana", &text)).unwrap();
        assert_eq!(out.document.votes.len(), 1);
        assert!(out
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::MergeConflict { .. })));
        assert!(out
            .report
            .issues
            .iter()
            .any(|i| i.item_number == "26" && i.check == CheckKind::Coverage));
    }

    struct Sleeping(Duration);

    impl FallbackExtractor for Sleeping {
        fn name(&self) -> &str {
            "sleeping"
        }

        fn extract(&self, _request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError> {
            thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    struct Failing;

    impl FallbackExtractor for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn extract(&self, _request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError> {
            Err(FallbackError::Unavailable {
                reason: "no credentials".to_string(),
            })
        }
    }

    #[test]
    fn slow_fallback_keeps_the_deterministic_result() {
        let text = ROLL_CALL.replace("Pass", "Postponed");
        let expected = roll_call_pipeline()
            .extract(&doc("santa_ana", &text))
            .unwrap();
        let p = roll_call_pipeline().with_fallback(
            Arc::new(Sleeping(Duration::from_secs(2))),
            Duration::from_millis(50),
        );
        let out = p.extract(&doc("santa_ana", &text)).unwrap();
        assert!(out.fallback_invoked);
        assert!(out.low_confidence);
        assert!(out
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::FallbackTimeout { timeout_ms: 50 })));
        assert_eq!(out.records, expected.records);
        assert_eq!(out.document, expected.document);
    }

    #[test]
    fn failing_fallback_keeps_the_deterministic_result() {
        let text = ROLL_CALL.replace("Pass", "Postponed");
        let expected = roll_call_pipeline()
            .extract(&doc("santa_ana", &text))
            .unwrap();
        let p = roll_call_pipeline().with_fallback(Arc::new(Failing), Duration::from_secs(5));
        let out = p.extract(&doc("santa_ana", &text)).unwrap();
        assert!(out.fallback_invoked);
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::FallbackUnavailable { reason } if reason.contains("no credentials")
        )));
        assert_eq!(out.records, expected.records);
    }

    #[test]
    fn motion_voted_twice_gives_one_record() {
        let p = roll_call_pipeline();
        let text = "26. Approve Agreement with Acme\nMOTION: Bacerra SECOND: Mendoza\nYES: 3 - Bacerra, Mendoza, Amezcua / NO: 4 - Penaloza, Phan, Lopez, Hernandez / Status: 3-4-0-0 - Fail\nMOTION: Phan SECOND: Lopez\nYES: 4 - Penaloza, Phan, Lopez, Hernandez / NO: 3 - Bacerra, Mendoza, Amezcua / Status: 4-3-0-0 - Pass";
        let out = p.extract(&doc("santa_ana", text)).unwrap();
        assert_eq!(out.document.votes.len(), 1);
        assert_eq!(out.document.votes[0].outcome, Some(Outcome::Pass));
        assert_eq!(out.document.votes[0].tally, Tally::new(4, 3, 0, 0, 0));
        assert!(out.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::RepeatedMotion { item_number, dropped: 1, .. } if item_number == "26"
        )));
        assert!(out.report.check(CheckKind::Uniqueness).unwrap().passed);
        assert!(!out.low_confidence);
        assert!(!out.fallback_invoked);
    }

    #[test]
    fn consent_calendar_with_a_pulled_item() {
        let _ = env_logger::try_init();
        let mut builder = Builder::new("testville", StrategyKind::Narrative).unwrap();
        for name in [
            "Ann Smith",
            "Bo Jones",
            "Cy Garcia",
            "Di Lee",
            "Ed Kim",
            "Flo Brown",
            "Gil Nguyen",
        ] {
            builder.add_member(name, "2022-01-01", None, &[]).unwrap();
        }
        let p = builder.build().unwrap();
        let text = "CONSENT CALENDAR\n8. Warrant register\n9. Purchase of police vehicles\n10. Agreement with Acme Corp. for street sweeping\n11. Grant application for library services\n12. Claims against the city\n\nIt was moved by Councilmember Smith, seconded by Councilmember Jones, to approve Consent Calendar Item Nos. 8 through 12 with the exception of Item No. 10. The motion carried 6-0.\n\nPULLED ITEMS\n10. Agreement with Acme Corp. for street sweeping\nIt was moved by Councilmember Garcia, seconded by Councilmember Lee, to approve the agreement. The motion carried by the following vote:\nAYES: Smith, Jones, Garcia, Lee, Kim\nNOES: Brown\nABSENT: Nguyen";
        let out = p.extract(&doc("testville", text)).unwrap();

        let numbers: Vec<&str> = out
            .document
            .votes
            .iter()
            .map(|v| v.agenda_item_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["8", "9", "10", "11", "12"]);
        for v in out.document.votes.iter().filter(|v| v.agenda_item_number != "10") {
            assert_eq!(v.provenance, Provenance::Deterministic);
            assert_eq!(v.tally, Tally::new(6, 0, 0, 0, 0));
            assert!(v.member_votes.is_empty());
        }
        assert_eq!(out.document.votes[2].tally, Tally::new(5, 1, 0, 1, 0));
        assert_eq!(out.document.votes[2].member_votes.len(), 7);
        assert!(!out.low_confidence);
    }

    #[test]
    fn rejects_bad_documents() {
        let p = roll_call_pipeline();
        let err = p.extract(&doc("santa_ana", "  \n ")).unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyDocument { .. }));
        let err = p.extract(&doc("santa_ana", "PK\u{3}\u{4}\u{0}\u{0}")).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedDocument { .. }));
        let err = p.extract(&doc("anaheim", ROLL_CALL)).unwrap_err();
        assert!(matches!(err, ExtractionError::CityMismatch { .. }));
        assert!(err.is_fatal_input());
    }

    #[test]
    fn batch_keeps_order_and_isolates_failures() {
        let p = roll_call_pipeline();
        let mut docs: Vec<RawDocument> = (0..5).map(|_| doc("santa_ana", ROLL_CALL)).collect();
        docs[2].text = String::new();
        for (i, d) in docs.iter_mut().enumerate() {
            d.identifier = format!("doc-{}", i);
        }
        let res = p.extract_many(&docs);
        assert_eq!(res.len(), 5);
        assert!(res[2].is_err());
        for (i, r) in res.iter().enumerate().filter(|(i, _)| *i != 2) {
            assert_eq!(r.as_ref().unwrap().identifier, format!("doc-{}", i));
        }
    }

    #[test]
    fn oversized_status_numbers_do_not_fail_the_batch() {
        let p = roll_call_pipeline();
        let noisy = ROLL_CALL.replace(
            "Status: 7\u{2013}0\u{2013}0\u{2013}0",
            "Status: 4294967295-1-0-0",
        );
        let docs: Vec<RawDocument> = vec![
            doc("santa_ana", ROLL_CALL),
            doc("santa_ana", &noisy),
            doc("santa_ana", ROLL_CALL),
        ];
        let res = p.extract_many(&docs);
        assert_eq!(res.len(), 3);
        for r in res.iter() {
            let out = r.as_ref().unwrap();
            assert_eq!(out.records[0].outcome, Some(Outcome::Pass));
            assert_eq!(out.records[0].tally, Tally::new(7, 0, 0, 0, 0));
        }
    }

    #[test]
    fn compile_rejects_bad_configuration() {
        let mut config = CityConfig::new("santa_ana", StrategyKind::RollCall);
        config.low_confidence_threshold = 1.5;
        assert!(CityProfile::compile(config).is_err());

        let mut config = CityConfig::new("santa_ana", StrategyKind::RollCall);
        config.ocr_corrections.push(OcrCorrection {
            pattern: "(unclosed".to_string(),
            replacement: "x".to_string(),
            literal: false,
        });
        assert!(matches!(
            CityProfile::compile(config),
            Err(ExtractionError::InvalidPattern { .. })
        ));
    }
}
