use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};

use crate::config::*;
use crate::consent::{ConsentCalendarExpander, ConsentCalendarVote, ConsentExpansion};
use crate::errors::Diagnostic;
use crate::normalizer::TextNormalizer;
use crate::strategy::{CityPatternStrategy, CityStrategy, ParseContext, VoteSpan};
use crate::validator::{ConsentCoverage, ValidationContext, Validator};

/// The candidate vote set of the deterministic pass.
#[derive(PartialEq, Debug, Clone)]
pub struct DeterministicPass {
    pub records: Vec<VoteRecord>,
    pub diagnostics: Vec<Diagnostic>,
    /// The number of vote blocks found in the text. A motion voted again
    /// counts once.
    pub marker_count: usize,
    pub consent_coverage: Vec<ConsentCoverage>,
    pub normalized_text: String,
}

impl DeterministicPass {
    pub fn validation_context<'a>(&'a self, parse: &ParseContext<'a>) -> ValidationContext<'a> {
        ValidationContext {
            registry: parse.registry,
            meeting_date: parse.meeting_date,
            roster_size: parse.roster_size,
            marker_count: self.marker_count,
            consent_coverage: &self.consent_coverage,
        }
    }
}

/// Normalizes a document, finds its vote blocks and expands the consent
/// calendar motions.
#[derive(Debug, Clone)]
pub struct DeterministicExtractor {
    normalizer: TextNormalizer,
    strategy: CityStrategy,
    expander: ConsentCalendarExpander,
}

impl DeterministicExtractor {
    pub fn new(
        normalizer: TextNormalizer,
        strategy: CityStrategy,
        expander: ConsentCalendarExpander,
    ) -> DeterministicExtractor {
        DeterministicExtractor {
            normalizer,
            strategy,
            expander,
        }
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    pub fn strategy(&self) -> &CityStrategy {
        &self.strategy
    }

    pub fn extract(
        &self,
        raw_text: &str,
        ctx: &ParseContext<'_>,
        validator: &Validator,
    ) -> DeterministicPass {
        let normalized_text = self.normalizer.normalize(raw_text);
        let blocks = self.strategy.detect_vote_blocks(&normalized_text);
        let agenda = blocks.agenda().clone();
        let keywords = self.strategy.vocabulary().consent_keywords();

        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut standalone: Vec<VoteRecord> = Vec::new();
        let mut groups: Vec<(ConsentCalendarVote, ConsentExpansion)> = Vec::new();
        let mut marker_count = 0;

        for span in blocks {
            marker_count += 1;
            let record = self.build_record(&span, ctx, &mut diagnostics);

            if self.strategy.vocabulary().is_consent(&record.motion_text) {
                match ConsentCalendarVote::parse(
                    record.clone(),
                    &record.motion_text,
                    &agenda,
                    keywords,
                ) {
                    Ok(Some((vote, dropped))) => {
                        if !dropped.is_empty() {
                            diagnostics.push(Diagnostic::ExceptionOutsideRange {
                                range: vote.range.to_string(),
                                exceptions: dropped,
                            });
                        }
                        let expansion = self.expander.expand(&vote, &agenda);
                        groups.push((vote, expansion));
                        continue;
                    }
                    Ok(None) => {
                        debug!(
                            "extract: consent wording without a range at {}, kept as a single vote",
                            span.marker
                        );
                    }
                    Err(e) => {
                        warn!("extract: consent motion at {}: {}", span.marker, e);
                        diagnostics.push(Diagnostic::from_parse_error(
                            &e,
                            Some(record.item_number()),
                            span.marker,
                        ));
                    }
                }
            }
            standalone.push(record);
        }

        let found = standalone.len();
        let standalone = keep_last_motions(standalone, &mut diagnostics);
        marker_count -= found - standalone.len();
        let (mut records, consent_coverage) =
            reconcile_coverage(standalone, groups, &mut diagnostics);
        sort_records(&mut records);

        let mut pass = DeterministicPass {
            records,
            diagnostics,
            marker_count,
            consent_coverage,
            normalized_text,
        };
        let confidences: Vec<f64> = {
            let vctx = pass.validation_context(ctx);
            pass.records
                .iter()
                .map(|r| validator.record_confidence(r, &vctx))
                .collect()
        };
        for (r, c) in pass.records.iter_mut().zip(confidences) {
            r.confidence = c;
        }
        info!(
            "extract: {} vote blocks, {} records, {} diagnostics",
            pass.marker_count,
            pass.records.len(),
            pass.diagnostics.len()
        );
        pass
    }

    fn build_record(
        &self,
        span: &VoteSpan,
        ctx: &ParseContext<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> VoteRecord {
        let motion = self.strategy.parse_motion(span, ctx);
        let members = self.strategy.parse_member_list(span, ctx);
        let mut record = VoteRecord::new(
            span.item.clone().unwrap_or_default(),
            None,
            members.tally(),
        );
        match self.strategy.parse_outcome(span, ctx) {
            Ok(parsed) => {
                record.outcome = Some(parsed.outcome);
                record.tally = parsed.tally;
            }
            Err(e) => {
                warn!(
                    "build_record: item {:?} at {}: {}",
                    record.item_number(),
                    span.marker,
                    e
                );
                diagnostics.push(Diagnostic::from_parse_error(
                    &e,
                    span.item.as_ref().map(|i| i.item_number.as_str()),
                    span.marker,
                ));
                record.add_flag(RecordFlag::UnrecognizedOutcome);
            }
        }
        record.member_votes = members.votes;
        record.unregistered = members.unregistered;
        record.motion_text = motion.motion_text;
        record.mover = motion.mover;
        record.seconder = motion.seconder;
        record.motion_type = motion.motion_type;

        let counted = record.tally.total();
        if !record.member_votes.is_empty() && ctx.roster_size > 0 && counted != ctx.roster_size {
            debug!(
                "build_record: item {:?} counts {} votes for {} seats",
                record.item_number(),
                counted,
                ctx.roster_size
            );
            record.add_flag(RecordFlag::RosterSizeMismatch {
                counted,
                expected: ctx.roster_size,
            });
        }
        record
    }
}

// One record per item and motion type. A motion voted again later in the
// minutes replaces the earlier vote.
fn keep_last_motions(
    standalone: Vec<VoteRecord>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<VoteRecord> {
    let mut last: HashMap<(String, MotionType), usize> = HashMap::new();
    for (i, rec) in standalone.iter().enumerate() {
        last.insert(record_key(rec), i);
    }
    if last.len() == standalone.len() {
        return standalone;
    }

    let mut dropped: HashMap<(String, MotionType), usize> = HashMap::new();
    let mut kept: Vec<VoteRecord> = Vec::with_capacity(last.len());
    for (i, rec) in standalone.into_iter().enumerate() {
        let key = record_key(&rec);
        if last.get(&key) == Some(&i) {
            kept.push(rec);
        } else {
            *dropped.entry(key).or_insert(0) += 1;
        }
    }
    for rec in kept.iter() {
        if let Some(count) = dropped.remove(&record_key(rec)) {
            warn!(
                "keep_last_motions: item {:?} has {} earlier {:?} motions",
                rec.item_number(),
                count,
                rec.motion_type
            );
            diagnostics.push(Diagnostic::RepeatedMotion {
                item_number: rec.item_number().to_string(),
                motion_type: rec.motion_type,
                dropped: count,
            });
        }
    }
    kept
}

fn record_key(rec: &VoteRecord) -> (String, MotionType) {
    (rec.item_number().trim().to_lowercase(), rec.motion_type)
}

// Checks that each consent range is covered exactly once by its expansion
// and the standalone records. A standalone record wins over an expanded copy
// of the same item, flagged; an item claimed by two ranges stays with the
// first one.
fn reconcile_coverage(
    standalone: Vec<VoteRecord>,
    groups: Vec<(ConsentCalendarVote, ConsentExpansion)>,
    diagnostics: &mut Vec<Diagnostic>,
) -> (Vec<VoteRecord>, Vec<ConsentCoverage>) {
    let standalone_numbers: HashSet<String> = standalone
        .iter()
        .map(|r| r.item_number().to_lowercase())
        .collect();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut conflicted: HashSet<String> = HashSet::new();
    let mut records: Vec<VoteRecord> = Vec::new();
    let mut coverage: Vec<ConsentCoverage> = Vec::new();

    for (vote, expansion) in groups {
        let missing: Vec<String> = expansion
            .pulled
            .iter()
            .chain(expansion.excluded.iter())
            .filter(|n| !standalone_numbers.contains(&n.to_lowercase()))
            .cloned()
            .collect();
        let mut duplicated: Vec<String> = Vec::new();
        for rec in expansion.records {
            let key = rec.item_number().to_lowercase();
            if standalone_numbers.contains(&key) {
                duplicated.push(rec.item_number().to_string());
                conflicted.insert(key);
                continue;
            }
            if !claimed.insert(key) {
                duplicated.push(rec.item_number().to_string());
                continue;
            }
            records.push(rec);
        }
        if !missing.is_empty() || !duplicated.is_empty() {
            warn!(
                "reconcile_coverage: range {} is missing {:?}, duplicated {:?}",
                vote.range, missing, duplicated
            );
            diagnostics.push(Diagnostic::RangeCoverageConflict {
                range: vote.range.to_string(),
                missing,
                duplicated,
            });
        }
        coverage.push(ConsentCoverage {
            range: vote.range,
            expected: vote.covered,
        });
    }

    for mut rec in standalone {
        if conflicted.contains(&rec.item_number().to_lowercase()) {
            rec.add_flag(RecordFlag::CoverageConflict);
        }
        records.push(rec);
    }
    (records, coverage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemberRegistry;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn registry(city: &str, names: &[&str]) -> MemberRegistry {
        let members = names
            .iter()
            .map(|n| Member {
                canonical_name: n.to_string(),
                city: city.to_string(),
                term_start: date("2020-12-08"),
                term_end: None,
                name_variants: Vec::new(),
            })
            .collect();
        MemberRegistry::new(city, members, 2)
    }

    fn extractor(kind: StrategyKind) -> DeterministicExtractor {
        let config = CityConfig::new("test", kind);
        DeterministicExtractor::new(
            TextNormalizer::new(&config.ocr_corrections).unwrap(),
            CityStrategy::new(kind, &config.vocabulary).unwrap(),
            ConsentCalendarExpander::new(&config.excluded_item_categories),
        )
    }

    const NARRATIVE_MEMBERS: [&str; 7] = [
        "Ann Smith",
        "Bo Jones",
        "Cy Garcia",
        "Di Lee",
        "Ed Kim",
        "Flo Brown",
        "Gil Nguyen",
    ];

    const CONSENT_MINUTES: &str = "CONSENT CALENDAR\n8. Warrant register\n9. Purchase of police vehicles\n10. Agreement with Acme Corp. for street sweeping\n11. Grant application for library services\n12. Claims against the city\n\nIt was moved by Councilmember Smith, seconded by Councilmember Jones, to approve Consent Calendar Item Nos. 8 through 12 with the exception of Item No. 10. The motion carried 6-0.\n\nPULLED ITEMS\n10. Agreement with Acme Corp. for street sweeping\nIt was moved by Councilmember Garcia, seconded by Councilmember Lee, to approve the agreement. The motion carried by the following vote:\nAYES: Smith, Jones, Garcia, Lee, Kim\nNOES: Brown\nABSENT: Nguyen";

    #[test]
    fn roll_call_block() {
        let r = registry(
            "santa_ana",
            &[
                "David Penaloza",
                "Thai Viet Phan",
                "Jessie Lopez",
                "Phil Bacerra",
                "Johnathan Ryan Hernandez",
                "Nelida Mendoza",
                "Vicente Sarmiento",
            ],
        );
        let ctx = ParseContext::new(&r, date("2023-01-17"), Some(7));
        let text = "26. Approve Agreement with Acme\nMOTION: Penaloza SECOND: Phan\nYES: 7 \u{2013} Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza, Sarmiento / NO: 0 / Status: 7\u{2013}0\u{2013}0\u{2013}0 \u{2013} Pass";
        let pass = extractor(StrategyKind::RollCall).extract(text, &ctx, &Validator::default());
        assert_eq!(pass.marker_count, 1);
        assert_eq!(pass.records.len(), 1);
        let rec = &pass.records[0];
        assert_eq!(rec.item_number(), "26");
        assert_eq!(rec.outcome, Some(Outcome::Pass));
        assert_eq!(rec.tally, Tally::new(7, 0, 0, 0, 0));
        assert_eq!(rec.member_votes.len(), 7);
        assert!(rec.member_votes.values().all(|c| *c == VoteChoice::Aye));
        assert_eq!(rec.mover, "David Penaloza");
        assert_eq!(rec.seconder, "Thai Viet Phan");
        assert!(rec.flags.is_empty());
        assert!((rec.confidence - 1.0).abs() < 1e-9);
        assert!(pass.diagnostics.is_empty());
    }

    #[test]
    fn repeated_motion_keeps_the_last_vote() {
        let r = registry(
            "santa_ana",
            &[
                "David Penaloza",
                "Thai Viet Phan",
                "Jessie Lopez",
                "Phil Bacerra",
                "Johnathan Ryan Hernandez",
                "Nelida Mendoza",
                "Vicente Sarmiento",
            ],
        );
        let ctx = ParseContext::new(&r, date("2023-01-17"), Some(7));
        let text = "26. Approve Agreement with Acme\nMOTION: Bacerra SECOND: Mendoza\nYES: 3 \u{2013} Bacerra, Mendoza, Sarmiento / NO: 4 \u{2013} Penaloza, Phan, Lopez, Hernandez / Status: 3\u{2013}4\u{2013}0\u{2013}0 \u{2013} Fail\nMOTION: Phan SECOND: Lopez\nYES: 4 \u{2013} Penaloza, Phan, Lopez, Hernandez / NO: 3 \u{2013} Bacerra, Mendoza, Sarmiento / Status: 4\u{2013}3\u{2013}0\u{2013}0 \u{2013} Pass";
        let pass = extractor(StrategyKind::RollCall).extract(text, &ctx, &Validator::default());
        assert_eq!(pass.marker_count, 1);
        assert_eq!(pass.records.len(), 1);
        let rec = &pass.records[0];
        assert_eq!(rec.item_number(), "26");
        assert_eq!(rec.outcome, Some(Outcome::Pass));
        assert_eq!(rec.tally, Tally::new(4, 3, 0, 0, 0));
        assert_eq!(rec.mover, "Thai Viet Phan");
        assert_eq!(
            pass.diagnostics,
            vec![Diagnostic::RepeatedMotion {
                item_number: "26".to_string(),
                motion_type: MotionType::Original,
                dropped: 1,
            }]
        );
    }

    #[test]
    fn consent_calendar_with_pulled_item() {
        let r = registry("testville", &NARRATIVE_MEMBERS);
        let ctx = ParseContext::new(&r, date("2023-03-07"), None);
        let pass = extractor(StrategyKind::Narrative).extract(
            CONSENT_MINUTES,
            &ctx,
            &Validator::default(),
        );
        assert_eq!(pass.marker_count, 2);
        let numbers: Vec<&str> = pass.records.iter().map(|r| r.item_number()).collect();
        assert_eq!(numbers, vec!["8", "9", "10", "11", "12"]);
        for rec in pass.records.iter().filter(|r| r.item_number() != "10") {
            assert_eq!(rec.provenance, Provenance::Deterministic);
            assert_eq!(rec.tally, Tally::new(6, 0, 0, 0, 0));
            assert!(rec.member_votes.is_empty());
            assert_eq!(rec.mover, "Ann Smith");
            assert_eq!(rec.seconder, "Bo Jones");
            assert!(rec.is_consent());
        }
        let pulled = &pass.records[2];
        assert!(!pulled.is_consent());
        assert_eq!(pulled.tally, Tally::new(5, 1, 0, 1, 0));
        assert_eq!(pulled.member_votes.get("Flo Brown"), Some(&VoteChoice::Nay));
        assert_eq!(pulled.mover, "Cy Garcia");
        assert!(pass.diagnostics.is_empty());
        assert_eq!(pass.consent_coverage.len(), 1);
        assert_eq!(pass.consent_coverage[0].expected.len(), 5);

        let report = Validator::default().validate(&pass.records, &pass.validation_context(&ctx));
        assert!((report.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn standalone_vote_wins_over_expanded_copy() {
        let r = registry("testville", &NARRATIVE_MEMBERS);
        let ctx = ParseContext::new(&r, date("2023-03-07"), None);
        let text = CONSENT_MINUTES.replace(" with the exception of Item No. 10", "");
        let pass = extractor(StrategyKind::Narrative).extract(&text, &ctx, &Validator::default());
        let tens: Vec<&VoteRecord> = pass
            .records
            .iter()
            .filter(|r| r.item_number() == "10")
            .collect();
        assert_eq!(tens.len(), 1);
        assert!(!tens[0].is_consent());
        assert!(tens[0].has_flag(&RecordFlag::CoverageConflict));
        assert!(tens[0].confidence < 1.0);
        assert!(matches!(
            pass.diagnostics.as_slice(),
            [Diagnostic::RangeCoverageConflict { duplicated, .. }] if duplicated == &vec!["10".to_string()]
        ));
    }

    #[test]
    fn pulled_item_without_its_own_vote_is_a_gap() {
        let r = registry("testville", &NARRATIVE_MEMBERS);
        let ctx = ParseContext::new(&r, date("2023-03-07"), None);
        let cut = CONSENT_MINUTES.find("PULLED ITEMS").unwrap();
        let pass = extractor(StrategyKind::Narrative).extract(
            &CONSENT_MINUTES[..cut],
            &ctx,
            &Validator::default(),
        );
        assert_eq!(pass.records.len(), 4);
        assert!(matches!(
            pass.diagnostics.as_slice(),
            [Diagnostic::RangeCoverageConflict { missing, .. }] if missing == &vec!["10".to_string()]
        ));
        let report = Validator::default().validate(&pass.records, &pass.validation_context(&ctx));
        assert!(report.failed_checks.contains(&crate::validator::CheckKind::Coverage));
    }
}
