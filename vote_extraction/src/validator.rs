use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use log::{debug, info};
use serde::Serialize;

use crate::config::*;
use crate::registry::MemberRegistry;

/// The items a consent range is expected to cover, between its expansion and
/// the standalone records.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ConsentCoverage {
    pub range: ItemRange,
    pub expected: Vec<String>,
}

/// What the checks compare a vote set against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub registry: &'a MemberRegistry,
    pub meeting_date: NaiveDate,
    /// 0 when unknown.
    pub roster_size: u32,
    /// The number of vote blocks detected in the document.
    pub marker_count: usize,
    pub consent_coverage: &'a [ConsentCoverage],
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    TallyArithmetic,
    Uniqueness,
    RosterMembership,
    RequiredFields,
    Coverage,
}

impl CheckKind {
    /// A failure of a critical check caps the score.
    pub fn is_critical(&self) -> bool {
        matches!(self, CheckKind::Uniqueness | CheckKind::RequiredFields)
    }
}

#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub score: f64,
    pub passed: bool,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct RecordIssue {
    pub item_number: String,
    pub check: CheckKind,
    pub message: String,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub score: f64,
    pub checks: Vec<CheckResult>,
    pub passed_checks: Vec<CheckKind>,
    pub failed_checks: Vec<CheckKind>,
    pub issues: Vec<RecordIssue>,
}

impl ValidationReport {
    pub fn check(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    pub fn is_below(&self, threshold: f64) -> bool {
        self.score < threshold
    }
}

// Scores are ratios: anything this close to 1 passed.
const EPSILON: f64 = 1e-9;

fn ratio(good: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        good as f64 / total as f64
    }
}

/// Scores candidate vote sets.
#[derive(Debug, Clone)]
pub struct Validator {
    weights: ValidationWeights,
}

impl Validator {
    pub fn new(weights: ValidationWeights) -> Validator {
        Validator { weights }
    }

    pub fn weights(&self) -> &ValidationWeights {
        &self.weights
    }

    pub fn validate(
        &self,
        records: &[VoteRecord],
        ctx: &ValidationContext<'_>,
    ) -> ValidationReport {
        let mut issues: Vec<RecordIssue> = Vec::new();
        let checks = vec![
            self.check_tallies(records, ctx, &mut issues),
            self.check_uniqueness(records, &mut issues),
            self.check_roster(records, ctx, &mut issues),
            self.check_required_fields(records, &mut issues),
            self.check_coverage(records, ctx, &mut issues),
        ];

        let score = if records.is_empty() {
            0.0
        } else {
            let weighted: Vec<(f64, f64)> = checks
                .iter()
                .map(|c| (self.weight(c.kind), c.score))
                .collect();
            let total_weight: f64 = weighted.iter().map(|(w, _)| *w).sum();
            let mut score = if total_weight > 0.0 {
                weighted.iter().map(|(w, s)| w * s).sum::<f64>() / total_weight
            } else {
                checks.iter().map(|c| c.score).sum::<f64>() / checks.len() as f64
            };
            if checks.iter().any(|c| c.kind.is_critical() && !c.passed) {
                score = score.min(self.weights.critical_failure_cap);
            }
            score.clamp(0.0, 1.0)
        };

        let passed_checks: Vec<CheckKind> =
            checks.iter().filter(|c| c.passed).map(|c| c.kind).collect();
        let failed_checks: Vec<CheckKind> =
            checks.iter().filter(|c| !c.passed).map(|c| c.kind).collect();
        info!(
            "validate: {} records, score {:.3}, failed checks {:?}",
            records.len(),
            score,
            failed_checks
        );
        ValidationReport {
            score,
            checks,
            passed_checks,
            failed_checks,
            issues,
        }
    }

    fn weight(&self, kind: CheckKind) -> f64 {
        match kind {
            CheckKind::TallyArithmetic => self.weights.tally,
            CheckKind::Uniqueness => self.weights.uniqueness,
            CheckKind::RosterMembership => self.weights.roster,
            CheckKind::RequiredFields => self.weights.required_fields,
            CheckKind::Coverage => self.weights.coverage,
        }
    }

    fn check_tallies(
        &self,
        records: &[VoteRecord],
        ctx: &ValidationContext<'_>,
        issues: &mut Vec<RecordIssue>,
    ) -> CheckResult {
        let mut considered = 0;
        let mut good = 0;
        for r in records.iter().filter(|r| !r.member_votes.is_empty()) {
            considered += 1;
            let counted = Tally::from_member_votes(&r.member_votes);
            if counted != r.tally {
                issues.push(RecordIssue {
                    item_number: r.item_number().to_string(),
                    check: CheckKind::TallyArithmetic,
                    message: format!(
                        "tally {:?} does not match the member votes {:?}",
                        r.tally, counted
                    ),
                });
            } else if ctx.roster_size > 0 && r.tally.total() != ctx.roster_size {
                issues.push(RecordIssue {
                    item_number: r.item_number().to_string(),
                    check: CheckKind::TallyArithmetic,
                    message: format!(
                        "tally sums to {}, the roster has {} members",
                        r.tally.total(),
                        ctx.roster_size
                    ),
                });
            } else {
                good += 1;
            }
        }
        let score = ratio(good, considered);
        CheckResult {
            kind: CheckKind::TallyArithmetic,
            score,
            passed: good == considered,
        }
    }

    fn check_uniqueness(
        &self,
        records: &[VoteRecord],
        issues: &mut Vec<RecordIssue>,
    ) -> CheckResult {
        let mut seen: HashSet<RecordKey> = HashSet::new();
        let mut duplicates = 0;
        for r in records.iter() {
            if !seen.insert(r.key()) {
                duplicates += 1;
                issues.push(RecordIssue {
                    item_number: r.item_number().to_string(),
                    check: CheckKind::Uniqueness,
                    message: format!("more than one {:?} motion on this item", r.motion_type),
                });
            }
        }
        CheckResult {
            kind: CheckKind::Uniqueness,
            score: ratio(records.len() - duplicates, records.len()),
            passed: duplicates == 0,
        }
    }

    fn check_roster(
        &self,
        records: &[VoteRecord],
        ctx: &ValidationContext<'_>,
        issues: &mut Vec<RecordIssue>,
    ) -> CheckResult {
        if ctx.registry.is_empty() {
            debug!("check_roster: no roster for {}, skipping", ctx.registry.city());
            return CheckResult {
                kind: CheckKind::RosterMembership,
                score: 1.0,
                passed: true,
            };
        }
        let mut total = 0;
        let mut good = 0;
        for r in records.iter() {
            let unknown = unresolved_voters(r, ctx);
            total += r.member_votes.len();
            good += r.member_votes.len() - unknown.len();
            if !unknown.is_empty() {
                issues.push(RecordIssue {
                    item_number: r.item_number().to_string(),
                    check: CheckKind::RosterMembership,
                    message: format!("voters not on the roster: {}", unknown.join(", ")),
                });
            }
        }
        CheckResult {
            kind: CheckKind::RosterMembership,
            score: ratio(good, total),
            passed: good == total,
        }
    }

    fn check_required_fields(
        &self,
        records: &[VoteRecord],
        issues: &mut Vec<RecordIssue>,
    ) -> CheckResult {
        let mut good = 0;
        for r in records.iter() {
            let mut missing: Vec<&str> = Vec::new();
            if r.item_number().trim().is_empty() {
                missing.push("item number");
            }
            if r.outcome.is_none() {
                missing.push("outcome");
            }
            if missing.is_empty() {
                good += 1;
            } else {
                issues.push(RecordIssue {
                    item_number: r.item_number().to_string(),
                    check: CheckKind::RequiredFields,
                    message: format!("missing {}", missing.join(" and ")),
                });
            }
        }
        CheckResult {
            kind: CheckKind::RequiredFields,
            score: ratio(good, records.len()),
            passed: good == records.len(),
        }
    }

    fn check_coverage(
        &self,
        records: &[VoteRecord],
        ctx: &ValidationContext<'_>,
        issues: &mut Vec<RecordIssue>,
    ) -> CheckResult {
        // Recall: one unit per standalone record, one per consent range.
        let standalone = records.iter().filter(|r| !r.is_consent()).count();
        let ranges: HashSet<&ItemRange> = records
            .iter()
            .filter_map(|r| r.consent_range.as_ref())
            .collect();
        let units = standalone + ranges.len();
        let recall = if ctx.marker_count == 0 {
            if units > 0 {
                1.0
            } else {
                0.0
            }
        } else {
            (units as f64 / ctx.marker_count as f64).min(1.0)
        };

        // Partition: every item of every consent range is present.
        let present: HashMap<String, usize> =
            records.iter().fold(HashMap::new(), |mut acc, r| {
                *acc.entry(r.item_number().to_lowercase()).or_insert(0) += 1;
                acc
            });
        let mut expected = 0;
        let mut found = 0;
        for cov in ctx.consent_coverage.iter() {
            let missing: Vec<&str> = cov
                .expected
                .iter()
                .filter(|n| !present.contains_key(&n.to_lowercase()))
                .map(|n| n.as_str())
                .collect();
            expected += cov.expected.len();
            found += cov.expected.len() - missing.len();
            if !missing.is_empty() {
                issues.push(RecordIssue {
                    item_number: cov.range.to_string(),
                    check: CheckKind::Coverage,
                    message: format!("consent range has no record for {}", missing.join(", ")),
                });
            }
        }
        let partition = ratio(found, expected);
        let score = recall * partition;
        debug!(
            "check_coverage: {} units for {} markers, partition {}/{}",
            units, ctx.marker_count, found, expected
        );
        CheckResult {
            kind: CheckKind::Coverage,
            score,
            passed: score >= 1.0 - EPSILON,
        }
    }

    /// The confidence of a single record.
    pub fn record_confidence(&self, record: &VoteRecord, ctx: &ValidationContext<'_>) -> f64 {
        let mut c = 1.0;
        if record.item_number().trim().is_empty() {
            c *= 0.5;
        }
        if !record.member_votes.is_empty() {
            let counted = Tally::from_member_votes(&record.member_votes);
            let roster_ok = ctx.roster_size == 0 || record.tally.total() == ctx.roster_size;
            if counted != record.tally || !roster_ok {
                c *= 0.5;
            }
            if !ctx.registry.is_empty() {
                let unknown = unresolved_voters(record, ctx).len();
                c *= ratio(record.member_votes.len() - unknown, record.member_votes.len());
            }
        }
        if record.mover == UNKNOWN_MEMBER {
            c *= 0.95;
        }
        if record.seconder == UNKNOWN_MEMBER {
            c *= 0.95;
        }
        for f in record.flags.iter() {
            match f {
                RecordFlag::CoverageConflict => c *= 0.6,
                RecordFlag::RosterSizeMismatch { .. } => c *= 0.8,
                RecordFlag::UnrecognizedOutcome => {}
            }
        }
        if record.outcome.is_none() || record.has_flag(&RecordFlag::UnrecognizedOutcome) {
            c = f64::min(c, 0.2);
        }
        c.clamp(0.0, 1.0)
    }
}

impl Default for Validator {
    fn default() -> Self {
        Validator::new(ValidationWeights::DEFAULT_WEIGHTS)
    }
}

fn unresolved_voters<'r>(record: &'r VoteRecord, ctx: &ValidationContext<'_>) -> Vec<&'r str> {
    record
        .member_votes
        .keys()
        .filter(|name| {
            record.unregistered.contains(*name)
                || !ctx.registry.is_active_member(name, ctx.meeting_date)
        })
        .map(|s| s.as_str())
        .collect()
}
