use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::*;
use crate::errors::Diagnostic;
use crate::validator::{ValidationContext, Validator};

// "8-12", "8 through 12" used as a single item number.
static LUMPED_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(\d+(?:\.\d+)*[A-Za-z]?)",
        r"\s*(?:-|through|thru|to)\s*",
        r"(\d+(?:\.\d+)*[A-Za-z]?)\s*$",
    ))
    .expect("lumped range")
});

#[derive(PartialEq, Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: Vec<VoteRecord>,
    pub conflicts: Vec<Diagnostic>,
}

/// Reconciles the deterministic records with the ones of a fallback
/// extractor.
///
/// The consent calendar expansion is never overridden: fallback records
/// that lump, split or merge expanded items are dropped with a conflict.
/// For other items present on both sides, the more confident record wins.
#[derive(Debug, Clone, Default)]
pub struct ResultMerger {}

type MergeKey = (String, MotionType);

fn merge_key(r: &VoteRecord) -> MergeKey {
    (r.item_number().trim().to_lowercase(), r.motion_type)
}

impl ResultMerger {
    pub fn new() -> ResultMerger {
        ResultMerger {}
    }

    pub fn merge(
        &self,
        deterministic: &[VoteRecord],
        fallback: Vec<VoteRecord>,
        validator: &Validator,
        ctx: &ValidationContext<'_>,
    ) -> MergeOutcome {
        let consent_numbers: HashSet<String> = deterministic
            .iter()
            .filter(|r| r.is_consent())
            .map(|r| r.item_number().trim().to_lowercase())
            .collect();
        let det_numbers: HashSet<String> = deterministic
            .iter()
            .map(|r| r.item_number().trim().to_lowercase())
            .collect();

        let mut conflicts: Vec<Diagnostic> = Vec::new();
        let mut candidates: Vec<VoteRecord> = Vec::new();
        let mut seen: HashSet<MergeKey> = HashSet::new();
        for mut rec in fallback {
            rec.provenance = Provenance::Fallback;
            rec.confidence = validator.record_confidence(&rec, ctx);
            if let Some(reason) = consent_conflict(&rec, &consent_numbers, &det_numbers) {
                warn!("merge: dropping fallback item {:?}: {}", rec.item_number(), reason);
                conflicts.push(Diagnostic::MergeConflict {
                    item_number: rec.item_number().to_string(),
                    reason,
                });
                continue;
            }
            if !seen.insert(merge_key(&rec)) {
                conflicts.push(Diagnostic::MergeConflict {
                    item_number: rec.item_number().to_string(),
                    reason: "the fallback returned this motion twice".to_string(),
                });
                continue;
            }
            candidates.push(rec);
        }

        // The later of two deterministic records for the same motion wins.
        let mut records: Vec<VoteRecord> = Vec::with_capacity(deterministic.len());
        let mut index: HashMap<MergeKey, usize> = HashMap::new();
        for r in deterministic {
            match index.get(&merge_key(r)) {
                Some(&i) => {
                    warn!("merge: item {:?} voted twice, keeping the last vote", r.item_number());
                    conflicts.push(Diagnostic::MergeConflict {
                        item_number: r.item_number().to_string(),
                        reason: "the motion was voted twice, the last vote is kept".to_string(),
                    });
                    records[i] = r.clone();
                }
                None => {
                    index.insert(merge_key(r), records.len());
                    records.push(r.clone());
                }
            }
        }

        let mut replaced = 0;
        let mut added = 0;
        for rec in candidates {
            match index.get(&merge_key(&rec)) {
                Some(&i) => {
                    let current = &mut records[i];
                    if !current.is_consent() && rec.confidence > current.confidence {
                        debug!(
                            "merge: item {:?} taken from the fallback ({:.3} > {:.3})",
                            rec.item_number(),
                            rec.confidence,
                            current.confidence
                        );
                        *current = rec;
                        replaced += 1;
                    }
                    current.provenance = Provenance::Merged;
                }
                None => {
                    records.push(rec);
                    added += 1;
                }
            }
        }

        for r in records.iter_mut() {
            r.confidence = validator.record_confidence(r, ctx);
        }
        sort_records(&mut records);
        info!(
            "merge: {} records, {} replaced and {} added by the fallback, {} conflicts",
            records.len(),
            replaced,
            added,
            conflicts.len()
        );
        MergeOutcome { records, conflicts }
    }
}

// Why a fallback record contradicts the consent calendar expansion, if it
// does.
fn consent_conflict(
    rec: &VoteRecord,
    consent_numbers: &HashSet<String>,
    det_numbers: &HashSet<String>,
) -> Option<String> {
    if consent_numbers.is_empty() {
        return None;
    }
    let number = rec.item_number().trim().to_lowercase();

    if let Some(c) = LUMPED_RANGE.captures(&number) {
        let lumped = ItemRange::new(&c[1], &c[2]);
        if let Ok(items) = lumped.expand() {
            if items.iter().any(|i| consent_numbers.contains(&i.to_lowercase())) {
                return Some(format!("lumps consent calendar items {} into one record", lumped));
            }
        }
    }

    if !det_numbers.contains(&number) {
        if let Some((parent, _)) = number.split_once('.') {
            if consent_numbers.contains(parent) {
                return Some(format!("splits consent calendar item {}", parent));
            }
        }
        let prefix = format!("{}.", number);
        if consent_numbers.iter().any(|n| n.starts_with(&prefix)) {
            return Some(format!("merges the consent calendar items under {}", number));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemberRegistry;
    use chrono::NaiveDate;

    fn consent(item: &str) -> VoteRecord {
        let mut r = VoteRecord::new(
            AgendaItem::new(item, ""),
            Some(Outcome::Pass),
            Tally::new(6, 0, 0, 0, 0),
        );
        r.consent_range = Some(ItemRange {
            start: "8".to_string(),
            end: "12".to_string(),
        });
        r.mover = "Ann Smith".to_string();
        r.seconder = "Bo Jones".to_string();
        r
    }

    fn standalone(item: &str, outcome: Option<Outcome>, mover: &str) -> VoteRecord {
        let mut r = VoteRecord::new(AgendaItem::new(item, ""), outcome, Tally::new(5, 1, 0, 0, 0));
        r.mover = mover.to_string();
        r.seconder = "Bo Jones".to_string();
        r
    }

    fn merge(det: &[VoteRecord], fb: Vec<VoteRecord>) -> MergeOutcome {
        let registry = MemberRegistry::empty("testville");
        let ctx = ValidationContext {
            registry: &registry,
            meeting_date: NaiveDate::from_ymd_opt(2023, 3, 7).unwrap(),
            roster_size: 0,
            marker_count: det.len(),
            consent_coverage: &[],
        };
        let v = Validator::default();
        let mut det = det.to_vec();
        for r in det.iter_mut() {
            r.confidence = v.record_confidence(r, &ctx);
        }
        ResultMerger::new().merge(&det, fb, &v, &ctx)
    }

    #[test]
    fn fallback_fills_a_failed_item() {
        let det = vec![
            standalone("1", Some(Outcome::Pass), "Ann Smith"),
            standalone("2", None, "Ann Smith"),
        ];
        let fb = vec![standalone("2", Some(Outcome::Fail), "Ann Smith")];
        let out = merge(&det, fb);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].provenance, Provenance::Deterministic);
        assert_eq!(out.records[1].outcome, Some(Outcome::Fail));
        assert_eq!(out.records[1].provenance, Provenance::Merged);
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn deterministic_wins_ties() {
        let det = vec![standalone("1", Some(Outcome::Pass), "Ann Smith")];
        let fb = vec![standalone("1", Some(Outcome::Fail), "Ann Smith")];
        let out = merge(&det, fb);
        assert_eq!(out.records[0].outcome, Some(Outcome::Pass));
        assert_eq!(out.records[0].provenance, Provenance::Merged);
    }

    #[test]
    fn fallback_only_items_are_added() {
        let det = vec![standalone("1", Some(Outcome::Pass), "Ann Smith")];
        let fb = vec![standalone("3", Some(Outcome::Pass), UNKNOWN_MEMBER)];
        let out = merge(&det, fb);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[1].provenance, Provenance::Fallback);
        assert!(out.records[1].confidence < 1.0);
    }

    #[test]
    fn consent_expansion_is_kept() {
        let det: Vec<VoteRecord> = ["8", "9", "11", "12"].iter().map(|n| consent(n)).collect();
        let mut lumped = standalone("8-12", Some(Outcome::Pass), "Ann Smith");
        lumped.tally = Tally::new(6, 0, 0, 0, 0);
        let split = standalone("9.1", Some(Outcome::Pass), "Ann Smith");
        let mut better = standalone("11", Some(Outcome::Fail), "Ann Smith");
        better.confidence = 1.0;
        let out = merge(&det, vec![lumped, split, better]);
        let numbers: Vec<&str> = out.records.iter().map(|r| r.item_number()).collect();
        assert_eq!(numbers, vec!["8", "9", "11", "12"]);
        assert!(out.records.iter().all(|r| r.outcome == Some(Outcome::Pass)));
        assert_eq!(out.conflicts.len(), 2);
        assert!(matches!(
            &out.conflicts[0],
            Diagnostic::MergeConflict { item_number, .. } if item_number == "8-12"
        ));
    }

    #[test]
    fn merged_sub_items_are_rejected() {
        let mut det: Vec<VoteRecord> = ["7.1", "7.2"].iter().map(|n| consent(n)).collect();
        det.push(standalone("6", Some(Outcome::Pass), "Ann Smith"));
        let out = merge(&det, vec![standalone("7", Some(Outcome::Pass), "Ann Smith")]);
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.conflicts.len(), 1);
    }

    #[test]
    fn repeated_deterministic_motion_keeps_the_last() {
        let det = vec![
            standalone("26", Some(Outcome::Fail), "Phil Bacerra"),
            standalone("26", Some(Outcome::Pass), "Thai Viet Phan"),
        ];
        let fb = vec![standalone("26", Some(Outcome::Fail), UNKNOWN_MEMBER)];
        let out = merge(&det, fb);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].outcome, Some(Outcome::Pass));
        assert_eq!(out.records[0].mover, "Thai Viet Phan");
        assert!(matches!(
            out.conflicts.as_slice(),
            [Diagnostic::MergeConflict { item_number, .. }] if item_number == "26"
        ));
    }
}
