use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::*;
use crate::errors::ParseError;
use crate::strategy::{
    detect_motion_type, sentence_start, settle_tie, unrecognized, AgendaIndex,
    CityPatternStrategy, CompiledVocabulary, ParseContext, ParsedMotion, ParsedOutcome, VoteSpan,
};

// The motion sentence that opens most votes.
static MOTION_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bit\s+was\s+moved\b|\bmoved\s+by\b|\bmotion\s+(?:was\s+made\s+)?by\b|\bmoved\s+and\s+seconded\b|\bmoved\s*,\s*seconded\b|\bmoved\s+to\b",
    )
    .expect("motion anchor")
});

// Votes recorded without a motion sentence. A roll call line only counts
// when it carries vote choices, `ROLL CALL: Present: ...` is attendance.
static RESULT_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?im)\bmotion\s+(?:was\s+)?",
        r"(?:carried|passed|failed|adopted|approved|denied|defeated)\b",
        r"|^[ \t]*ayes[ \t]*:",
        r"|^[ \t]*roll\s+call(?:\s+vote)?[ \t]*:[ \t]*(?:ayes?|noes|yes|nays?)\b",
    ))
    .expect("result anchor")
});

static MOVED_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:moved|motion(?:\s+was\s+made)?)\s+by\s+([^,;\n]+?)\s*(?:,|;|\n|\band\s+seconded\b|\bseconded\b|\bto\s|$)",
    )
    .expect("moved by")
});

static NAME_MOVED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Za-z'\-]+)\s+moved\b").expect("name moved"));

static SECONDED_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bseconded\s+by\s+([^,;.\n]+?)\s*(?:,|;|\.|\n|\bto\s|\band\s|$)")
        .expect("seconded by")
});

// The object of the motion: "..., to approve the agreement."
static MOTION_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)(?i:\b(?:(?:moved|motion)\s+by\s+[^,.]+?|seconded\s+by\s+[^,.]+?,|moved|seconded))\s*,?\s*(?i:to)\s+(.+?)(?:\.\s+[A-Z]|\.\s*$|\n\s*\n|$)",
    )
    .expect("motion text")
});

static COUNTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}(?:\s*(?:-|to)\s*\d{1,2}){1,4})\b").expect("counts")
});

static COUNT_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:-|to)\s*").expect("count separator"));

static UNANIMOUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bunanimous(?:ly)?\b").expect("unanimous"));

/// Minutes where votes are written in prose:
///
/// ```text
/// It was moved by Councilmember Garcia, seconded by Councilmember Lee, to
/// approve the agreement. The motion carried by the following vote:
/// AYES: Smith, Jones, Garcia, Lee, Kim
/// NOES: Brown
/// ABSENT: Nguyen
/// ```
#[derive(Debug, Clone)]
pub struct NarrativeStrategy {
    vocab: CompiledVocabulary,
}

impl NarrativeStrategy {
    pub fn new(vocab: CompiledVocabulary) -> NarrativeStrategy {
        NarrativeStrategy { vocab }
    }

    fn span(
        &self,
        text: &str,
        agenda: &AgendaIndex,
        start: usize,
        end: usize,
        marker: usize,
    ) -> VoteSpan {
        let item = agenda.item_at(marker).map(|e| e.item.clone());
        debug!(
            "next_block: block {}..{} for item {:?}",
            start,
            end,
            item.as_ref().map(|i| i.item_number.as_str())
        );
        VoteSpan {
            start,
            end,
            marker,
            text: text[start..end].to_string(),
            item,
            section: agenda.section_at(marker).map(|s| s.to_string()),
        }
    }

    // The motion object and the offset where the result part of the block
    // begins.
    fn motion_parts<'a>(&self, text: &'a str) -> (Option<&'a str>, usize) {
        match MOTION_TEXT.captures(text).and_then(|c| c.get(1)) {
            Some(m) => (Some(m.as_str()), m.end()),
            None => (None, 0),
        }
    }
}

impl CityPatternStrategy for NarrativeStrategy {
    fn vocabulary(&self) -> &CompiledVocabulary {
        &self.vocab
    }

    fn next_block(&self, text: &str, agenda: &AgendaIndex, from: usize) -> Option<VoteSpan> {
        let motion = MOTION_ANCHOR
            .find_at(text, from)
            .map(|m| (sentence_start(text, m.start(), from), m.end()));
        let gap_end = motion.map(|(s, _)| s).unwrap_or(text.len());

        // A result phrase before the next motion sentence is a vote of its own.
        if let Some(m) = RESULT_ANCHOR.find_at(text, from) {
            if m.start() < gap_end {
                let start = sentence_start(text, m.start(), from);
                let end = agenda
                    .next_boundary(m.start())
                    .unwrap_or(text.len())
                    .min(gap_end)
                    .max(m.end());
                return Some(self.span(text, agenda, start, end, m.start()));
            }
        }

        let (start, anchor_end) = motion?;
        let next_motion = MOTION_ANCHOR
            .find_at(text, anchor_end)
            .map(|m| sentence_start(text, m.start(), anchor_end));
        let end = [next_motion, agenda.next_boundary(start)]
            .iter()
            .flatten()
            .cloned()
            .min()
            .unwrap_or(text.len())
            .max(anchor_end);
        Some(self.span(text, agenda, start, end, start))
    }

    fn parse_motion(&self, span: &VoteSpan, ctx: &ParseContext<'_>) -> ParsedMotion {
        let text = span.text.as_str();
        let mover = MOVED_BY
            .captures(text)
            .or_else(|| NAME_MOVED.captures(text))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim());
        let seconder = SECONDED_BY
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim());

        let (object, region_start) = self.motion_parts(text);
        let mut motion_text = object
            .map(|o| o.split_whitespace().collect::<Vec<&str>>().join(" "))
            .unwrap_or_default();
        if motion_text.is_empty() {
            if let Some(item) = span.item.as_ref() {
                motion_text = item.title.clone();
            }
        }
        let sentence = if region_start > 0 {
            &text[..region_start]
        } else {
            text
        };
        ParsedMotion {
            motion_text,
            mover: ctx.resolve_or_unknown(mover),
            seconder: ctx.resolve_or_unknown(seconder),
            motion_type: detect_motion_type(sentence),
        }
    }

    fn parse_outcome(
        &self,
        span: &VoteSpan,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedOutcome, ParseError> {
        let (_, region_start) = self.motion_parts(&span.text);
        let region = &span.text[region_start..];
        let (outcome, _) = self
            .vocab
            .find_outcome(region)
            .ok_or_else(|| unrecognized(region))?;

        let members = self.parse_member_list(span, ctx);
        let mut tally = members.tally();
        if let Some(m) = COUNTS.captures(region).and_then(|c| c.get(1)) {
            let numbers: Vec<u32> = COUNT_SEPARATOR
                .split(m.as_str())
                .filter_map(|n| n.trim().parse::<u32>().ok())
                .collect();
            for (choice, count) in self.vocab.status_order().iter().zip(numbers.iter()) {
                tally.set(*choice, *count);
            }
        } else if UNANIMOUS.is_match(region) && tally.ayes == 0 && ctx.roster_size > 0 {
            let others = tally.abstain + tally.absent + tally.recused;
            tally.ayes = ctx.roster_size.saturating_sub(others);
            tally.noes = 0;
        }
        Ok(ParsedOutcome {
            outcome: settle_tie(outcome, &tally),
            tally,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemberRegistry;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn registry() -> MemberRegistry {
        let members = [
            "Ann Smith",
            "Bo Jones",
            "Cy Garcia",
            "Di Lee",
            "Ed Kim",
            "Flo Brown",
            "Gil Nguyen",
        ]
        .iter()
        .map(|n| Member {
            canonical_name: n.to_string(),
            city: "testville".to_string(),
            term_start: date("2020-01-01"),
            term_end: None,
            name_variants: Vec::new(),
        })
        .collect();
        MemberRegistry::new("testville", members, 2)
    }

    fn strategy() -> NarrativeStrategy {
        NarrativeStrategy::new(
            CompiledVocabulary::new(&VoteVocabulary::default_for(StrategyKind::Narrative))
                .unwrap(),
        )
    }

    const MINUTES: &str = "14. Agreement with Acme Corp.\nStaff presented the item. It was moved by Councilmember Garcia, seconded by Councilmember Lee, to approve the agreement. The motion carried by the following vote:\nAYES: Smith, Jones, Garcia, Lee, Kim\nNOES: Brown\nABSENT: Nguyen\n\n15. Parking rates\nCouncilmember Kim moved to continue the item to June 4. The motion carried unanimously.\n\n16. Library hours\nThe motion failed 3-3.";

    #[test]
    fn detects_motion_sentences_and_results() {
        let s = strategy();
        let spans: Vec<VoteSpan> = s.detect_vote_blocks(MINUTES).collect();
        assert_eq!(spans.len(), 3);
        assert!(spans[0].text.starts_with("It was moved by"));
        assert!(spans[0].text.contains("ABSENT: Nguyen"));
        assert!(!spans[0].text.contains("15. Parking"));
        assert!(spans[1].text.starts_with("Councilmember Kim moved"));
        assert_eq!(spans[2].text, "The motion failed 3-3.");
        let items: Vec<&str> = spans
            .iter()
            .map(|sp| sp.item.as_ref().unwrap().item_number.as_str())
            .collect();
        assert_eq!(items, vec!["14", "15", "16"]);
    }

    #[test]
    fn parses_motion_sentence() {
        let s = strategy();
        let r = registry();
        let ctx = ParseContext::new(&r, date("2023-03-07"), None);
        let spans: Vec<VoteSpan> = s.detect_vote_blocks(MINUTES).collect();

        let m = s.parse_motion(&spans[0], &ctx);
        assert_eq!(m.mover, "Cy Garcia");
        assert_eq!(m.seconder, "Di Lee");
        assert_eq!(m.motion_text, "approve the agreement");
        assert_eq!(m.motion_type, MotionType::Original);

        let m = s.parse_motion(&spans[1], &ctx);
        assert_eq!(m.mover, "Ed Kim");
        assert_eq!(m.seconder, UNKNOWN_MEMBER);
        assert_eq!(m.motion_text, "continue the item to June 4");

        let m = s.parse_motion(&spans[2], &ctx);
        assert_eq!(m.mover, UNKNOWN_MEMBER);
        assert_eq!(m.motion_text, "Library hours");
    }

    #[test]
    fn outcome_from_lists_counts_and_unanimity() {
        let s = strategy();
        let r = registry();
        let ctx = ParseContext::new(&r, date("2023-03-07"), None);
        let spans: Vec<VoteSpan> = s.detect_vote_blocks(MINUTES).collect();

        let o = s.parse_outcome(&spans[0], &ctx).unwrap();
        assert_eq!(o.outcome, Outcome::Pass);
        assert_eq!(o.tally, Tally::new(5, 1, 0, 1, 0));

        let o = s.parse_outcome(&spans[1], &ctx).unwrap();
        assert_eq!(o.outcome, Outcome::Pass);
        assert_eq!(o.tally, Tally::new(7, 0, 0, 0, 0));

        let o = s.parse_outcome(&spans[2], &ctx).unwrap();
        assert_eq!(o.outcome, Outcome::Tie);
        assert_eq!(o.tally, Tally::new(3, 3, 0, 0, 0));
    }

    #[test]
    fn attendance_roll_call_is_not_a_vote() {
        let s = strategy();
        let r = registry();
        let ctx = ParseContext::new(&r, date("2023-03-07"), None);
        let text = "ROLL CALL: Present: Smith, Jones, Garcia, Lee, Kim, Brown, Nguyen\n\n14. Agreement with Acme Corp.\nIt was moved by Councilmember Garcia, seconded by Councilmember Lee, to approve the agreement. The motion carried by the following vote:\nAYES: Smith, Jones, Garcia, Lee, Kim, Brown, Nguyen";
        let spans: Vec<VoteSpan> = s.detect_vote_blocks(text).collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].item.as_ref().unwrap().item_number, "14");
        assert!(spans[0].text.starts_with("It was moved by"));
        let o = s.parse_outcome(&spans[0], &ctx).unwrap();
        assert_eq!(o.outcome, Outcome::Pass);
        assert_eq!(o.tally.ayes, 7);

        let text = "16. Library hours\nROLL CALL: AYES: Smith, Jones, Garcia, Lee. NOES: Kim, Brown, Nguyen. The motion carried.";
        let spans: Vec<VoteSpan> = s.detect_vote_blocks(text).collect();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].text.starts_with("ROLL CALL: AYES"));
    }

    #[test]
    fn missing_result_is_a_parse_error() {
        let s = strategy();
        let r = registry();
        let ctx = ParseContext::new(&r, date("2023-03-07"), None);
        let text = "It was moved by Smith, seconded by Jones, to refer the item to committee.";
        let span = s.detect_vote_blocks(text).next().unwrap();
        assert!(matches!(
            s.parse_outcome(&span, &ctx),
            Err(ParseError::UnrecognizedOutcome { .. })
        ));
    }
}
