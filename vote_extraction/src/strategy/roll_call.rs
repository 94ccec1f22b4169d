use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::*;
use crate::errors::ParseError;
use crate::strategy::{
    detect_motion_type, line_end, paragraph_start, settle_tie, unrecognized, AgendaIndex,
    CityPatternStrategy, CompiledVocabulary, ParseContext, ParsedMotion, ParsedOutcome, VoteSpan,
};

static MOVER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)\bmotion(?:[ \t]+by)?[ \t]*:[ \t]*([^\n/]+?)[ \t]*(?:\bsecond(?:ed)?(?:[ \t]+by)?[ \t]*:|/|$)",
    )
    .expect("mover pattern")
});

static SECONDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)\bsecond(?:ed)?(?:[ \t]+by)?[ \t]*:[ \t]*([^\n/]+?)[ \t]*(?:/|$)")
        .expect("seconder pattern")
});

// `7-0-0-0 - Pass`: the counts are optional. Longer digit runs are OCR noise.
static STATUS_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d{1,3}\b(?:\s*-\s*\d{1,3}\b)*)\s*(?:-\s*)?)?(.*)$")
        .expect("status content")
});

static RECOMMENDED_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^recommended\s+action\s*:\s*").expect("recommended action"));

/// Table-style minutes, where each vote ends with a status line:
///
/// ```text
/// 26. Approve Agreement with Acme
/// MOTION: Penaloza SECOND: Phan
/// YES: 7 - Penaloza, Phan, Lopez, Bacerra, Hernandez, Mendoza, Sarmiento / NO: 0 / Status: 7-0-0-0 - Pass
/// ```
#[derive(Debug, Clone)]
pub struct RollCallStrategy {
    vocab: CompiledVocabulary,
}

impl RollCallStrategy {
    pub fn new(vocab: CompiledVocabulary) -> RollCallStrategy {
        RollCallStrategy { vocab }
    }

    // Lines and inline segments of a block.
    fn segments<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.split('\n')
            .flat_map(|l| l.split(" / "))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn is_structural(&self, segment: &str) -> bool {
        self.vocab.is_heading_line(segment)
            || self.vocab.is_label_line(segment)
            || self.vocab.status_regex().is_match(segment)
            || MOVER.is_match(segment)
            || SECONDER.is_match(segment)
    }
}

impl CityPatternStrategy for RollCallStrategy {
    fn vocabulary(&self) -> &CompiledVocabulary {
        &self.vocab
    }

    fn next_block(&self, text: &str, agenda: &AgendaIndex, from: usize) -> Option<VoteSpan> {
        let m = self.vocab.status_regex().find_at(text, from)?;
        let marker = m.start();
        let end = line_end(text, marker);
        // The block starts at the item heading when it is within reach,
        // otherwise at the paragraph of the status line.
        let start = match agenda.last_heading_in(from, marker) {
            Some(h) => h.offset,
            None => paragraph_start(text, marker, from),
        };
        let item = agenda.item_at(marker).map(|e| e.item.clone());
        debug!(
            "next_block: status at {} for item {:?}",
            marker,
            item.as_ref().map(|i| i.item_number.as_str())
        );
        Some(VoteSpan {
            start,
            end,
            marker,
            text: text[start..end].to_string(),
            item,
            section: agenda.section_at(marker).map(|s| s.to_string()),
        })
    }

    fn parse_motion(&self, span: &VoteSpan, ctx: &ParseContext<'_>) -> ParsedMotion {
        let mover = MOVER
            .captures(&span.text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim());
        let seconder = SECONDER
            .captures(&span.text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim());

        let segments = self.segments(&span.text);
        let residue: Vec<&str> = segments
            .iter()
            .cloned()
            .filter(|s| !self.is_structural(s))
            .collect();
        let mut motion_text = RECOMMENDED_ACTION
            .replace(&residue.join(" "), "")
            .trim()
            .to_string();
        if motion_text.is_empty() {
            if let Some(item) = span.item.as_ref() {
                motion_text = item.title.clone();
            }
        }

        let non_heading: Vec<&str> = segments
            .iter()
            .cloned()
            .filter(|s| !self.vocab.is_heading_line(s))
            .collect();
        ParsedMotion {
            motion_text,
            mover: ctx.resolve_or_unknown(mover),
            seconder: ctx.resolve_or_unknown(seconder),
            motion_type: detect_motion_type(&non_heading.join("\n")),
        }
    }

    fn parse_outcome(
        &self,
        span: &VoteSpan,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedOutcome, ParseError> {
        let content = self
            .vocab
            .status_regex()
            .captures(&span.text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| unrecognized(&span.text))?;
        let content = content.split(" / ").next().unwrap_or("").trim();
        let (numbers, rest) = match STATUS_CONTENT.captures(content) {
            Some(c) => {
                let numbers: Vec<u32> = c
                    .get(1)
                    .map(|m| {
                        m.as_str()
                            .split('-')
                            .filter_map(|n| n.trim().parse::<u32>().ok())
                            .collect()
                    })
                    .unwrap_or_default();
                (numbers, c.get(2).map(|m| m.as_str()).unwrap_or(""))
            }
            None => (Vec::new(), content),
        };
        let (outcome, _) = self
            .vocab
            .find_outcome(rest)
            .ok_or_else(|| unrecognized(content))?;

        // The status numbers are the most reliable source, then the counts
        // written next to the labels, then the names.
        let mut tally = self.parse_member_list(span, ctx).tally();
        for (choice, count) in self.vocab.status_order().iter().zip(numbers.iter()) {
            tally.set(*choice, *count);
        }
        Ok(ParsedOutcome {
            outcome: settle_tie(outcome, &tally),
            tally,
        })
    }
}
