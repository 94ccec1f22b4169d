//! Recognition of vote blocks in normalized minutes.
//!
//! Each supported city uses one of the [CityStrategy] variants, configured
//! with its own [VoteVocabulary].

mod narrative;
mod roll_call;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::prelude::*;

use crate::config::*;
use crate::errors::*;
use crate::registry::MemberRegistry;

pub use narrative::NarrativeStrategy;
pub use roll_call::RollCallStrategy;

static DEFAULT_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?P<prefix>(?i:item)[ \t]+(?:(?i:no)\.?[ \t]*)?)?(?P<num>\d+(?:\.\d+)*[A-Z]?)(?P<punct>[.):]|[ \t]*-)?[ \t]+(?P<title>\S[^\n]*)$",
    )
    .expect("heading pattern")
});

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Z][A-Z0-9 &,'/-]{3,}?)[ \t]*:?[ \t]*$").expect("section pattern")
});

static ROLL_CALL_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^roll\s+call$").expect("roll call pattern"));

static LEADING_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,3})\b\s*(?:-\s*)?").expect("leading count"));

static NAME_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(?:[,;&]|\band\b)\s*").expect("name separators"));

static SUBSTITUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsubstitute\b").expect("substitute"));
static AMENDMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bmotion\s+to\s+amend\b|\bamended\s+motion\b|\bamendment\s+to\s+the\s+motion\b|\bamend\s+the\s+motion\b",
    )
    .expect("amendment")
});
static RECONSIDERATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\breconsider(?:ation)?\b").expect("reconsideration"));

// ******** Agenda structure *********

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct AgendaEntry {
    pub item: AgendaItem,
    /// Offset of the heading line in the normalized text.
    pub offset: usize,
    /// End of the heading line.
    pub end: usize,
    pub section: Option<String>,
}

/// The agenda headings and section headers found in a document, in order.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct AgendaIndex {
    entries: Vec<AgendaEntry>,
    sections: Vec<(usize, String)>,
}

impl AgendaIndex {
    pub fn entries(&self) -> &[AgendaEntry] {
        &self.entries
    }

    /// The heading governing the given offset: the last one at or before it.
    pub fn item_at(&self, offset: usize) -> Option<&AgendaEntry> {
        self.entries.iter().rev().find(|e| e.offset <= offset)
    }

    /// The last heading in the window [from, to).
    pub fn last_heading_in(&self, from: usize, to: usize) -> Option<&AgendaEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.offset >= from && e.offset < to)
    }

    /// The title of an item, from its first heading.
    pub fn title_of(&self, item_number: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.item.item_number.eq_ignore_ascii_case(item_number))
            .map(|e| e.item.title.as_str())
    }

    pub fn section_at(&self, offset: usize) -> Option<&str> {
        self.sections
            .iter()
            .rev()
            .find(|(o, _)| *o <= offset)
            .map(|(_, s)| s.as_str())
    }

    /// The item numbers listed under the first section whose name contains
    /// one of the keywords, without duplicates.
    pub fn items_in_section(&self, keywords: &[String]) -> Vec<String> {
        let section = self.sections.iter().find(|(_, name)| {
            let lower = name.to_lowercase();
            keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
        });
        let mut res: Vec<String> = Vec::new();
        if let Some((_, name)) = section {
            for e in self.entries.iter() {
                if e.section.as_deref() == Some(name.as_str())
                    && !res.contains(&e.item.item_number)
                {
                    res.push(e.item.item_number.clone());
                }
            }
        }
        res
    }

    /// The next heading or section header strictly after the offset.
    pub fn next_boundary(&self, after: usize) -> Option<usize> {
        let e = self
            .entries
            .iter()
            .map(|e| e.offset)
            .find(|o| *o > after);
        let s = self.sections.iter().map(|(o, _)| *o).find(|o| *o > after);
        match (e, s) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

// ******** Vocabulary *********

/// A city vocabulary, compiled into regular expressions.
#[derive(Debug, Clone)]
pub struct CompiledVocabulary {
    outcome_regex: Regex,
    outcome_lookup: HashMap<String, Outcome>,
    label_regex: Regex,
    label_line: Regex,
    label_lookup: HashMap<String, VoteChoice>,
    status_order: Vec<VoteChoice>,
    status_regex: Regex,
    consent_regex: Option<Regex>,
    consent_keywords: Vec<String>,
    heading_regex: Option<Regex>,
}

fn phrase_alternation(phrases: &[String]) -> String {
    let mut sorted: Vec<&String> = phrases.iter().filter(|p| !p.trim().is_empty()).collect();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.len()));
    sorted
        .iter()
        .map(|p| {
            p.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<String>>()
                .join(r"\s+")
        })
        .collect::<Vec<String>>()
        .join("|")
}

fn phrase_key(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

fn compile(pattern: &str) -> Result<Regex, ExtractionError> {
    Regex::new(pattern).context(InvalidPatternSnafu {
        pattern: pattern.to_string(),
    })
}

impl CompiledVocabulary {
    pub fn new(vocab: &VoteVocabulary) -> Result<CompiledVocabulary, ExtractionError> {
        if vocab.outcomes.is_empty() {
            return InvalidConfigSnafu {
                message: "the outcome vocabulary is empty".to_string(),
            }
            .fail();
        }
        if vocab.choice_labels.is_empty() {
            return InvalidConfigSnafu {
                message: "the vote choice labels are empty".to_string(),
            }
            .fail();
        }
        if vocab.status_order.is_empty() {
            return InvalidConfigSnafu {
                message: "the status order is empty".to_string(),
            }
            .fail();
        }
        let outcome_phrases: Vec<String> = vocab.outcomes.iter().map(|(p, _)| p.clone()).collect();
        let outcome_regex = compile(&format!(
            r"(?i)\b(?:{})\b",
            phrase_alternation(&outcome_phrases)
        ))?;
        let outcome_lookup: HashMap<String, Outcome> = vocab
            .outcomes
            .iter()
            .map(|(p, o)| (phrase_key(p), *o))
            .collect();

        let labels: Vec<String> = vocab.choice_labels.iter().map(|(l, _)| l.clone()).collect();
        let alternation = phrase_alternation(&labels);
        let label_regex = compile(&format!(r"(?i)\b({})\s*:", alternation))?;
        let label_line = compile(&format!(r"(?i)^\s*(?:{})\s*:", alternation))?;
        let label_lookup: HashMap<String, VoteChoice> = vocab
            .choice_labels
            .iter()
            .map(|(l, c)| (phrase_key(l), *c))
            .collect();

        let status_label = vocab.status_label.trim();
        if status_label.is_empty() {
            return InvalidConfigSnafu {
                message: "the status label is empty".to_string(),
            }
            .fail();
        }
        let status_regex = compile(&format!(
            r"(?i)\b{}\s*:[ \t]*([^\n]*)",
            phrase_alternation(&[status_label.to_string()])
        ))?;

        let consent_regex = if vocab.consent_keywords.is_empty() {
            None
        } else {
            Some(compile(&format!(
                r"(?i)\b(?:{})\b",
                phrase_alternation(&vocab.consent_keywords)
            ))?)
        };

        let heading_regex = match vocab.item_heading_pattern.as_deref() {
            Some(p) => {
                let r = compile(p)?;
                if r.captures_len() < 3 {
                    return InvalidConfigSnafu {
                        message: format!(
                            "item heading pattern {:?} must capture the number and the title",
                            p
                        ),
                    }
                    .fail();
                }
                Some(r)
            }
            None => None,
        };

        Ok(CompiledVocabulary {
            outcome_regex,
            outcome_lookup,
            label_regex,
            label_line,
            label_lookup,
            status_order: vocab.status_order.clone(),
            status_regex,
            consent_regex,
            consent_keywords: vocab.consent_keywords.clone(),
            heading_regex,
        })
    }

    /// The first outcome phrase in the text, with its end offset.
    pub fn find_outcome(&self, text: &str) -> Option<(Outcome, usize)> {
        self.outcome_regex.find(text).and_then(|m| {
            self.outcome_lookup
                .get(&phrase_key(m.as_str()))
                .map(|o| (*o, m.end()))
        })
    }

    pub fn status_regex(&self) -> &Regex {
        &self.status_regex
    }

    pub fn status_order(&self) -> &[VoteChoice] {
        &self.status_order
    }

    pub fn consent_keywords(&self) -> &[String] {
        &self.consent_keywords
    }

    pub fn is_consent(&self, text: &str) -> bool {
        self.consent_regex
            .as_ref()
            .map(|r| r.is_match(text))
            .unwrap_or(false)
    }

    /// True if the line starts with a vote choice label (`AYES:`).
    pub fn is_label_line(&self, line: &str) -> bool {
        self.label_line.is_match(line)
    }

    pub fn is_heading_line(&self, line: &str) -> bool {
        self.headings(line).next().is_some()
    }

    fn headings<'t>(
        &'t self,
        text: &'t str,
    ) -> impl Iterator<Item = (usize, usize, String, String)> + 't {
        let custom = self.heading_regex.as_ref();
        let regex: &Regex = match custom {
            Some(r) => r,
            None => &DEFAULT_HEADING,
        };
        regex.captures_iter(text).filter_map(move |c| {
            let all = c.get(0)?;
            let (num, title) = if custom.is_some() {
                (c.get(1)?.as_str(), c.get(2)?.as_str())
            } else {
                let num = c.name("num")?.as_str();
                // Bare numbers at the start of a line are mostly wrapped text.
                let qualified = c.name("prefix").is_some()
                    || c.name("punct").is_some()
                    || num.contains('.');
                if !qualified {
                    return None;
                }
                (num, c.name("title")?.as_str())
            };
            Some((
                all.start(),
                all.end(),
                num.trim().to_string(),
                title.trim().to_string(),
            ))
        })
    }

    /// Finds the agenda headings and section headers of a document.
    pub fn agenda_index(&self, text: &str) -> AgendaIndex {
        let mut sections: Vec<(usize, String)> = Vec::new();
        for c in SECTION_HEADER.captures_iter(text) {
            if let (Some(all), Some(name)) = (c.get(0), c.get(1)) {
                let name = name.as_str().trim();
                if self.label_line.is_match(all.as_str())
                    || self.status_regex.is_match(all.as_str())
                    || ROLL_CALL_HEADER.is_match(name)
                {
                    continue;
                }
                sections.push((all.start(), name.to_string()));
            }
        }
        let mut entries: Vec<AgendaEntry> = Vec::new();
        for (start, end, num, title) in self.headings(text) {
            let section = sections
                .iter()
                .rev()
                .find(|(o, _)| *o <= start)
                .map(|(_, s)| s.clone());
            entries.push(AgendaEntry {
                item: AgendaItem::new(&num, &title),
                offset: start,
                end,
                section,
            });
        }
        debug!(
            "agenda_index: {} headings, {} sections",
            entries.len(),
            sections.len()
        );
        AgendaIndex { entries, sections }
    }

    /// Splits the vote choice buckets of a text: `AYES: A, B / NOES: C`.
    pub fn parse_buckets(&self, text: &str, ctx: &ParseContext<'_>) -> MemberList {
        let mut res = MemberList::default();
        let labels: Vec<(usize, usize, Option<VoteChoice>)> = self
            .label_regex
            .captures_iter(text)
            .filter_map(|c| {
                let all = c.get(0)?;
                let label = c.get(1)?;
                Some((
                    all.start(),
                    all.end(),
                    self.label_lookup.get(&phrase_key(label.as_str())).cloned(),
                ))
            })
            .collect();
        for (idx, (_, content_start, choice)) in labels.iter().enumerate() {
            let choice = match choice {
                Some(c) => *c,
                None => continue,
            };
            let content_end = labels
                .get(idx + 1)
                .map(|(s, _, _)| *s)
                .unwrap_or(text.len());
            let content = bucket_content(&text[*content_start..content_end]);
            let mut names_part = content.as_str();
            if let Some(c) = LEADING_COUNT.captures(names_part) {
                if let (Some(all), Some(n)) = (c.get(0), c.get(1)) {
                    if let Ok(count) = n.as_str().parse::<u32>() {
                        res.declared.insert(choice, count);
                    }
                    names_part = &names_part[all.end()..];
                }
            }
            for raw in NAME_SEPARATORS.split(names_part) {
                let name = raw.trim().trim_end_matches('.').trim();
                let lower = name.to_lowercase();
                if name.is_empty() || lower == "none" || lower == "n/a" || lower == "-" {
                    continue;
                }
                if name.chars().all(|c| c.is_ascii_digit()) {
                    continue;
                }
                let (key, registered) = match ctx.resolve(name) {
                    Some(canonical) => (canonical, true),
                    None => (name.to_string(), false),
                };
                if res.votes.contains_key(&key) {
                    debug!("parse_buckets: {:?} listed twice, keeping first choice", key);
                    continue;
                }
                if !registered {
                    res.unregistered.insert(key.clone());
                }
                res.votes.insert(key, choice);
            }
        }
        res
    }
}

// The names of a bucket stop at an inline separator, a blank line, or at the
// end of a line that does not end with a comma.
fn bucket_content(raw: &str) -> String {
    let raw = raw.split(" / ").next().unwrap_or("");
    let raw = raw.split("\n\n").next().unwrap_or("");
    let mut res = String::new();
    for line in raw.split('\n') {
        if !res.is_empty() {
            res.push(' ');
        }
        res.push_str(line.trim());
        if !line.trim_end().ends_with(',') {
            break;
        }
    }
    res.trim().to_string()
}

/// Which kind of motion a text describes.
pub fn detect_motion_type(text: &str) -> MotionType {
    if RECONSIDERATION.is_match(text) {
        MotionType::Reconsideration
    } else if SUBSTITUTE.is_match(text) {
        MotionType::Substitute
    } else if AMENDMENT.is_match(text) {
        MotionType::Amendment
    } else {
        MotionType::Original
    }
}

// ******** Parse results *********

/// A candidate vote block.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VoteSpan {
    pub start: usize,
    pub end: usize,
    /// Offset of the marker that anchored the block.
    pub marker: usize,
    pub text: String,
    pub item: Option<AgendaItem>,
    pub section: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedMotion {
    pub motion_text: String,
    pub mover: String,
    pub seconder: String,
    pub motion_type: MotionType,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedOutcome {
    pub outcome: Outcome,
    pub tally: Tally,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct MemberList {
    pub votes: BTreeMap<String, VoteChoice>,
    pub unregistered: BTreeSet<String>,
    /// Counts written next to a label, as in `YES: 7 - ...`.
    pub declared: BTreeMap<VoteChoice, u32>,
}

impl MemberList {
    /// The tally implied by the lists, overridden by the declared counts.
    pub fn tally(&self) -> Tally {
        let mut tally = Tally::from_member_votes(&self.votes);
        for (choice, count) in self.declared.iter() {
            tally.set(*choice, *count);
        }
        tally
    }
}

/// What the strategies need to know about the meeting.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub registry: &'a MemberRegistry,
    pub meeting_date: NaiveDate,
    /// The number of seats on the body, 0 when unknown.
    pub roster_size: u32,
}

impl<'a> ParseContext<'a> {
    /// The active roster takes precedence over the declared size.
    pub fn new(
        registry: &'a MemberRegistry,
        meeting_date: NaiveDate,
        declared_roster: Option<u32>,
    ) -> ParseContext<'a> {
        let active = registry.roster_size(meeting_date) as u32;
        let roster_size = if active > 0 {
            active
        } else {
            declared_roster.unwrap_or(0)
        };
        ParseContext {
            registry,
            meeting_date,
            roster_size,
        }
    }

    /// The canonical name for a name as written, if it resolves.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        self.registry
            .resolve_name(raw, self.meeting_date)
            .map(|m| m.canonical_name.clone())
    }

    pub fn resolve_or_unknown(&self, raw: Option<&str>) -> String {
        raw.and_then(|r| self.resolve(r))
            .unwrap_or_else(|| UNKNOWN_MEMBER.to_string())
    }
}

// ******** Strategies *********

/// The capabilities every city format provides.
pub trait CityPatternStrategy {
    fn vocabulary(&self) -> &CompiledVocabulary;

    /// The first vote block starting at or after `from`.
    fn next_block(&self, text: &str, agenda: &AgendaIndex, from: usize) -> Option<VoteSpan>;

    fn parse_motion(&self, span: &VoteSpan, ctx: &ParseContext<'_>) -> ParsedMotion;

    fn parse_outcome(
        &self,
        span: &VoteSpan,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedOutcome, ParseError>;

    fn parse_member_list(&self, span: &VoteSpan, ctx: &ParseContext<'_>) -> MemberList {
        self.vocabulary().parse_buckets(&span.text, ctx)
    }

    /// Lazily finds the vote blocks of a normalized text, in document order.
    fn detect_vote_blocks<'s, 't>(&'s self, text: &'t str) -> VoteBlocks<'s, 't, Self>
    where
        Self: Sized,
    {
        VoteBlocks {
            strategy: self,
            text,
            agenda: self.vocabulary().agenda_index(text),
            offset: 0,
        }
    }
}

/// Iterator over the vote blocks of one text.
///
/// Cloning the iterator, or calling [VoteBlocks::restart], starts the scan
/// again without recomputing the agenda.
pub struct VoteBlocks<'s, 't, S: CityPatternStrategy> {
    strategy: &'s S,
    text: &'t str,
    agenda: AgendaIndex,
    offset: usize,
}

impl<'s, 't, S: CityPatternStrategy> Clone for VoteBlocks<'s, 't, S> {
    fn clone(&self) -> Self {
        VoteBlocks {
            strategy: self.strategy,
            text: self.text,
            agenda: self.agenda.clone(),
            offset: self.offset,
        }
    }
}

impl<'s, 't, S: CityPatternStrategy> VoteBlocks<'s, 't, S> {
    pub fn agenda(&self) -> &AgendaIndex {
        &self.agenda
    }

    pub fn restart(&mut self) {
        self.offset = 0;
    }
}

impl<'s, 't, S: CityPatternStrategy> Iterator for VoteBlocks<'s, 't, S> {
    type Item = VoteSpan;

    fn next(&mut self) -> Option<VoteSpan> {
        if self.offset >= self.text.len() {
            return None;
        }
        let span = self
            .strategy
            .next_block(self.text, &self.agenda, self.offset)?;
        // Always make progress, even on a degenerate span.
        self.offset = span.end.max(span.marker + 1);
        Some(span)
    }
}

/// The closed set of supported formats.
#[derive(Debug, Clone)]
pub enum CityStrategy {
    RollCall(RollCallStrategy),
    Narrative(NarrativeStrategy),
}

impl CityStrategy {
    pub fn new(
        kind: StrategyKind,
        vocab: &VoteVocabulary,
    ) -> Result<CityStrategy, ExtractionError> {
        let compiled = CompiledVocabulary::new(vocab)?;
        Ok(match kind {
            StrategyKind::RollCall => CityStrategy::RollCall(RollCallStrategy::new(compiled)),
            StrategyKind::Narrative => CityStrategy::Narrative(NarrativeStrategy::new(compiled)),
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            CityStrategy::RollCall(_) => StrategyKind::RollCall,
            CityStrategy::Narrative(_) => StrategyKind::Narrative,
        }
    }
}

impl CityPatternStrategy for CityStrategy {
    fn vocabulary(&self) -> &CompiledVocabulary {
        match self {
            CityStrategy::RollCall(s) => s.vocabulary(),
            CityStrategy::Narrative(s) => s.vocabulary(),
        }
    }

    fn next_block(&self, text: &str, agenda: &AgendaIndex, from: usize) -> Option<VoteSpan> {
        match self {
            CityStrategy::RollCall(s) => s.next_block(text, agenda, from),
            CityStrategy::Narrative(s) => s.next_block(text, agenda, from),
        }
    }

    fn parse_motion(&self, span: &VoteSpan, ctx: &ParseContext<'_>) -> ParsedMotion {
        match self {
            CityStrategy::RollCall(s) => s.parse_motion(span, ctx),
            CityStrategy::Narrative(s) => s.parse_motion(span, ctx),
        }
    }

    fn parse_outcome(
        &self,
        span: &VoteSpan,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedOutcome, ParseError> {
        match self {
            CityStrategy::RollCall(s) => s.parse_outcome(span, ctx),
            CityStrategy::Narrative(s) => s.parse_outcome(span, ctx),
        }
    }

    fn parse_member_list(&self, span: &VoteSpan, ctx: &ParseContext<'_>) -> MemberList {
        match self {
            CityStrategy::RollCall(s) => s.parse_member_list(span, ctx),
            CityStrategy::Narrative(s) => s.parse_member_list(span, ctx),
        }
    }
}

/// A failed vote with as many ayes as noes is a tie.
pub(crate) fn settle_tie(outcome: Outcome, tally: &Tally) -> Outcome {
    if outcome == Outcome::Fail && tally.ayes > 0 && tally.ayes == tally.noes {
        Outcome::Tie
    } else {
        outcome
    }
}

pub(crate) fn unrecognized(excerpt: &str) -> ParseError {
    let excerpt: String = excerpt.trim().chars().take(80).collect();
    ParseError::UnrecognizedOutcome { excerpt }
}

// Start of the paragraph containing the offset, not before `floor`.
pub(crate) fn paragraph_start(text: &str, offset: usize, floor: usize) -> usize {
    text[..offset]
        .rfind("\n\n")
        .map(|i| i + 2)
        .unwrap_or(0)
        .max(floor)
}

// Start of the sentence containing the offset, not before `floor`. A sentence
// starts after a line break or after `.`, `!` or `?` followed by a space.
pub(crate) fn sentence_start(text: &str, offset: usize, floor: usize) -> usize {
    let bytes = text.as_bytes();
    let mut start = floor;
    let mut i = offset;
    while i > floor {
        i -= 1;
        let b = bytes[i];
        let ends_sentence = matches!(b, b'.' | b'!' | b'?')
            && bytes
                .get(i + 1)
                .map(|n| n.is_ascii_whitespace())
                .unwrap_or(false);
        if b == b'\n' || ends_sentence {
            start = i + 1;
            break;
        }
    }
    while start < offset && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    start
}

pub(crate) fn line_end(text: &str, offset: usize) -> usize {
    text[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(text.len())
}
