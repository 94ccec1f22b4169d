// ********* Input data structures ***********

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A meeting document, as handed over by the text conversion step.
///
/// The document is never modified by the extraction.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RawDocument {
    pub identifier: String,
    pub source_city: String,
    pub meeting_date: NaiveDate,
    pub text: String,
}

/// The metadata carried into the canonical output.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct MeetingMetadata {
    pub city: String,
    pub meeting_date: NaiveDate,
}

impl From<&RawDocument> for MeetingMetadata {
    fn from(doc: &RawDocument) -> Self {
        MeetingMetadata {
            city: doc.source_city.clone(),
            meeting_date: doc.meeting_date,
        }
    }
}

// ******** Vote data structures *********

/// The result of a motion.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail,
    Tie,
    Continued,
    Withdrawn,
}

impl Outcome {
    pub fn from_label(label: &str) -> Option<Outcome> {
        match label.trim().to_lowercase().as_str() {
            "pass" => Some(Outcome::Pass),
            "fail" => Some(Outcome::Fail),
            "tie" => Some(Outcome::Tie),
            "continued" => Some(Outcome::Continued),
            "withdrawn" => Some(Outcome::Withdrawn),
            _ => None,
        }
    }
}

/// The choice recorded for a single member on a single motion.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VoteChoice {
    Aye,
    Nay,
    Abstain,
    Absent,
    Recused,
}

impl VoteChoice {
    pub const ALL: [VoteChoice; 5] = [
        VoteChoice::Aye,
        VoteChoice::Nay,
        VoteChoice::Abstain,
        VoteChoice::Absent,
        VoteChoice::Recused,
    ];

    pub fn from_label(label: &str) -> Option<VoteChoice> {
        match label.trim().to_lowercase().as_str() {
            "aye" => Some(VoteChoice::Aye),
            "nay" => Some(VoteChoice::Nay),
            "abstain" => Some(VoteChoice::Abstain),
            "absent" => Some(VoteChoice::Absent),
            "recused" => Some(VoteChoice::Recused),
            _ => None,
        }
    }
}

/// Aggregate counts for one motion.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Hash, Serialize, Deserialize)]
pub struct Tally {
    pub ayes: u32,
    pub noes: u32,
    pub abstain: u32,
    pub absent: u32,
    pub recused: u32,
}

impl Tally {
    pub fn new(ayes: u32, noes: u32, abstain: u32, absent: u32, recused: u32) -> Tally {
        Tally {
            ayes,
            noes,
            abstain,
            absent,
            recused,
        }
    }

    pub fn total(&self) -> u32 {
        self.ayes
            .saturating_add(self.noes)
            .saturating_add(self.abstain)
            .saturating_add(self.absent)
            .saturating_add(self.recused)
    }

    pub fn get(&self, choice: VoteChoice) -> u32 {
        match choice {
            VoteChoice::Aye => self.ayes,
            VoteChoice::Nay => self.noes,
            VoteChoice::Abstain => self.abstain,
            VoteChoice::Absent => self.absent,
            VoteChoice::Recused => self.recused,
        }
    }

    pub fn set(&mut self, choice: VoteChoice, count: u32) {
        match choice {
            VoteChoice::Aye => self.ayes = count,
            VoteChoice::Nay => self.noes = count,
            VoteChoice::Abstain => self.abstain = count,
            VoteChoice::Absent => self.absent = count,
            VoteChoice::Recused => self.recused = count,
        }
    }

    pub fn from_member_votes(member_votes: &BTreeMap<String, VoteChoice>) -> Tally {
        let mut tally = Tally::default();
        for choice in member_votes.values() {
            let c = tally.get(*choice);
            tally.set(*choice, c.saturating_add(1));
        }
        tally
    }
}

/// Which extraction path produced a record.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Deterministic,
    Fallback,
    Merged,
}

/// Distinguishes sequential motions taken on the same agenda item.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionType {
    Original,
    Substitute,
    Amendment,
    Reconsideration,
}

impl MotionType {
    pub fn is_original(&self) -> bool {
        *self == MotionType::Original
    }
}

impl Default for MotionType {
    fn default() -> Self {
        MotionType::Original
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct AgendaItem {
    pub item_number: String,
    pub title: String,
    pub description: String,
}

impl AgendaItem {
    pub fn new(item_number: &str, title: &str) -> AgendaItem {
        AgendaItem {
            item_number: item_number.to_string(),
            title: title.to_string(),
            description: String::new(),
        }
    }
}

/// The consent-calendar range a record was expanded from.
#[derive(Eq, PartialEq, Debug, Clone, Hash, PartialOrd, Ord)]
pub struct ItemRange {
    pub start: String,
    pub end: String,
}

impl std::fmt::Display for ItemRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Conditions noticed while building a record, kept for review.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum RecordFlag {
    UnrecognizedOutcome,
    RosterSizeMismatch { counted: u32, expected: u32 },
    CoverageConflict,
}

/// The name used for movers and seconders that could not be resolved.
pub const UNKNOWN_MEMBER: &str = "Unknown";

/// One motion and its result.
#[derive(PartialEq, Debug, Clone)]
pub struct VoteRecord {
    pub agenda_item: AgendaItem,
    // None when the outcome vocabulary was not recognized.
    pub outcome: Option<Outcome>,
    pub tally: Tally,
    pub member_votes: BTreeMap<String, VoteChoice>,
    pub motion_text: String,
    pub mover: String,
    pub seconder: String,
    pub motion_type: MotionType,
    pub provenance: Provenance,
    pub confidence: f64,
    pub consent_range: Option<ItemRange>,
    // Names kept literally in member_votes because no roster entry matched.
    pub unregistered: BTreeSet<String>,
    pub flags: Vec<RecordFlag>,
}

impl VoteRecord {
    pub fn new(agenda_item: AgendaItem, outcome: Option<Outcome>, tally: Tally) -> VoteRecord {
        VoteRecord {
            agenda_item,
            outcome,
            tally,
            member_votes: BTreeMap::new(),
            motion_text: String::new(),
            mover: UNKNOWN_MEMBER.to_string(),
            seconder: UNKNOWN_MEMBER.to_string(),
            motion_type: MotionType::Original,
            provenance: Provenance::Deterministic,
            confidence: 0.0,
            consent_range: None,
            unregistered: BTreeSet::new(),
            flags: Vec::new(),
        }
    }

    pub fn item_number(&self) -> &str {
        self.agenda_item.item_number.as_str()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            item_number: self.agenda_item.item_number.clone(),
            motion_type: self.motion_type,
        }
    }

    pub fn is_consent(&self) -> bool {
        self.consent_range.is_some()
    }

    pub fn has_flag(&self, flag: &RecordFlag) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub(crate) fn add_flag(&mut self, flag: RecordFlag) {
        if !self.has_flag(&flag) {
            self.flags.push(flag);
        }
    }
}

/// Identity of a record inside one meeting.
#[derive(Eq, PartialEq, Debug, Clone, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub item_number: String,
    pub motion_type: MotionType,
}

// ********* Configuration **********

/// The families of minute formats. Every supported city uses one of them,
/// with its own vocabulary.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum StrategyKind {
    /// Table-style roll calls: `MOTION: A SECOND: B`, `YES: 7 - ...`,
    /// `Status: 7-0-0-0 - Pass`.
    RollCall,
    /// Votes written in prose: "It was moved by ..., seconded by ..., to
    /// approve ... The motion carried 6-0."
    Narrative,
}

/// One entry of the OCR correction table. Entries are applied in order.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct OcrCorrection {
    pub pattern: String,
    pub replacement: String,
    /// When true, the pattern is matched as plain text.
    pub literal: bool,
}

/// Vote vocabulary for a city. Phrases are matched case-insensitively on
/// word boundaries.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct VoteVocabulary {
    pub outcomes: Vec<(String, Outcome)>,
    pub choice_labels: Vec<(String, VoteChoice)>,
    /// The meaning of the numbers in a `7-0-0-0` status, in order.
    pub status_order: Vec<VoteChoice>,
    pub status_label: String,
    pub consent_keywords: Vec<String>,
    /// Must capture the item number in group 1 and the title in group 2.
    pub item_heading_pattern: Option<String>,
}

impl VoteVocabulary {
    pub fn default_for(kind: StrategyKind) -> VoteVocabulary {
        let mut outcomes: Vec<(String, Outcome)> = vec![
            ("carried".to_string(), Outcome::Pass),
            ("passed".to_string(), Outcome::Pass),
            ("approved".to_string(), Outcome::Pass),
            ("adopted".to_string(), Outcome::Pass),
            ("failed".to_string(), Outcome::Fail),
            ("denied".to_string(), Outcome::Fail),
            ("defeated".to_string(), Outcome::Fail),
            ("tie vote".to_string(), Outcome::Tie),
            ("continued".to_string(), Outcome::Continued),
            ("withdrawn".to_string(), Outcome::Withdrawn),
            ("withdrew".to_string(), Outcome::Withdrawn),
        ];
        if kind == StrategyKind::RollCall {
            outcomes.push(("pass".to_string(), Outcome::Pass));
            outcomes.push(("fail".to_string(), Outcome::Fail));
            outcomes.push(("tie".to_string(), Outcome::Tie));
        }
        let choice_labels = [
            ("AYES", VoteChoice::Aye),
            ("AYE", VoteChoice::Aye),
            ("YES", VoteChoice::Aye),
            ("NOES", VoteChoice::Nay),
            ("NAYS", VoteChoice::Nay),
            ("NO", VoteChoice::Nay),
            ("ABSTAIN", VoteChoice::Abstain),
            ("ABSTAINED", VoteChoice::Abstain),
            ("ABSTENTIONS", VoteChoice::Abstain),
            ("ABSENT", VoteChoice::Absent),
            ("RECUSED", VoteChoice::Recused),
            ("RECUSE", VoteChoice::Recused),
            ("RECUSAL", VoteChoice::Recused),
        ]
        .iter()
        .map(|(l, c)| (l.to_string(), *c))
        .collect();
        VoteVocabulary {
            outcomes,
            choice_labels,
            status_order: VoteChoice::ALL.to_vec(),
            status_label: "Status".to_string(),
            consent_keywords: vec![
                "consent calendar".to_string(),
                "consent agenda".to_string(),
                "consent items".to_string(),
            ],
            item_heading_pattern: None,
        }
    }
}

/// Weights of the validation checks. Only the ratios matter.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct ValidationWeights {
    pub tally: f64,
    pub uniqueness: f64,
    pub roster: f64,
    pub required_fields: f64,
    pub coverage: f64,
    /// Upper bound of the score when uniqueness or required fields fail.
    pub critical_failure_cap: f64,
}

impl ValidationWeights {
    pub const DEFAULT_WEIGHTS: ValidationWeights = ValidationWeights {
        tally: 0.25,
        uniqueness: 0.15,
        roster: 0.2,
        required_fields: 0.2,
        coverage: 0.2,
        critical_failure_cap: 0.5,
    };
}

impl Default for ValidationWeights {
    fn default() -> Self {
        ValidationWeights::DEFAULT_WEIGHTS
    }
}

pub const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MAX_EDIT_DISTANCE: usize = 2;

/// Everything that is specific to one city, as plain data.
#[derive(PartialEq, Debug, Clone)]
pub struct CityConfig {
    pub city: String,
    pub strategy: StrategyKind,
    /// The declared size of the body. The registry's active roster takes
    /// precedence when it is not empty.
    pub roster_size: Option<u32>,
    pub vocabulary: VoteVocabulary,
    pub excluded_item_categories: Vec<String>,
    pub low_confidence_threshold: f64,
    pub ocr_corrections: Vec<OcrCorrection>,
    pub weights: ValidationWeights,
    pub max_edit_distance: usize,
}

impl CityConfig {
    pub fn new(city: &str, strategy: StrategyKind) -> CityConfig {
        CityConfig {
            city: city.to_string(),
            strategy,
            roster_size: None,
            vocabulary: VoteVocabulary::default_for(strategy),
            excluded_item_categories: vec![
                "approval of minutes".to_string(),
                "minutes of the".to_string(),
                "excused absence".to_string(),
                "excuse absence".to_string(),
            ],
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
            ocr_corrections: Vec::new(),
            weights: ValidationWeights::DEFAULT_WEIGHTS,
            max_edit_distance: DEFAULT_MAX_EDIT_DISTANCE,
        }
    }
}

/// A member of a city body, current or historical.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Member {
    pub canonical_name: String,
    pub city: String,
    pub term_start: NaiveDate,
    /// None for members still in office.
    pub term_end: Option<NaiveDate>,
    pub name_variants: Vec<String>,
}

impl Member {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        date >= self.term_start && self.term_end.map(|end| date <= end).unwrap_or(true)
    }
}

/// Splits an item number into comparable parts, so that "9" < "10" < "10.2".
pub fn item_sort_key(item_number: &str) -> Vec<ItemKeyPart> {
    let mut parts: Vec<ItemKeyPart> = Vec::new();
    let mut digits = String::new();
    let mut other = String::new();
    for c in item_number.chars() {
        if c.is_ascii_digit() {
            if !other.is_empty() {
                parts.push(ItemKeyPart::Text(std::mem::take(&mut other)));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                parts.push(ItemKeyPart::Num(digits.parse().unwrap_or(u64::MAX)));
                digits.clear();
            }
            other.push(c.to_ascii_lowercase());
        }
    }
    if !digits.is_empty() {
        parts.push(ItemKeyPart::Num(digits.parse().unwrap_or(u64::MAX)));
    }
    if !other.is_empty() {
        parts.push(ItemKeyPart::Text(other));
    }
    parts
}

#[derive(Eq, PartialEq, Debug, Clone, PartialOrd, Ord)]
pub enum ItemKeyPart {
    Num(u64),
    Text(String),
}

/// Orders records by item number, keeping the document order of sequential
/// motions on the same item.
pub fn sort_records(records: &mut [VoteRecord]) {
    records.sort_by_key(|r| item_sort_key(r.item_number()));
}
