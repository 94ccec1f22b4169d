use std::collections::BTreeSet;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::*;
use crate::errors::*;
use crate::strategy::AgendaIndex;

// A range is never larger than an agenda.
const MAX_RANGE_SIZE: usize = 500;

static RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:item\s+nos?\.?|items?|nos?\.?)\s*(\d+(?:\.\d+)*[A-Za-z]?)\s*(?:through|thru|to|-)\s*(?:items?\s*)?(?:nos?\.?\s*)?(\d+(?:\.\d+)*[A-Za-z]?)\b",
    )
    .expect("range pattern")
});

static EXCEPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:with\s+the\s+exception\s+of|except(?:\s+for)?|excluding|other\s+than)\b")
        .expect("exception pattern")
});

static SINGLE_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bitem\s*(?:no\.?\s*)?\d+(?:\.\d+)*[A-Za-z]?\b").expect("single item")
});

static ITEM_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)*[A-Za-z]?\b").expect("item number"));

static LETTER_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)*)([A-Za-z])$").expect("letter suffix"));

impl ItemRange {
    pub fn new(start: &str, end: &str) -> ItemRange {
        ItemRange {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// The item numbers covered by the range, in order.
    ///
    /// Supported: integers (`8` to `12`), dotted sub-items with a common
    /// prefix (`7.1` to `7.5`) and letter suffixes (`5A` to `5D`).
    pub fn expand(&self) -> Result<Vec<String>, ParseError> {
        let invalid = || ParseError::InvalidRange {
            start: self.start.clone(),
            end: self.end.clone(),
        };
        let (start, end) = (self.start.trim(), self.end.trim());

        if let (Ok(a), Ok(b)) = (start.parse::<u64>(), end.parse::<u64>()) {
            if a > b || (b - a) as usize >= MAX_RANGE_SIZE {
                return Err(invalid());
            }
            return Ok((a..=b).map(|n| n.to_string()).collect());
        }

        if let (Some((pa, la)), Some((pb, lb))) = (start.rsplit_once('.'), end.rsplit_once('.')) {
            if pa == pb {
                if let (Ok(a), Ok(b)) = (la.parse::<u64>(), lb.parse::<u64>()) {
                    if a > b || (b - a) as usize >= MAX_RANGE_SIZE {
                        return Err(invalid());
                    }
                    return Ok((a..=b).map(|n| format!("{}.{}", pa, n)).collect());
                }
            }
        }

        if let (Some(ca), Some(cb)) = (LETTER_SUFFIX.captures(start), LETTER_SUFFIX.captures(end)) {
            let (pa, pb) = (&ca[1], &cb[1]);
            let la = ca[2].chars().next().ok_or_else(invalid)?;
            let lb = cb[2].chars().next().ok_or_else(invalid)?;
            if pa == pb && la.is_ascii_uppercase() == lb.is_ascii_uppercase() && la <= lb {
                return Ok((la..=lb).map(|l| format!("{}{}", pa, l)).collect());
            }
        }
        Err(invalid())
    }

    pub fn contains(&self, item_number: &str) -> bool {
        self.expand()
            .map(|items| items.iter().any(|i| i.eq_ignore_ascii_case(item_number)))
            .unwrap_or(false)
    }
}

/// One consent calendar motion, with the items it covers.
#[derive(PartialEq, Debug, Clone)]
pub struct ConsentCalendarVote {
    /// The parsed motion. Its agenda item and member votes are not used.
    pub motion: VoteRecord,
    pub range: ItemRange,
    /// Every item of the range, in order.
    pub covered: Vec<String>,
    /// Items pulled from the calendar, all within the range.
    pub exceptions: BTreeSet<String>,
}

impl ConsentCalendarVote {
    /// Builds the vote, dropping the exceptions that are outside the covered
    /// items. The dropped exceptions are returned.
    pub fn new(
        motion: VoteRecord,
        range: ItemRange,
        covered: Vec<String>,
        exceptions: &[String],
    ) -> (ConsentCalendarVote, Vec<String>) {
        let mut kept: BTreeSet<String> = BTreeSet::new();
        let mut dropped: Vec<String> = Vec::new();
        for e in exceptions.iter() {
            match covered.iter().find(|c| c.eq_ignore_ascii_case(e)) {
                Some(c) => {
                    kept.insert(c.clone());
                }
                None => {
                    if !dropped.contains(e) {
                        dropped.push(e.clone());
                    }
                }
            }
        }
        if !dropped.is_empty() {
            warn!(
                "ConsentCalendarVote::new: exceptions {:?} are outside the range {}",
                dropped, range
            );
        }
        (
            ConsentCalendarVote {
                motion,
                range,
                covered,
                exceptions: kept,
            },
            dropped,
        )
    }

    /// Reads the range and the exceptions of a consent motion.
    ///
    /// Without an explicit range, the motion covers the items listed under
    /// the consent section of the agenda. Returns None when the motion names a
    /// single item, or when nothing tells which items are covered.
    pub fn parse(
        motion: VoteRecord,
        text: &str,
        agenda: &AgendaIndex,
        consent_keywords: &[String],
    ) -> Result<Option<(ConsentCalendarVote, Vec<String>)>, ParseError> {
        let (covering, exception_part) = match EXCEPTION.find(text) {
            Some(m) => (&text[..m.start()], Some(&text[m.end()..])),
            None => (text, None),
        };
        let exceptions: Vec<String> = exception_part
            .map(|p| {
                ITEM_NUMBER
                    .find_iter(p)
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let (range, covered) = match RANGE.captures(covering) {
            Some(c) => {
                let range = ItemRange::new(&c[1], &c[2]);
                let covered = range.expand()?;
                (range, covered)
            }
            None => {
                if SINGLE_ITEM.is_match(covering) {
                    debug!("ConsentCalendarVote::parse: single item motion {:?}", covering);
                    return Ok(None);
                }
                let covered = agenda.items_in_section(consent_keywords);
                match (covered.first(), covered.last()) {
                    (Some(first), Some(last)) => (ItemRange::new(first, last), covered.clone()),
                    _ => return Ok(None),
                }
            }
        };
        Ok(Some(ConsentCalendarVote::new(
            motion,
            range,
            covered,
            &exceptions,
        )))
    }
}

/// The result of one expansion.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct ConsentExpansion {
    pub records: Vec<VoteRecord>,
    /// Items left out because they were pulled from the calendar.
    pub pulled: Vec<String>,
    /// Items left out because of their category.
    pub excluded: Vec<String>,
}

/// Turns a consent calendar vote into one record per covered item.
#[derive(Debug, Clone)]
pub struct ConsentCalendarExpander {
    excluded_categories: Vec<String>,
}

impl ConsentCalendarExpander {
    pub fn new(excluded_categories: &[String]) -> ConsentCalendarExpander {
        ConsentCalendarExpander {
            excluded_categories: excluded_categories
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    fn is_excluded(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.excluded_categories.iter().any(|c| title.contains(c))
    }

    pub fn expand(&self, vote: &ConsentCalendarVote, agenda: &AgendaIndex) -> ConsentExpansion {
        let mut res = ConsentExpansion::default();
        for number in vote.covered.iter() {
            if vote.exceptions.contains(number) {
                res.pulled.push(number.clone());
                continue;
            }
            let title = agenda.title_of(number).unwrap_or("");
            if self.is_excluded(title) {
                debug!("expand: item {} ({:?}) is excluded", number, title);
                res.excluded.push(number.clone());
                continue;
            }
            let mut record = vote.motion.clone();
            record.agenda_item = AgendaItem::new(number, title);
            record.member_votes.clear();
            record.unregistered.clear();
            record.consent_range = Some(vote.range.clone());
            res.records.push(record);
        }
        debug!(
            "expand: range {} gave {} records, pulled {:?}, excluded {:?}",
            vote.range,
            res.records.len(),
            res.pulled,
            res.excluded
        );
        res
    }
}
