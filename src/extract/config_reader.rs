use std::fs;

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use vote_extraction::*;

use crate::extract::*;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutcomePhrase {
    pub phrase: String,
    pub outcome: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceLabel {
    pub label: String,
    pub choice: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct VocabularySettings {
    pub outcomes: Option<Vec<OutcomePhrase>>,
    #[serde(rename = "choiceLabels")]
    pub choice_labels: Option<Vec<ChoiceLabel>>,
    #[serde(rename = "statusOrder")]
    pub status_order: Option<Vec<String>>,
    #[serde(rename = "statusLabel")]
    pub status_label: Option<String>,
    #[serde(rename = "consentKeywords")]
    pub consent_keywords: Option<Vec<String>>,
    #[serde(rename = "itemHeadingPattern")]
    pub item_heading_pattern: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OcrCorrectionSettings {
    pub pattern: String,
    pub replacement: String,
    pub literal: Option<bool>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct WeightSettings {
    pub tally: Option<f64>,
    pub uniqueness: Option<f64>,
    pub roster: Option<f64>,
    #[serde(rename = "requiredFields")]
    pub required_fields: Option<f64>,
    pub coverage: Option<f64>,
    #[serde(rename = "criticalFailureCap")]
    pub critical_failure_cap: Option<f64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct MemberSettings {
    pub name: String,
    #[serde(rename = "termStart")]
    pub term_start: String,
    #[serde(rename = "termEnd")]
    pub term_end: Option<String>,
    pub variants: Option<Vec<String>>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CityConfigFile {
    pub city: String,
    pub strategy: String,
    #[serde(rename = "rosterSize")]
    pub roster_size: Option<u32>,
    #[serde(rename = "lowConfidenceThreshold")]
    pub low_confidence_threshold: Option<f64>,
    #[serde(rename = "maxEditDistance")]
    pub max_edit_distance: Option<usize>,
    #[serde(rename = "excludedItemCategories")]
    pub excluded_item_categories: Option<Vec<String>>,
    #[serde(rename = "ocrCorrections")]
    pub ocr_corrections: Option<Vec<OcrCorrectionSettings>>,
    pub vocabulary: Option<VocabularySettings>,
    pub weights: Option<WeightSettings>,
    pub members: Option<Vec<MemberSettings>>,
}

pub fn read_city_config(path: &str) -> BExtractResult<CityConfigFile> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let config: CityConfigFile =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_city_config: {:?}", config);
    Ok(config)
}

pub fn parse_date(value: &str) -> ExtractResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").context(ParsingDateSnafu { value })
}

fn strategy_kind(s: &str) -> ExtractResult<StrategyKind> {
    match s {
        "rollCall" => Ok(StrategyKind::RollCall),
        "narrative" => Ok(StrategyKind::Narrative),
        _ => whatever!("unknown strategy: {}", s),
    }
}

fn outcome(s: &str) -> ExtractResult<Outcome> {
    match Outcome::from_label(s) {
        Some(o) => Ok(o),
        None => whatever!("unknown outcome: {}", s),
    }
}

fn vote_choice(s: &str) -> ExtractResult<VoteChoice> {
    match VoteChoice::from_label(s) {
        Some(c) => Ok(c),
        None => whatever!("unknown vote choice: {}", s),
    }
}

fn apply_vocabulary(
    vocabulary: &mut VoteVocabulary,
    settings: &VocabularySettings,
) -> ExtractResult<()> {
    if let Some(outcomes) = &settings.outcomes {
        vocabulary.outcomes = outcomes
            .iter()
            .map(|o| Ok((o.phrase.clone(), outcome(&o.outcome)?)))
            .collect::<ExtractResult<Vec<_>>>()?;
    }
    if let Some(labels) = &settings.choice_labels {
        vocabulary.choice_labels = labels
            .iter()
            .map(|l| Ok((l.label.clone(), vote_choice(&l.choice)?)))
            .collect::<ExtractResult<Vec<_>>>()?;
    }
    if let Some(order) = &settings.status_order {
        let order = order
            .iter()
            .map(|s| vote_choice(s))
            .collect::<ExtractResult<Vec<_>>>()?;
        if order.is_empty() {
            whatever!("the status order is empty");
        }
        vocabulary.status_order = order;
    }
    if let Some(label) = &settings.status_label {
        vocabulary.status_label = label.clone();
    }
    if let Some(keywords) = &settings.consent_keywords {
        vocabulary.consent_keywords = keywords.clone();
    }
    if let Some(pattern) = &settings.item_heading_pattern {
        vocabulary.item_heading_pattern = Some(pattern.clone());
    }
    Ok(())
}

fn member(city: &str, m: &MemberSettings) -> ExtractResult<Member> {
    if m.name.trim().is_empty() {
        whatever!("a member of {} has an empty name", city);
    }
    let term_start = parse_date(&m.term_start)?;
    let term_end = match &m.term_end {
        Some(d) if !d.trim().is_empty() => Some(parse_date(d)?),
        _ => None,
    };
    if let Some(end) = term_end {
        if end < term_start {
            whatever!("the term of {} ends before it starts", m.name);
        }
    }
    Ok(Member {
        canonical_name: m.name.trim().to_string(),
        city: city.to_string(),
        term_start,
        term_end,
        name_variants: m.variants.clone().unwrap_or_default(),
    })
}

/// Checks the configuration file and turns it into the configuration of the
/// library. Fields that are not given keep the defaults of the strategy.
pub fn validate_city_config(file: &CityConfigFile) -> ExtractResult<(CityConfig, Vec<Member>)> {
    let city = file.city.trim();
    if city.is_empty() {
        whatever!("the city identifier is empty");
    }
    let mut config = CityConfig::new(city, strategy_kind(&file.strategy)?);
    if let Some(size) = file.roster_size {
        if size == 0 {
            whatever!("the roster size cannot be 0");
        }
        config.roster_size = Some(size);
    }
    if let Some(t) = file.low_confidence_threshold {
        config.low_confidence_threshold = t;
    }
    if let Some(d) = file.max_edit_distance {
        config.max_edit_distance = d;
    }
    if let Some(categories) = &file.excluded_item_categories {
        config.excluded_item_categories = categories.clone();
    }
    if let Some(corrections) = &file.ocr_corrections {
        config.ocr_corrections = corrections
            .iter()
            .map(|c| OcrCorrection {
                pattern: c.pattern.clone(),
                replacement: c.replacement.clone(),
                literal: c.literal.unwrap_or(false),
            })
            .collect();
    }
    if let Some(vocabulary) = &file.vocabulary {
        apply_vocabulary(&mut config.vocabulary, vocabulary)?;
    }
    if let Some(w) = &file.weights {
        let d = ValidationWeights::DEFAULT_WEIGHTS;
        config.weights = ValidationWeights {
            tally: w.tally.unwrap_or(d.tally),
            uniqueness: w.uniqueness.unwrap_or(d.uniqueness),
            roster: w.roster.unwrap_or(d.roster),
            required_fields: w.required_fields.unwrap_or(d.required_fields),
            coverage: w.coverage.unwrap_or(d.coverage),
            critical_failure_cap: w.critical_failure_cap.unwrap_or(d.critical_failure_cap),
        };
    }
    let members = file
        .members
        .iter()
        .flatten()
        .map(|m| member(city, m))
        .collect::<ExtractResult<Vec<Member>>>()?;
    Ok((config, members))
}
