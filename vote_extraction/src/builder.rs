pub use crate::config::*;

use chrono::NaiveDate;

use crate::errors::ExtractionError;
use crate::registry::MemberRegistry;
use crate::{CityProfile, ExtractionPipeline};

/// A builder for city profiles and their rosters.
///
/// Configuration files are the usual way to describe a city. The builder is
/// convenient for tests and for programs that keep their rosters elsewhere.
///
/// ```
/// use vote_extraction::builder::Builder;
/// use vote_extraction::{ExtractionError, Outcome, RawDocument, StrategyKind};
/// use chrono::NaiveDate;
///
/// let mut builder = Builder::new("santa_ana", StrategyKind::RollCall)?
///     .roster_size(2)?;
///
/// builder.add_member("Thai Viet Phan", "2020-12-08", None, &["Phan"])?;
/// builder.add_member("Jessie Lopez", "2020-12-08", None, &[])?;
/// let pipeline = builder.build()?;
///
/// let doc = RawDocument {
///     identifier: "2023-01-17".to_string(),
///     source_city: "santa_ana".to_string(),
///     meeting_date: NaiveDate::from_ymd_opt(2023, 1, 17).unwrap(),
///     text: "5. Receive and file report\nMOTION: Phan SECOND: Lopez\nYES: 2 - Phan, Lopez / NO: 0 / Status: 2-0-0-0 - Pass".to_string(),
/// };
/// let outcome = pipeline.extract(&doc)?;
/// assert_eq!(outcome.document.votes[0].outcome, Some(Outcome::Pass));
///
/// # Ok::<(), ExtractionError>(())
/// ```
pub struct Builder {
    pub(crate) _config: CityConfig,
    pub(crate) _members: Vec<Member>,
}

fn invalid(message: String) -> ExtractionError {
    ExtractionError::InvalidConfig { message }
}

fn parse_date(s: &str) -> Result<NaiveDate, ExtractionError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| invalid(format!("invalid date {:?}: {}", s, e)))
}

impl Builder {
    pub fn new(city: &str, strategy: StrategyKind) -> Result<Builder, ExtractionError> {
        if city.trim().is_empty() {
            return Err(invalid("the city identifier is empty".to_string()));
        }
        Ok(Builder {
            _config: CityConfig::new(city.trim(), strategy),
            _members: Vec::new(),
        })
    }

    /// Starts from a complete configuration.
    pub fn from_config(config: CityConfig) -> Builder {
        Builder {
            _config: config,
            _members: Vec::new(),
        }
    }

    pub fn roster_size(self, size: u32) -> Result<Builder, ExtractionError> {
        if size == 0 {
            return Err(invalid("the roster size cannot be 0".to_string()));
        }
        let mut config = self._config;
        config.roster_size = Some(size);
        Ok(Builder {
            _config: config,
            _members: self._members,
        })
    }

    /// Replaces the categories of agenda items that consent calendar
    /// expansion leaves out.
    pub fn excluded_categories(self, categories: &[&str]) -> Result<Builder, ExtractionError> {
        let mut config = self._config;
        config.excluded_item_categories = categories.iter().map(|c| c.to_string()).collect();
        Ok(Builder {
            _config: config,
            _members: self._members,
        })
    }

    /// Appends an OCR correction. Corrections run in the order they are added.
    pub fn ocr_correction(
        self,
        pattern: &str,
        replacement: &str,
        literal: bool,
    ) -> Result<Builder, ExtractionError> {
        if pattern.is_empty() {
            return Err(invalid("empty OCR correction pattern".to_string()));
        }
        let mut config = self._config;
        config.ocr_corrections.push(OcrCorrection {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            literal,
        });
        Ok(Builder {
            _config: config,
            _members: self._members,
        })
    }

    pub fn low_confidence_threshold(self, threshold: f64) -> Result<Builder, ExtractionError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(format!(
                "low confidence threshold {} is not between 0 and 1",
                threshold
            )));
        }
        let mut config = self._config;
        config.low_confidence_threshold = threshold;
        Ok(Builder {
            _config: config,
            _members: self._members,
        })
    }

    /// Adds a member of the body.
    ///
    /// Dates are written `YYYY-MM-DD`. A member without a term end is still
    /// in office.
    pub fn add_member(
        &mut self,
        canonical_name: &str,
        term_start: &str,
        term_end: Option<&str>,
        name_variants: &[&str],
    ) -> Result<(), ExtractionError> {
        if canonical_name.trim().is_empty() {
            return Err(invalid("a member has an empty name".to_string()));
        }
        let start = parse_date(term_start)?;
        let end = term_end.map(parse_date).transpose()?;
        if let Some(end) = end {
            if end < start {
                return Err(invalid(format!(
                    "the term of {} ends before it starts",
                    canonical_name
                )));
            }
        }
        self.add_member_2(Member {
            canonical_name: canonical_name.trim().to_string(),
            city: self._config.city.clone(),
            term_start: start,
            term_end: end,
            name_variants: name_variants.iter().map(|v| v.to_string()).collect(),
        })
    }

    pub fn add_member_2(&mut self, member: Member) -> Result<(), ExtractionError> {
        if !member.city.eq_ignore_ascii_case(&self._config.city) {
            return Err(invalid(format!(
                "{} is a member for {}, not {}",
                member.canonical_name, member.city, self._config.city
            )));
        }
        self._members.push(member);
        Ok(())
    }

    pub fn config(&self) -> &CityConfig {
        &self._config
    }

    /// Compiles the profile and the roster.
    pub fn build_parts(self) -> Result<(CityProfile, MemberRegistry), ExtractionError> {
        let registry = MemberRegistry::new(
            &self._config.city,
            self._members,
            self._config.max_edit_distance,
        );
        let profile = CityProfile::compile(self._config)?;
        Ok((profile, registry))
    }

    pub fn build(self) -> Result<ExtractionPipeline, ExtractionError> {
        let (profile, registry) = self.build_parts()?;
        ExtractionPipeline::new(profile, registry)
    }
}
