use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::prelude::*;

use crate::config::OcrCorrection;
use crate::errors::*;

static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ ]{2,}").expect("space runs"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank runs"));
// `$1`, `$name` and `${name}` in a replacement.
static GROUP_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:\{[^}]*\}|[A-Za-z0-9_]+)").expect("group reference"));

// Enough for any table where corrections do not feed each other indefinitely.
const MAX_PASSES: usize = 4;

#[derive(Debug, Clone)]
struct CompiledCorrection {
    pattern: Regex,
    replacement: String,
}

/// Cleans the text produced by the PDF conversion.
///
/// Normalization never fails and is idempotent.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    corrections: Vec<CompiledCorrection>,
}

impl TextNormalizer {
    pub fn new(corrections: &[OcrCorrection]) -> Result<TextNormalizer, ExtractionError> {
        let mut compiled: Vec<CompiledCorrection> = Vec::new();
        for c in corrections {
            let source = if c.literal {
                regex::escape(&c.pattern)
            } else {
                c.pattern.clone()
            };
            let pattern = Regex::new(&source).context(InvalidPatternSnafu {
                pattern: c.pattern.clone(),
            })?;
            compiled.push(CompiledCorrection {
                pattern,
                replacement: c.replacement.clone(),
            });
        }
        // No replacement may be rewritten again by a correction of the table,
        // itself included.
        for (c, source) in compiled.iter().zip(corrections.iter()) {
            let written = if source.literal {
                c.replacement.clone()
            } else {
                GROUP_REF.replace_all(&c.replacement.replace("$$", ""), "").into_owned()
            };
            if written.is_empty() {
                continue;
            }
            if let Some((_, other)) = compiled
                .iter()
                .zip(corrections.iter())
                .find(|(o, _)| o.pattern.is_match(&written))
            {
                return InvalidConfigSnafu {
                    message: format!(
                        "the replacement {:?} of OCR correction {:?} matches the correction {:?}",
                        source.replacement, source.pattern, other.pattern
                    ),
                }
                .fail();
            }
        }
        debug!("TextNormalizer: {} OCR corrections", compiled.len());
        Ok(TextNormalizer {
            corrections: compiled,
        })
    }

    pub fn normalize(&self, raw_text: &str) -> String {
        let mut current = self.normalize_once(raw_text);
        for pass in 1..MAX_PASSES {
            let next = self.normalize_once(&current);
            if next == current {
                return current;
            }
            debug!("normalize: text still changing after pass {}", pass);
            current = next;
        }
        warn!(
            "normalize: no fixed point after {} passes, check the OCR correction table",
            MAX_PASSES
        );
        current
    }

    fn normalize_once(&self, text: &str) -> String {
        let unified = unify_characters(text);
        let mut corrected = unified;
        for c in self.corrections.iter() {
            corrected = c
                .pattern
                .replace_all(&corrected, c.replacement.as_str())
                .into_owned();
        }
        let lines: Vec<String> = corrected
            .split('\n')
            .map(|line| SPACE_RUNS.replace_all(line, " ").trim().to_string())
            .collect();
        let joined = lines.join("\n");
        BLANK_RUNS
            .replace_all(&joined, "\n\n")
            .trim()
            .to_string()
    }
}

fn unify_characters(text: &str) -> String {
    let mut res = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    res.push('\n');
                }
            }
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => res.push('-'),
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => res.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => res.push('"'),
            '\t' | '\u{00A0}' | '\u{2007}' | '\u{202F}' => res.push(' '),
            '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => {}
            '\u{FB01}' => res.push_str("fi"),
            '\u{FB02}' => res.push_str("fl"),
            _ => res.push(c),
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correction(pattern: &str, replacement: &str, literal: bool) -> OcrCorrection {
        OcrCorrection {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            literal,
        }
    }

    #[test]
    fn unifies_dashes_and_whitespace() {
        let n = TextNormalizer::new(&[]).unwrap();
        let out =
            n.normalize("Status:\t7\u{2013}0\u{2013}0\u{2013}0  \u{2013} Pass   \r\nNO: 0\r\n");
        assert_eq!(out, "Status: 7-0-0-0 - Pass\nNO: 0");
    }

    #[test]
    fn collapses_paragraph_breaks() {
        let n = TextNormalizer::new(&[]).unwrap();
        let out = n.normalize("first\n\n\n\n  \nsecond");
        assert_eq!(out, "first\n\nsecond");
    }

    #[test]
    fn applies_corrections_in_order() {
        let n = TextNormalizer::new(&[
            correction("Penalosa", "Penaloza", true),
            correction(r"\bAY ES\b", "AYES", false),
        ])
        .unwrap();
        assert_eq!(
            n.normalize("AY ES: Penalosa, Phan"),
            "AYES: Penaloza, Phan"
        );
    }

    #[test]
    fn unmatched_text_passes_through() {
        let n = TextNormalizer::new(&[correction("Penalosa", "Penaloza", true)]).unwrap();
        assert_eq!(n.normalize("Call to order"), "Call to order");
    }

    #[test]
    fn rejects_self_matching_correction() {
        let res = TextNormalizer::new(&[correction("Phan", "Phang", true)]);
        assert!(matches!(res, Err(ExtractionError::InvalidConfig { .. })));
    }

    #[test]
    fn rejects_invalid_pattern() {
        let res = TextNormalizer::new(&[correction("(unclosed", "x", false)]);
        assert!(matches!(res, Err(ExtractionError::InvalidPattern { .. })));
    }

    #[test]
    fn rejects_corrections_that_feed_each_other() {
        let res = TextNormalizer::new(&[
            correction("Ayes", "AYES", true),
            correction("AYE", "AYES", true),
        ]);
        assert!(matches!(res, Err(ExtractionError::InvalidConfig { .. })));
        let res = TextNormalizer::new(&[correction("a", "b", true), correction("b", "ca", true)]);
        assert!(matches!(res, Err(ExtractionError::InvalidConfig { .. })));
        let res = TextNormalizer::new(&[
            correction(r"N0\.", "No.", false),
            correction("n0", "No", true),
        ]);
        assert!(res.is_ok());
        let res = TextNormalizer::new(&[correction(r"(\d+)l", "${1}1", false)]);
        assert!(res.is_ok());
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = TextNormalizer::new(&[
            correction("0rdinance", "Ordinance", true),
            correction(r"(?i)council\s+member", "Councilmember", false),
            correction("  ", " ", true),
        ])
        .unwrap();
        let samples = [
            "",
            "   ",
            "YES: 7 \u{2013} Penaloza, Phan / NO: 0 / Status: 7\u{2013}0\u{2013}0\u{2013}0 \u{2013} Pass",
            "It was moved by Council  member Smith,\r\n\r\n\r\n\r\nseconded by Council Member Jones",
            "0rdinance No.\u{00A0}2024\u{2011}05 \u{FB01}nal reading\t\tadopted",
            "\u{FEFF}\u{201C}Quoted\u{201D} \u{2018}text\u{2019}\n\n\n\n\n\nend   ",
            "8.  Award of contract\n9.\tPurchase\n\n\n10. Agreement",
        ];
        for s in samples.iter() {
            let once = n.normalize(s);
            let twice = n.normalize(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", s);
        }
    }
}
