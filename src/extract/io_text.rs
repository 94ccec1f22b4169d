// Reading the minutes.

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use vote_extraction::RawDocument;

use crate::extract::config_reader::parse_date;
use crate::extract::io_common::{date_from_file_name, read_file, simplify_file_name};
use crate::extract::*;

/// Reads the text of one meeting. Without an explicit date, the date is taken
/// from the name of the file.
pub fn read_text_document(
    path: &str,
    city: &str,
    date: Option<NaiveDate>,
) -> BExtractResult<RawDocument> {
    let meeting_date = match date.or_else(|| date_from_file_name(path)) {
        Some(d) => d,
        None => return Err(Box::new(MissingDateSnafu { path }.build())),
    };
    let text = read_file(path)?;
    Ok(RawDocument {
        identifier: simplify_file_name(path),
        source_city: city.to_string(),
        meeting_date,
        text,
    })
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEnvelope {
    pub city: Option<String>,
    #[serde(rename = "meetingDate")]
    pub meeting_date: String,
    pub text: String,
    pub identifier: Option<String>,
}

/// Reads a JSON envelope. The city of the configuration is used when the
/// envelope does not name one.
pub fn read_json_document(path: &str, default_city: &str) -> BExtractResult<RawDocument> {
    let contents = read_file(path)?;
    let envelope: DocumentEnvelope =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!(
        "read_json_document: {} {:?} {}",
        path, envelope.city, envelope.meeting_date
    );
    Ok(RawDocument {
        identifier: envelope
            .identifier
            .unwrap_or_else(|| simplify_file_name(path)),
        source_city: envelope.city.unwrap_or_else(|| default_city.to_string()),
        meeting_date: parse_date(&envelope.meeting_date)?,
        text: envelope.text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn envelope_fields() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("doc.json");
        fs::write(
            &p,
            r#"{"city": "anaheim", "meetingDate": "2023-03-21", "text": "1. Roll call"}"#,
        )
        .unwrap();
        let doc = read_json_document(&p.display().to_string(), "santa_ana").unwrap();
        assert_eq!(doc.identifier, "doc.json");
        assert_eq!(doc.source_city, "anaheim");
        assert_eq!(doc.meeting_date, NaiveDate::from_ymd_opt(2023, 3, 21).unwrap());
        assert_eq!(doc.text, "1. Roll call");
    }

    #[test]
    fn explicit_date_wins() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("minutes_2023-01-17.txt");
        fs::write(&p, "1. Roll call").unwrap();
        let date = NaiveDate::from_ymd_opt(2023, 1, 18);
        let doc = read_text_document(&p.display().to_string(), "santa_ana", date).unwrap();
        assert_eq!(Some(doc.meeting_date), date);
        assert_eq!(doc.identifier, "minutes_2023-01-17.txt");
    }
}
