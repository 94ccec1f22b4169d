use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde_json::Value as JSValue;
use snafu::prelude::*;

use crate::extract::*;

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Finds the first `YYYY-MM-DD` in the name of a file.
pub fn date_from_file_name(path: &str) -> Option<NaiveDate> {
    let name = simplify_file_name(path);
    let chars: Vec<char> = name.chars().collect();
    chars
        .windows(10)
        .map(|w| w.iter().collect::<String>())
        .find_map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

pub fn read_file(path: &str) -> BExtractResult<String> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    Ok(contents)
}

pub fn read_json_file(path: &str) -> BExtractResult<JSValue> {
    let contents = read_file(path)?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    Ok(js)
}

/// Writes to a file, or to the standard output for `stdout` or no path.
pub fn write_output(path: Option<&str>, contents: &str) -> BExtractResult<()> {
    match path {
        None | Some("stdout") => {
            println!("{}", contents);
        }
        Some(p) => {
            fs::write(p, contents).context(WritingFileSnafu { path: p })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_in_file_names() {
        assert_eq!(
            date_from_file_name("/data/santa_ana/minutes_2023-01-17.txt"),
            NaiveDate::from_ymd_opt(2023, 1, 17)
        );
        assert_eq!(
            date_from_file_name("2022-12-06-regular.txt"),
            NaiveDate::from_ymd_opt(2022, 12, 6)
        );
        assert_eq!(date_from_file_name("/2023-01-17/minutes.txt"), None);
        assert_eq!(date_from_file_name("minutes_2023-13-45.txt"), None);
    }
}
