// Primitives for reading roster CSV files.

use csv::Trim;
use log::debug;
use snafu::prelude::*;
use vote_extraction::Member;

use crate::extract::config_reader::parse_date;
use crate::extract::*;

const NAME_COL: usize = 0;
const TERM_START_COL: usize = 1;
const TERM_END_COL: usize = 2;
const VARIANTS_COL: usize = 3;

/// Reads the members of a city from a CSV file with a header line and the
/// columns `canonical_name, term_start, term_end, name_variants`.
///
/// An empty term end means the member is still in office. Variants are
/// separated by `|`.
pub fn read_roster(path: &str, city: &str) -> BExtractResult<Vec<Member>> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;

    let mut res: Vec<Member> = Vec::new();
    for (idx, line_r) in rdr.into_records().enumerate() {
        // Line 1 is the header.
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { path, lineno })?;
        debug!("read_roster: lineno: {:?} row: {:?}", lineno, line);
        let name = line
            .get(NAME_COL)
            .filter(|s| !s.is_empty())
            .context(CsvLineTooShortSnafu { path, lineno })?;
        let term_start = line
            .get(TERM_START_COL)
            .context(CsvLineTooShortSnafu { path, lineno })?;
        let term_start = parse_date(term_start)?;
        let term_end = match line.get(TERM_END_COL) {
            Some(s) if !s.is_empty() => Some(parse_date(s)?),
            _ => None,
        };
        let name_variants: Vec<String> = line
            .get(VARIANTS_COL)
            .unwrap_or("")
            .split('|')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        res.push(Member {
            canonical_name: name.to_string(),
            city: city.to_string(),
            term_start,
            term_end,
            name_variants,
        });
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn roster_file(dir: &TempDir, contents: &str) -> String {
        let p = dir.path().join("roster.csv");
        fs::write(&p, contents).unwrap();
        p.display().to_string()
    }

    #[test]
    fn reads_members() {
        let dir = TempDir::new().unwrap();
        let path = roster_file(
            &dir,
            "canonical_name,term_start,term_end,name_variants\nThai Viet Phan, 2020-12-08,,Phan | Thai Phan\nVicente Sarmiento,2016-12-06,2022-12-05\n",
        );
        let members = read_roster(&path, "santa_ana").unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].canonical_name, "Thai Viet Phan");
        assert_eq!(members[0].term_end, None);
        assert_eq!(
            members[0].name_variants,
            vec!["Phan".to_string(), "Thai Phan".to_string()]
        );
        assert_eq!(members[1].term_end, NaiveDate::from_ymd_opt(2022, 12, 5));
        assert!(members[1].name_variants.is_empty());
        assert_eq!(members[1].city, "santa_ana");
    }

    #[test]
    fn reports_the_line() {
        let dir = TempDir::new().unwrap();
        let path = roster_file(
            &dir,
            "canonical_name,term_start,term_end,name_variants\nThai Viet Phan,2020-12-08,,\nJessie Lopez\n",
        );
        let err = read_roster(&path, "santa_ana").unwrap_err();
        assert!(matches!(*err, ExtractError::CsvLineTooShort { lineno: 3, .. }));

        let path = roster_file(
            &dir,
            "canonical_name,term_start,term_end,name_variants\nThai Viet Phan,12/08/2020,,\n",
        );
        let err = read_roster(&path, "santa_ana").unwrap_err();
        assert!(matches!(*err, ExtractError::ParsingDate { .. }));
    }
}
