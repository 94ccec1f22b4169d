pub mod config_reader;
pub mod io_common;
pub mod io_fallback;
pub mod io_roster;
pub mod io_text;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;
use serde_json::Value as JSValue;
use snafu::{prelude::*, Snafu};
use text_diff::print_diff;
use vote_extraction::*;

use crate::args::Args;
use crate::extract::config_reader::*;
use crate::extract::io_common::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExtractError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON content of {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error serializing the output"))]
    SerializingJson { source: serde_json::Error },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error reading line {lineno} of {path}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("Line {lineno} of {path} is too short"))]
    CsvLineTooShort { path: String, lineno: usize },
    #[snafu(display("Invalid date {value:?}, expected YYYY-MM-DD"))]
    ParsingDate {
        source: chrono::ParseError,
        value: String,
    },
    #[snafu(display("No meeting date for {path}: use --date or put the date in the file name"))]
    MissingDate { path: String },
    #[snafu(display("No input given"))]
    MissingInput {},
    #[snafu(display("Unknown input type {input_type:?}"))]
    UnknownInputType { input_type: String },
    #[snafu(display("Extraction error"))]
    Extraction {
        source: vote_extraction::ExtractionError,
    },
    #[snafu(display("No document could be extracted"))]
    NothingExtracted {},
    #[snafu(display("Difference detected between the output and the reference {path}"))]
    ReferenceMismatch { path: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type ExtractResult<T> = Result<T, ExtractError>;
pub type BExtractResult<T> = Result<T, Box<ExtractError>>;

fn build_pipeline(
    config: CityConfig,
    members: Vec<Member>,
    args: &Args,
) -> BExtractResult<ExtractionPipeline> {
    let registry = MemberRegistry::new(&config.city, members, config.max_edit_distance);
    info!(
        "build_pipeline: city {} with {} members",
        config.city,
        registry.members().len()
    );
    let profile = CityProfile::compile(config).context(ExtractionSnafu {})?;
    let pipeline = ExtractionPipeline::new(profile, registry).context(ExtractionSnafu {})?;
    let timeout = args
        .fallback_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_FALLBACK_TIMEOUT);
    let fallback: Option<Arc<dyn FallbackExtractor>> =
        match (&args.fallback_command, &args.fallback_file) {
            (Some(cmd), _) => Some(Arc::new(io_fallback::CommandFallback::new(cmd, timeout))),
            (None, Some(path)) => Some(Arc::new(io_fallback::read_replay(path)?)),
            (None, None) => None,
        };
    Ok(match fallback {
        Some(f) => {
            info!("build_pipeline: fallback {}, timeout {:?}", f.name(), timeout);
            pipeline.with_fallback(f, timeout)
        }
        None => pipeline,
    })
}

fn read_documents(args: &Args, city: &str) -> BExtractResult<Vec<RawDocument>> {
    if args.input.is_empty() {
        return Err(Box::new(MissingInputSnafu {}.build()));
    }
    let date = match &args.date {
        Some(d) => Some(parse_date(d)?),
        None => None,
    };
    let input_type = args.input_type.clone().unwrap_or_else(|| "text".to_string());

    let mut docs: Vec<RawDocument> = Vec::new();
    let mut digests: HashSet<String> = HashSet::new();
    for path in args.input.iter() {
        let doc = match input_type.as_str() {
            "text" => io_text::read_text_document(path, city, date)?,
            "json" => io_text::read_json_document(path, city)?,
            x => {
                return Err(Box::new(
                    UnknownInputTypeSnafu {
                        input_type: x.to_string(),
                    }
                    .build(),
                ))
            }
        };
        let digest = sha256::digest(doc.text.as_str());
        if !digests.insert(digest) {
            warn!("read_documents: {} has the same text as an earlier input, skipping", path);
            continue;
        }
        debug!("read_documents: {} ({} bytes)", doc.identifier, doc.text.len());
        docs.push(doc);
    }
    Ok(docs)
}

fn report_to_json(outcome: &ExtractionOutcome) -> JSValue {
    json!({
        "identifier": outcome.identifier,
        "score": outcome.report.score,
        "lowConfidence": outcome.low_confidence,
        "fallbackInvoked": outcome.fallback_invoked,
        "report": outcome.report,
        "diagnostics": outcome.diagnostics,
    })
}

pub fn run(args: &Args) -> BExtractResult<()> {
    let config_file = read_city_config(&args.config)?;
    let (config, mut members) = validate_city_config(&config_file)?;
    if let Some(roster_path) = &args.roster {
        let mut extra = io_roster::read_roster(roster_path, &config.city)?;
        info!("run: {} members read from {}", extra.len(), roster_path);
        members.append(&mut extra);
    }
    let docs = read_documents(args, &config.city)?;
    let pipeline = build_pipeline(config, members, args)?;

    let results = pipeline.extract_many(&docs);
    let mut documents: Vec<CanonicalDocument> = Vec::new();
    let mut reports: Vec<JSValue> = Vec::new();
    for (doc, res) in docs.iter().zip(results) {
        match res {
            Ok(outcome) => {
                if outcome.low_confidence {
                    warn!(
                        "run: {} has a low confidence ({:.3}), review it",
                        outcome.identifier, outcome.report.score
                    );
                }
                reports.push(report_to_json(&outcome));
                documents.push(outcome.document);
            }
            Err(e) => {
                warn!("run: {} failed: {}", doc.identifier, e);
                eprintln!("Skipping {}: {}", doc.identifier, e);
                reports.push(json!({"identifier": doc.identifier, "error": e.to_string()}));
            }
        }
    }
    if documents.is_empty() {
        return Err(Box::new(NothingExtractedSnafu {}.build()));
    }

    let out_js = if documents.len() == 1 {
        serde_json::to_value(&documents[0])
    } else {
        serde_json::to_value(&documents)
    }
    .context(SerializingJsonSnafu {})?;
    let pretty_js_out = serde_json::to_string_pretty(&out_js).context(SerializingJsonSnafu {})?;
    write_output(args.out.as_deref(), &pretty_js_out)?;

    if let Some(report_path) = &args.report {
        let pretty_reports = serde_json::to_string_pretty(&JSValue::Array(reports))
            .context(SerializingJsonSnafu {})?;
        write_output(Some(report_path.as_str()), &pretty_reports)?;
    }

    // The reference output, if provided for comparison
    if let Some(reference_path) = &args.reference {
        let reference = read_json_file(reference_path)?;
        let pretty_js_reference =
            serde_json::to_string_pretty(&reference).context(SerializingJsonSnafu {})?;
        if pretty_js_reference != pretty_js_out {
            warn!("Found differences with the reference output");
            print_diff(pretty_js_reference.as_str(), pretty_js_out.as_str(), "\n");
            return Err(Box::new(
                ReferenceMismatchSnafu {
                    path: reference_path.clone(),
                }
                .build(),
            ));
        }
        info!("run: the output matches {}", reference_path);
    }
    Ok(())
}
