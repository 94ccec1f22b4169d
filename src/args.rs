use clap::Parser;

/// This program extracts the votes recorded in the minutes of city council meetings.
#[derive(Parser, Debug, Clone, Default)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON configuration of the city: format of the minutes, vocabulary, roster.
    /// For more information about the file format, read the manual of the vote_extraction crate.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path, optional) A CSV file with more members of the city body, with the columns
    /// canonical_name, term_start, term_end, name_variants.
    #[clap(long, value_parser)]
    pub roster: Option<String>,

    /// (file path, repeatable) The minutes to extract. Inputs with the same text are only processed once.
    #[clap(short, long, value_parser)]
    pub input: Vec<String>,

    /// (default text) The type of the inputs: 'text' for plain text, 'json' for a JSON envelope
    /// with the city, the meeting date and the text.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// (YYYY-MM-DD, optional) The date of the meeting for text inputs. If not provided, the date
    /// is read from the name of the file.
    #[clap(long, value_parser)]
    pub date: Option<String>,

    /// (file path, 'stdout' or empty) Where to write the canonical JSON output. One document is written
    /// as an object, several as an array.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the validation reports and the diagnostics
    /// are written in JSON format to the given location.
    #[clap(long, value_parser)]
    pub report: Option<String>,

    /// (file path) A reference file containing the expected output in JSON format. If provided,
    /// minutesvotes will check that the output matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (command line, optional) An external program called when the confidence is too low. It
    /// reads a JSON request on its standard input and answers with a canonical document.
    #[clap(long, value_parser)]
    pub fallback_command: Option<String>,

    /// (file path, optional) A canonical document replayed as the answer of the fallback.
    #[clap(long, value_parser)]
    pub fallback_file: Option<String>,

    /// (default 120) How long to wait for the fallback, in seconds.
    #[clap(long, value_parser)]
    pub fallback_timeout_secs: Option<u64>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
