use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    compare::Tolerance,
    engine::{DEFAULT_MAX_ERROR_ROWS, DEFAULT_MAX_ERRORS, DEFAULT_PROGRESS_EVERY},
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Audit a source dataset against a target table, row by row, on a key",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compare every source row with the target row sharing its key
    Audit(AuditArgs),
    /// Show the comparison type inferred for each column of a source file
    Probe(ProbeArgs),
    /// Discover the date format of one or more sample values
    DateFormat(DateFormatArgs),
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Source delimited file (`-` for stdin)
    #[arg(short = 'i', long = "input", conflicts_with = "source_query")]
    pub input: Option<PathBuf>,
    /// SQL script whose last statement yields the source rows
    #[arg(long = "source-query", requires = "source_db")]
    pub source_query: Option<PathBuf>,
    /// SQLite database the source query runs against
    #[arg(long = "source-db")]
    pub source_db: Option<PathBuf>,
    /// SQLite database holding the target table
    #[arg(long = "target-db", requires = "table", conflicts_with = "target_file")]
    pub target_db: Option<PathBuf>,
    /// Target table name
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Delimited file used as the target table (first line names the columns)
    #[arg(long = "target-file")]
    pub target_file: Option<PathBuf>,
    /// YAML metadata naming columns, keys and pinned comparison types
    #[arg(short, long)]
    pub meta: Option<PathBuf>,
    /// First line of the source file holds the column names
    #[arg(short = 'H', long = "header")]
    pub header: bool,
    /// Key columns by name or 1-based position, in key order
    #[arg(short = 'k', long = "key", value_delimiter = ',')]
    pub key: Vec<String>,
    /// Field delimiter: pipe, comma, tab or semicolon
    #[arg(long, value_parser = parse_delimiter, default_value = "pipe")]
    pub delimiter: u8,
    /// Character encoding of the source file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Discrepancy report path (defaults to `<table>.audit.tsv`)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Write the generated lookup SQL to this file
    #[arg(long = "sql-out")]
    pub sql_out: Option<PathBuf>,
    /// Append a line describing this run to a tab-delimited audit trail
    #[arg(long = "audit-log")]
    pub audit_log: Option<PathBuf>,
    /// Write the run summary as JSON
    #[arg(long = "summary-json")]
    pub summary_json: Option<PathBuf>,
    /// Initial target date format (strftime syntax)
    #[arg(short = 'D', long = "target-date-format", default_value = "%Y-%m-%d")]
    pub target_date_format: String,
    /// Source date format tried before guessing (strftime syntax)
    #[arg(short = 'f', long = "source-date-format")]
    pub source_date_format: Option<String>,
    /// Numeric tolerance, absolute (`0.05`) or percentage (`5%`)
    #[arg(short = 'v', long = "tolerance", default_value = "0")]
    pub tolerance: Tolerance,
    /// Compare text literally, even when both values look numeric
    #[arg(short = 'n', long = "literal-strings")]
    pub literal_strings: bool,
    /// Stop once this many errors have been recorded (0 disables)
    #[arg(long = "max-errors", default_value_t = DEFAULT_MAX_ERRORS)]
    pub max_errors: u64,
    /// Stop once this many rows contain errors (0 disables)
    #[arg(long = "max-error-rows", default_value_t = DEFAULT_MAX_ERROR_ROWS)]
    pub max_error_rows: u64,
    /// Skip this many leading data rows
    #[arg(short = 'j', long = "skip", default_value_t = 0)]
    pub skip: u64,
    /// Also report target rows whose key never appeared in the source
    #[arg(short = 'r', long = "reverse")]
    pub reverse: bool,
    /// Log progress every N rows (0 disables)
    #[arg(short = 'p', long = "progress-every", default_value_t = DEFAULT_PROGRESS_EVERY)]
    pub progress_every: u64,
    /// Silence recoverable warnings
    #[arg(short = 'w', long = "suppress-warnings")]
    pub suppress_warnings: bool,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Source delimited file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Field delimiter: pipe, comma, tab or semicolon
    #[arg(long, value_parser = parse_delimiter, default_value = "pipe")]
    pub delimiter: u8,
    /// First line holds the column names
    #[arg(short = 'H', long = "header")]
    pub header: bool,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Write a metadata skeleton to this YAML file
    #[arg(short, long)]
    pub meta: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DateFormatArgs {
    /// Sample date values
    #[arg(required = true)]
    pub samples: Vec<String>,
    /// Format tried before the built-in candidates (strftime syntax)
    #[arg(long)]
    pub hint: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "|" | "pipe" => Ok(b'|'),
        "," | "comma" => Ok(b','),
        "tab" | "\t" => Ok(b'\t'),
        ";" | "semicolon" => Ok(b';'),
        other => Err(format!(
            "Unsupported delimiter '{other}' (expected pipe, comma, tab or semicolon)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn audit_defaults_match_the_documented_values() {
        let cli = Cli::try_parse_from(["row-audit", "audit", "-i", "in.txt", "--target-db", "t.db", "-t", "orders"])
            .unwrap();
        let Commands::Audit(args) = cli.command else {
            panic!("expected audit");
        };
        assert_eq!(args.delimiter, b'|');
        assert_eq!(args.max_errors, 20_000);
        assert_eq!(args.progress_every, 1_000);
        assert_eq!(args.target_date_format, "%Y-%m-%d");
        assert!(args.tolerance.is_zero());
    }

    #[test]
    fn delimiters_are_limited_to_named_choices() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert!(parse_delimiter("#").is_err());
    }
}
