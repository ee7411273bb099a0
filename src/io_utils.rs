//! I/O helpers shared by the row sources, target providers and the report.
//!
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Readers**: flexible delimited readers that never treat the first
//!   record as a header and split on the delimiter literally, quotes
//!   included; header handling belongs to the callers.
//! - **Writers**: tab-delimited report output without quoting, so values
//!   appear exactly as compared.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{AuditError, Result};

pub const REPORT_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| AuditError::configuration(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_delimited_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .quoting(false)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_delimited_reader_from_path(
    path: &Path,
    delimiter: u8,
) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        let file = File::open(path).map_err(|err| {
            AuditError::source_error(format!("Opening input file {path:?}: {err}"))
        })?;
        Box::new(BufReader::new(file))
    };
    Ok(open_delimited_reader(reader, delimiter))
}

pub fn open_report_writer(path: Option<&Path>) -> Result<csv::Writer<Box<dyn Write>>> {
    let writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => {
            let file = File::create(p).map_err(|err| {
                AuditError::report_error(format!("Creating report file {p:?}: {err}"))
            })?;
            Box::new(BufWriter::new(file))
        }
        _ => Box::new(std::io::stdout()),
    };
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(REPORT_DELIMITER)
        .quote_style(QuoteStyle::Never)
        .flexible(true);
    Ok(builder.from_writer(writer))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(AuditError::source_error(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        )))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Decodes every field, substituting U+FFFD for bytes the encoding rejects.
/// The flag is set when any field needed a substitution.
pub fn decode_record_lossy(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> (Vec<String>, bool) {
    let mut had_errors = false;
    let fields = record
        .iter()
        .map(|field| {
            let (text, _, bad) = encoding.decode(field);
            had_errors |= bad;
            text.into_owned()
        })
        .collect();
    (fields, had_errors)
}

/// Strips a leading `HEADER` or `TRAILER` marker field when present.
pub fn strip_marker<'a>(fields: &'a [String], marker: &str) -> Option<&'a [String]> {
    match fields.split_first() {
        Some((first, rest)) if first.trim().eq_ignore_ascii_case(marker) => Some(rest),
        _ => None,
    }
}
