//! Tab-delimited discrepancy report and the run audit trail.
//!
//! The report opens with a title line, the numeric-text mode and a heading
//! line. One line follows per discrepancy, missing row or orphan, and a
//! statistics footer closes it. [`AuditReport::finish`] consumes the report,
//! so it is flushed exactly once.

use std::{
    borrow::Cow,
    fs::OpenOptions,
    io::Write,
    path::Path,
};

use chrono::Local;
use itertools::Itertools;

use crate::{
    columns::KeyValues,
    engine::{AuditSummary, Discrepancy, DiscrepancySink, MissingRow, Termination},
    error::{AuditError, Result},
    io_utils,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Makes blank values visible: `Null`, `Empty` or `N Space(s)`.
pub fn see_a_null(value: Option<&str>) -> Cow<'_, str> {
    match value {
        None => Cow::Borrowed("Null"),
        Some("") => Cow::Borrowed("Empty"),
        Some(v) if v.bytes().all(|b| b == b' ') => {
            let unit = if v.len() == 1 { "Space" } else { "Spaces" };
            Cow::Owned(format!("{} {unit}", v.len()))
        }
        Some(v) => sanitize_cell(v),
    }
}

/// Tabs and line breaks would split a report line.
fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(
            value
                .chars()
                .map(|ch| match ch {
                    '\n' | '\r' | '\t' => ' ',
                    other => other,
                })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}

/// What the report's opening lines describe.
#[derive(Debug, Clone)]
pub struct ReportHeading {
    pub table: String,
    pub input: String,
    /// Label for the target value column, e.g. the database name.
    pub target_label: String,
    pub key_names: Vec<String>,
    pub numeric_strings: bool,
}

pub struct AuditReport {
    writer: csv::Writer<Box<dyn Write>>,
    table: String,
}

impl AuditReport {
    pub fn create(path: Option<&Path>, heading: &ReportHeading) -> Result<Self> {
        let writer = io_utils::open_report_writer(path)?;
        let mut report = Self {
            writer,
            table: heading.table.clone(),
        };
        report.write_preamble(heading)?;
        Ok(report)
    }

    fn write_line<I, S>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .map_err(|err| AuditError::report_error(format!("Writing report line: {err}")))
    }

    fn write_preamble(&mut self, heading: &ReportHeading) -> Result<()> {
        self.write_line([format!(
            "Audit of table: {} compared to: {} Run date: {}",
            heading.table,
            heading.input,
            Local::now().format(TIMESTAMP_FORMAT)
        )])?;
        let mode = if heading.numeric_strings {
            "Numeric expressions in text were converted. (eg. 0001.00 = 1)"
        } else {
            "Character data was treated literally. (eg. \"1\" != \"0001\")"
        };
        self.write_line([mode])?;

        let target_value = format!("{} Value", heading.target_label);
        let columns = heading
            .key_names
            .iter()
            .map(String::as_str)
            .chain([
                "Col Name",
                target_value.as_str(),
                "Source Value",
                "In Line#",
                "In Col#",
                "Data Type",
                "Column",
                "Table",
                "Tgt DateFmt",
                "Src DateFmt",
            ])
            .collect::<Vec<_>>();
        self.write_line(columns)
    }

    fn key_fields(key: &KeyValues) -> Vec<String> {
        key.as_slice()
            .iter()
            .map(|value| sanitize_cell(value).into_owned())
            .collect()
    }

    /// Writes the footer and flushes. Both normal and early termination end
    /// here.
    pub fn finish(mut self, summary: &AuditSummary) -> Result<()> {
        match summary.termination {
            Termination::MaxErrors => self.write_line([format!(
                "Maximum errors parameter was reached: {}",
                summary.total_errors
            )])?,
            Termination::MaxErrorRows => self.write_line([format!(
                "Maximum rows with errors parameter was reached: {}",
                summary.counters.rows_with_errors
            )])?,
            Termination::EndOfInput => {}
        }
        self.write_line(["End of data."])?;
        self.write_line(["Statistics of the run:"])?;
        self.write_line([summary.statistics_line()])?;
        if let Some(trailer) = &summary.trailer {
            self.write_line([format!("Trailer record: {}", trailer.join("|"))])?;
        }
        self.write_line([format!(
            "Program ended normally checking table: {}",
            self.table
        )])?;
        self.write_line(["Columns audited in this run:"])?;
        let audited = summary
            .columns
            .iter()
            .filter(|column| !column.ignored)
            .map(|column| format!("{} ({})", column.name, column.comparison))
            .join(", ");
        self.write_line([format!("{audited}.")])?;
        self.write_line([format!(
            "End of run date: {}",
            summary.finished_at.format(TIMESTAMP_FORMAT)
        )])?;
        self.writer
            .flush()
            .map_err(|err| AuditError::report_error(format!("Flushing report: {err}")))
    }
}

impl DiscrepancySink for AuditReport {
    fn discrepancy(&mut self, discrepancy: &Discrepancy) -> Result<()> {
        let provenance = &discrepancy.provenance;
        let mut fields = Self::key_fields(&discrepancy.key);
        fields.extend([
            sanitize_cell(discrepancy.column_name.trim()).into_owned(),
            see_a_null(discrepancy.target.as_deref()).into_owned(),
            see_a_null(discrepancy.source.as_deref()).into_owned(),
            discrepancy.row_number.to_string(),
            discrepancy.column_position.to_string(),
            see_a_null(provenance.source_type.as_deref()).into_owned(),
            see_a_null(provenance.source_column.as_deref()).into_owned(),
            see_a_null(provenance.source_table.as_deref()).into_owned(),
        ]);
        if let Some((target_format, source_format)) = &discrepancy.date_formats {
            fields.push(target_format.clone());
            fields.push(source_format.clone());
        }
        self.write_line(fields)
    }

    fn missing(&mut self, missing: &MissingRow) -> Result<()> {
        let mut fields = Self::key_fields(&missing.key);
        let reason = match &missing.diagnostic {
            Some(diagnostic) => format!("Missing {}", sanitize_cell(diagnostic)),
            None => "Missing".to_string(),
        };
        fields.extend([
            reason,
            String::new(),
            String::new(),
            missing.row_number.to_string(),
        ]);
        self.write_line(fields)
    }

    fn orphan(&mut self, key: &KeyValues) -> Result<()> {
        let mut fields = Self::key_fields(key);
        fields.push("NoSource".to_string());
        self.write_line(fields)
    }
}

/// One run's line in the append-only audit trail.
#[derive(Debug, Clone)]
pub struct AuditLogEntry<'a> {
    pub table: &'a str,
    pub input: &'a str,
    pub user: String,
    pub summary: &'a AuditSummary,
}

const AUDIT_LOG_HEADER: [&str; 10] = [
    "Start time",
    "End time",
    "Table name",
    "Input file name",
    "Rows checked",
    "Columns checked",
    "Rows with errors",
    "Columns with errors",
    "Reverse missing rows",
    "User Id",
];

pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Appends a run line, writing the heading first when the file is new.
pub fn append_audit_log(path: &Path, entry: &AuditLogEntry<'_>) -> Result<()> {
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| AuditError::report_error(format!("Opening audit log {path:?}: {err}")))?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(io_utils::REPORT_DELIMITER)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(file);
    let to_report_error =
        |err: csv::Error| AuditError::report_error(format!("Writing audit log {path:?}: {err}"));
    if is_new {
        writer.write_record(AUDIT_LOG_HEADER).map_err(to_report_error)?;
    }
    let summary = entry.summary;
    let counters = &summary.counters;
    writer
        .write_record([
            summary.started_at.format(TIMESTAMP_FORMAT).to_string(),
            summary.finished_at.format(TIMESTAMP_FORMAT).to_string(),
            sanitize_cell(entry.table).into_owned(),
            sanitize_cell(entry.input).into_owned(),
            counters.rows_checked.to_string(),
            counters.non_key_columns_audited.to_string(),
            counters.rows_with_errors.to_string(),
            counters.columns_with_errors.to_string(),
            counters.reverse_missing.to_string(),
            sanitize_cell(&entry.user).into_owned(),
        ])
        .map_err(to_report_error)?;
    writer
        .flush()
        .map_err(|err| AuditError::report_error(format!("Flushing audit log {path:?}: {err}")))
}
