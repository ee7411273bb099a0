//! `probe` command: reads the first data row of a source file and shows the
//! comparison type and date format the audit would settle on for each column.

use std::{borrow::Cow, fmt::Write as _};

use anyhow::{Context, Result};
use log::info;

use crate::{
    classify::{ComparisonType, classify},
    cli::ProbeArgs,
    date_format::resolve,
    io_utils,
    metadata::{AuditMeta, ColumnMeta},
    printable_delimiter,
    source::{DelimitedOptions, DelimitedSource, RowSource},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ProbedColumn {
    pub position: usize,
    pub name: String,
    pub sample: Option<String>,
    pub comparison: ComparisonType,
    pub date_format: Option<String>,
}

pub fn execute(args: &ProbeArgs) -> Result<()> {
    info!(
        "Probing '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(args.delimiter)
    );
    let options = DelimitedOptions {
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
        has_header: args.header,
        column_names: Vec::new(),
    };
    let mut source = DelimitedSource::open(&args.input, &options)
        .with_context(|| format!("Opening {:?}", args.input))?;
    let columns = probe_source(&mut source)?;
    print!("{}", render_probe(&columns));

    if let Some(path) = &args.meta {
        let meta = skeleton(&columns);
        meta.save(path)
            .with_context(|| format!("Writing metadata to {path:?}"))?;
        info!(
            "Metadata skeleton for {} column(s) written to {:?}",
            meta.columns.len(),
            path
        );
    }
    Ok(())
}

pub fn probe_source(source: &mut dyn RowSource) -> Result<Vec<ProbedColumn>> {
    let row = source.next_row()?.unwrap_or_default();
    let names = source.column_names().to_vec();
    let width = names.len().max(row.len());
    let columns = (0..width)
        .map(|idx| {
            let name = names
                .get(idx)
                .filter(|name| !name.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("column_{}", idx + 1));
            let sample = row.get(idx).cloned().flatten();
            let comparison = classify(sample.as_deref(), &name);
            let date_format = match (&comparison, sample.as_deref()) {
                (ComparisonType::Date, Some(value)) => {
                    resolve(value.trim(), None).map(|format| format.pattern().to_string())
                }
                _ => None,
            };
            ProbedColumn {
                position: idx + 1,
                name,
                sample,
                comparison,
                date_format,
            }
        })
        .collect();
    Ok(columns)
}

/// Metadata with every probed type pinned and the first column as the key.
pub fn skeleton(columns: &[ProbedColumn]) -> AuditMeta {
    AuditMeta {
        table: None,
        columns: columns
            .iter()
            .map(|column| ColumnMeta {
                key: column.position == 1,
                compare_as: Some(column.comparison),
                ..ColumnMeta::new(column.name.clone())
            })
            .collect(),
    }
}

pub fn render_probe(columns: &[ProbedColumn]) -> String {
    let headers = ["#", "Column", "Sample", "Type", "Date Format"]
        .map(str::to_string)
        .to_vec();
    let rows = columns
        .iter()
        .map(|column| {
            vec![
                column.position.to_string(),
                column.name.clone(),
                column.sample.clone().unwrap_or_default(),
                column.comparison.to_string(),
                column.date_format.clone().unwrap_or_default(),
            ]
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|h| h.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(sanitize_cell(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(cell.chars().count());
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
