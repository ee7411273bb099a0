//! `audit` command: opens the source and target, resolves the column layout
//! and key, runs the audit loop and writes the outputs.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    cli::AuditArgs,
    columns::{KeyTuple, describe_columns},
    date_format::DateFormat,
    engine::{AuditSettings, AuditSummary, RunContext, run_audit},
    error::AuditError,
    io_utils::{self, is_dash},
    metadata::AuditMeta,
    printable_delimiter,
    report::{AuditLogEntry, AuditReport, ReportHeading, append_audit_log, current_user},
    source::{DelimitedOptions, DelimitedSource, RowSource, SqlSource},
    target::{DelimitedTarget, SqliteTarget, TargetProvider},
};

pub fn execute(args: &AuditArgs) -> Result<AuditSummary> {
    let meta = match &args.meta {
        Some(path) => Some(
            AuditMeta::load(path).with_context(|| format!("Loading metadata from {path:?}"))?,
        ),
        None => None,
    };
    let settings = settings_from_args(args)?;

    let mut source = open_source(args, meta.as_ref())?;
    let mut target = open_target(args)?;

    let names = if source.column_names().is_empty() {
        debug!("Source names no columns; using the target's column order");
        target.column_names().to_vec()
    } else {
        source.column_names().to_vec()
    };
    let key_specs = if !args.key.is_empty() {
        args.key.clone()
    } else {
        meta.as_ref().map(AuditMeta::key_names).unwrap_or_default()
    };
    if key_specs.is_empty() {
        return Err(AuditError::configuration(
            "No key columns: pass --key or mark key columns in the metadata",
        )
        .into());
    }
    let key = KeyTuple::parse(&key_specs, &names).context("Resolving key columns")?;
    let mut columns = describe_columns(&names, &key);
    if let Some(meta) = &meta {
        meta.apply(&mut columns);
    }
    let key_names = key
        .names(&columns)
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    target
        .bind(&names, &key_names)
        .with_context(|| format!("Preparing lookups on {}", target.describe()))?;
    info!(
        "Auditing {} column(s); key ({})",
        columns.len(),
        key_names.join(", ")
    );

    if let Some(path) = &args.sql_out {
        fs::write(path, target.query_text())
            .map_err(|err| AuditError::report_error(format!("Writing {path:?}: {err}")))?;
        info!("Lookup SQL written to {path:?}");
    }

    let table = table_name(args, meta.as_ref());
    let input = source.describe();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{table}.audit.tsv")));
    let heading = ReportHeading {
        table: table.clone(),
        input: input.clone(),
        target_label: target_label(args),
        key_names,
        numeric_strings: settings.numeric_strings,
    };
    let mut report = AuditReport::create(Some(output.as_path()), &heading)
        .with_context(|| format!("Creating report {output:?}"))?;

    let mut context = RunContext::new(settings, columns, key);
    let summary = run_audit(&mut context, source.as_mut(), target.as_mut(), &mut report)?;
    report
        .finish(&summary)
        .with_context(|| format!("Finishing report {output:?}"))?;
    if !is_dash(&output) {
        info!("Report written to {output:?}");
    }

    if let Some(path) = &args.audit_log {
        let entry = AuditLogEntry {
            table: &table,
            input: &input,
            user: current_user(),
            summary: &summary,
        };
        append_audit_log(path, &entry)
            .with_context(|| format!("Appending to audit log {path:?}"))?;
    }
    if let Some(path) = &args.summary_json {
        let file = fs::File::create(path)
            .map_err(|err| AuditError::report_error(format!("Creating {path:?}: {err}")))?;
        serde_json::to_writer_pretty(file, &summary).context("Writing summary JSON")?;
    }
    Ok(summary)
}

fn settings_from_args(args: &AuditArgs) -> Result<AuditSettings> {
    let target_date_format = DateFormat::new(args.target_date_format.as_str()).ok_or_else(|| {
        AuditError::configuration(format!(
            "Invalid target date format '{}'",
            args.target_date_format
        ))
    })?;
    let source_date_hint = match &args.source_date_format {
        Some(pattern) => Some(DateFormat::new(pattern.as_str()).ok_or_else(|| {
            AuditError::configuration(format!("Invalid source date format '{pattern}'"))
        })?),
        None => None,
    };
    Ok(AuditSettings {
        tolerance: args.tolerance,
        numeric_strings: !args.literal_strings,
        max_errors: args.max_errors,
        max_error_rows: args.max_error_rows,
        skip_rows: args.skip,
        reverse: args.reverse,
        progress_every: args.progress_every,
        suppress_warnings: args.suppress_warnings,
        source_date_hint,
        target_date_format: Some(target_date_format),
    })
}

fn open_source(args: &AuditArgs, meta: Option<&AuditMeta>) -> Result<Box<dyn RowSource>> {
    if let Some(script_path) = &args.source_query {
        let database = args.source_db.as_ref().ok_or_else(|| {
            AuditError::configuration("--source-query needs --source-db")
        })?;
        let script = fs::read_to_string(script_path).map_err(|err| {
            AuditError::source_error(format!("Reading source query {script_path:?}: {err}"))
        })?;
        let source = SqlSource::open(database, &script)
            .with_context(|| format!("Running source query {script_path:?}"))?;
        return Ok(Box::new(source));
    }
    let Some(input) = &args.input else {
        return Err(
            AuditError::configuration("A source is required: pass --input or --source-query")
                .into(),
        );
    };
    let options = DelimitedOptions {
        delimiter: args.delimiter,
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
        has_header: args.header,
        column_names: meta.map(AuditMeta::column_names).unwrap_or_default(),
    };
    info!(
        "Reading source {:?} with delimiter '{}' and encoding {}",
        input,
        printable_delimiter(options.delimiter),
        options.encoding.name()
    );
    let source = DelimitedSource::open(input, &options)
        .with_context(|| format!("Opening source file {input:?}"))?;
    Ok(Box::new(source))
}

fn open_target(args: &AuditArgs) -> Result<Box<dyn TargetProvider>> {
    if let Some(database) = &args.target_db {
        let table = args
            .table
            .as_deref()
            .ok_or_else(|| AuditError::configuration("--target-db needs --table"))?;
        let target = SqliteTarget::open(database, table)
            .with_context(|| format!("Opening target table {table} in {database:?}"))?;
        return Ok(Box::new(target));
    }
    if let Some(path) = &args.target_file {
        let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
        let target = DelimitedTarget::open(path, args.delimiter, encoding)
            .with_context(|| format!("Loading target file {path:?}"))?;
        return Ok(Box::new(target));
    }
    Err(AuditError::configuration("A target is required: pass --target-db or --target-file").into())
}

fn table_name(args: &AuditArgs, meta: Option<&AuditMeta>) -> String {
    args.table
        .clone()
        .or_else(|| meta.and_then(|m| m.table.clone()))
        .or_else(|| {
            args.target_file
                .as_ref()
                .and_then(|path| path.file_stem())
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "target".to_string())
}

fn target_label(args: &AuditArgs) -> String {
    args.target_db
        .as_ref()
        .and_then(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Target".to_string())
}
