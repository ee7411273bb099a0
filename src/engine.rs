//! The row audit loop.
//!
//! Each source row goes through
//! `Priming → Reading → KeyLookup → ColumnCompare → Counting`, then back to
//! `Reading` or to `Terminated`. Input exhaustion and a threshold breach both
//! end in `Terminated` and produce the same [`AuditSummary`]. The optional
//! reverse pass runs only after input is exhausted.

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    classify::{ComparisonType, classify, is_date_shaped, name_suggests_date},
    columns::{ColumnDescriptor, KeyTuple, KeyValues, Provenance, extract_key},
    compare::{CellComparator, Tolerance, Verdict},
    date_format::{DateFormat, DateFormatCache, resolve},
    error::Result,
    source::{Row, RowSource},
    target::{LookupResult, TargetProvider},
};

pub const DEFAULT_MAX_ERRORS: u64 = 20_000;
pub const DEFAULT_MAX_ERROR_ROWS: u64 = 20_000;
pub const DEFAULT_PROGRESS_EVERY: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub tolerance: Tolerance,
    /// Compare numeric-looking text in character columns as numbers.
    pub numeric_strings: bool,
    /// Zero disables the limit.
    pub max_errors: u64,
    /// Zero disables the limit.
    pub max_error_rows: u64,
    pub skip_rows: u64,
    pub reverse: bool,
    pub progress_every: u64,
    pub suppress_warnings: bool,
    pub source_date_hint: Option<DateFormat>,
    pub target_date_format: Option<DateFormat>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            numeric_strings: true,
            max_errors: DEFAULT_MAX_ERRORS,
            max_error_rows: DEFAULT_MAX_ERROR_ROWS,
            skip_rows: 0,
            reverse: false,
            progress_every: DEFAULT_PROGRESS_EVERY,
            suppress_warnings: false,
            source_date_hint: None,
            target_date_format: DateFormat::new("%Y-%m-%d"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    /// Every data row read, skipped rows included.
    pub rows_checked: u64,
    pub rows_skipped: u64,
    pub rows_with_errors: u64,
    pub columns_with_errors: u64,
    pub non_key_columns_audited: u64,
    pub missing_rows: u64,
    pub reverse_missing: u64,
}

impl RunCounters {
    pub fn total_errors(&self) -> u64 {
        self.columns_with_errors + self.missing_rows + self.reverse_missing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    EndOfInput,
    MaxErrors,
    MaxErrorRows,
}

impl Termination {
    pub fn is_breach(self) -> bool {
        !matches!(self, Termination::EndOfInput)
    }
}

/// One unequal cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub key: KeyValues,
    pub column_name: String,
    pub column_position: usize,
    pub target: Option<String>,
    pub source: Option<String>,
    pub row_number: u64,
    pub provenance: Provenance,
    /// Target and source patterns, for date columns only.
    pub date_formats: Option<(String, String)>,
}

/// A source row whose key found no target row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRow {
    pub key: KeyValues,
    pub row_number: u64,
    pub diagnostic: Option<String>,
}

/// Receives findings as they happen. Write failures abort the run.
pub trait DiscrepancySink {
    fn discrepancy(&mut self, discrepancy: &Discrepancy) -> Result<()>;
    fn missing(&mut self, missing: &MissingRow) -> Result<()>;
    fn orphan(&mut self, key: &KeyValues) -> Result<()>;
}

/// Collects findings in memory.
#[derive(Debug, Default)]
pub struct Findings {
    pub discrepancies: Vec<Discrepancy>,
    pub missing: Vec<MissingRow>,
    pub orphans: Vec<KeyValues>,
}

impl DiscrepancySink for Findings {
    fn discrepancy(&mut self, discrepancy: &Discrepancy) -> Result<()> {
        self.discrepancies.push(discrepancy.clone());
        Ok(())
    }

    fn missing(&mut self, missing: &MissingRow) -> Result<()> {
        self.missing.push(missing.clone());
        Ok(())
    }

    fn orphan(&mut self, key: &KeyValues) -> Result<()> {
        self.orphans.push(key.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditedColumn {
    pub position: usize,
    pub name: String,
    pub comparison: ComparisonType,
    pub key: bool,
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_date_format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub counters: RunCounters,
    pub total_errors: u64,
    pub termination: Termination,
    pub reverse_ran: bool,
    pub tolerance: String,
    pub numeric_strings: bool,
    pub target_date_format: Option<String>,
    pub columns: Vec<AuditedColumn>,
    pub trailer: Option<Vec<String>>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl AuditSummary {
    /// The statistics line shared by the log and the report footer.
    pub fn statistics_line(&self) -> String {
        let c = &self.counters;
        let mut line = format!(
            "Rows checked: {}, Columns checked: {}, Rows with errors: {}, Columns with errors: {}, Missing rows: {}, Total of all errors: {}",
            c.rows_checked,
            c.non_key_columns_audited,
            c.rows_with_errors,
            c.columns_with_errors,
            c.missing_rows,
            self.total_errors
        );
        if self.reverse_ran {
            line.push_str(&format!(", Reverse-compare loss: {}", c.reverse_missing));
        }
        line
    }
}

/// Everything one run mutates, owned in one place.
pub struct RunContext {
    pub settings: AuditSettings,
    pub columns: Vec<ColumnDescriptor>,
    pub key: KeyTuple,
    pub counters: RunCounters,
    pub formats: DateFormatCache,
    source_primed: bool,
    target_primed: bool,
}

impl RunContext {
    pub fn new(settings: AuditSettings, columns: Vec<ColumnDescriptor>, key: KeyTuple) -> Self {
        let formats = DateFormatCache::new(
            columns.len(),
            settings.source_date_hint.clone(),
            settings.target_date_format.clone(),
        );
        Self {
            settings,
            columns,
            key,
            counters: RunCounters::default(),
            formats,
            source_primed: false,
            target_primed: false,
        }
    }

    fn warn(&self, message: &str) {
        if !self.settings.suppress_warnings {
            warn!("{message}");
        }
    }

    fn max_errors_reached(&self) -> bool {
        self.settings.max_errors > 0 && self.counters.total_errors() >= self.settings.max_errors
    }

    fn max_error_rows_reached(&self) -> bool {
        self.settings.max_error_rows > 0
            && self.counters.rows_with_errors >= self.settings.max_error_rows
    }

    fn prime_source(&mut self, row: &Row) {
        for column in self.columns.iter_mut() {
            if column.is_key || column.is_ignored() {
                continue;
            }
            let value = row.get(column.ordinal.index()).and_then(Option::as_deref);
            let kind = classify(value, &column.name);
            if kind == ComparisonType::Date
                && let Some(sample) = value
                && let Some(format) = self.formats.resolve_source(column.ordinal.index(), sample)
            {
                debug!(
                    "Source column '{}' uses date format {}",
                    column.name,
                    format.pattern()
                );
            }
            if !column.pinned {
                column.comparison = kind;
            }
            debug!("Source column '{}' primed as {kind}", column.name);
        }
        self.source_primed = true;
    }

    /// Sets comparison types from the first matched target row and picks the
    /// target date format from its date-shaped values. A day above 12 settles
    /// the format; otherwise a later column may still replace it. A null
    /// value in a column named like a date still makes it a date column.
    fn prime_target(&mut self, row: &Row) {
        let mut guess: Option<(DateFormat, String, String)> = None;
        for column in self.columns.iter_mut() {
            if column.is_key || column.is_ignored() {
                continue;
            }
            let value = row.get(column.ordinal.index()).and_then(Option::as_deref);
            let kind = match value.filter(|v| !v.is_empty()) {
                None if name_suggests_date(&column.name) => ComparisonType::Date,
                _ => classify(value, &column.name),
            };
            if !column.pinned {
                column.comparison = kind;
            }
            debug!("Target column '{}' primed as {}", column.name, column.comparison);
            if column.comparison != ComparisonType::Date {
                continue;
            }
            let Some(sample) = value.filter(|v| is_date_shaped(v)) else {
                continue;
            };
            if guess
                .as_ref()
                .is_some_and(|(format, settled, _)| format.day_exceeds_twelve(settled))
            {
                continue;
            }
            let hint = self.formats.target_format();
            if let Some(format) = resolve(sample, hint) {
                guess = Some((format, sample.to_string(), column.name.clone()));
            }
        }
        if let Some((format, sample, column)) = guess {
            self.formats.prime_target(format, &sample, &column);
        }
        self.target_primed = true;
    }

    fn audited_columns(&self) -> Vec<AuditedColumn> {
        self.columns
            .iter()
            .map(|column| AuditedColumn {
                position: column.ordinal.position(),
                name: column.name.clone(),
                comparison: column.comparison,
                key: column.is_key,
                ignored: column.is_ignored(),
                source_date_format: (column.comparison == ComparisonType::Date)
                    .then(|| self.formats.source_format(column.ordinal.index()))
                    .flatten()
                    .map(|format| format.pattern().to_string()),
            })
            .collect()
    }
}

enum State {
    Reading,
    Priming { row: Row },
    KeyLookup { row: Row },
    ColumnCompare { row: Row, key: KeyValues, found: Row },
    Counting { row_errors: u64, breached: bool },
    Terminated(Termination),
}

pub fn run_audit(
    context: &mut RunContext,
    source: &mut dyn RowSource,
    target: &mut dyn TargetProvider,
    sink: &mut dyn DiscrepancySink,
) -> Result<AuditSummary> {
    let started_at = Local::now();
    info!(
        "Auditing {} against {} on key ({})",
        source.describe(),
        target.describe(),
        context.key.names(&context.columns).join(", ")
    );

    let mut state = State::Reading;
    let termination = loop {
        state = match state {
            State::Reading => match source.next_row()? {
                None => State::Terminated(Termination::EndOfInput),
                Some(row) => {
                    context.counters.rows_checked += 1;
                    if context.counters.rows_checked <= context.settings.skip_rows {
                        context.counters.rows_skipped += 1;
                        State::Reading
                    } else if !context.source_primed {
                        State::Priming { row }
                    } else {
                        State::KeyLookup { row }
                    }
                }
            },
            State::Priming { row } => {
                context.prime_source(&row);
                State::KeyLookup { row }
            }
            State::KeyLookup { row } => {
                let key = extract_key(&row, &context.key);
                if context.settings.reverse {
                    target.record_key(&key)?;
                }
                match target.lookup(&key) {
                    LookupResult::Found(found) => State::ColumnCompare { row, key, found },
                    LookupResult::NotFound => record_miss(context, sink, key, None)?,
                    LookupResult::Failed(diagnostic) => {
                        context.warn(&format!("Lookup failed for key ({key}): {diagnostic}"));
                        record_miss(context, sink, key, Some(diagnostic))?
                    }
                }
            }
            State::ColumnCompare { row, key, found } => {
                compare_row(context, sink, &row, &key, &found)?
            }
            State::Counting {
                row_errors,
                breached,
            } => {
                if row_errors > 0 {
                    context.counters.rows_with_errors += 1;
                }
                report_progress(context);
                if breached {
                    State::Terminated(Termination::MaxErrors)
                } else if context.max_error_rows_reached() {
                    State::Terminated(Termination::MaxErrorRows)
                } else {
                    State::Reading
                }
            }
            State::Terminated(reason) => break reason,
        };
    };

    let mut termination = termination;
    let reverse_ran = context.settings.reverse && termination == Termination::EndOfInput;
    if reverse_ran {
        termination = reverse_pass(context, target, sink)?;
    }
    if let Some(trailer) = source.trailer() {
        info!(
            "Trailer record: {}; data rows read: {}",
            trailer.join("|"),
            context.counters.rows_checked
        );
    }

    let summary = AuditSummary {
        counters: context.counters.clone(),
        total_errors: context.counters.total_errors(),
        termination,
        reverse_ran,
        tolerance: context.settings.tolerance.to_string(),
        numeric_strings: context.settings.numeric_strings,
        target_date_format: context
            .formats
            .target_format()
            .map(|format| format.pattern().to_string()),
        columns: context.audited_columns(),
        trailer: source.trailer().map(<[String]>::to_vec),
        started_at,
        finished_at: Local::now(),
    };
    match termination {
        Termination::EndOfInput => info!("Audit complete. {}", summary.statistics_line()),
        Termination::MaxErrors => info!(
            "Maximum errors parameter was reached: {}. {}",
            summary.total_errors,
            summary.statistics_line()
        ),
        Termination::MaxErrorRows => info!(
            "Maximum rows with errors parameter was reached: {}. {}",
            summary.counters.rows_with_errors,
            summary.statistics_line()
        ),
    }
    Ok(summary)
}

fn record_miss(
    context: &mut RunContext,
    sink: &mut dyn DiscrepancySink,
    key: KeyValues,
    diagnostic: Option<String>,
) -> Result<State> {
    context.counters.missing_rows += 1;
    sink.missing(&MissingRow {
        key,
        row_number: context.counters.rows_checked,
        diagnostic,
    })?;
    Ok(State::Counting {
        row_errors: 0,
        breached: context.max_errors_reached(),
    })
}

fn compare_row(
    context: &mut RunContext,
    sink: &mut dyn DiscrepancySink,
    row: &Row,
    key: &KeyValues,
    target: &Row,
) -> Result<State> {
    if !context.target_primed {
        context.prime_target(target);
    }
    if row.len() != target.len() {
        context.warn(&format!(
            "Row {} has {} source column(s) but the target returned {}; comparing the first {}",
            context.counters.rows_checked,
            row.len(),
            target.len(),
            row.len().min(target.len())
        ));
    }
    let width = row.len().min(target.len()).min(context.columns.len());
    let mut row_errors = 0u64;
    let mut breached = false;
    for idx in 0..width {
        let column = &mut context.columns[idx];
        if column.is_key || column.is_ignored() {
            continue;
        }
        context.counters.non_key_columns_audited += 1;
        let mut comparator = CellComparator {
            tolerance: &context.settings.tolerance,
            numeric_strings: context.settings.numeric_strings,
            formats: &mut context.formats,
        };
        let result = comparator.compare(column, target[idx].as_deref(), row[idx].as_deref());
        let is_date = column.comparison == ComparisonType::Date;
        let name = column.name.clone();
        let provenance = column.provenance.clone();
        if let Some(warning) = result.warning {
            context.warn(&format!(
                "Row {} column {} ({name}): {warning}",
                context.counters.rows_checked,
                idx + 1
            ));
        }
        if result.verdict != Verdict::Unequal {
            continue;
        }
        context.counters.columns_with_errors += 1;
        row_errors += 1;
        let date_formats = is_date.then(|| {
            (
                pattern_or_null(context.formats.target_format()),
                pattern_or_null(context.formats.source_format(idx)),
            )
        });
        sink.discrepancy(&Discrepancy {
            key: key.clone(),
            column_name: name,
            column_position: idx + 1,
            target: target[idx].clone(),
            source: row[idx].clone(),
            row_number: context.counters.rows_checked,
            provenance,
            date_formats,
        })?;
        if context.max_errors_reached() {
            breached = true;
            break;
        }
    }
    Ok(State::Counting {
        row_errors,
        breached,
    })
}

fn pattern_or_null(format: Option<&DateFormat>) -> String {
    format.map_or_else(|| "Null".to_string(), |f| f.pattern().to_string())
}

fn report_progress(context: &RunContext) {
    let every = context.settings.progress_every;
    let rows = context.counters.rows_checked;
    if rows == 1 || (every > 0 && rows % every == 0) {
        let c = &context.counters;
        info!(
            "Rows checked: {}, Columns checked: {}, Rows with errors: {}, Columns with errors: {}, Total of all errors: {}",
            c.rows_checked,
            c.non_key_columns_audited,
            c.rows_with_errors,
            c.columns_with_errors,
            c.total_errors()
        );
    }
}

fn reverse_pass(
    context: &mut RunContext,
    target: &mut dyn TargetProvider,
    sink: &mut dyn DiscrepancySink,
) -> Result<Termination> {
    info!("Reverse compare started");
    let orphans = target.orphan_keys()?;
    for key in orphans {
        context.counters.reverse_missing += 1;
        sink.orphan(&key)?;
        if context.max_errors_reached() {
            info!("Reverse compare stopped at the error limit");
            return Ok(Termination::MaxErrors);
        }
    }
    info!(
        "Reverse compare ended: {} target row(s) without a source row",
        context.counters.reverse_missing
    );
    Ok(Termination::EndOfInput)
}
