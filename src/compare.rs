//! Type-aware cell equality.
//!
//! Every comparison first applies the shared null/blank policy, then one of
//! the three typed rules. Numeric and date cells that cannot be parsed fall
//! back to character comparison; a date column whose format cannot be
//! determined is degraded to character for the rest of the run.

use std::{fmt, str::FromStr};

use bigdecimal::{BigDecimal, Zero};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    classify::{ComparisonType, is_date_shaped, looks_numeric},
    columns::{ColumnDescriptor, ColumnOrdinal},
    date_format::DateFormatCache,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Equal,
    Unequal,
    Skipped,
}

/// Result of parsing a cell for a typed comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Ok(T),
    Degraded(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToleranceMode {
    Absolute,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tolerance {
    pub amount: Decimal,
    pub mode: ToleranceMode,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::absolute(Decimal::ZERO)
    }
}

impl Tolerance {
    pub fn absolute(amount: Decimal) -> Self {
        Self {
            amount: amount.abs(),
            mode: ToleranceMode::Absolute,
        }
    }

    pub fn percent(amount: Decimal) -> Self {
        Self {
            amount: amount.abs(),
            mode: ToleranceMode::Percent,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Whether two unequal numbers are close enough. Percentages are taken
    /// relative to the target; a zero target only tolerates a zero source.
    pub fn within(&self, target: Decimal, source: Decimal) -> bool {
        let Some(difference) = target.checked_sub(source).map(|d| d.abs()) else {
            return false;
        };
        match self.mode {
            ToleranceMode::Absolute => difference <= self.amount,
            ToleranceMode::Percent => {
                if target.is_zero() {
                    return source.is_zero();
                }
                difference
                    .checked_div(target.abs())
                    .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                    .is_some_and(|percent| percent <= self.amount)
            }
        }
    }

    /// Same rule as [`Tolerance::within`] for values beyond the fixed-point range.
    pub fn within_wide(&self, target: &BigDecimal, source: &BigDecimal) -> bool {
        let Ok(amount) = BigDecimal::from_str(&self.amount.to_string()) else {
            return false;
        };
        let difference = (target - source).abs();
        match self.mode {
            ToleranceMode::Absolute => difference <= amount,
            ToleranceMode::Percent => {
                if target.is_zero() {
                    return source.is_zero();
                }
                difference * BigDecimal::from(100_i64) <= amount * target.abs()
            }
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ToleranceMode::Absolute => write!(f, "{}", self.amount),
            ToleranceMode::Percent => write!(f, "{}%", self.amount),
        }
    }
}

impl FromStr for Tolerance {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("Tolerance cannot be empty".to_string());
        }
        let (number, percent) = match trimmed.strip_suffix('%') {
            Some(rest) => (rest.trim(), true),
            None => (trimmed, false),
        };
        let amount = match parse_decimal(number) {
            Outcome::Ok(amount) => amount,
            Outcome::Degraded(reason) => return Err(format!("Invalid tolerance: {reason}")),
        };
        if amount.is_sign_negative() {
            return Err(format!("Tolerance must not be negative: '{value}'"));
        }
        Ok(if percent {
            Tolerance::percent(amount)
        } else {
            Tolerance::absolute(amount)
        })
    }
}

/// Parses a signed decimal or scientific literal with arbitrary scale.
pub fn parse_decimal(value: &str) -> Outcome<Decimal> {
    let trimmed = value.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let parsed = if unsigned.contains(['e', 'E']) {
        Decimal::from_scientific(unsigned)
    } else {
        Decimal::from_str_exact(unsigned)
    };
    match parsed {
        Ok(decimal) => Outcome::Ok(decimal),
        Err(err) => Outcome::Degraded(format!("'{value}' is not a decimal number ({err})")),
    }
}

/// Arbitrary-precision parse for literals wider than `Decimal` can hold.
pub fn parse_wide_decimal(value: &str) -> Option<BigDecimal> {
    let trimmed = value.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    BigDecimal::from_str(unsigned).ok()
}

fn is_blank_run(value: &str) -> bool {
    !value.is_empty() && value.chars().all(char::is_whitespace)
}

/// Null and blank equivalence. Returns `None` when both sides carry text and
/// the typed rule must decide.
pub fn compare_blank(target: Option<&str>, source: Option<&str>) -> Option<Verdict> {
    match (target, source) {
        (None, None) => Some(Verdict::Equal),
        (Some(present), None) | (None, Some(present)) => Some(if present.trim().is_empty() {
            Verdict::Equal
        } else {
            Verdict::Unequal
        }),
        (Some(target), Some(source)) => {
            let target_blank = target.trim().is_empty();
            let source_blank = source.trim().is_empty();
            match (target_blank, source_blank) {
                (false, false) => None,
                (true, true) => Some(compare_character(target, source)),
                _ => Some(Verdict::Unequal),
            }
        }
    }
}

pub fn compare_character(target: &str, source: &str) -> Verdict {
    if target.trim() != source.trim() {
        return Verdict::Unequal;
    }
    if is_blank_run(target)
        && is_blank_run(source)
        && target.chars().count() != source.chars().count()
    {
        return Verdict::Unequal;
    }
    Verdict::Equal
}

pub fn compare_numeric(target: &str, source: &str, tolerance: &Tolerance) -> Outcome<Verdict> {
    let equal = match (parse_decimal(target), parse_decimal(source)) {
        (Outcome::Ok(target_value), Outcome::Ok(source_value))
            if target_value.checked_sub(source_value).is_some() =>
        {
            target_value == source_value || tolerance.within(target_value, source_value)
        }
        (target_outcome, source_outcome) => {
            match (parse_wide_decimal(target), parse_wide_decimal(source)) {
                (Some(target_value), Some(source_value)) => {
                    target_value == source_value
                        || tolerance.within_wide(&target_value, &source_value)
                }
                _ => {
                    let reason = [target_outcome, source_outcome]
                        .into_iter()
                        .find_map(|outcome| match outcome {
                            Outcome::Degraded(reason) => Some(reason),
                            Outcome::Ok(_) => None,
                        })
                        .unwrap_or_else(|| {
                            format!("'{target}' and '{source}' are not comparable numbers")
                        });
                    return Outcome::Degraded(reason);
                }
            }
        }
    };
    Outcome::Ok(if equal { Verdict::Equal } else { Verdict::Unequal })
}

/// Verdict for one cell plus what happened along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellResult {
    pub verdict: Verdict,
    pub warning: Option<String>,
    pub degraded_column: bool,
}

impl CellResult {
    fn plain(verdict: Verdict) -> Self {
        Self {
            verdict,
            warning: None,
            degraded_column: false,
        }
    }

    fn fallback(target: &str, source: &str, reason: String) -> Self {
        Self {
            verdict: compare_character(target, source),
            warning: Some(reason),
            degraded_column: false,
        }
    }
}

/// Stateful comparator bound to one run's tolerance and date formats.
pub struct CellComparator<'a> {
    pub tolerance: &'a Tolerance,
    pub numeric_strings: bool,
    pub formats: &'a mut DateFormatCache,
}

impl CellComparator<'_> {
    pub fn compare(
        &mut self,
        column: &mut ColumnDescriptor,
        target: Option<&str>,
        source: Option<&str>,
    ) -> CellResult {
        if let Some(verdict) = compare_blank(target, source) {
            return CellResult::plain(verdict);
        }
        let (Some(target), Some(source)) = (target, source) else {
            return CellResult::plain(Verdict::Equal);
        };
        match column.comparison {
            ComparisonType::Character => self.compare_clever(column, target, source),
            ComparisonType::Numeric => self.numeric_or_character(target, source),
            ComparisonType::Date => {
                let result = self.compare_dates(column, target, source, true);
                if result.degraded_column {
                    column.degrade();
                }
                result
            }
        }
    }

    fn numeric_or_character(&self, target: &str, source: &str) -> CellResult {
        match compare_numeric(target, source, self.tolerance) {
            Outcome::Ok(verdict) => CellResult::plain(verdict),
            Outcome::Degraded(reason) => CellResult::fallback(
                target,
                source,
                format!("{reason}; comparing '{target}' and '{source}' as character"),
            ),
        }
    }

    /// Text columns holding numbers compare numerically; date-shaped cells
    /// only compare as dates when both sides look like dates.
    fn compare_clever(&mut self, column: &ColumnDescriptor, target: &str, source: &str) -> CellResult {
        if !self.numeric_strings || !looks_numeric(target) || !looks_numeric(source) {
            return CellResult::plain(compare_character(target, source));
        }
        match (is_date_shaped(target), is_date_shaped(source)) {
            (true, true) => {
                let mut result = self.compare_dates(column, target, source, false);
                result.degraded_column = false;
                result
            }
            (false, false) => self.numeric_or_character(target, source),
            _ => CellResult::plain(compare_character(target, source)),
        }
    }

    /// Only declared date columns may refine the shared target format.
    fn compare_dates(
        &mut self,
        column: &ColumnDescriptor,
        target: &str,
        source: &str,
        refine: bool,
    ) -> CellResult {
        let index = column.ordinal.index();
        let Some(source_format) = self.formats.resolve_source(index, source).cloned() else {
            return degraded_date(
                target,
                source,
                format!("Unrecognisable source date format '{source}'"),
            );
        };
        if refine {
            self.formats.refine_target(target, &column.name);
        }
        let Some(target_format) = self.formats.target_format().cloned() else {
            return degraded_date(target, source, "No target date format in force".to_string());
        };
        let Some(target_instant) = target_format.parse(target) else {
            return degraded_date(
                target,
                source,
                format!(
                    "Target date '{target}' does not match format {}",
                    target_format.pattern()
                ),
            );
        };
        let Some(source_instant) = source_format.parse(source) else {
            return degraded_date(
                target,
                source,
                format!(
                    "Source date '{source}' does not match format {}",
                    source_format.pattern()
                ),
            );
        };
        CellResult::plain(if target_instant == source_instant {
            Verdict::Equal
        } else {
            Verdict::Unequal
        })
    }
}

fn degraded_date(target: &str, source: &str, reason: String) -> CellResult {
    CellResult {
        verdict: compare_character(target, source),
        warning: Some(format!("{reason}; treating the column as character data")),
        degraded_column: true,
    }
}

/// One-off comparison without run state: date formats are discovered from
/// the two cells themselves.
pub fn compare(
    kind: ComparisonType,
    target: Option<&str>,
    source: Option<&str>,
    tolerance: &Tolerance,
) -> Verdict {
    let target_format = target.and_then(|value| crate::date_format::resolve(value, None));
    let mut formats = DateFormatCache::new(1, None, target_format);
    let mut column = ColumnDescriptor::new(ColumnOrdinal::from_index(0), "value");
    column.comparison = kind;
    let mut comparator = CellComparator {
        tolerance,
        numeric_strings: true,
        formats: &mut formats,
    };
    comparator.compare(&mut column, target, source).verdict
}
