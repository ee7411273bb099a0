//! Date format discovery by round-trip verification.
//!
//! A candidate pattern is accepted for a sample when parsing the sample with
//! the pattern and formatting the result again reproduces the sample exactly.
//! Candidates are tried in the fixed order of [`DATE_PATTERNS`]:
//!
//! - two-digit years before four-digit years,
//! - then `/` before `-` before space separated layouts,
//! - then date-only before date+time before fractional seconds.
//!
//! Day/month-interchangeable samples such as `05/03/08` therefore resolve to
//! whichever pattern comes first. [`DateFormat::day_exceeds_twelve`] lets
//! callers tell an unambiguous guess from a lucky one.

use std::fmt::Write as _;

use chrono::{
    Datelike, NaiveDate, NaiveDateTime, NaiveTime,
    format::{Item, Numeric, StrftimeItems},
};
use log::info;

use crate::classify::is_date_shaped;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum YearWidth {
    TwoDigit,
    FourDigit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Separator {
    Slash,
    Dash,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Clock {
    DateOnly,
    Time,
    Fractional,
}

/// One entry of the candidate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePattern {
    pub format: &'static str,
    pub year: YearWidth,
    pub separator: Separator,
    pub clock: Clock,
}

impl DatePattern {
    const fn new(format: &'static str, year: YearWidth, separator: Separator, clock: Clock) -> Self {
        Self {
            format,
            year,
            separator,
            clock,
        }
    }

    /// Position of this pattern's group in the priority order.
    pub fn priority(&self) -> (YearWidth, Separator, Clock) {
        (self.year, self.separator, self.clock)
    }
}

use Clock::{DateOnly, Fractional, Time};
use Separator::{Dash, Slash, Space};
use YearWidth::{FourDigit, TwoDigit};

pub const DATE_PATTERNS: &[DatePattern] = &[
    DatePattern::new("%d/%m/%y", TwoDigit, Slash, DateOnly),
    DatePattern::new("%y/%m/%d", TwoDigit, Slash, DateOnly),
    DatePattern::new("%d/%b/%y", TwoDigit, Slash, DateOnly),
    DatePattern::new("%y/%b/%d", TwoDigit, Slash, DateOnly),
    DatePattern::new("%d/%m/%y %H:%M:%S", TwoDigit, Slash, Time),
    DatePattern::new("%y/%m/%d %H:%M:%S", TwoDigit, Slash, Time),
    DatePattern::new("%d/%b/%y %H:%M:%S", TwoDigit, Slash, Time),
    DatePattern::new("%y/%b/%d %H:%M:%S", TwoDigit, Slash, Time),
    DatePattern::new("%d/%m/%y %S:%M:%H", TwoDigit, Slash, Time),
    DatePattern::new("%y/%m/%d %S:%M:%H", TwoDigit, Slash, Time),
    DatePattern::new("%d/%m/%y %H:%M", TwoDigit, Slash, Time),
    DatePattern::new("%y/%m/%d %H:%M", TwoDigit, Slash, Time),
    DatePattern::new("%d/%b/%y %H:%M", TwoDigit, Slash, Time),
    DatePattern::new("%y/%b/%d %H:%M", TwoDigit, Slash, Time),
    DatePattern::new("%d-%m-%y", TwoDigit, Dash, DateOnly),
    DatePattern::new("%y-%m-%d", TwoDigit, Dash, DateOnly),
    DatePattern::new("%d-%b-%y", TwoDigit, Dash, DateOnly),
    DatePattern::new("%y-%b-%d", TwoDigit, Dash, DateOnly),
    DatePattern::new("%d-%m-%y %H:%M:%S", TwoDigit, Dash, Time),
    DatePattern::new("%y-%m-%d %H:%M:%S", TwoDigit, Dash, Time),
    DatePattern::new("%d-%b-%y %H:%M:%S", TwoDigit, Dash, Time),
    DatePattern::new("%y-%b-%d %H:%M:%S", TwoDigit, Dash, Time),
    DatePattern::new("%d-%m-%y %S:%M:%H", TwoDigit, Dash, Time),
    DatePattern::new("%y-%m-%d %S:%M:%H", TwoDigit, Dash, Time),
    DatePattern::new("%d-%m-%y %H:%M", TwoDigit, Dash, Time),
    DatePattern::new("%y-%m-%d %H:%M", TwoDigit, Dash, Time),
    DatePattern::new("%d-%b-%y %H:%M", TwoDigit, Dash, Time),
    DatePattern::new("%y-%b-%d %H:%M", TwoDigit, Dash, Time),
    DatePattern::new("%b %-d, %y", TwoDigit, Space, DateOnly),
    DatePattern::new("%b %d, %y", TwoDigit, Space, DateOnly),
    DatePattern::new("%-d %b %y", TwoDigit, Space, DateOnly),
    DatePattern::new("%d %b %y", TwoDigit, Space, DateOnly),
    DatePattern::new("%b %-d, %y %H:%M", TwoDigit, Space, Time),
    DatePattern::new("%b %d, %y %H:%M", TwoDigit, Space, Time),
    DatePattern::new("%b %-d, %y %-H:%M", TwoDigit, Space, Time),
    DatePattern::new("%b %d, %y %-H:%M", TwoDigit, Space, Time),
    DatePattern::new("%-d %b %y %H:%M", TwoDigit, Space, Time),
    DatePattern::new("%d %b %y %H:%M", TwoDigit, Space, Time),
    DatePattern::new("%-d %b %y %-H:%M", TwoDigit, Space, Time),
    DatePattern::new("%d %b %y %-H:%M", TwoDigit, Space, Time),
    DatePattern::new("%d/%m/%Y", FourDigit, Slash, DateOnly),
    DatePattern::new("%Y/%m/%d", FourDigit, Slash, DateOnly),
    DatePattern::new("%d/%b/%Y", FourDigit, Slash, DateOnly),
    DatePattern::new("%Y/%b/%d", FourDigit, Slash, DateOnly),
    DatePattern::new("%d/%m/%Y %H:%M:%S", FourDigit, Slash, Time),
    DatePattern::new("%Y/%m/%d %H:%M:%S", FourDigit, Slash, Time),
    DatePattern::new("%d/%b/%Y %H:%M:%S", FourDigit, Slash, Time),
    DatePattern::new("%Y/%b/%d %H:%M:%S", FourDigit, Slash, Time),
    DatePattern::new("%d/%m/%Y %S:%M:%H", FourDigit, Slash, Time),
    DatePattern::new("%Y/%m/%d %S:%M:%H", FourDigit, Slash, Time),
    DatePattern::new("%d/%m/%Y %H:%M", FourDigit, Slash, Time),
    DatePattern::new("%Y/%m/%d %H:%M", FourDigit, Slash, Time),
    DatePattern::new("%d/%b/%Y %H:%M", FourDigit, Slash, Time),
    DatePattern::new("%Y/%b/%d %H:%M", FourDigit, Slash, Time),
    DatePattern::new("%Y/%m/%d %H:%M:%S%.3f", FourDigit, Slash, Fractional),
    DatePattern::new("%Y/%m/%d %H:%M:%S%.6f", FourDigit, Slash, Fractional),
    DatePattern::new("%Y/%m/%d %H:%M:%S%.9f", FourDigit, Slash, Fractional),
    DatePattern::new("%d-%m-%Y", FourDigit, Dash, DateOnly),
    DatePattern::new("%Y-%m-%d", FourDigit, Dash, DateOnly),
    DatePattern::new("%d-%b-%Y", FourDigit, Dash, DateOnly),
    DatePattern::new("%Y-%b-%d", FourDigit, Dash, DateOnly),
    DatePattern::new("%d-%m-%Y %H:%M:%S", FourDigit, Dash, Time),
    DatePattern::new("%Y-%m-%d %H:%M:%S", FourDigit, Dash, Time),
    DatePattern::new("%Y-%m-%dT%H:%M:%S", FourDigit, Dash, Time),
    DatePattern::new("%d-%b-%Y %H:%M:%S", FourDigit, Dash, Time),
    DatePattern::new("%Y-%b-%d %H:%M:%S", FourDigit, Dash, Time),
    DatePattern::new("%d-%m-%Y %S:%M:%H", FourDigit, Dash, Time),
    DatePattern::new("%Y-%m-%d %S:%M:%H", FourDigit, Dash, Time),
    DatePattern::new("%d-%m-%Y %H:%M", FourDigit, Dash, Time),
    DatePattern::new("%Y-%m-%d %H:%M", FourDigit, Dash, Time),
    DatePattern::new("%d-%b-%Y %H:%M", FourDigit, Dash, Time),
    DatePattern::new("%Y-%b-%d %H:%M", FourDigit, Dash, Time),
    DatePattern::new("%Y-%m-%d %H:%M:%S%.3f", FourDigit, Dash, Fractional),
    DatePattern::new("%Y-%m-%d %H:%M:%S%.6f", FourDigit, Dash, Fractional),
    DatePattern::new("%Y-%m-%d %H:%M:%S%.9f", FourDigit, Dash, Fractional),
    DatePattern::new("%b %-d, %Y", FourDigit, Space, DateOnly),
    DatePattern::new("%b %d, %Y", FourDigit, Space, DateOnly),
    DatePattern::new("%-d %b %Y", FourDigit, Space, DateOnly),
    DatePattern::new("%d %b %Y", FourDigit, Space, DateOnly),
    DatePattern::new("%b %-d, %Y %H:%M", FourDigit, Space, Time),
    DatePattern::new("%b %d, %Y %H:%M", FourDigit, Space, Time),
    DatePattern::new("%b %-d, %Y %-H:%M", FourDigit, Space, Time),
    DatePattern::new("%b %d, %Y %-H:%M", FourDigit, Space, Time),
    DatePattern::new("%-d %b %Y %H:%M", FourDigit, Space, Time),
    DatePattern::new("%d %b %Y %H:%M", FourDigit, Space, Time),
    DatePattern::new("%-d %b %Y %-H:%M", FourDigit, Space, Time),
    DatePattern::new("%d %b %Y %-H:%M", FourDigit, Space, Time),
];

/// A validated strftime pattern used to parse and re-format date cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    pattern: String,
    has_time: bool,
}

impl DateFormat {
    /// Returns `None` when the pattern contains unsupported specifiers.
    pub fn new(pattern: impl Into<String>) -> Option<Self> {
        let pattern = pattern.into();
        let mut has_time = false;
        for item in StrftimeItems::new(&pattern) {
            match item {
                Item::Error => return None,
                Item::Numeric(
                    Numeric::Hour | Numeric::Hour12 | Numeric::Minute | Numeric::Second,
                    _,
                ) => has_time = true,
                _ => {}
            }
        }
        Some(Self { pattern, has_time })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn has_time(&self) -> bool {
        self.has_time
    }

    /// Date-only patterns yield midnight.
    pub fn parse(&self, value: &str) -> Option<NaiveDateTime> {
        if self.has_time {
            NaiveDateTime::parse_from_str(value, &self.pattern).ok()
        } else {
            NaiveDate::parse_from_str(value, &self.pattern)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        }
    }

    pub fn format(&self, instant: &NaiveDateTime) -> Option<String> {
        let mut rendered = String::new();
        write!(rendered, "{}", instant.format(&self.pattern)).ok()?;
        Some(rendered)
    }

    pub fn round_trips(&self, sample: &str) -> bool {
        self.parse(sample)
            .and_then(|instant| self.format(&instant))
            .is_some_and(|rendered| rendered == sample)
    }

    /// True when the sample parses to a day-of-month that cannot be a month.
    pub fn day_exceeds_twelve(&self, sample: &str) -> bool {
        self.parse(sample).is_some_and(|instant| instant.day() > 12)
    }
}

/// Discovers a pattern that round-trips `sample`.
///
/// A hint is tried first and used only if it round-trips; otherwise the full
/// candidate table is scanned regardless of the hint.
pub fn resolve(sample: &str, hint: Option<&DateFormat>) -> Option<DateFormat> {
    if sample.is_empty() {
        return None;
    }
    if let Some(hint) = hint.filter(|hint| hint.round_trips(sample)) {
        return Some(hint.clone());
    }
    DATE_PATTERNS
        .iter()
        .filter_map(|candidate| DateFormat::new(candidate.format))
        .find(|candidate| candidate.round_trips(sample))
}

/// Resolved formats for one run: one per source column plus a single shared
/// target format.
#[derive(Debug, Clone)]
pub struct DateFormatCache {
    source: Vec<Option<DateFormat>>,
    source_hint: Option<DateFormat>,
    target: Option<DateFormat>,
    target_refined: bool,
}

impl DateFormatCache {
    pub fn new(
        column_count: usize,
        source_hint: Option<DateFormat>,
        target: Option<DateFormat>,
    ) -> Self {
        Self {
            source: vec![None; column_count],
            source_hint,
            target,
            target_refined: false,
        }
    }

    pub fn source_format(&self, index: usize) -> Option<&DateFormat> {
        self.source.get(index).and_then(Option::as_ref)
    }

    /// First successful guess for a column wins and is reused afterwards.
    pub fn resolve_source(&mut self, index: usize, sample: &str) -> Option<&DateFormat> {
        if index >= self.source.len() {
            self.source.resize(index + 1, None);
        }
        if self.source[index].is_none() {
            self.source[index] = resolve(sample, self.source_hint.as_ref());
        }
        self.source[index].as_ref()
    }

    pub fn target_format(&self) -> Option<&DateFormat> {
        self.target.as_ref()
    }

    /// Installs the format found while priming. Returns true when it changed.
    pub fn prime_target(&mut self, format: DateFormat, sample: &str, column: &str) -> bool {
        if self.target.as_ref() == Some(&format) {
            return false;
        }
        info!(
            "Changing the target date format from {} to {} (guessed from '{}' in column '{}')",
            self.target
                .as_ref()
                .map(DateFormat::pattern)
                .unwrap_or("<none>"),
            format.pattern(),
            sample,
            column
        );
        self.target = Some(format);
        true
    }

    /// Replaces the shared target format at most once per run when a later
    /// date-shaped target value round-trips with a different pattern.
    pub fn refine_target(&mut self, sample: &str, column: &str) -> bool {
        if self.target_refined || !is_date_shaped(sample) {
            return false;
        }
        if self
            .target
            .as_ref()
            .is_some_and(|current| current.round_trips(sample))
        {
            return false;
        }
        let Some(better) = resolve(sample, None) else {
            return false;
        };
        self.target_refined = true;
        self.prime_target(better, sample, column)
    }

    pub fn target_refined(&self) -> bool {
        self.target_refined
    }
}
