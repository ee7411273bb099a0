//! Per-column comparison type inference.
//!
//! A column is compared as one of three kinds. The kind is decided once from
//! a sample value and the column name, and may later only degrade to
//! [`ComparisonType::Character`].

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

static DATE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{2}[-/][0-9]{2}[-/][0-9]{2}").expect("date shape pattern"));

static NUMERIC_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?$").expect("numeric pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonType {
    Numeric,
    Date,
    Character,
}

impl ComparisonType {
    /// Maps a source-system type name such as `DECIMAL(12,2)` or `PIC 9(5)`.
    pub fn from_metadata_type(type_name: &str) -> Self {
        let upper = type_name.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return ComparisonType::Character;
        }
        const NUMERIC_MARKERS: &[&str] = &["NUM", "DEC", "INT", "FLOAT", "DOUBLE", "LONG", "PIC9"];
        let squeezed = upper.replace(' ', "");
        if NUMERIC_MARKERS
            .iter()
            .any(|marker| upper.contains(marker) || squeezed.contains(marker))
        {
            ComparisonType::Numeric
        } else if upper.contains("DATE") {
            ComparisonType::Date
        } else {
            ComparisonType::Character
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonType::Numeric => "numeric",
            ComparisonType::Date => "date",
            ComparisonType::Character => "character",
        }
    }
}

impl fmt::Display for ComparisonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "numeric" | "number" | "n" => Ok(ComparisonType::Numeric),
            "date" | "d" => Ok(ComparisonType::Date),
            "character" | "char" | "string" | "c" => Ok(ComparisonType::Character),
            other => Err(format!(
                "Unknown comparison type '{other}' (expected numeric, date or character)"
            )),
        }
    }
}

/// True when the value contains a `dd?dd?dd` run with `/` or `-` separators.
pub fn is_date_shaped(value: &str) -> bool {
    !value.is_empty() && DATE_SHAPE.is_match(value)
}

/// Signed decimal or scientific literal, ignoring surrounding whitespace.
pub fn is_numeric_literal(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && NUMERIC_LITERAL.is_match(trimmed)
}

/// Looser test used when deciding whether text cells are worth comparing as
/// numbers: digits, signs, decimal point, grouping commas and exponent
/// markers only.
pub fn looks_numeric(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed.chars().any(|c| c.is_ascii_digit())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | ',' | 'e' | 'E'))
}

pub fn name_suggests_date(column_name: &str) -> bool {
    column_name.to_ascii_lowercase().contains("date")
}

pub fn classify(value: Option<&str>, column_name_hint: &str) -> ComparisonType {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return ComparisonType::Character;
    };
    if is_date_shaped(value) || name_suggests_date(column_name_hint) {
        ComparisonType::Date
    } else if is_numeric_literal(value) {
        ComparisonType::Numeric
    } else {
        ComparisonType::Character
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_defaults_to_character_for_missing_values() {
        assert_eq!(classify(None, "amount"), ComparisonType::Character);
        assert_eq!(classify(Some(""), "order_date"), ComparisonType::Character);
    }

    #[test]
    fn classify_detects_date_shapes_and_name_hints() {
        assert_eq!(classify(Some("2008-01-31"), "posted"), ComparisonType::Date);
        assert_eq!(classify(Some("31/01/2008 20:30:05"), "x"), ComparisonType::Date);
        assert_eq!(classify(Some("ABC"), "Created_Date"), ComparisonType::Date);
    }

    #[test]
    fn classify_detects_numeric_literals() {
        assert_eq!(classify(Some("10.00"), "amount"), ComparisonType::Numeric);
        assert_eq!(classify(Some(" -1.5e3 "), "amount"), ComparisonType::Numeric);
        assert_eq!(classify(Some(".5"), "amount"), ComparisonType::Numeric);
        assert_eq!(classify(Some("   "), "amount"), ComparisonType::Character);
        assert_eq!(classify(Some("12a"), "amount"), ComparisonType::Character);
    }

    #[test]
    fn looks_numeric_accepts_grouped_and_dashed_digits() {
        assert!(looks_numeric("1,000.50"));
        assert!(looks_numeric("2008-01-31"));
        assert!(!looks_numeric("31/01/2008"));
        assert!(!looks_numeric("-"));
        assert!(!looks_numeric("abc"));
    }

    #[test]
    fn metadata_types_map_to_comparison_kinds() {
        assert_eq!(
            ComparisonType::from_metadata_type("DECIMAL(12,2)"),
            ComparisonType::Numeric
        );
        assert_eq!(
            ComparisonType::from_metadata_type("pic 9(5)"),
            ComparisonType::Numeric
        );
        assert_eq!(
            ComparisonType::from_metadata_type("DATETIME"),
            ComparisonType::Date
        );
        assert_eq!(
            ComparisonType::from_metadata_type("VARCHAR(20)"),
            ComparisonType::Character
        );
        assert_eq!(ComparisonType::from_metadata_type(""), ComparisonType::Character);
    }

    #[test]
    fn comparison_type_parses_from_text() {
        assert_eq!("Date".parse::<ComparisonType>(), Ok(ComparisonType::Date));
        assert!("blob".parse::<ComparisonType>().is_err());
    }
}
