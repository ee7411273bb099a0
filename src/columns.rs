//! Column descriptors and key tuples.
//!
//! Columns are stored 0-based and reported 1-based. The key tuple is fixed
//! once setup is complete and key values are always extracted in key order.

use std::fmt;

use serde::Serialize;

use crate::{
    classify::ComparisonType,
    error::{AuditError, Result},
};

/// Practical upper bound on the number of key columns.
pub const MAX_KEY_COLUMNS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ColumnOrdinal(usize);

impl ColumnOrdinal {
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Builds an ordinal from a 1-based position as typed by an operator.
    pub fn from_position(position: usize) -> Option<Self> {
        position.checked_sub(1).map(Self)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn position(self) -> usize {
        self.0 + 1
    }
}

impl fmt::Display for ColumnOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.position())
    }
}

/// Where a column came from in the upstream system, for the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub source_type: Option<String>,
    pub source_column: Option<String>,
    pub source_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub ordinal: ColumnOrdinal,
    pub name: String,
    pub comparison: ComparisonType,
    pub is_key: bool,
    /// Set when metadata fixed the comparison type; priming leaves it alone.
    pub pinned: bool,
    pub provenance: Provenance,
}

impl ColumnDescriptor {
    pub fn new(ordinal: ColumnOrdinal, name: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            comparison: ComparisonType::Character,
            is_key: false,
            pinned: false,
            provenance: Provenance::default(),
        }
    }

    /// Drops the column to character comparison. Never upgrades.
    pub fn degrade(&mut self) {
        self.comparison = ComparisonType::Character;
    }

    pub fn is_ignored(&self) -> bool {
        is_ignored_name(&self.name)
    }
}

/// Blank names and the quoted-empty placeholders mark columns that exist
/// only to keep positions aligned.
pub fn is_ignored_name(name: &str) -> bool {
    matches!(name.trim(), "" | "''" | "\"\"")
}

/// Ordered key column ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTuple {
    ordinals: Vec<ColumnOrdinal>,
}

impl KeyTuple {
    pub fn new(ordinals: Vec<ColumnOrdinal>) -> Result<Self> {
        if ordinals.is_empty() {
            return Err(AuditError::configuration("At least one key column is required"));
        }
        if ordinals.len() > MAX_KEY_COLUMNS {
            return Err(AuditError::configuration(format!(
                "{} key columns requested; at most {MAX_KEY_COLUMNS} are supported",
                ordinals.len()
            )));
        }
        for (idx, ordinal) in ordinals.iter().enumerate() {
            if ordinals[..idx].contains(ordinal) {
                return Err(AuditError::configuration(format!(
                    "Key column {ordinal} is listed more than once"
                )));
            }
        }
        Ok(Self { ordinals })
    }

    /// Resolves `--key` entries given either as column names or 1-based
    /// positions.
    pub fn parse(specs: &[String], column_names: &[String]) -> Result<Self> {
        let mut ordinals = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = spec.trim();
            let ordinal = if let Ok(position) = spec.parse::<usize>() {
                let ordinal = ColumnOrdinal::from_position(position).ok_or_else(|| {
                    AuditError::configuration("Key positions are 1-based; 0 is not a column")
                })?;
                if !column_names.is_empty() && ordinal.index() >= column_names.len() {
                    return Err(AuditError::configuration(format!(
                        "Key position {position} exceeds the {} available columns",
                        column_names.len()
                    )));
                }
                ordinal
            } else {
                column_names
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(spec))
                    .map(ColumnOrdinal::from_index)
                    .ok_or_else(|| {
                        AuditError::configuration(format!("Key column '{spec}' not found"))
                    })?
            };
            ordinals.push(ordinal);
        }
        Self::new(ordinals)
    }

    pub fn ordinals(&self) -> &[ColumnOrdinal] {
        &self.ordinals
    }

    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }

    pub fn contains(&self, ordinal: ColumnOrdinal) -> bool {
        self.ordinals.contains(&ordinal)
    }

    pub fn names<'a>(&self, columns: &'a [ColumnDescriptor]) -> Vec<&'a str> {
        self.ordinals
            .iter()
            .filter_map(|ordinal| columns.get(ordinal.index()))
            .map(|column| column.name.as_str())
            .collect()
    }
}

/// Key values of one row, trimmed, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValues(Vec<String>);

impl KeyValues {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Missing cells contribute empty strings.
pub fn extract_key(row: &[Option<String>], key: &KeyTuple) -> KeyValues {
    KeyValues(
        key.ordinals()
            .iter()
            .map(|ordinal| {
                row.get(ordinal.index())
                    .and_then(Option::as_deref)
                    .map(|value| value.trim().to_string())
                    .unwrap_or_default()
            })
            .collect(),
    )
}

/// Builds descriptors for a set of column names, flagging key columns.
pub fn describe_columns(names: &[String], key: &KeyTuple) -> Vec<ColumnDescriptor> {
    names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let ordinal = ColumnOrdinal::from_index(idx);
            let mut column = ColumnDescriptor::new(ordinal, name.clone());
            column.is_key = key.contains(ordinal);
            column
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn ordinals_report_one_based_positions() {
        let ordinal = ColumnOrdinal::from_index(2);
        assert_eq!(ordinal.position(), 3);
        assert_eq!(ordinal.to_string(), "3");
        assert_eq!(ColumnOrdinal::from_position(1), Some(ColumnOrdinal::from_index(0)));
        assert_eq!(ColumnOrdinal::from_position(0), None);
    }

    #[test]
    fn key_parse_accepts_names_and_positions() {
        let columns = names(&["id", "region", "amount"]);
        let key = KeyTuple::parse(&names(&["REGION", "1"]), &columns).unwrap();
        assert_eq!(
            key.ordinals(),
            &[ColumnOrdinal::from_index(1), ColumnOrdinal::from_index(0)]
        );
    }

    #[test]
    fn key_parse_rejects_bad_configuration() {
        let columns = names(&["id", "amount"]);
        assert!(matches!(
            KeyTuple::parse(&names(&["missing"]), &columns),
            Err(AuditError::Configuration(_))
        ));
        assert!(KeyTuple::parse(&names(&["0"]), &columns).is_err());
        assert!(KeyTuple::parse(&names(&["3"]), &columns).is_err());
        assert!(KeyTuple::parse(&names(&["id", "1"]), &columns).is_err());
        assert!(KeyTuple::parse(&[], &columns).is_err());
    }

    #[test]
    fn key_tuple_enforces_capacity() {
        let too_many = (0..=MAX_KEY_COLUMNS).map(ColumnOrdinal::from_index).collect();
        assert!(KeyTuple::new(too_many).is_err());
    }

    #[test]
    fn extract_key_trims_and_fills_missing_cells() {
        let key = KeyTuple::new(vec![ColumnOrdinal::from_index(2), ColumnOrdinal::from_index(0)])
            .unwrap();
        let row = vec![Some(" 7 ".to_string()), Some("x".to_string())];
        let values = extract_key(&row, &key);
        assert_eq!(values.as_slice(), &["".to_string(), "7".to_string()]);
        assert_eq!(values.to_string(), ", 7");
    }

    #[test]
    fn ignore_sentinels_are_recognised() {
        assert!(is_ignored_name("''"));
        assert!(is_ignored_name("\"\""));
        assert!(is_ignored_name("  "));
        assert!(!is_ignored_name("amount"));
    }

    #[test]
    fn degrade_only_moves_to_character() {
        let mut column = ColumnDescriptor::new(ColumnOrdinal::from_index(0), "posted");
        column.comparison = ComparisonType::Date;
        column.degrade();
        assert_eq!(column.comparison, ComparisonType::Character);
    }
}
