//! YAML column metadata for an audit.
//!
//! The file names the source columns in order, marks key columns, may pin a
//! comparison type, and records where each column came from upstream.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    classify::ComparisonType,
    columns::{ColumnDescriptor, Provenance, is_ignored_name},
    error::{AuditError, Result},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_as: Option<ComparisonType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The pinned kind, else the kind implied by the upstream type name.
    pub fn comparison_hint(&self) -> Option<ComparisonType> {
        self.compare_as.or_else(|| {
            self.source_type
                .as_deref()
                .map(ComparisonType::from_metadata_type)
        })
    }

    fn provenance(&self, table: Option<&str>) -> Provenance {
        Provenance {
            source_type: self.source_type.clone(),
            source_column: self.source_column.clone(),
            source_table: self
                .source_table
                .clone()
                .or_else(|| table.map(str::to_string)),
        }
    }
}

impl AuditMeta {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            AuditError::configuration(format!("Opening metadata file {path:?}: {err}"))
        })?;
        let meta: AuditMeta = serde_yaml::from_reader(BufReader::new(file))?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_yaml::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(AuditError::configuration(
                "Metadata does not define any columns",
            ));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if is_ignored_name(&column.name) {
                if column.key {
                    return Err(AuditError::configuration(format!(
                        "Column {} is an ignored placeholder and cannot be a key",
                        idx + 1
                    )));
                }
                continue;
            }
            let duplicate = self.columns[..idx]
                .iter()
                .any(|earlier| earlier.name.eq_ignore_ascii_case(&column.name));
            if duplicate {
                return Err(AuditError::configuration(format!(
                    "Column '{}' is defined more than once in the metadata",
                    column.name
                )));
            }
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn key_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Copies provenance onto descriptors matched by name and pins the type
    /// given by `compare_as` or implied by `source_type`.
    pub fn apply(&self, columns: &mut [ColumnDescriptor]) {
        for column in columns.iter_mut() {
            let Some(meta) = self
                .columns
                .iter()
                .find(|meta| meta.name.eq_ignore_ascii_case(&column.name))
            else {
                continue;
            };
            column.provenance = meta.provenance(self.table.as_deref());
            if let Some(kind) = meta.comparison_hint() {
                column.comparison = kind;
                column.pinned = true;
            }
        }
    }
}
