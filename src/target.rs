//! Target query providers.
//!
//! A provider is bound once to the audit's column list and key, after which
//! [`TargetProvider::lookup`] returns at most one row per key, aligned by
//! position with the audit columns.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use encoding_rs::Encoding;
use itertools::Itertools;
use log::{debug, warn};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params_from_iter};

use crate::{
    columns::{KeyValues, is_ignored_name},
    error::{AuditError, Result},
    io_utils::{self, strip_marker},
    source::{Row, value_text},
};

pub const SOURCE_KEY_TABLE: &str = "audit_source_keys";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Found(Row),
    NotFound,
    /// The provider could not run the lookup; carries its diagnostic.
    Failed(String),
}

pub trait TargetProvider {
    fn describe(&self) -> String;

    /// Physical column names of the target, in target order.
    fn column_names(&self) -> &[String];

    /// Fixes the columns returned by lookups and the key they are found by.
    /// `key_columns` are names from `columns`, in key order.
    fn bind(&mut self, columns: &[String], key_columns: &[String]) -> Result<()>;

    fn lookup(&mut self, key: &KeyValues) -> LookupResult;

    /// Remembers a source key for the reverse pass.
    fn record_key(&mut self, key: &KeyValues) -> Result<()>;

    /// Target keys never passed to [`TargetProvider::record_key`].
    fn orphan_keys(&mut self) -> Result<Vec<KeyValues>>;

    /// Lookup and reverse queries in a form an operator can read.
    fn query_text(&self) -> String;
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.trim().replace('"', "\"\""))
}

fn resolve_target_name<'a>(physical: &'a [String], wanted: &str) -> Option<&'a String> {
    physical
        .iter()
        .find(|name| name.trim().eq_ignore_ascii_case(wanted.trim()))
}

/// `SELECT` list, `WHERE` clause and reverse query for a bound table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSql {
    pub select: String,
    pub reverse: String,
}

impl LookupSql {
    pub fn build(
        table: &str,
        physical: &[String],
        columns: &[String],
        key_columns: &[String],
    ) -> Result<Self> {
        let mut select_list = Vec::with_capacity(columns.len());
        for column in columns {
            if is_ignored_name(column) {
                select_list.push("''".to_string());
                continue;
            }
            let name = resolve_target_name(physical, column).ok_or_else(|| {
                AuditError::configuration(format!(
                    "Column '{column}' does not exist in target table '{table}'"
                ))
            })?;
            select_list.push(quote_identifier(name));
        }
        let mut keys = Vec::with_capacity(key_columns.len());
        for key in key_columns {
            let name = resolve_target_name(physical, key).ok_or_else(|| {
                AuditError::configuration(format!(
                    "Key column '{key}' does not exist in target table '{table}'"
                ))
            })?;
            keys.push(quote_identifier(name));
        }
        let table_ident = quote_identifier(table);
        let select = format!(
            "SELECT {} FROM {} WHERE {}",
            select_list.join(", "),
            table_ident,
            keys.iter()
                .enumerate()
                .map(|(idx, key)| format!("{key} = ?{}", idx + 1))
                .join(" AND ")
        );
        let reverse = format!(
            "SELECT {} FROM {} t WHERE NOT EXISTS (SELECT 1 FROM temp.{} s WHERE {}) ORDER BY {}",
            keys.iter()
                .map(|key| format!("COALESCE(CAST(t.{key} AS TEXT), '')"))
                .join(", "),
            table_ident,
            SOURCE_KEY_TABLE,
            keys.iter()
                .enumerate()
                .map(|(idx, key)| format!("s.k{} = t.{key}", idx + 1))
                .join(" AND "),
            keys.iter().map(|key| format!("t.{key}")).join(", ")
        );
        Ok(Self { select, reverse })
    }
}

pub struct SqliteTarget {
    conn: Connection,
    table: String,
    physical: Vec<String>,
    sql: Option<LookupSql>,
    key_count: usize,
    key_table_ready: bool,
    label: String,
}

impl SqliteTarget {
    pub fn open(database: &Path, table: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            database,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|err| {
            AuditError::target_error(format!("Opening target database {database:?}: {err}"))
        })?;
        Self::from_connection(conn, table, database.display().to_string())
    }

    pub fn from_connection(conn: Connection, table: &str, label: impl Into<String>) -> Result<Self> {
        let physical = {
            let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
            let names = stmt
                .query_map([table], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };
        if physical.is_empty() {
            return Err(AuditError::target_error(format!(
                "Table '{table}' was not found or has no columns"
            )));
        }
        Ok(Self {
            conn,
            table: table.to_string(),
            physical,
            sql: None,
            key_count: 0,
            key_table_ready: false,
            label: label.into(),
        })
    }

    fn bound(&self) -> Result<&LookupSql> {
        self.sql
            .as_ref()
            .ok_or_else(|| AuditError::target_error("Target lookup used before binding"))
    }

    fn ensure_key_table(&mut self) -> rusqlite::Result<()> {
        if self.key_table_ready {
            return Ok(());
        }
        let columns = (1..=self.key_count).map(|idx| format!("k{idx}")).join(", ");
        let definitions = (1..=self.key_count)
            .map(|idx| format!("k{idx} TEXT"))
            .join(", ");
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.{SOURCE_KEY_TABLE};
             CREATE TEMP TABLE {SOURCE_KEY_TABLE} ({definitions}, PRIMARY KEY ({columns}));"
        ))?;
        self.key_table_ready = true;
        Ok(())
    }
}

impl TargetProvider for SqliteTarget {
    fn describe(&self) -> String {
        format!("{} in {}", self.table, self.label)
    }

    fn column_names(&self) -> &[String] {
        &self.physical
    }

    fn bind(&mut self, columns: &[String], key_columns: &[String]) -> Result<()> {
        let sql = LookupSql::build(&self.table, &self.physical, columns, key_columns)?;
        debug!("Target lookup: {}", sql.select);
        self.conn.prepare_cached(&sql.select).map_err(|err| {
            AuditError::target_error(format!("Preparing target lookup: {err}"))
        })?;
        self.key_count = key_columns.len();
        self.key_table_ready = false;
        self.sql = Some(sql);
        Ok(())
    }

    fn lookup(&mut self, key: &KeyValues) -> LookupResult {
        let select = match self.bound() {
            Ok(sql) => sql.select.clone(),
            Err(err) => return LookupResult::Failed(err.to_string()),
        };
        let fetched = self.conn.prepare_cached(&select).and_then(|mut stmt| {
            let width = stmt.column_count();
            stmt.query_row(params_from_iter(key.as_slice()), |row| {
                (0..width)
                    .map(|idx| row.get_ref(idx).map(value_text))
                    .collect::<rusqlite::Result<Row>>()
            })
            .optional()
        });
        match fetched {
            Ok(Some(row)) => LookupResult::Found(row),
            Ok(None) => LookupResult::NotFound,
            Err(err) => LookupResult::Failed(err.to_string()),
        }
    }

    fn record_key(&mut self, key: &KeyValues) -> Result<()> {
        self.bound()?;
        self.ensure_key_table()?;
        let placeholders = (1..=self.key_count).map(|idx| format!("?{idx}")).join(", ");
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO temp.{SOURCE_KEY_TABLE} VALUES ({placeholders})"
        ))?;
        stmt.execute(params_from_iter(key.as_slice()))?;
        Ok(())
    }

    fn orphan_keys(&mut self) -> Result<Vec<KeyValues>> {
        let reverse = self.bound()?.reverse.clone();
        self.ensure_key_table()?;
        let mut stmt = self.conn.prepare(&reverse)?;
        let width = self.key_count;
        let keys = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|idx| row.get::<_, String>(idx).map(|v| v.trim().to_string()))
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map(KeyValues::new)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn query_text(&self) -> String {
        match &self.sql {
            Some(sql) => format!(
                "-- Lookup, one parameter per key column in key order\n{};\n\n-- Reverse audit\n{};\n",
                sql.select, sql.reverse
            ),
            None => String::new(),
        }
    }
}

/// A delimited file used as the target table. The whole file is indexed by
/// key on binding.
pub struct DelimitedTarget {
    path: PathBuf,
    delimiter: u8,
    encoding: &'static Encoding,
    physical: Vec<String>,
    records: Vec<Vec<String>>,
    projection: Vec<Option<usize>>,
    key_positions: Vec<usize>,
    index: HashMap<KeyValues, usize>,
    seen: HashSet<KeyValues>,
}

impl DelimitedTarget {
    /// The first record must name the columns; a `HEADER` marker is stripped.
    pub fn open(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let mut reader = io_utils::open_delimited_reader_from_path(path, delimiter)
            .map_err(|err| AuditError::target_error(err.to_string()))?;
        let mut record = csv::ByteRecord::new();
        let mut physical = Vec::new();
        let mut records = Vec::new();
        while reader.read_byte_record(&mut record)? {
            let fields = io_utils::decode_record(&record, encoding)
                .map_err(|err| AuditError::target_error(format!("{path:?}: {err}")))?;
            if physical.is_empty() {
                physical = strip_marker(&fields, "HEADER")
                    .unwrap_or(&fields[..])
                    .iter()
                    .map(|name| name.trim().to_string())
                    .collect();
                continue;
            }
            if strip_marker(&fields, "TRAILER").is_some() {
                continue;
            }
            records.push(fields);
        }
        if physical.is_empty() {
            return Err(AuditError::target_error(format!(
                "Target file {path:?} has no header line"
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            delimiter,
            encoding,
            physical,
            records,
            projection: Vec::new(),
            key_positions: Vec::new(),
            index: HashMap::new(),
            seen: HashSet::new(),
        })
    }

    fn position(&self, name: &str, role: &str) -> Result<usize> {
        self.physical
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| {
                AuditError::configuration(format!(
                    "{role} '{name}' does not exist in target file {:?}",
                    self.path
                ))
            })
    }

    fn key_of(&self, record: &[String]) -> KeyValues {
        KeyValues::new(
            self.key_positions
                .iter()
                .map(|&pos| record.get(pos).map(|v| v.trim().to_string()).unwrap_or_default())
                .collect(),
        )
    }
}

impl TargetProvider for DelimitedTarget {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn column_names(&self) -> &[String] {
        &self.physical
    }

    fn bind(&mut self, columns: &[String], key_columns: &[String]) -> Result<()> {
        let mut projection = Vec::with_capacity(columns.len());
        for column in columns {
            if is_ignored_name(column) {
                projection.push(None);
            } else {
                projection.push(Some(self.position(column, "Column")?));
            }
        }
        let key_positions = key_columns
            .iter()
            .map(|key| self.position(key, "Key column"))
            .collect::<Result<Vec<_>>>()?;
        self.projection = projection;
        self.key_positions = key_positions;
        self.index.clear();
        self.seen.clear();
        for (row_idx, record) in self.records.iter().enumerate() {
            let key = self.key_of(record);
            if self.index.contains_key(&key) {
                warn!(
                    "Target file {:?} repeats key ({key}); the first occurrence is used",
                    self.path
                );
                continue;
            }
            self.index.insert(key, row_idx);
        }
        debug!(
            "Indexed {} target row(s) from {:?} with delimiter '{}' and encoding {}",
            self.index.len(),
            self.path,
            self.delimiter as char,
            self.encoding.name()
        );
        Ok(())
    }

    fn lookup(&mut self, key: &KeyValues) -> LookupResult {
        let Some(&row_idx) = self.index.get(key) else {
            return LookupResult::NotFound;
        };
        let record = &self.records[row_idx];
        LookupResult::Found(
            self.projection
                .iter()
                .map(|position| match position {
                    Some(pos) => record.get(*pos).cloned(),
                    None => Some(String::new()),
                })
                .collect(),
        )
    }

    fn record_key(&mut self, key: &KeyValues) -> Result<()> {
        self.seen.insert(key.clone());
        Ok(())
    }

    fn orphan_keys(&mut self) -> Result<Vec<KeyValues>> {
        let mut orphans = self
            .index
            .iter()
            .filter(|(key, _)| !self.seen.contains(*key))
            .map(|(key, row_idx)| (*row_idx, key.clone()))
            .collect::<Vec<_>>();
        orphans.sort_by_key(|(row_idx, _)| *row_idx);
        Ok(orphans.into_iter().map(|(_, key)| key).collect())
    }

    fn query_text(&self) -> String {
        let keys = self
            .key_positions
            .iter()
            .filter_map(|&pos| self.physical.get(pos))
            .join(", ");
        format!(
            "-- Delimited target {:?}, looked up by ({keys})\n",
            self.path
        )
    }
}
