//! Source rows: a delimited flat file or the result of a SQL script.
//!
//! Both are consumed one row at a time through [`RowSource::next_row`].

use std::{collections::VecDeque, io::Read, path::Path};

use csv::ByteRecord;
use encoding_rs::Encoding;
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags, types::ValueRef};

use crate::{
    error::{AuditError, Result},
    io_utils::{self, strip_marker},
};

/// One row of raw cells. `None` marks a cell the source did not supply.
pub type Row = Vec<Option<String>>;

pub trait RowSource {
    /// Column names in source order; empty when the source has none.
    fn column_names(&self) -> &[String];

    /// Next data row, or `None` at end of input.
    fn next_row(&mut self) -> Result<Option<Row>>;

    fn describe(&self) -> String;

    /// Fields of a `TRAILER` record, once one has been read.
    fn trailer(&self) -> Option<&[String]> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct DelimitedOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    /// First record holds the column names.
    pub has_header: bool,
    /// Names supplied by metadata; used when the file carries none.
    pub column_names: Vec<String>,
}

pub struct DelimitedSource<R: Read> {
    reader: csv::Reader<R>,
    encoding: &'static Encoding,
    column_names: Vec<String>,
    record: ByteRecord,
    pending: Option<Vec<String>>,
    trailer: Option<Vec<String>>,
    label: String,
}

impl DelimitedSource<Box<dyn Read>> {
    pub fn open(path: &Path, options: &DelimitedOptions) -> Result<Self> {
        let reader = io_utils::open_delimited_reader_from_path(path, options.delimiter)?;
        Self::from_reader(reader, options, path.display().to_string())
    }
}

impl<R: Read> DelimitedSource<R> {
    pub fn from_reader(
        reader: csv::Reader<R>,
        options: &DelimitedOptions,
        label: impl Into<String>,
    ) -> Result<Self> {
        let mut source = Self {
            reader,
            encoding: options.encoding,
            column_names: options.column_names.clone(),
            record: ByteRecord::new(),
            pending: None,
            trailer: None,
            label: label.into(),
        };
        let Some(first) = source.read_fields()? else {
            if options.has_header {
                return Err(AuditError::source_error(format!(
                    "{} is empty; expected a header line",
                    source.label
                )));
            }
            return Ok(source);
        };
        let marked = strip_marker(&first, "HEADER").map(<[String]>::to_vec);
        if options.has_header {
            let names = marked.unwrap_or(first);
            source.check_against_metadata(&names);
            source.column_names = names.iter().map(|n| n.trim().to_string()).collect();
        } else if let Some(names) = marked {
            source.check_against_metadata(&names);
            if source.column_names.is_empty() {
                source.column_names = names.iter().map(|n| n.trim().to_string()).collect();
            }
        } else {
            source.pending = Some(first);
        }
        debug!("Source columns: {:?}", source.column_names);
        Ok(source)
    }

    fn check_against_metadata(&self, names: &[String]) {
        if self.column_names.is_empty() {
            return;
        }
        for (idx, (found, expected)) in names.iter().zip(&self.column_names).enumerate() {
            if !found.trim().eq_ignore_ascii_case(expected.trim()) {
                warn!(
                    "Header column {} is '{}' but the metadata names it '{}'",
                    idx + 1,
                    found.trim(),
                    expected
                );
            }
        }
        if names.len() != self.column_names.len() {
            warn!(
                "Header lists {} column(s); the metadata lists {}",
                names.len(),
                self.column_names.len()
            );
        }
    }

    fn read_fields(&mut self) -> Result<Option<Vec<String>>> {
        if !self.reader.read_byte_record(&mut self.record)? {
            return Ok(None);
        }
        let (fields, had_errors) = io_utils::decode_record_lossy(&self.record, self.encoding);
        if had_errors {
            let line = self.record.position().map_or(0, |position| position.line());
            warn!(
                "{} line {}: undecodable bytes for encoding {} were replaced",
                self.label,
                line,
                self.encoding.name()
            );
        }
        Ok(Some(fields))
    }
}

impl<R: Read> RowSource for DelimitedSource<R> {
    fn column_names(&self) -> &[String] {
        &self.column_names
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            let fields = match self.pending.take() {
                Some(fields) => fields,
                None => match self.read_fields()? {
                    Some(fields) => fields,
                    None => return Ok(None),
                },
            };
            if let Some(rest) = strip_marker(&fields, "TRAILER") {
                info!("Trailer record found: {}", rest.join("|"));
                self.trailer = Some(rest.to_vec());
                continue;
            }
            return Ok(Some(fields.into_iter().map(Some).collect()));
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn trailer(&self) -> Option<&[String]> {
        self.trailer.as_deref()
    }
}

const SQL_PAGE_SIZE: i64 = 1000;

/// Rows of the last statement of a SQL script, fetched a page at a time.
pub struct SqlSource {
    conn: Connection,
    query: String,
    column_names: Vec<String>,
    buffer: VecDeque<Row>,
    offset: i64,
    exhausted: bool,
    label: String,
}

impl SqlSource {
    pub fn open(database: &Path, script: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            database,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|err| {
            AuditError::source_error(format!("Opening source database {database:?}: {err}"))
        })?;
        Self::from_connection(conn, script, database.display().to_string())
    }

    /// Runs every statement but the last, then pages through the last one.
    pub fn from_connection(conn: Connection, script: &str, label: impl Into<String>) -> Result<Self> {
        let mut statements = split_statements(script);
        let Some(query) = statements.pop() else {
            return Err(AuditError::source_error("The source query script is empty"));
        };
        for statement in &statements {
            debug!("Preparing source with: {statement}");
            conn.execute_batch(statement).map_err(|err| {
                AuditError::source_error(format!("Running '{statement}': {err}"))
            })?;
        }
        let column_names = {
            let stmt = conn.prepare(&query).map_err(|err| {
                AuditError::source_error(format!("Preparing source query: {err}"))
            })?;
            stmt.column_names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        debug!("Source query: {query}");
        Ok(Self {
            conn,
            query,
            column_names,
            buffer: VecDeque::new(),
            offset: 0,
            exhausted: false,
            label: label.into(),
        })
    }

    fn fetch_page(&mut self) -> rusqlite::Result<()> {
        let paged = format!("SELECT * FROM ({}) LIMIT ?1 OFFSET ?2", self.query);
        let mut stmt = self.conn.prepare_cached(&paged)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params![SQL_PAGE_SIZE, self.offset])?;
        let mut fetched = 0i64;
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                // SQL nulls read as empty text.
                cells.push(Some(value_text(row.get_ref(idx)?).unwrap_or_default()));
            }
            self.buffer.push_back(cells);
            fetched += 1;
        }
        self.offset += fetched;
        if fetched < SQL_PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl RowSource for SqlSource {
    fn column_names(&self) -> &[String] {
        &self.column_names
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().map_err(|err| {
                AuditError::source_error(format!(
                    "Reading source rows at offset {}: {err}",
                    self.offset
                ))
            })?;
        }
        Ok(self.buffer.pop_front())
    }

    fn describe(&self) -> String {
        format!("query on {}", self.label)
    }
}

/// Text rendering of a SQLite value; `None` for SQL null.
pub fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Splits a script on `;` outside quotes and drops empty statements.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in script.chars() {
        match (quote, ch) {
            (None, ';') => {
                statements.push(std::mem::take(&mut current));
                continue;
            }
            (None, '\'' | '"') => quote = Some(ch),
            (Some(open), _) if open == ch => quote = None,
            _ => {}
        }
        current.push(ch);
    }
    statements.push(current);
    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
