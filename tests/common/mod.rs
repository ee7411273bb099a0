#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Joins `name` onto the workspace root without creating anything.
    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.file(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes raw bytes, for inputs that are not valid text.
    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.file(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file bytes");
        path
    }

    /// Creates a SQLite database under the workspace by running `script`.
    pub fn sqlite(&self, name: &str, script: &str) -> PathBuf {
        let path = self.file(name);
        let conn = Connection::open(&path).expect("open sqlite database");
        conn.execute_batch(script).expect("seed sqlite database");
        path
    }
}

/// The `orders` target table shared by the scenario tests.
pub const ORDERS_DB: &str = "
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        customer TEXT,
        amount REAL,
        placed TEXT
    );
    INSERT INTO orders VALUES (1, 'Alice', 12.50, '2008-01-31');
    INSERT INTO orders VALUES (2, 'Bob', 7.25, '2008-02-14');
    INSERT INTO orders VALUES (3, 'Carol', 100, '2008-03-01');
";

/// Report lines that carry findings, i.e. everything between the heading and
/// the `End of data.` footer.
pub fn finding_lines(report: &str) -> Vec<String> {
    report
        .lines()
        .skip(3)
        .take_while(|line| !line.starts_with("End of data.") && !line.starts_with("Maximum "))
        .map(str::to_string)
        .collect()
}
