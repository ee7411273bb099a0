//! Error taxonomy for audit runs.
//!
//! Only setup and configuration problems surface as [`AuditError`]. Cell-level
//! parse failures and row-level lookup misses are part of the audit result and
//! never travel through this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    /// Malformed key configuration, unknown columns, or an unusable schema.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The source rows could not be opened or read.
    #[error("Source error: {0}")]
    Source(String),

    /// The target table could not be opened or prepared.
    #[error("Target error: {0}")]
    Target(String),

    /// The discrepancy report or an auxiliary output could not be written.
    #[error("Report error: {0}")]
    Report(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AuditError {
    pub fn configuration(message: impl Into<String>) -> Self {
        AuditError::Configuration(message.into())
    }

    pub fn source_error(message: impl Into<String>) -> Self {
        AuditError::Source(message.into())
    }

    pub fn target_error(message: impl Into<String>) -> Self {
        AuditError::Target(message.into())
    }

    pub fn report_error(message: impl Into<String>) -> Self {
        AuditError::Report(message.into())
    }

    /// Process exit code for an unrecoverable setup failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AuditError::Configuration(_) | AuditError::Yaml(_) => 2,
            AuditError::Source(_) => 3,
            AuditError::Target(_) | AuditError::Sqlite(_) => 4,
            AuditError::Report(_) => 5,
            AuditError::Io(_) | AuditError::Csv(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Maps an error chain to the exit code of the first [`AuditError`] in it.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<AuditError>())
        .map(AuditError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_distinguishes_setup_failures() {
        assert_eq!(AuditError::configuration("bad key").exit_code(), 2);
        assert_eq!(AuditError::source_error("missing").exit_code(), 3);
        assert_eq!(AuditError::target_error("no table").exit_code(), 4);
        assert_eq!(AuditError::report_error("disk full").exit_code(), 5);
    }

    #[test]
    fn exit_code_finds_audit_error_under_context() {
        let err: anyhow::Error = Err::<(), _>(AuditError::configuration("no key"))
            .context("Resolving key columns")
            .unwrap_err();
        assert_eq!(exit_code(&err), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("plain")), 1);
    }
}
