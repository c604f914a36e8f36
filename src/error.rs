use std::path::PathBuf;
use thiserror::Error;

/// Domain errors raised by the data-preparation functions.
///
/// Orchestration code wraps these in `anyhow::Error` with file context.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("missing required column(s) for `{schema}`: {}", .missing.join(", "))]
    MissingColumns { schema: String, missing: Vec<String> },

    #[error("column map is invalid: {0}")]
    ColumnMap(String),

    #[error("line {line}: expected at most {expected} fields, found {found}")]
    RaggedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("headers do not match: {left:?} vs {right:?}")]
    HeaderMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    #[error("no header row matching `{0}` was found")]
    HeaderNotFound(String),

    #[error("first column of the {0} file must be ID")]
    MissingIdColumn(String),

    #[error("job number must be 5 digits, got `{0}`")]
    InvalidJobNumber(String),

    #[error("week code must look like W.S (week 1-52, sub-week 1-99), got `{0}`")]
    InvalidWeekCode(String),

    #[error("unexpected file {}: {reason}", .path.display())]
    UnexpectedFile { path: PathBuf, reason: String },

    #[error("archive entry `{0}` escapes the extraction directory")]
    UnsafeArchivePath(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
