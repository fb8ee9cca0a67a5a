use thiserror::Error;

use crate::types::Version;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: Version,
        first: String,
        second: String,
    },

    #[error("malformed migration {unit}: {reason}")]
    MalformedUnit { unit: String, reason: String },

    /// A statement inside a migration failed; the whole unit was rolled back.
    #[error("migration {version} ({name}) failed at statement {index}: {source}")]
    StatementExecution {
        version: Version,
        name: String,
        /// 1-based position of the failing statement within the unit.
        index: usize,
        statement: String,
        source: rusqlite::Error,
    },

    #[error("migration tracker unavailable: {0}")]
    TrackerUnavailable(String),

    #[error("migration {version} is being claimed by another runner")]
    ConcurrentClaimConflict { version: Version },

    #[error(
        "migration {version} ({name}) is pending but version {highest} is already applied"
    )]
    OutOfOrder {
        version: Version,
        name: String,
        highest: Version,
    },

    #[error(
        "migration {version} ({name}) was modified after being applied \
         (recorded checksum {expected}, current {actual})"
    )]
    ChecksumMismatch {
        version: Version,
        name: String,
        expected: String,
        actual: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The migration version this error is about, if it concerns a single unit.
    pub fn version(&self) -> Option<Version> {
        match self {
            Error::DuplicateVersion { version, .. }
            | Error::StatementExecution { version, .. }
            | Error::ConcurrentClaimConflict { version }
            | Error::OutOfOrder { version, .. }
            | Error::ChecksumMismatch { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// Errors raised before any unit is executed.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::DuplicateVersion { .. }
                | Error::MalformedUnit { .. }
                | Error::OutOfOrder { .. }
                | Error::ChecksumMismatch { .. }
                | Error::Config(_)
        )
    }
}
