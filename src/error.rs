// ⚠️ Error Taxonomy
// File-level failures abort a run, record-level failures go to the dead-letter log

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The document itself could not be read as XML. Aborts the whole file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalParseError {
    #[error("input is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("malformed XML at byte {position}: {message}")]
    Malformed { position: usize, message: String },
}

/// A single record failed validation. Never escalates past the record.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum RecordError {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("unparseable timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("invalid amount `{0}`")]
    InvalidAmount(String),

    /// Transaction id already seen earlier in the same file
    #[error("duplicate transaction id `{0}` in file")]
    DuplicateId(String),
}

impl RecordError {
    /// Stable reason code written to the dead-letter log
    pub fn code(&self) -> &'static str {
        match self {
            RecordError::MissingField(_) => "missing_field",
            RecordError::InvalidTimestamp(_) => "invalid_timestamp",
            RecordError::InvalidAmount(_) => "invalid_amount",
            RecordError::DuplicateId(_) => "duplicate_id",
        }
    }
}

/// All errors produced by the pipeline outside of per-record validation.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    FatalParse(#[from] FatalParseError),

    /// A batch failed to commit. Earlier batches stay committed.
    #[error("failed to commit batch {batch} of {file}: {source}")]
    StorageCommit {
        file: String,
        batch: usize,
        #[source]
        source: rusqlite::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid run state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::pipeline::RunState,
        to: crate::pipeline::RunState,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EtlError>;
