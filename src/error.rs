// ⚠️ Error Taxonomy - file-scoped, row-scoped and fatal failures
//
// File-scoped errors skip the file, row-scoped events are absorbed,
// only SinkUnavailable stops the run.

use crate::schema::EntityKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// FILE-SCOPED AND FATAL ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no candidate encoding could decode {path}")]
    EncodingUndetectable { path: PathBuf },

    #[error("{entity} file is missing required columns: {}", missing_fields.join(", "))]
    MissingRequiredColumns {
        entity: EntityKind,
        missing_fields: Vec<String>,
    },

    #[error("could not determine year/quarter for {path}")]
    PeriodUndetermined { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse delimited text in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("store unavailable: {0}")]
    SinkUnavailable(#[from] rusqlite::Error),
}

impl IngestError {
    /// Only store-level failures abort a run; everything else skips one file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::SinkUnavailable(_))
    }

    /// Short machine-friendly tag used in run summaries
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::EncodingUndetectable { .. } => "EncodingUndetectable",
            IngestError::MissingRequiredColumns { .. } => "MissingRequiredColumns",
            IngestError::PeriodUndetermined { .. } => "PeriodUndetermined",
            IngestError::Io { .. } => "Io",
            IngestError::Csv { .. } => "Csv",
            IngestError::SinkUnavailable(_) => "SinkUnavailable",
        }
    }
}

/// Decide whether a SQLite error means the store itself is gone (fatal)
/// or only that one row was rejected.
pub fn is_sink_failure(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;

    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::OutOfMemory
                | ErrorCode::PermissionDenied
                | ErrorCode::FileLockingProtocolFailed
        ),
        rusqlite::Error::SqliteSingleThreadedMode | rusqlite::Error::InvalidPath(_) => true,
        _ => false,
    }
}

// ============================================================================
// ROW-SCOPED EVENTS (never escalated)
// ============================================================================

/// A monetary cell that could not be parsed and was stored as 0.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueParseFallback {
    pub line: usize,
    pub column: String,
    pub raw: String,
}

/// A row that was excluded from its file's commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPersistFailure {
    pub line: usize,
    pub registry_id: Option<String>,
    pub reason: String,
}
