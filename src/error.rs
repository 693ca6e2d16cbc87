use std::fmt;

use thiserror::Error;

/// The kind of operation that needed a table, used in `MissingTable` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Merge,
    BulkCopy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
            Operation::Merge => write!(f, "merge"),
            Operation::BulkCopy => write!(f, "bulk copy"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Table '{table}' needs to exist for testing ({operation})")]
    MissingTable { table: String, operation: Operation },

    #[error("{required} source tables required for testing a {required} source-table statement")]
    SourceCountMismatch { required: usize },

    #[error("Transport fault: {0}")]
    TransportFault(String),

    #[error("Unsupported value type '{type_name}' for field '{field}', cannot convert to SQL value")]
    UnsupportedValueType { field: String, type_name: String },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Bulk copy into '{table}' failed on batch {batch} after {attempts} attempt(s): {source}")]
    BulkCopyFailed {
        table: String,
        batch: usize,
        attempts: usize,
        rows_written: u64,
        sample: Option<String>,
        source: Box<DbError>,
    },

    #[error("Failed to drop temp table '{table}': {source}")]
    TempTableDrop { table: String, source: Box<DbError> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Message fragments drivers use for a dropped or reset connection.
const TRANSIENT_SIGNATURES: [&str; 2] = ["forcibly closed", "transport-level"];

impl DbError {
    /// Whether the error is a connection hiccup worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::TransportFault(_) => true,
            DbError::BackendError(msg) => TRANSIENT_SIGNATURES.iter().any(|s| msg.contains(s)),
            _ => false,
        }
    }

    pub fn missing_table(table: impl Into<String>, operation: Operation) -> Self {
        DbError::MissingTable {
            table: table.into(),
            operation,
        }
    }
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::ConfigError(err.to_string())
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                DbError::TransportFault(err.to_string())
            }
            _ => DbError::BackendError(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::InternalError(format!("blocking task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DbError::missing_table("LocalTable", Operation::Write);
        assert_eq!(
            err.to_string(),
            "Table 'LocalTable' needs to exist for testing (write)"
        );

        let err = DbError::SourceCountMismatch { required: 3 };
        assert_eq!(
            err.to_string(),
            "3 source tables required for testing a 3 source-table statement"
        );

        let err = DbError::UnsupportedValueType {
            field: "Blob".to_string(),
            type_name: "Uuid".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported value type 'Uuid' for field 'Blob', cannot convert to SQL value"
        );

        let err = DbError::InvalidArgument("batch size must be at least 1".to_string());
        assert_eq!(err.to_string(), "Invalid argument: batch size must be at least 1");
    }

    #[test]
    fn test_bulk_copy_failed_wraps_source() {
        let err = DbError::BulkCopyFailed {
            table: "Dest".to_string(),
            batch: 2,
            attempts: 3,
            rows_written: 100,
            sample: Some("1, 'a'".to_string()),
            source: Box::new(DbError::TransportFault("connection reset".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Bulk copy into 'Dest' failed on batch 2 after 3 attempt(s): Transport fault: connection reset"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transient_classification() {
        assert!(DbError::TransportFault("reset".to_string()).is_transient());
        assert!(DbError::BackendError(
            "An existing connection was forcibly closed by the remote host".to_string()
        )
        .is_transient());
        assert!(DbError::BackendError(
            "A transport-level error has occurred when receiving results".to_string()
        )
        .is_transient());
        assert!(!DbError::BackendError("syntax error near FROM".to_string()).is_transient());
        assert!(!DbError::missing_table("t", Operation::Read).is_transient());
    }

    #[test]
    fn test_sqlite_errors_map_to_backend_error() {
        let err: DbError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, DbError::BackendError(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = DbError::OperationNotSupported("DELETE via temp table".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Operation not supported: DELETE via temp table\"");
    }
}
