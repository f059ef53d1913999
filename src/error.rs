//! Error types for sqlkeep.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver errors are carried through unchanged so callers can match on the
//! underlying `sqlx::Error`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("unsupported dialect '{dialect}'")]
    UnsupportedDialect { dialect: String },

    #[error("could not register sql dialect '{dialect}' for traces, error: {message}")]
    DriverRegistration { dialect: String, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("SQL database is not connected: {reason}")]
    NotConnected { reason: String },

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("could not create migration ledger table: {source}")]
    LedgerTable {
        #[source]
        source: Box<DbError>,
    },

    #[error("could not begin migration transaction for {datastore}: {source}")]
    TransactionBegin {
        datastore: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("migration {version} failed: {source}")]
    MigrationFailed {
        version: i64,
        #[source]
        source: Box<DbError>,
    },

    #[error("could not commit migration {version} for {datastore}: {source}")]
    Commit {
        version: i64,
        datastore: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Key-value store error: {message}")]
    KeyValue { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unsupported dialect error.
    pub fn unsupported_dialect(dialect: impl Into<String>) -> Self {
        Self::UnsupportedDialect {
            dialect: dialect.into(),
        }
    }

    /// Create a driver registration error.
    pub fn driver_registration(dialect: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DriverRegistration {
            dialect: dialect.into(),
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a not connected error.
    pub fn not_connected(reason: impl Into<String>) -> Self {
        Self::NotConnected {
            reason: reason.into(),
        }
    }

    pub fn ledger_table(source: DbError) -> Self {
        Self::LedgerTable {
            source: Box::new(source),
        }
    }

    pub fn transaction_begin(datastore: impl Into<String>, source: DbError) -> Self {
        Self::TransactionBegin {
            datastore: datastore.into(),
            source: Box::new(source),
        }
    }

    pub fn migration_failed(version: i64, source: DbError) -> Self {
        Self::MigrationFailed {
            version,
            source: Box::new(source),
        }
    }

    pub fn commit(version: i64, datastore: impl Into<String>, source: DbError) -> Self {
        Self::Commit {
            version,
            datastore: datastore.into(),
            source: Box::new(source),
        }
    }

    /// Create a key-value store error.
    pub fn key_value(message: impl Into<String>) -> Self {
        Self::KeyValue {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Configuration errors (unknown dialect, missing driver) are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::NotConnected { .. } => true,
            Self::Sql(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_unsupported_dialect_display() {
        let err = DbError::unsupported_dialect("mssql");
        assert_eq!(err.to_string(), "unsupported dialect 'mssql'");
    }

    #[test]
    fn test_driver_registration_display() {
        let err = DbError::driver_registration("mysql", "sql: unknown driver \"mysql\"");
        assert!(
            err.to_string()
                .contains("could not register sql dialect 'mysql' for traces")
        );
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connection("refused", "Check that the server is running");
        assert_eq!(err.suggestion(), Some("Check that the server is running"));
        assert_eq!(DbError::internal("boom").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::Sql(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!DbError::unsupported_dialect("abc").is_retryable());
        assert!(!DbError::driver_registration("mysql", "unknown").is_retryable());
    }

    #[test]
    fn test_sql_error_is_transparent() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.to_string(), sqlx::Error::RowNotFound.to_string());
    }

    #[test]
    fn test_migration_failed_keeps_source() {
        let err = DbError::migration_failed(3, DbError::invalid_input("bad column"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Invalid input: bad column"));
        assert!(err.to_string().starts_with("migration 3 failed"));
    }
}
