//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, query and row
//! mapping failures.

use std::path::PathBuf;
use thiserror::Error;

/// Database operation errors
///
/// Covers connection setup, schema initialization, statement execution and
/// the mapping of rows back into model types. Business rule violations are
/// reported by the service layer instead.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// A column could not be converted into its model type
    #[error("Failed to map column {column} of {table}: {reason}")]
    RowMapping {
        table: String,
        column: i32,
        reason: String,
    },

    /// Transaction could not be started or committed
    #[error("Transaction failed: {context}")]
    TransactionFailed { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create a row mapping error
    pub fn row_mapping(table: impl Into<String>, column: i32, reason: impl Into<String>) -> Self {
        Self::RowMapping {
            table: table.into(),
            column,
            reason: reason.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction_failed(context: impl Into<String>) -> Self {
        Self::TransactionFailed {
            context: context.into(),
        }
    }
}
