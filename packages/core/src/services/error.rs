//! Service Layer Error Types
//!
//! This module defines the error taxonomy every service in the pipeline
//! reports through.
//!
//! - `NotFound`, `BadRequest`, `AccessDenied`: caller errors, surfaced before
//!   any row is written where possible
//! - `LockTimeout`: bounded wait exceeded; the only retryable kind
//! - `IllegalState`: broken internal invariant or misconfiguration; fatal

use crate::db::DatabaseError;
use crate::index::IndexError;
use crate::query::QueryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeServiceError {
    /// Required entity or attribute slot is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request violates the type definition or the save mode
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Permission evaluator rejected the operation
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Lock or index refresh wait exceeded
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Internal invariant violation
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    DatabaseError(#[from] DatabaseError),

    /// Index operation failed
    #[error("Index operation failed: {0}")]
    IndexError(IndexError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl NodeServiceError {
    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create an access denied error
    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    /// Create a lock timeout error
    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Self::LockTimeout(msg.into())
    }

    /// Create an illegal state error
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// Create a serialization error
    pub fn serialization_error(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Whether the caller may retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}

impl From<IndexError> for NodeServiceError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::RefreshTimeout { .. } => Self::LockTimeout(e.to_string()),
            other => Self::IndexError(other),
        }
    }
}

impl From<QueryError> for NodeServiceError {
    fn from(e: QueryError) -> Self {
        Self::IllegalState(e.to_string())
    }
}
