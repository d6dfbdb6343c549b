//! Index Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Stored payload could not be decoded; the index must be rebuilt
    #[error("Corrupt index document {key}: {reason}")]
    CorruptDocument { key: String, reason: String },

    /// Payload could not be encoded
    #[error("Failed to encode index document {key}: {reason}")]
    Encoding { key: String, reason: String },

    /// Pending changes did not become visible in time
    #[error("Index refresh did not complete within {timeout_ms} ms")]
    RefreshTimeout { timeout_ms: u128 },

    #[error("Index is closed")]
    Closed,
}

impl IndexError {
    pub fn corrupt_document(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptDocument {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn encoding(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encoding {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
