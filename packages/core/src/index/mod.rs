//! Search Index
//!
//! The index is a derived, disposable projection of the node store. It is
//! never a source of truth: every document can be rebuilt from the
//! repository at any time.
//!
//! # Architecture
//!
//! - [`DocumentConverter`]: projects a value into a [`Document`] and back
//! - [`Index`]: buffered writes, explicit refresh, query execution
//! - [`MemoryIndex`]: the in-process implementation

mod converter;
mod document;
mod error;
mod memory;

pub use converter::NodeDocumentConverter;
pub use document::Document;
pub use error::IndexError;
pub use memory::MemoryIndex;

use crate::query::{SearchQuery, Sort};
use async_trait::async_trait;
use std::time::Duration;

pub trait DocumentConverter<K, V>: Send + Sync {
    /// Stable document key for `key`
    fn document_key(&self, key: &K) -> String;

    fn to_document(&self, key: &K, value: &V) -> Result<Document, IndexError>;

    /// Rewrite query terms into the form documents store them in
    fn normalize_query(&self, query: &SearchQuery) -> SearchQuery {
        query.clone()
    }

    /// Rebuild the value from the document payload
    fn from_document(&self, doc: &Document) -> Result<(K, V), IndexError>;
}

/// Search index over `(K, V)` entries
///
/// Writes are buffered and become visible to queries only after a refresh.
#[async_trait]
pub trait Index<K, V>: Send + Sync {
    /// Add or overwrite documents
    async fn index(&self, entries: Vec<(K, V)>) -> Result<(), IndexError>;

    async fn delete(&self, keys: &[K]) -> Result<(), IndexError>;

    /// Make all buffered writes visible
    async fn refresh(&self) -> Result<(), IndexError>;

    /// `refresh` bounded by `timeout`
    async fn await_refresh(&self, timeout: Duration) -> Result<(), IndexError>;

    async fn values(
        &self,
        query: &SearchQuery,
        sort: &[Sort],
        max: Option<usize>,
    ) -> Result<Vec<(K, V)>, IndexError>;

    async fn keys(
        &self,
        query: &SearchQuery,
        sort: &[Sort],
        max: Option<usize>,
    ) -> Result<Vec<K>, IndexError>;

    async fn count(&self, query: &SearchQuery) -> Result<usize, IndexError>;

    async fn is_empty(&self) -> Result<bool, IndexError>;

    /// Stop background work and reject further calls
    async fn close(&self);
}
