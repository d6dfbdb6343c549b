//! The generic service contract
//!
//! Every layer of the node pipeline, from the repository up to write
//! pre-authorization, implements [`Service`]. Implementors provide the batch
//! `save_and_delete` plus the read operations; single-item and streaming
//! variants are derived from them.

use crate::models::Principal;
use crate::query::{Query, SpecRef};
use crate::services::error::NodeServiceError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// How a save treats existing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveMode {
    /// Fail if the key exists
    Insert,
    /// Fail if the key does not exist
    Update,
    /// Insert or update depending on existence
    Upsert,
}

/// Per-call write switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Block until the index shows this write before returning
    pub sync: bool,
    /// Revision to record the write under; allocated when `None`
    pub revision: Option<i64>,
    /// Namespace for generated URIs, overriding graph and default namespaces
    pub uri_namespace: Option<String>,
    pub generate_codes: bool,
    pub generate_uris: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sync: true,
            revision: None,
            uri_namespace: None,
            generate_codes: true,
            generate_uris: true,
        }
    }
}

impl WriteOptions {
    pub fn with_revision(&self, revision: i64) -> Self {
        Self {
            revision: Some(revision),
            ..self.clone()
        }
    }

    pub fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    pub fn with_uri_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.uri_namespace = Some(namespace.into());
        self
    }

    pub fn without_generated_identifiers(mut self) -> Self {
        self.generate_codes = false;
        self.generate_uris = false;
        self
    }
}

#[async_trait]
pub trait Service<K, V>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Delete `deletes`, then save `saves`, as one logical write
    async fn save_and_delete(
        &self,
        saves: Vec<V>,
        deletes: Vec<K>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<K>, NodeServiceError>;

    async fn values(
        &self,
        query: &Query<K, V>,
        principal: &Principal,
    ) -> Result<Vec<V>, NodeServiceError>;

    async fn keys(
        &self,
        query: &Query<K, V>,
        principal: &Principal,
    ) -> Result<Vec<K>, NodeServiceError>;

    async fn count(
        &self,
        spec: &SpecRef<K, V>,
        principal: &Principal,
    ) -> Result<usize, NodeServiceError>;

    async fn exists(&self, key: &K, principal: &Principal) -> Result<bool, NodeServiceError>;

    async fn get(&self, key: &K, principal: &Principal) -> Result<Option<V>, NodeServiceError>;

    async fn save(
        &self,
        value: V,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<K, NodeServiceError> {
        let mut keys = self
            .save_and_delete(vec![value], Vec::new(), mode, opts, principal)
            .await?;
        keys.pop()
            .ok_or_else(|| NodeServiceError::illegal_state("save returned no key"))
    }

    async fn save_all(
        &self,
        values: Vec<V>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<K>, NodeServiceError> {
        self.save_and_delete(values, Vec::new(), mode, opts, principal)
            .await
    }

    /// Drains the stream, then saves everything as one batch
    async fn save_stream(
        &self,
        values: BoxStream<'_, V>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<K>, NodeServiceError> {
        let values: Vec<V> = values.collect().await;
        self.save_all(values, mode, opts, principal).await
    }

    async fn delete(
        &self,
        key: K,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<(), NodeServiceError> {
        self.delete_all(vec![key], opts, principal).await
    }

    async fn delete_all(
        &self,
        keys: Vec<K>,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<(), NodeServiceError> {
        self.save_and_delete(Vec::new(), keys, SaveMode::Upsert, opts, principal)
            .await
            .map(|_| ())
    }

    async fn delete_stream(
        &self,
        keys: BoxStream<'_, K>,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<(), NodeServiceError> {
        let keys: Vec<K> = keys.collect().await;
        self.delete_all(keys, opts, principal).await
    }

    async fn values_stream(
        &self,
        query: &Query<K, V>,
        principal: &Principal,
    ) -> Result<BoxStream<'static, V>, NodeServiceError> {
        let values = self.values(query, principal).await?;
        Ok(stream::iter(values).boxed())
    }

    async fn keys_stream(
        &self,
        query: &Query<K, V>,
        principal: &Principal,
    ) -> Result<BoxStream<'static, K>, NodeServiceError> {
        let keys = self.keys(query, principal).await?;
        Ok(stream::iter(keys).boxed())
    }
}
