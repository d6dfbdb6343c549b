//! Logs every write call and its failure, if any
//!
//! Sits inside write pre-authorization, so rejected writes never reach it.

use crate::models::Principal;
use crate::query::{Query, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::service::{SaveMode, Service, WriteOptions};
use async_trait::async_trait;
use std::sync::Arc;

pub struct WriteLoggingService<K, V> {
    delegate: Arc<dyn Service<K, V>>,
}

impl<K, V> WriteLoggingService<K, V> {
    pub fn new(delegate: Arc<dyn Service<K, V>>) -> Self {
        Self { delegate }
    }
}

#[async_trait]
impl<K, V> Service<K, V> for WriteLoggingService<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn save_and_delete(
        &self,
        saves: Vec<V>,
        deletes: Vec<K>,
        mode: SaveMode,
        opts: &WriteOptions,
        principal: &Principal,
    ) -> Result<Vec<K>, NodeServiceError> {
        if !saves.is_empty() {
            tracing::info!(
                "save {} values (user: {}, mode: {:?})",
                saves.len(),
                principal,
                mode
            );
        }
        if !deletes.is_empty() {
            tracing::info!("delete {} values (user: {})", deletes.len(), principal);
        }

        let result = self
            .delegate
            .save_and_delete(saves, deletes, mode, opts, principal)
            .await;

        if let Err(e) = &result {
            tracing::error!("Write failed for {}: {}", principal, e);
        }
        result
    }

    async fn values(&self, query: &Query<K, V>, principal: &Principal) -> Result<Vec<V>, NodeServiceError> {
        self.delegate.values(query, principal).await
    }

    async fn keys(&self, query: &Query<K, V>, principal: &Principal) -> Result<Vec<K>, NodeServiceError> {
        self.delegate.keys(query, principal).await
    }

    async fn count(&self, spec: &SpecRef<K, V>, principal: &Principal) -> Result<usize, NodeServiceError> {
        self.delegate.count(spec, principal).await
    }

    async fn exists(&self, key: &K, principal: &Principal) -> Result<bool, NodeServiceError> {
        self.delegate.exists(key, principal).await
    }

    async fn get(&self, key: &K, principal: &Principal) -> Result<Option<V>, NodeServiceError> {
        self.delegate.get(key, principal).await
    }
}
