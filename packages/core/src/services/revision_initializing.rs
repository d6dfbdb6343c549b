//! Allocates one revision per tracked write call

use crate::models::Principal;
use crate::query::{Query, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::revision_service::RevisionService;
use crate::services::service::{SaveMode, Service, WriteOptions};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RevisionInitializingService<K, V> {
    delegate: Arc<dyn Service<K, V>>,
    revisions: Arc<RevisionService>,
    track_revisions: bool,
}

impl<K, V> RevisionInitializingService<K, V> {
    pub fn new(
        delegate: Arc<dyn Service<K, V>>,
        revisions: Arc<RevisionService>,
        track_revisions: bool,
    ) -> Self {
        Self {
            delegate,
            revisions,
            track_revisions,
        }
    }
}

#[async_trait]
impl<K, V> Service<K, V> for RevisionInitializingService<K, V>
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
        let nothing_to_write = saves.is_empty() && deletes.is_empty();
        if !self.track_revisions || opts.revision.is_some() || nothing_to_write {
            return self
                .delegate
                .save_and_delete(saves, deletes, mode, opts, principal)
                .await;
        }

        let revision = self.revisions.create(&principal.username).await?;
        self.delegate
            .save_and_delete(saves, deletes, mode, &opts.with_revision(revision.number), principal)
            .await
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
