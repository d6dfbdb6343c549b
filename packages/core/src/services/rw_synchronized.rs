//! Process-wide read/write locking
//!
//! Writes hold the exclusive lock, reads the shared one. Both give up with
//! `LockTimeout` after the configured wait. The index refresh barrier of a
//! synchronous write runs after the exclusive lock is released: the inner
//! call is made with `sync` off and the refresh awaited here.

use crate::index::Index;
use crate::models::Principal;
use crate::query::{Query, SpecRef};
use crate::services::error::NodeServiceError;
use crate::services::service::{SaveMode, Service, WriteOptions};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct ReadWriteSynchronizedService<K, V> {
    delegate: Arc<dyn Service<K, V>>,
    lock: RwLock<()>,
    lock_timeout: Duration,
    index: Option<Arc<dyn Index<K, V>>>,
    refresh_timeout: Duration,
}

impl<K, V> ReadWriteSynchronizedService<K, V> {
    pub fn new(delegate: Arc<dyn Service<K, V>>, lock_timeout: Duration) -> Self {
        Self {
            delegate,
            lock: RwLock::new(()),
            lock_timeout,
            index: None,
            refresh_timeout: Duration::ZERO,
        }
    }

    /// Refresh `index` after releasing the lock of a synchronous write
    pub fn with_refresh_barrier(mut self, index: Arc<dyn Index<K, V>>, refresh_timeout: Duration) -> Self {
        self.index = Some(index);
        self.refresh_timeout = refresh_timeout;
        self
    }

    async fn read_lock(&self) -> Result<RwLockReadGuard<'_, ()>, NodeServiceError> {
        tokio::time::timeout(self.lock_timeout, self.lock.read())
            .await
            .map_err(|_| {
                NodeServiceError::lock_timeout(format!(
                    "read lock not acquired within {} ms",
                    self.lock_timeout.as_millis()
                ))
            })
    }

    async fn write_lock(&self) -> Result<RwLockWriteGuard<'_, ()>, NodeServiceError> {
        tokio::time::timeout(self.lock_timeout, self.lock.write())
            .await
            .map_err(|_| {
                NodeServiceError::lock_timeout(format!(
                    "write lock not acquired within {} ms",
                    self.lock_timeout.as_millis()
                ))
            })
    }
}

#[async_trait]
impl<K, V> Service<K, V> for ReadWriteSynchronizedService<K, V>
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
        let inner = opts.clone().without_sync();
        let keys = {
            let _guard = self.write_lock().await?;
            self.delegate
                .save_and_delete(saves, deletes, mode, &inner, principal)
                .await?
        };

        if opts.sync {
            if let Some(index) = &self.index {
                index.await_refresh(self.refresh_timeout).await?;
            }
        }
        Ok(keys)
    }

    async fn values(&self, query: &Query<K, V>, principal: &Principal) -> Result<Vec<V>, NodeServiceError> {
        let _guard = self.read_lock().await?;
        self.delegate.values(query, principal).await
    }

    async fn keys(&self, query: &Query<K, V>, principal: &Principal) -> Result<Vec<K>, NodeServiceError> {
        let _guard = self.read_lock().await?;
        self.delegate.keys(query, principal).await
    }

    async fn count(&self, spec: &SpecRef<K, V>, principal: &Principal) -> Result<usize, NodeServiceError> {
        let _guard = self.read_lock().await?;
        self.delegate.count(spec, principal).await
    }

    async fn exists(&self, key: &K, principal: &Principal) -> Result<bool, NodeServiceError> {
        let _guard = self.read_lock().await?;
        self.delegate.exists(key, principal).await
    }

    async fn get(&self, key: &K, principal: &Principal) -> Result<Option<V>, NodeServiceError> {
        let _guard = self.read_lock().await?;
        self.delegate.get(key, principal).await
    }
}
